//! Operational semantics: enabled communications and small-step reduction.
//!
//! A communication is enabled when one role's send and the partner's
//! matching receive are both available at their current states. Reduction
//! advances exactly those two roles, then closes internal transitions.
//!
//! Internal closure advances a role only while every outgoing transition of
//! its current state is internal (the first in transition order is taken).
//! Mixed states keep their observables; their internal markers are inert.

use crate::cfsm::{LocalAction, StateId, TransitionId};
use crate::error::ProtocolError;
use crate::semantics::context::TypingContext;
use crate::types::{MessageSig, RoleName};
use std::collections::HashSet;
use std::sync::Arc;

/// One enabled communication: matching send and receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnabledCommunication {
    /// Sending role.
    pub sender: RoleName,
    /// Receiving role.
    pub receiver: RoleName,
    /// The message.
    pub message: MessageSig,
    /// The sender's transition.
    pub send_transition: TransitionId,
    /// The receiver's transition.
    pub receive_transition: TransitionId,
}

/// Bounds for reduction.
#[derive(Debug, Clone)]
pub struct ReducerConfig {
    /// Default bound for `execute_to_completion`.
    pub max_steps: usize,
    /// Guard on internal-closure chains per role.
    pub max_tau_steps: usize,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            max_steps: 10_000,
            max_tau_steps: 1_024,
        }
    }
}

/// Small-step reducer over typing contexts.
#[derive(Debug, Clone, Default)]
pub struct ContextReducer {
    /// Bounds.
    pub config: ReducerConfig,
}

/// Build the initial context for a session and close internal transitions.
pub fn create_initial_context(
    machines: Vec<(RoleName, Arc<crate::cfsm::Cfsm>)>,
    session: impl Into<String>,
) -> TypingContext {
    let reducer = ContextReducer::default();
    reducer.tau_closure(&TypingContext::new(session, machines))
}

impl ContextReducer {
    /// A reducer with default bounds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the context is terminal.
    pub fn is_terminal(&self, ctx: &TypingContext) -> bool {
        ctx.is_terminal()
    }

    /// Whether the context is stuck: non-terminal with nothing enabled.
    pub fn is_stuck(&self, ctx: &TypingContext) -> bool {
        !ctx.is_terminal() && self.find_enabled_communications(ctx).is_empty()
    }

    /// Every enabled communication, roles iterated in definition order and
    /// transitions in stored order.
    pub fn find_enabled_communications(&self, ctx: &TypingContext) -> Vec<EnabledCommunication> {
        let mut enabled = Vec::new();
        for (sender, entry) in ctx.entries() {
            for send in entry.machine.outgoing(entry.state) {
                let LocalAction::Send { to, message } = &send.action else {
                    continue;
                };
                if to == sender {
                    // Self-communication: the matching receive sits one step
                    // ahead in the same machine.
                    let receives = entry.machine.outgoing(send.to);
                    for receive in receives {
                        if let LocalAction::Receive { from, message: m } = &receive.action {
                            if from == sender && m == message {
                                enabled.push(EnabledCommunication {
                                    sender: sender.clone(),
                                    receiver: sender.clone(),
                                    message: message.clone(),
                                    send_transition: send.id,
                                    receive_transition: receive.id,
                                });
                            }
                        }
                    }
                    continue;
                }
                let Some(receiver_entry) = ctx.entry(to) else {
                    continue;
                };
                for receive in receiver_entry.machine.outgoing(receiver_entry.state) {
                    if let LocalAction::Receive { from, message: m } = &receive.action {
                        if from == sender && m == message {
                            enabled.push(EnabledCommunication {
                                sender: sender.clone(),
                                receiver: to.clone(),
                                message: message.clone(),
                                send_transition: send.id,
                                receive_transition: receive.id,
                            });
                        }
                    }
                }
            }
        }
        enabled
    }

    /// Reduce by a chosen communication, then close internal transitions.
    pub fn reduce_by(
        &self,
        ctx: &TypingContext,
        communication: &EnabledCommunication,
    ) -> TypingContext {
        let sender_entry = ctx
            .entry(&communication.sender)
            .expect("sender is in the context");
        let send_target = sender_entry
            .machine
            .transition(communication.send_transition)
            .expect("send transition exists")
            .to;

        let next = if communication.sender == communication.receiver {
            // Self-communication advances through send and receive at once.
            let receive_target = sender_entry
                .machine
                .transition(communication.receive_transition)
                .expect("receive transition exists")
                .to;
            ctx.with_state(&communication.sender, receive_target)
        } else {
            let receiver_entry = ctx
                .entry(&communication.receiver)
                .expect("receiver is in the context");
            let receive_target = receiver_entry
                .machine
                .transition(communication.receive_transition)
                .expect("receive transition exists")
                .to;
            ctx.with_state(&communication.sender, send_target)
                .with_state(&communication.receiver, receive_target)
        };
        self.tau_closure(&next)
    }

    /// Reduce by the first enabled communication.
    pub fn reduce(&self, ctx: &TypingContext) -> Result<TypingContext, ProtocolError> {
        if ctx.is_terminal() {
            return Err(ProtocolError::Terminal);
        }
        let enabled = self.find_enabled_communications(ctx);
        let first = enabled.first().ok_or(ProtocolError::Stuck)?;
        Ok(self.reduce_by(ctx, first))
    }

    /// All one-step successors, deduplicated by context key.
    pub fn find_all_successors(&self, ctx: &TypingContext) -> Vec<TypingContext> {
        let mut seen = HashSet::new();
        let mut successors = Vec::new();
        for communication in self.find_enabled_communications(ctx) {
            let next = self.reduce_by(ctx, &communication);
            if seen.insert(next.key()) {
                successors.push(next);
            }
        }
        successors
    }

    /// Reduce until terminal, up to `max_steps`.
    pub fn execute_to_completion(
        &self,
        ctx: &TypingContext,
        max_steps: usize,
    ) -> Result<(TypingContext, usize), ProtocolError> {
        let mut current = ctx.clone();
        let mut steps = 0;
        while !current.is_terminal() {
            if steps >= max_steps {
                return Err(ProtocolError::ExecutionExceeded { max_steps });
            }
            current = self.reduce(&current)?;
            steps += 1;
        }
        Ok((current, steps))
    }

    /// Advance every role along internal transitions until a fixed point.
    ///
    /// A role moves only while all outgoing transitions of its state are
    /// internal; the first in transition order is taken. A visited set and
    /// a step bound guard against internal cycles.
    pub fn tau_closure(&self, ctx: &TypingContext) -> TypingContext {
        let mut current = ctx.clone();
        let roles: Vec<RoleName> = ctx.entries().iter().map(|(r, _)| r.clone()).collect();
        for role in roles {
            let entry = current.entry(&role).expect("role is in the context");
            let machine = Arc::clone(&entry.machine);
            let mut state = entry.state;
            let mut visited: HashSet<StateId> = HashSet::new();
            visited.insert(state);
            for _ in 0..self.config.max_tau_steps {
                let outgoing = machine.outgoing(state);
                if outgoing.is_empty() || outgoing.iter().any(|t| t.action.is_observable()) {
                    break;
                }
                let next = outgoing[0].to;
                if !visited.insert(next) {
                    break;
                }
                state = next;
            }
            if state != current.entry(&role).expect("role").state {
                current = current.with_state(&role, state);
            }
        }
        current
    }
}
