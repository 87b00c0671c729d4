//! Bottom-up safety: send/receive compatibility closed under reachability.
//!
//! `BasicSafety` explores the product state space of all machines with a
//! breadth-first search keyed by stable context strings. The first
//! incompatible context short-circuits the search. Exploration is bounded
//! by `max_contexts` and by a cooperative cancellation token; hitting
//! either returns a partial result, never a crash.

use crate::cfsm::LocalAction;
use crate::semantics::context::TypingContext;
use crate::semantics::reducer::ContextReducer;
use crate::types::RoleName;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Stable safety violation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SafetyViolationCode {
    /// An enabled send has no matching receive at the partner.
    SendReceiveMismatch,
    /// A role waits for a message nobody can send.
    OrphanReceive,
    /// Labels match but payload types disagree.
    TypeMismatch,
    /// Reserved: recursion unfolding failed.
    RecursionError,
    /// Reserved: a reduction left the checked property's domain.
    PreservationError,
    /// A non-terminal context with no communication at all.
    StuckState,
}

/// One safety violation, located at a reachable context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyViolation {
    /// Stable machine-readable code.
    pub code: SafetyViolationCode,
    /// Sending role, when one is involved.
    pub sender: Option<RoleName>,
    /// Receiving role, when one is involved.
    pub receiver: Option<RoleName>,
    /// Label of the offending message, when one is involved.
    pub message_label: Option<String>,
    /// Human-readable description.
    pub message: String,
    /// Key of the context the violation occurred in.
    pub context_key: String,
    /// Structured context, sorted by key for stable snapshots.
    pub details: BTreeMap<String, String>,
}

/// Exploration statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyDiagnostics {
    /// Contexts dequeued and checked.
    pub states_explored: usize,
    /// Wall-clock time spent, in milliseconds.
    pub elapsed_ms: u64,
    /// Whether the context bound cut the search short.
    pub truncated: bool,
    /// Whether cancellation cut the search short.
    pub cancelled: bool,
    /// Key of the first violating context, when one was found.
    pub violating_context: Option<String>,
}

/// Result of a safety check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyResult {
    /// Whether every reachable context is compatible.
    pub safe: bool,
    /// The violations found (empty on truncation or cancellation).
    pub violations: Vec<SafetyViolation>,
    /// Exploration statistics.
    pub diagnostics: SafetyDiagnostics,
}

/// A checkable property over typing contexts. Alternative properties
/// (deadlock freedom, liveness) plug in here and reuse the reducer.
pub trait SafetyProperty {
    /// Short identifier.
    fn name(&self) -> &'static str;
    /// One-line description.
    fn description(&self) -> &'static str;
    /// Run the check from an initial context.
    fn check(&self, ctx: &TypingContext) -> SafetyResult;
}

/// Send/receive compatibility closed under reachability.
#[derive(Debug, Clone)]
pub struct BasicSafety {
    reducer: ContextReducer,
    /// Bound on explored contexts.
    pub max_contexts: usize,
    /// Cooperative cancellation token, checked each dequeue.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for BasicSafety {
    fn default() -> Self {
        Self {
            reducer: ContextReducer::new(),
            max_contexts: 100_000,
            cancel: None,
        }
    }
}

impl BasicSafety {
    /// A checker with default bounds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the context bound.
    pub fn with_max_contexts(mut self, max_contexts: usize) -> Self {
        self.max_contexts = max_contexts;
        self
    }

    /// Attach a cancellation token.
    pub fn with_cancellation(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancel = Some(token);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|token| token.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Compatibility of a single context: every enabled send must meet a
    /// matching receive; a stuck context surfaces who is left waiting.
    fn compatible(&self, ctx: &TypingContext) -> Vec<SafetyViolation> {
        let mut violations = Vec::new();
        let key = ctx.key();

        for (sender, entry) in ctx.entries() {
            for send in entry.machine.outgoing(entry.state) {
                let LocalAction::Send { to, message } = &send.action else {
                    continue;
                };
                let receiver_entry = if to == sender {
                    Some(entry)
                } else {
                    ctx.entry(to)
                };
                let Some(receiver_entry) = receiver_entry else {
                    continue;
                };
                let receiver_state = if to == sender {
                    // Self-communication matches against the post-send state.
                    send.to
                } else {
                    receiver_entry.state
                };

                let mut exact = false;
                let mut label_only = false;
                let mut pending = Vec::new();
                for receive in receiver_entry.machine.outgoing(receiver_state) {
                    if let LocalAction::Receive { from, message: m } = &receive.action {
                        pending.push(format!("{}:{}", from, m.label));
                        if from == sender {
                            if m == message {
                                exact = true;
                            } else if m.label == message.label {
                                label_only = true;
                            }
                        }
                    }
                }
                if exact {
                    continue;
                }
                let (code, description) = if label_only {
                    (
                        SafetyViolationCode::TypeMismatch,
                        format!(
                            "'{}' and '{}' agree on label '{}' but disagree on its payload",
                            sender, to, message.label
                        ),
                    )
                } else {
                    (
                        SafetyViolationCode::SendReceiveMismatch,
                        format!(
                            "'{}' can send '{}' to '{}', which cannot receive it",
                            sender, message.label, to
                        ),
                    )
                };
                let mut violation = SafetyViolation {
                    code,
                    sender: Some(sender.clone()),
                    receiver: Some(to.clone()),
                    message_label: Some(message.label.as_str().to_string()),
                    message: description,
                    context_key: key.clone(),
                    details: BTreeMap::new(),
                };
                if !pending.is_empty() {
                    violation
                        .details
                        .insert("expected".into(), pending.join(","));
                }
                violations.push(violation);
            }
        }

        if violations.is_empty() && self.reducer.is_stuck(ctx) {
            // No mismatched send; somebody is waiting on a message that can
            // never arrive, or the session just wedged.
            let mut reported = false;
            for (role, entry) in ctx.entries() {
                let pending: Vec<String> = entry
                    .machine
                    .outgoing(entry.state)
                    .iter()
                    .filter_map(|t| match &t.action {
                        LocalAction::Receive { from, message } => {
                            Some(format!("{}:{}", from, message.label))
                        }
                        _ => None,
                    })
                    .collect();
                if !pending.is_empty() {
                    reported = true;
                    violations.push(SafetyViolation {
                        code: SafetyViolationCode::OrphanReceive,
                        sender: None,
                        receiver: Some(role.clone()),
                        message_label: None,
                        message: format!(
                            "'{}' waits for a message that can never arrive",
                            role
                        ),
                        context_key: key.clone(),
                        details: BTreeMap::from([("expected".to_string(), pending.join(","))]),
                    });
                }
            }
            if !reported {
                violations.push(SafetyViolation {
                    code: SafetyViolationCode::StuckState,
                    sender: None,
                    receiver: None,
                    message_label: None,
                    message: "context is stuck with no pending communication".into(),
                    context_key: key.clone(),
                    details: BTreeMap::new(),
                });
            }
        }

        violations
    }
}

impl SafetyProperty for BasicSafety {
    fn name(&self) -> &'static str {
        "basic-safety"
    }

    fn description(&self) -> &'static str {
        "every reachable context is send/receive compatible"
    }

    fn check(&self, ctx: &TypingContext) -> SafetyResult {
        let started = Instant::now();
        let initial = self.reducer.tau_closure(ctx);

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<TypingContext> = VecDeque::new();
        visited.insert(initial.key());
        queue.push_back(initial);

        let mut explored = 0;
        let mut truncated = false;
        let mut cancelled = false;

        while let Some(current) = queue.pop_front() {
            if self.cancelled() {
                cancelled = true;
                break;
            }
            if explored >= self.max_contexts {
                truncated = true;
                break;
            }
            explored += 1;

            let violations = self.compatible(&current);
            if !violations.is_empty() {
                let violating = current.key();
                return SafetyResult {
                    safe: false,
                    violations,
                    diagnostics: SafetyDiagnostics {
                        states_explored: explored,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        truncated: false,
                        cancelled: false,
                        violating_context: Some(violating),
                    },
                };
            }

            for successor in self.reducer.find_all_successors(&current) {
                if visited.insert(successor.key()) {
                    queue.push_back(successor);
                }
            }
        }

        SafetyResult {
            safe: !truncated && !cancelled,
            violations: Vec::new(),
            diagnostics: SafetyDiagnostics {
                states_explored: explored,
                elapsed_ms: started.elapsed().as_millis() as u64,
                truncated,
                cancelled,
                violating_context: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{GlobalInteraction, GlobalProtocolDecl};
    use crate::cfg::build_cfg;
    use crate::project::project_all;
    use crate::semantics::reducer::create_initial_context;

    fn roles(names: &[&str]) -> Vec<RoleName> {
        names.iter().map(|n| RoleName::new(*n)).collect()
    }

    fn context_for(decl: &GlobalProtocolDecl) -> TypingContext {
        let cfg = build_cfg(decl).unwrap();
        let set = project_all(&cfg);
        assert!(set.errors.is_empty());
        create_initial_context(
            set.cfsms
                .into_iter()
                .map(|(role, machine)| (role, Arc::new(machine)))
                .collect(),
            "safety-test",
        )
    }

    #[test]
    fn test_request_response_is_safe() {
        let ctx = context_for(&GlobalProtocolDecl::new(
            "P",
            roles(&["C", "S"]),
            vec![
                GlobalInteraction::message("C", "S", "Request"),
                GlobalInteraction::message("S", "C", "Response"),
            ],
        ));
        let result = BasicSafety::new().check(&ctx);
        assert!(result.safe, "violations: {:?}", result.violations);
        assert!(result.diagnostics.states_explored >= 3);
        assert!(!result.diagnostics.truncated);
    }

    #[test]
    fn test_recursive_protocol_terminates() {
        let ctx = context_for(&GlobalProtocolDecl::new(
            "Ping",
            roles(&["A", "B"]),
            vec![GlobalInteraction::rec(
                "L",
                vec![
                    GlobalInteraction::message("A", "B", "ping"),
                    GlobalInteraction::message("B", "A", "pong"),
                    GlobalInteraction::continue_to("L"),
                ],
            )],
        ));
        let result = BasicSafety::new().check(&ctx);
        assert!(result.safe);
        // The product space of the loop is finite and small.
        assert!(result.diagnostics.states_explored <= 8);
    }

    #[test]
    fn test_sequentialized_multicast_race_is_unsafe() {
        // The seller multicasts title to both buyers; the first buyer then
        // pings the second, which may still be waiting for its title.
        let ctx = context_for(&GlobalProtocolDecl::new(
            "Race",
            roles(&["S", "B1", "B2"]),
            vec![
                GlobalInteraction::multicast("S", roles(&["B1", "B2"]), "title"),
                GlobalInteraction::message("B1", "B2", "share"),
            ],
        ));
        let result = BasicSafety::new().check(&ctx);
        assert!(!result.safe);
        let mismatch = result
            .violations
            .iter()
            .find(|v| v.code == SafetyViolationCode::SendReceiveMismatch)
            .expect("a send/receive mismatch is reported");
        assert_eq!(mismatch.sender, Some(RoleName::new("B1")));
        assert_eq!(mismatch.receiver, Some(RoleName::new("B2")));
        assert!(
            mismatch.details["expected"].contains("title"),
            "the second buyer still expects its title: {:?}",
            mismatch.details
        );
        assert!(result.diagnostics.violating_context.is_some());
    }

    #[test]
    fn test_truncation_reports_unsafe_with_no_violations() {
        let ctx = context_for(&GlobalProtocolDecl::new(
            "Ping",
            roles(&["A", "B"]),
            vec![GlobalInteraction::rec(
                "L",
                vec![
                    GlobalInteraction::message("A", "B", "ping"),
                    GlobalInteraction::message("B", "A", "pong"),
                    GlobalInteraction::continue_to("L"),
                ],
            )],
        ));
        let result = BasicSafety::new().with_max_contexts(1).check(&ctx);
        assert!(!result.safe);
        assert!(result.violations.is_empty());
        assert!(result.diagnostics.truncated);
    }

    #[test]
    fn test_cancellation_is_cooperative() {
        let token = Arc::new(AtomicBool::new(true));
        let ctx = context_for(&GlobalProtocolDecl::new(
            "P",
            roles(&["C", "S"]),
            vec![GlobalInteraction::message("C", "S", "Request")],
        ));
        let result = BasicSafety::new().with_cancellation(token).check(&ctx);
        assert!(!result.safe);
        assert!(result.diagnostics.cancelled);
        assert_eq!(result.diagnostics.states_explored, 0);
    }

    #[test]
    fn test_property_metadata() {
        let property = BasicSafety::new();
        assert_eq!(property.name(), "basic-safety");
        assert!(!property.description().is_empty());
    }
}
