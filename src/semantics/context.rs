//! Typing contexts: a snapshot of every role's machine at one state.
//!
//! Contexts are immutable values. Reduction produces a new context by
//! functional update of the stepped roles; machines are shared behind `Arc`
//! and never copied. Role iteration order is the definition order of the
//! machines; context keys sort roles so identity never depends on it.

use crate::cfsm::{Cfsm, StateId};
use crate::types::RoleName;
use std::sync::Arc;

/// One role's slot in a context.
#[derive(Debug, Clone)]
pub struct ContextEntry {
    /// The role's machine.
    pub machine: Arc<Cfsm>,
    /// The state the role currently sits in.
    pub state: StateId,
}

/// A session snapshot: every role with its machine and current state.
#[derive(Debug, Clone)]
pub struct TypingContext {
    /// Session identifier; diagnostic only.
    pub session: String,
    entries: Vec<(RoleName, ContextEntry)>,
}

impl TypingContext {
    /// A context with every machine at its initial state. No internal steps
    /// are taken here; `create_initial_context` is the closing constructor.
    pub fn new(session: impl Into<String>, machines: Vec<(RoleName, Arc<Cfsm>)>) -> Self {
        Self {
            session: session.into(),
            entries: machines
                .into_iter()
                .map(|(role, machine)| {
                    let state = machine.initial_state;
                    (role, ContextEntry { machine, state })
                })
                .collect(),
        }
    }

    /// Role entries, in definition order.
    pub fn entries(&self) -> &[(RoleName, ContextEntry)] {
        &self.entries
    }

    /// One role's entry.
    pub fn entry(&self, role: &RoleName) -> Option<&ContextEntry> {
        self.entries.iter().find(|(r, _)| r == role).map(|(_, e)| e)
    }

    /// One role's current state.
    pub fn state_of(&self, role: &RoleName) -> Option<StateId> {
        self.entry(role).map(|e| e.state)
    }

    /// Functional update of one role's state.
    pub fn with_state(&self, role: &RoleName, state: StateId) -> Self {
        let mut next = self.clone();
        for (r, entry) in &mut next.entries {
            if r == role {
                entry.state = state;
            }
        }
        next
    }

    /// Whether every role sits in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.entries
            .iter()
            .all(|(_, e)| e.machine.is_terminal_state(e.state))
    }

    /// Stable identity of this context: roles sorted by name, each with its
    /// current state. Independent of entry order and of the session name.
    pub fn key(&self) -> String {
        let mut parts: Vec<String> = self
            .entries
            .iter()
            .map(|(role, entry)| format!("{}@{}", role, entry.state.0))
            .collect();
        parts.sort();
        parts.join(",")
    }
}
