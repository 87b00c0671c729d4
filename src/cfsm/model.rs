//! Communicating finite state machine model.
//!
//! A CFSM is an edge-labelled LTS owned by one role. Storage mirrors the
//! CFG arena: states and transitions in `Vec`s, sequential ids, immutable
//! after projection. Transition order is significant and stable - the
//! reducer and the safety checker iterate it as-is.

use crate::types::{MessageSig, RoleName};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// CFSM state id - deterministic, sequential, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub u64);

/// CFSM transition id - deterministic, sequential, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransitionId(pub u64);

/// A local action labelling one transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LocalAction {
    /// Send a message to another role.
    Send {
        /// The receiver.
        to: RoleName,
        /// The message.
        message: MessageSig,
    },
    /// Receive a message from another role.
    Receive {
        /// The sender.
        from: RoleName,
        /// The message.
        message: MessageSig,
    },
    /// Internal step. `note` names the source construct when one exists
    /// (e.g. a sub-protocol call).
    Tau {
        /// Optional annotation.
        note: Option<String>,
    },
}

impl LocalAction {
    /// An unannotated internal step.
    pub fn tau() -> Self {
        LocalAction::Tau { note: None }
    }

    /// Whether this is an internal step.
    pub fn is_tau(&self) -> bool {
        matches!(self, LocalAction::Tau { .. })
    }

    /// Whether this is a send or receive.
    pub fn is_observable(&self) -> bool {
        !self.is_tau()
    }

    /// The action the communication partner takes, for observables.
    pub fn dual(&self, own_role: &RoleName) -> Option<LocalAction> {
        match self {
            LocalAction::Send { to: _, message } => Some(LocalAction::Receive {
                from: own_role.clone(),
                message: message.clone(),
            }),
            LocalAction::Receive { from: _, message } => Some(LocalAction::Send {
                to: own_role.clone(),
                message: message.clone(),
            }),
            LocalAction::Tau { .. } => None,
        }
    }
}

/// One labelled transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Unique transition id.
    pub id: TransitionId,
    /// Source state.
    pub from: StateId,
    /// Target state.
    pub to: StateId,
    /// The action.
    pub action: LocalAction,
}

/// How parallel scopes were composed during projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterleavingMode {
    /// Branch interleavings were materialized as product states at
    /// projection time; consumers see plain states and transitions.
    Eager,
}

/// A projected machine for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cfsm {
    /// The role this machine belongs to.
    pub role: RoleName,

    /// The protocol it was projected from.
    pub protocol_name: String,

    /// Protocol parameters, carried through from the global declaration.
    pub parameters: Vec<String>,

    /// All states, in creation order.
    pub states: Vec<StateId>,

    /// All transitions, in creation order. Iteration order is significant.
    pub transitions: Vec<Transition>,

    /// The start state.
    pub initial_state: StateId,

    /// States in which the role may end the session.
    pub terminal_states: Vec<StateId>,

    /// The parallel-composition convention this machine was built with.
    pub interleaving: InterleavingMode,
}

impl Cfsm {
    /// Outgoing transitions of a state, in transition order.
    pub fn outgoing(&self, state: StateId) -> Vec<&Transition> {
        self.transitions.iter().filter(|t| t.from == state).collect()
    }

    /// Get a transition by id.
    pub fn transition(&self, id: TransitionId) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.id == id)
    }

    /// Whether a state is terminal.
    pub fn is_terminal_state(&self, state: StateId) -> bool {
        self.terminal_states.contains(&state)
    }

    /// Compute the SHA-256 hash of the whole machine.
    ///
    /// **Deterministic**: same machine → same hash; witnesses projection
    /// stability across runs.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.role.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.protocol_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.states.len().to_le_bytes());
        for state in &self.states {
            hasher.update(state.0.to_le_bytes());
        }
        hasher.update(self.transitions.len().to_le_bytes());
        for transition in &self.transitions {
            hasher.update(transition.id.0.to_le_bytes());
            hasher.update(transition.from.0.to_le_bytes());
            hasher.update(transition.to.0.to_le_bytes());
            let action =
                serde_json::to_string(&transition.action).expect("action serializes");
            hasher.update(action.as_bytes());
        }
        hasher.update(self.initial_state.0.to_le_bytes());
        for state in &self.terminal_states {
            hasher.update(state.0.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}
