//! Structured error taxonomy.
//!
//! Errors are values: a stable kebab-case code, a human-readable message and
//! optional source context. Pure analyses (verification, safety) never
//! return these — their findings are violation records inside reports. The
//! errors here mark misuse of an API precondition or a non-constructible
//! configuration.

use crate::types::{RoleName, SourceLocation};
use thiserror::Error;

/// Every failure the kernel can signal to a caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A referenced protocol does not exist in the registry.
    #[error("protocol '{name}' not found")]
    ProtocolNotFound {
        /// Name as it appeared in the reference.
        name: String,
    },

    /// The sub-protocol dependency graph contains a cycle.
    #[error("circular protocol dependency: {}", cycle.join(" -> "))]
    CircularDependency {
        /// The cycle, starting and ending at its first re-entered protocol.
        cycle: Vec<String>,
    },

    /// A `do` invocation supplied the wrong number of roles, or a
    /// non-bijective role substitution.
    #[error("role mismatch calling '{protocol}': expected {expected} roles, got {actual}")]
    RoleMismatch {
        /// Callee protocol name.
        protocol: String,
        /// Number of formal roles declared by the callee.
        expected: usize,
        /// Number of actual roles supplied.
        actual: usize,
    },

    /// `continue` referenced a recursion label with no enclosing `rec`.
    #[error("undefined recursion label '{label}'")]
    UndefinedRecursionLabel {
        /// The unresolved label.
        label: String,
        /// Where the `continue` occurred, when known.
        location: Option<SourceLocation>,
    },

    /// Projection was requested for a role the protocol does not declare.
    #[error("role '{role}' not found in protocol '{protocol}'")]
    RoleNotFound {
        /// The requested role.
        role: RoleName,
        /// Protocol being projected.
        protocol: String,
    },

    /// Projection failed for a declared role.
    #[error("projection of role '{role}' failed: {detail}")]
    Projection {
        /// The role being projected.
        role: RoleName,
        /// What went wrong.
        detail: String,
    },

    /// `reduce` was called on a terminal typing context.
    #[error("typing context is terminal")]
    Terminal,

    /// `reduce` was called on a stuck (non-terminal, no enabled
    /// communication) typing context.
    #[error("typing context is stuck")]
    Stuck,

    /// `execute_to_completion` hit its step bound before termination.
    #[error("execution exceeded {max_steps} steps")]
    ExecutionExceeded {
        /// The bound that was hit.
        max_steps: usize,
    },

    /// `step` was called while the simulator sits at an unresolved choice.
    #[error("simulator is at a choice point; call choose() first")]
    ChoiceRequired,

    /// `choose` was called with an out-of-range branch index.
    #[error("invalid choice {index}: {available} branches available")]
    InvalidChoice {
        /// The index supplied by the caller.
        index: usize,
        /// How many branches were on offer.
        available: usize,
    },

    /// `step` or `choose` was called after the simulation completed.
    #[error("simulation already complete")]
    AlreadyComplete,
}

impl ProtocolError {
    /// Stable machine-readable code for UIs and snapshots.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::ProtocolNotFound { .. } => "protocol-not-found",
            ProtocolError::CircularDependency { .. } => "circular-dependency",
            ProtocolError::RoleMismatch { .. } => "role-mismatch",
            ProtocolError::UndefinedRecursionLabel { .. } => "undefined-recursion-label",
            ProtocolError::RoleNotFound { .. } => "role-not-found",
            ProtocolError::Projection { .. } => "projection-error",
            ProtocolError::Terminal => "terminal",
            ProtocolError::Stuck => "stuck",
            ProtocolError::ExecutionExceeded { .. } => "execution-exceeded",
            ProtocolError::ChoiceRequired => "choice-required",
            ProtocolError::InvalidChoice { .. } => "invalid-choice",
            ProtocolError::AlreadyComplete => "already-complete",
        }
    }
}
