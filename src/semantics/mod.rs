//! Operational semantics: typing contexts, reduction, safety.

pub mod context;
pub mod reducer;
pub mod safety;

pub use context::{ContextEntry, TypingContext};
pub use reducer::{create_initial_context, ContextReducer, EnabledCommunication, ReducerConfig};
pub use safety::{
    BasicSafety, SafetyDiagnostics, SafetyProperty, SafetyResult, SafetyViolation,
    SafetyViolationCode,
};
