//! mpstk - a deterministic multiparty session type kernel.
//!
//! Compiles Scribble-family global protocols to control-flow graphs, proves
//! well-formedness, projects per-role communicating machines, and decides
//! bottom-up safety of the projected ensemble. A step-wise simulator runs
//! the global graph directly.
//!
//! ## Design Principles
//!
//! 1. **Determinism is sacred** - same protocol always produces the same
//!    graphs, machines, reports and traces
//! 2. **Arenas, not pointer graphs** - nodes and edges live in `Vec`s with
//!    index ids; cycles carry no ownership
//! 3. **Everything immutable after build** - analyses are pure functions;
//!    reduction produces new contexts
//! 4. **Fail closed** - bounded exploration returns partial results flagged
//!    as truncated or cancelled, never a crash
//!
//! ## Pipeline
//!
//! AST → CFG builder → verifier → projector → safety checker, with the
//! simulator reading the CFG and the reducer driving the safety search.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod ast;
pub mod cfg;
pub mod cfsm;
pub mod config;
pub mod error;
pub mod project;
pub mod registry;
pub mod semantics;
pub mod sim;
pub mod snapshot;
pub mod types;
pub mod verify;

// Re-export public API
pub use ast::{Declaration, GlobalInteraction, GlobalProtocolDecl, Module};
pub use cfg::{build_cfg, Cfg, CfgIndex};
pub use cfsm::{Cfsm, LocalAction, StateId};
pub use config::AnalysisConfig;
pub use error::ProtocolError;
pub use project::{project, project_all, ProjectionConfig, ProjectionSet};
pub use registry::ProtocolRegistry;
pub use semantics::{
    create_initial_context, BasicSafety, ContextReducer, SafetyProperty, SafetyResult,
    TypingContext,
};
pub use sim::{CfgSimulator, SimEvent, SimulatorOptions};
pub use types::{Label, MessageSig, RoleName, SourceLocation};
pub use verify::{verify_protocol, VerificationReport};
