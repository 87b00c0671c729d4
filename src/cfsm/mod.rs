//! Projected machines: model and analysis toolkit.

pub mod analysis;
pub mod model;

pub use model::{Cfsm, InterleavingMode, LocalAction, StateId, Transition, TransitionId};
