//! Control-flow graph: model, builder, derived indices and hashing.

pub mod builder;
pub mod hash;
pub mod index;
pub mod model;

pub use builder::build_cfg;
pub use index::CfgIndex;
pub use model::{
    Cfg, CfgAction, CfgEdge, CfgEdgeKind, CfgNode, CfgNodeKind, CfgStats, DynamicActionKind,
    EdgeId, NodeId, ParallelId,
};
