//! Control-flow graph model.
//!
//! **Storage**: all nodes and edges live in `Vec`s, in deterministic order
//! (topological order of the non-continue subgraph after building).
//! **IDs**: sequential per build, never reused.
//! **Immutable**: after the builder returns, the graph is read-only; the one
//! exception is the builder's own back-edge retagging pass.

use crate::types::{Label, MessageSig, RoleName, SourceLocation};
use serde::{Deserialize, Serialize};

/// CFG node id - deterministic, sequential, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// CFG edge id - deterministic, sequential, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub u64);

/// Identifier pairing a fork with its join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParallelId(pub u32);

/// An observable or internal effect attached to an action node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CfgAction {
    /// A message transfer between roles.
    Message {
        /// Sending role.
        from: RoleName,
        /// Receiving roles (one entry for a unicast).
        to: Vec<RoleName>,
        /// The message signature.
        message: MessageSig,
    },

    /// A static sub-protocol invocation.
    SubProtocol {
        /// Callee protocol name.
        protocol: String,
        /// Actual roles bound to the callee's formals.
        role_args: Vec<RoleName>,
    },

    /// A dynamic-protocol effect. Opaque to projection and safety.
    Dynamic {
        /// Which dynamic construct produced this action.
        kind: DynamicActionKind,
    },
}

/// The dynamic-protocol constructs, carried but not interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "construct")]
pub enum DynamicActionKind {
    /// Mid-protocol declaration of a dynamic role.
    DeclareRole {
        /// The declared role.
        role: RoleName,
    },
    /// Creation of participants for a dynamic role.
    CreateParticipants {
        /// The role whose participants are created.
        role: RoleName,
    },
    /// Invitation of a participant into a running session.
    Invitation {
        /// Inviting role.
        from: RoleName,
        /// Invited role.
        to: RoleName,
        /// Protocol the invitee joins.
        protocol: String,
    },
    /// Recursion jump that installs an updated body.
    UpdateRecursion {
        /// Target recursion label.
        label: String,
    },
}

/// Node kinds (tagged).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum CfgNodeKind {
    /// Unique entry node.
    Initial,
    /// Exit node (at least one per graph).
    Terminal,
    /// Observable or internal effect.
    Action {
        /// The effect.
        action: CfgAction,
    },
    /// Choice point decided by `at`.
    Branch {
        /// The deciding role.
        at: RoleName,
    },
    /// Convergence point after a choice.
    Merge,
    /// Opens a parallel scope.
    Fork {
        /// Pairs this fork with its join.
        parallel_id: ParallelId,
    },
    /// Closes a parallel scope.
    Join {
        /// Pairs this join with its fork.
        parallel_id: ParallelId,
    },
    /// Anchor for `continue label`.
    Recursive {
        /// The recursion label.
        label: String,
    },
}

/// A CFG node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfgNode {
    /// Unique node id.
    pub id: NodeId,
    /// Node kind.
    pub kind: CfgNodeKind,
    /// Source site of the originating interaction, when known.
    pub location: Option<SourceLocation>,
}

impl CfgNode {
    /// Create a node with no source site.
    pub fn new(id: NodeId, kind: CfgNodeKind) -> Self {
        Self {
            id,
            kind,
            location: None,
        }
    }

    /// Attach a source site.
    pub fn at(mut self, location: Option<SourceLocation>) -> Self {
        self.location = location;
        self
    }

    /// The message action, if this is a message node.
    pub fn message_action(&self) -> Option<(&RoleName, &[RoleName], &MessageSig)> {
        match &self.kind {
            CfgNodeKind::Action {
                action: CfgAction::Message { from, to, message },
            } => Some((from, to, message)),
            _ => None,
        }
    }

    /// Whether this node is a terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, CfgNodeKind::Terminal)
    }
}

/// Edge kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CfgEdgeKind {
    /// Ordinary sequencing.
    Sequence,
    /// From a branch node into one of its branches.
    Branch,
    /// From a fork node into one of its branches.
    Fork,
    /// Back-edge produced by `continue`.
    Continue,
    /// Empty transition (reserved for rewrites; the builder emits none).
    Epsilon,
}

impl CfgEdgeKind {
    /// Whether this edge participates in the forward (acyclic) subgraph.
    pub fn is_forward(&self) -> bool {
        !matches!(self, CfgEdgeKind::Continue)
    }
}

/// A CFG edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfgEdge {
    /// Unique edge id.
    pub id: EdgeId,
    /// Edge kind.
    pub kind: CfgEdgeKind,
    /// Source node.
    pub from: NodeId,
    /// Target node.
    pub to: NodeId,
    /// Branch or fork label, when the edge opens a labelled branch.
    pub label: Option<Label>,
}

impl CfgEdge {
    /// Create an unlabelled edge.
    pub fn new(id: EdgeId, kind: CfgEdgeKind, from: NodeId, to: NodeId) -> Self {
        Self {
            id,
            kind,
            from,
            to,
            label: None,
        }
    }

    /// Attach a branch label.
    pub fn with_label(mut self, label: Label) -> Self {
        self.label = Some(label);
        self
    }
}

/// A complete control-flow graph for one global protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cfg {
    /// Name of the protocol this graph was built from.
    pub protocol_name: String,

    /// Protocol parameter names, in declaration order.
    pub parameters: Vec<String>,

    /// Declared roles, in declaration order.
    pub roles: Vec<RoleName>,

    /// All nodes, in topological order of the non-continue subgraph.
    pub nodes: Vec<CfgNode>,

    /// All edges, in creation order.
    pub edges: Vec<CfgEdge>,

    /// The unique initial node.
    pub initial: NodeId,

    /// All terminal nodes.
    pub terminals: Vec<NodeId>,
}

impl Cfg {
    /// Get a node by id.
    pub fn node(&self, id: NodeId) -> Option<&CfgNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Get an edge by id.
    pub fn edge(&self, id: EdgeId) -> Option<&CfgEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Outgoing edges of a node, in creation order.
    pub fn edges_from(&self, from: NodeId) -> Vec<&CfgEdge> {
        self.edges.iter().filter(|e| e.from == from).collect()
    }

    /// Incoming edges of a node, in creation order.
    pub fn edges_to(&self, to: NodeId) -> Vec<&CfgEdge> {
        self.edges.iter().filter(|e| e.to == to).collect()
    }

    /// All edges of one kind, in creation order.
    pub fn edges_of_kind(&self, kind: CfgEdgeKind) -> Vec<&CfgEdge> {
        self.edges.iter().filter(|e| e.kind == kind).collect()
    }

    /// All message-action nodes, in storage order.
    pub fn message_nodes(&self) -> Vec<&CfgNode> {
        self.nodes
            .iter()
            .filter(|n| n.message_action().is_some())
            .collect()
    }

    /// Graph statistics.
    pub fn stats(&self) -> CfgStats {
        let mut actions = 0;
        let mut branches = 0;
        let mut forks = 0;
        let mut recursions = 0;
        for node in &self.nodes {
            match node.kind {
                CfgNodeKind::Action { .. } => actions += 1,
                CfgNodeKind::Branch { .. } => branches += 1,
                CfgNodeKind::Fork { .. } => forks += 1,
                CfgNodeKind::Recursive { .. } => recursions += 1,
                _ => {}
            }
        }
        CfgStats {
            total_nodes: self.nodes.len(),
            total_edges: self.edges.len(),
            actions,
            branches,
            forks,
            recursions,
            continue_edges: self
                .edges
                .iter()
                .filter(|e| e.kind == CfgEdgeKind::Continue)
                .count(),
        }
    }
}

/// Shape summary of a CFG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfgStats {
    /// Node count.
    pub total_nodes: usize,
    /// Edge count.
    pub total_edges: usize,
    /// Action node count.
    pub actions: usize,
    /// Branch node count.
    pub branches: usize,
    /// Fork node count.
    pub forks: usize,
    /// Recursive node count.
    pub recursions: usize,
    /// Back-edge count.
    pub continue_edges: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_cfg() -> Cfg {
        // initial -> action -> terminal
        let initial = NodeId(0);
        let action = NodeId(1);
        let terminal = NodeId(2);
        Cfg {
            protocol_name: "Tiny".into(),
            parameters: vec![],
            roles: vec![RoleName::new("A"), RoleName::new("B")],
            nodes: vec![
                CfgNode::new(initial, CfgNodeKind::Initial),
                CfgNode::new(
                    action,
                    CfgNodeKind::Action {
                        action: CfgAction::Message {
                            from: RoleName::new("A"),
                            to: vec![RoleName::new("B")],
                            message: MessageSig::new("hello"),
                        },
                    },
                ),
                CfgNode::new(terminal, CfgNodeKind::Terminal),
            ],
            edges: vec![
                CfgEdge::new(EdgeId(0), CfgEdgeKind::Sequence, initial, action),
                CfgEdge::new(EdgeId(1), CfgEdgeKind::Sequence, action, terminal),
            ],
            initial,
            terminals: vec![terminal],
        }
    }

    #[test]
    fn test_node_and_edge_lookup() {
        let cfg = tiny_cfg();
        assert!(cfg.node(NodeId(1)).is_some());
        assert!(cfg.node(NodeId(99)).is_none());
        assert_eq!(cfg.edges_from(NodeId(0)).len(), 1);
        assert_eq!(cfg.edges_to(NodeId(2)).len(), 1);
    }

    #[test]
    fn test_stats_counts_actions() {
        let cfg = tiny_cfg();
        let stats = cfg.stats();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.actions, 1);
        assert_eq!(stats.continue_edges, 0);
    }

    #[test]
    fn test_message_nodes() {
        let cfg = tiny_cfg();
        let messages = cfg.message_nodes();
        assert_eq!(messages.len(), 1);
        let (from, to, sig) = messages[0].message_action().unwrap();
        assert_eq!(from.as_str(), "A");
        assert_eq!(to.len(), 1);
        assert_eq!(sig.label.as_str(), "hello");
    }
}
