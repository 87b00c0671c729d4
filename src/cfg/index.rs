//! CFG indices - read-only, derived, rebuildable.
//!
//! All indices are derived from the graph and can be rebuilt at any time.
//! They are never serialized; snapshots hold the arena only.

use crate::cfg::model::{Cfg, EdgeId, NodeId};
use std::collections::HashMap;

/// Adjacency indices over a CFG.
#[derive(Debug)]
pub struct CfgIndex {
    /// Node → outgoing edge ids, in creation order.
    pub outgoing: HashMap<NodeId, Vec<EdgeId>>,

    /// Node → incoming edge ids, in creation order.
    pub incoming: HashMap<NodeId, Vec<EdgeId>>,

    /// Node → outgoing non-continue edge ids (the forward subgraph).
    pub forward: HashMap<NodeId, Vec<EdgeId>>,
}

impl CfgIndex {
    /// Build indices from a graph.
    ///
    /// **All indices are derived and deterministic.**
    pub fn build(cfg: &Cfg) -> Self {
        let mut outgoing: HashMap<NodeId, Vec<EdgeId>> = HashMap::new();
        let mut incoming: HashMap<NodeId, Vec<EdgeId>> = HashMap::new();
        let mut forward: HashMap<NodeId, Vec<EdgeId>> = HashMap::new();

        for edge in &cfg.edges {
            outgoing.entry(edge.from).or_default().push(edge.id);
            incoming.entry(edge.to).or_default().push(edge.id);
            if edge.kind.is_forward() {
                forward.entry(edge.from).or_default().push(edge.id);
            }
        }

        Self {
            outgoing,
            incoming,
            forward,
        }
    }

    /// Outgoing edge ids of a node, in creation order.
    pub fn edges_from(&self, node: NodeId) -> &[EdgeId] {
        self.outgoing.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Incoming edge ids of a node, in creation order.
    pub fn edges_to(&self, node: NodeId) -> &[EdgeId] {
        self.incoming.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Outgoing non-continue edge ids of a node, in creation order.
    pub fn forward_from(&self, node: NodeId) -> &[EdgeId] {
        self.forward.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Successor nodes along non-continue edges, in creation order.
    pub fn forward_successors(&self, cfg: &Cfg, node: NodeId) -> Vec<NodeId> {
        self.forward_from(node)
            .iter()
            .filter_map(|id| cfg.edge(*id))
            .map(|e| e.to)
            .collect()
    }

    /// Nodes reachable from `start` along non-continue edges, including
    /// `start` itself. Deterministic BFS order.
    pub fn forward_reachable(&self, cfg: &Cfg, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(start);
        seen.insert(start);
        while let Some(node) = queue.pop_front() {
            order.push(node);
            for succ in self.forward_successors(cfg, node) {
                if seen.insert(succ) {
                    queue.push_back(succ);
                }
            }
        }
        order
    }

    /// Whether a terminal node is reachable from `start` along non-continue
    /// edges.
    pub fn can_reach_terminal(&self, cfg: &Cfg, start: NodeId) -> bool {
        self.forward_reachable(cfg, start)
            .iter()
            .any(|id| cfg.node(*id).map(|n| n.is_terminal()).unwrap_or(false))
    }
}
