//! CFG builder - deterministic construction from the protocol AST.
//!
//! ## Algorithm
//!
//! 1. Create the Initial and Terminal nodes.
//! 2. Build the body right-to-left: each interaction becomes a subgraph with
//!    a single entry, wired to a caller-supplied exit, so each interaction's
//!    exit is the next interaction's entry.
//! 3. Recursion scopes register their label on a stack; `continue` resolves
//!    against the nearest enclosing scope and returns the anchor node as its
//!    entry, which makes the predecessor's edge the back-edge.
//! 4. A post-pass retags those back-edges as `continue` edges.
//! 5. Nodes are re-emitted in topological order of the non-continue
//!    subgraph.
//!
//! ## Determinism guarantees
//!
//! - Node and edge ids are assigned sequentially per build (never reused)
//! - Branches are processed in source order
//! - Edges are added as encountered (no reordering)

use crate::ast::{ChoiceBranch, GlobalInteraction, GlobalProtocolDecl};
use crate::cfg::model::{
    Cfg, CfgAction, CfgEdge, CfgEdgeKind, CfgNode, CfgNodeKind, DynamicActionKind, EdgeId, NodeId,
    ParallelId,
};
use crate::error::ProtocolError;
use crate::types::Label;
use std::collections::{HashSet, VecDeque};

/// Build the control-flow graph of one global protocol.
///
/// Fails only on an unresolved recursion label; every structural property
/// beyond that is guaranteed by construction and rechecked by the verifier.
pub fn build_cfg(decl: &GlobalProtocolDecl) -> Result<Cfg, ProtocolError> {
    let mut builder = Builder::new();

    let initial = builder.new_node(CfgNodeKind::Initial);
    let terminal = builder.new_node(CfgNodeKind::Terminal);

    let entry = builder.build_sequence(&decl.body, terminal)?;
    builder.add_edge(CfgEdgeKind::Sequence, initial, entry, None);

    builder.retag_back_edges();
    let nodes = builder.order_nodes(initial);

    Ok(Cfg {
        protocol_name: decl.name.clone(),
        parameters: decl.parameters.iter().map(|p| p.name.clone()).collect(),
        roles: decl.role_names(),
        nodes,
        edges: builder.edges,
        initial,
        terminals: vec![terminal],
    })
}

/// Builder state for a single `build_cfg` call.
///
/// Id counters are local to the call; nothing survives it.
struct Builder {
    nodes: Vec<CfgNode>,
    edges: Vec<CfgEdge>,
    next_node_id: u64,
    next_edge_id: u64,
    next_parallel_id: u32,

    /// Enclosing recursion scopes, innermost last.
    rec_scope: Vec<(String, NodeId)>,
}

impl Builder {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            next_node_id: 0,
            next_edge_id: 0,
            next_parallel_id: 0,
            rec_scope: Vec::new(),
        }
    }

    fn new_node(&mut self, kind: CfgNodeKind) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        self.nodes.push(CfgNode::new(id, kind));
        id
    }

    fn new_node_at(
        &mut self,
        kind: CfgNodeKind,
        location: Option<&crate::types::SourceLocation>,
    ) -> NodeId {
        let id = self.new_node(kind);
        self.nodes.last_mut().expect("just pushed").location = location.cloned();
        id
    }

    fn add_edge(&mut self, kind: CfgEdgeKind, from: NodeId, to: NodeId, label: Option<Label>) {
        let id = EdgeId(self.next_edge_id);
        self.next_edge_id += 1;
        let mut edge = CfgEdge::new(id, kind, from, to);
        edge.label = label;
        self.edges.push(edge);
    }

    /// Build an interaction sequence with a single entry, wiring the last
    /// interaction to `exit`. Right-to-left so each interaction's exit is
    /// the entry of its successor. An empty body is the exit itself.
    fn build_sequence(
        &mut self,
        body: &[GlobalInteraction],
        exit: NodeId,
    ) -> Result<NodeId, ProtocolError> {
        let mut entry = exit;
        for interaction in body.iter().rev() {
            entry = self.build_interaction(interaction, entry)?;
        }
        Ok(entry)
    }

    fn build_interaction(
        &mut self,
        interaction: &GlobalInteraction,
        exit: NodeId,
    ) -> Result<NodeId, ProtocolError> {
        match interaction {
            GlobalInteraction::MessageTransfer {
                from,
                to,
                message,
                location,
            } => {
                let node = self.new_node_at(
                    CfgNodeKind::Action {
                        action: CfgAction::Message {
                            from: from.clone(),
                            to: to.clone(),
                            message: message.clone(),
                        },
                    },
                    location.as_ref(),
                );
                self.add_edge(CfgEdgeKind::Sequence, node, exit, None);
                Ok(node)
            }

            GlobalInteraction::Choice {
                at,
                branches,
                location,
            } => {
                let merge = self.new_node(CfgNodeKind::Merge);
                self.add_edge(CfgEdgeKind::Sequence, merge, exit, None);

                let branch =
                    self.new_node_at(CfgNodeKind::Branch { at: at.clone() }, location.as_ref());
                for (i, ChoiceBranch { label, body }) in branches.iter().enumerate() {
                    let entry = self.build_sequence(body, merge)?;
                    let label = label
                        .clone()
                        .unwrap_or_else(|| Label::new(format!("branch{}", i + 1)));
                    self.add_edge(CfgEdgeKind::Branch, branch, entry, Some(label));
                }
                Ok(branch)
            }

            GlobalInteraction::Parallel { branches, .. } => {
                let parallel_id = ParallelId(self.next_parallel_id);
                self.next_parallel_id += 1;

                let join = self.new_node(CfgNodeKind::Join { parallel_id });
                self.add_edge(CfgEdgeKind::Sequence, join, exit, None);

                let fork = self.new_node(CfgNodeKind::Fork { parallel_id });
                for (i, body) in branches.iter().enumerate() {
                    let entry = self.build_sequence(body, join)?;
                    let label = Label::new(format!("branch{}", i + 1));
                    self.add_edge(CfgEdgeKind::Fork, fork, entry, Some(label));
                }
                Ok(fork)
            }

            GlobalInteraction::Recursion { label, body, .. } => {
                let rec = self.new_node(CfgNodeKind::Recursive {
                    label: label.clone(),
                });
                self.rec_scope.push((label.clone(), rec));
                let body_entry = self.build_sequence(body, exit);
                self.rec_scope.pop();
                let body_entry = body_entry?;

                // First sequence edge enters the body, second is the exit
                // continuation. Scope and retag passes rely on this order.
                self.add_edge(CfgEdgeKind::Sequence, rec, body_entry, None);
                self.add_edge(CfgEdgeKind::Sequence, rec, exit, None);
                Ok(rec)
            }

            GlobalInteraction::Continue { label, location } => {
                self.resolve_label(label, location.clone())
            }

            GlobalInteraction::Do {
                protocol,
                role_args,
                location,
            } => {
                let node = self.new_node_at(
                    CfgNodeKind::Action {
                        action: CfgAction::SubProtocol {
                            protocol: protocol.clone(),
                            role_args: role_args.clone(),
                        },
                    },
                    location.as_ref(),
                );
                self.add_edge(CfgEdgeKind::Sequence, node, exit, None);
                Ok(node)
            }

            GlobalInteraction::DynamicRole { role, .. } => {
                self.dynamic_action(
                    DynamicActionKind::DeclareRole { role: role.clone() },
                    exit,
                )
            }

            GlobalInteraction::CreateParticipants { role, .. } => self.dynamic_action(
                DynamicActionKind::CreateParticipants { role: role.clone() },
                exit,
            ),

            GlobalInteraction::Invitation {
                from, to, protocol, ..
            } => self.dynamic_action(
                DynamicActionKind::Invitation {
                    from: from.clone(),
                    to: to.clone(),
                    protocol: protocol.clone(),
                },
                exit,
            ),

            GlobalInteraction::ContinueWith {
                label, location, ..
            } => {
                // The update is an action node whose successor is the
                // recursion anchor; the retag pass turns that edge into the
                // back-edge. The replacement body carries no projection or
                // safety semantics and is not lowered.
                let rec = self.resolve_label(label, location.clone())?;
                let node = self.new_node(CfgNodeKind::Action {
                    action: CfgAction::Dynamic {
                        kind: DynamicActionKind::UpdateRecursion {
                            label: label.clone(),
                        },
                    },
                });
                self.add_edge(CfgEdgeKind::Sequence, node, rec, None);
                Ok(node)
            }
        }
    }

    fn dynamic_action(
        &mut self,
        kind: DynamicActionKind,
        exit: NodeId,
    ) -> Result<NodeId, ProtocolError> {
        let node = self.new_node(CfgNodeKind::Action {
            action: CfgAction::Dynamic { kind },
        });
        self.add_edge(CfgEdgeKind::Sequence, node, exit, None);
        Ok(node)
    }

    fn resolve_label(
        &self,
        label: &str,
        location: Option<crate::types::SourceLocation>,
    ) -> Result<NodeId, ProtocolError> {
        self.rec_scope
            .iter()
            .rev()
            .find(|(l, _)| l == label)
            .map(|(_, node)| *node)
            .ok_or(ProtocolError::UndefinedRecursionLabel {
                label: label.to_string(),
                location,
            })
    }

    /// Retag back-edges as `continue`.
    ///
    /// For every Recursive node R: collect the body scope B reachable from
    /// R's body entry without expanding R itself and without entering nested
    /// Recursive bodies (only their exit continuation is followed). Any
    /// sequence or branch edge from a node in B back to R is a `continue`.
    fn retag_back_edges(&mut self) {
        let recursives: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| matches!(n.kind, CfgNodeKind::Recursive { .. }))
            .map(|n| n.id)
            .collect();

        for rec in recursives {
            let Some(body_entry) = self.sequence_targets(rec).first().copied() else {
                continue;
            };
            let scope = self.body_scope(rec, body_entry);
            for edge in &mut self.edges {
                if edge.to == rec
                    && scope.contains(&edge.from)
                    && matches!(edge.kind, CfgEdgeKind::Sequence | CfgEdgeKind::Branch)
                {
                    edge.kind = CfgEdgeKind::Continue;
                }
            }
        }
    }

    /// Outgoing sequence-edge targets of a node, in creation order.
    fn sequence_targets(&self, node: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|e| e.from == node && e.kind == CfgEdgeKind::Sequence)
            .map(|e| e.to)
            .collect()
    }

    /// Nodes in the body scope of `rec`, starting at `body_entry`.
    fn body_scope(&self, rec: NodeId, body_entry: NodeId) -> HashSet<NodeId> {
        let mut scope = HashSet::new();
        let mut queue = VecDeque::new();
        scope.insert(body_entry);
        queue.push_back(body_entry);

        while let Some(node) = queue.pop_front() {
            if node == rec {
                continue;
            }
            let is_nested_rec = self
                .nodes
                .iter()
                .find(|n| n.id == node)
                .map(|n| matches!(n.kind, CfgNodeKind::Recursive { .. }))
                .unwrap_or(false);

            let successors: Vec<NodeId> = if is_nested_rec {
                // Nested scopes are opaque; only the exit continuation is in
                // the enclosing scope.
                self.sequence_targets(node).into_iter().skip(1).collect()
            } else {
                self.edges
                    .iter()
                    .filter(|e| e.from == node && e.kind != CfgEdgeKind::Continue)
                    .map(|e| e.to)
                    .collect()
            };

            for succ in successors {
                if succ != rec && scope.insert(succ) {
                    queue.push_back(succ);
                }
            }
        }
        scope
    }

    /// Emit nodes in topological order of the non-continue subgraph,
    /// starting from `initial`. Nodes on residual cycles are appended in id
    /// order, which keeps the output deterministic either way.
    fn order_nodes(&self, initial: NodeId) -> Vec<CfgNode> {
        let mut indegree: std::collections::HashMap<NodeId, usize> =
            self.nodes.iter().map(|n| (n.id, 0)).collect();
        for edge in &self.edges {
            if edge.kind.is_forward() {
                *indegree.entry(edge.to).or_insert(0) += 1;
            }
        }

        let mut ready: Vec<NodeId> = self
            .nodes
            .iter()
            .map(|n| n.id)
            .filter(|id| indegree[id] == 0)
            .collect();
        ready.sort();
        // The initial node leads regardless of id ties.
        if let Some(pos) = ready.iter().position(|id| *id == initial) {
            ready.remove(pos);
            ready.insert(0, initial);
        }

        let mut queue: VecDeque<NodeId> = ready.into();
        let mut order = Vec::new();
        let mut emitted = HashSet::new();

        while let Some(node) = queue.pop_front() {
            if !emitted.insert(node) {
                continue;
            }
            order.push(node);
            for edge in &self.edges {
                if edge.from == node && edge.kind.is_forward() {
                    let d = indegree.get_mut(&edge.to).expect("edge target exists");
                    *d = d.saturating_sub(1);
                    if *d == 0 && !emitted.contains(&edge.to) {
                        queue.push_back(edge.to);
                    }
                }
            }
        }

        // Residual nodes (cycles through nested recursion scopes).
        let mut rest: Vec<NodeId> = self
            .nodes
            .iter()
            .map(|n| n.id)
            .filter(|id| !emitted.contains(id))
            .collect();
        rest.sort();
        order.extend(rest);

        order
            .into_iter()
            .map(|id| {
                self.nodes
                    .iter()
                    .find(|n| n.id == id)
                    .expect("ordered node exists")
                    .clone()
            })
            .collect()
    }
}
