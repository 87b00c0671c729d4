//! Projection of a global CFG onto per-role machines.
//!
//! ## Algorithm
//!
//! A worklist construction over closure sets: every machine state stands for
//! the canonical set of CFG nodes at which the role can next observe
//! something. Closure expansion silently crosses every construct the role is
//! not involved in (uninvolved messages, branch and merge nodes, whole
//! parallel scopes without the role, recursion anchors), so choice fanout
//! comes out as observable transitions and loop back-edges converge onto the
//! state keyed by the same closure.
//!
//! Conventions committed to here:
//! - Multicasts are lowered to a unicast chain on the sender side, receivers
//!   in declaration order; each receiver sees a single receive.
//! - Parallel scopes are composed eagerly: branch fragments are projected
//!   independently and product states materialize the interleaving, bounded
//!   by `max_shuffle_states`. The machine records the convention in its
//!   `interleaving` field.
//! - A recursion anchor inside a closure contributes one internal
//!   transition to the state its exit continuation leads to; it is inert at
//!   run time and keeps terminals reachable in looping machines.
//! - Dynamic-protocol actions are invisible to projection.

use crate::cfg::{Cfg, CfgAction, CfgEdgeKind, CfgIndex, CfgNodeKind, NodeId};
use crate::cfsm::{Cfsm, InterleavingMode, LocalAction, StateId, Transition, TransitionId};
use crate::error::ProtocolError;
use crate::types::{MessageSig, RoleName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Bounds for projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// Upper bound on product states per parallel scope.
    pub max_shuffle_states: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            max_shuffle_states: 4096,
        }
    }
}

/// Project one role with default bounds.
pub fn project(cfg: &Cfg, role: &RoleName) -> Result<Cfsm, ProtocolError> {
    project_with(cfg, role, &ProjectionConfig::default())
}

/// Project one role.
pub fn project_with(
    cfg: &Cfg,
    role: &RoleName,
    config: &ProjectionConfig,
) -> Result<Cfsm, ProtocolError> {
    if !cfg.roles.contains(role) {
        return Err(ProtocolError::RoleNotFound {
            role: role.clone(),
            protocol: cfg.protocol_name.clone(),
        });
    }

    let index = CfgIndex::build(cfg);
    let projector = Projector {
        cfg,
        index: &index,
        role,
        config,
        joins: join_map(cfg),
    };
    let fragment = projector.project_fragment(cfg.initial, None)?;

    // A role with no observable behavior collapses to the canonical
    // initial → terminal machine with a single internal step.
    let fragment = if fragment.transitions.is_empty() {
        Fragment::unused_role()
    } else {
        fragment
    };

    Ok(Cfsm {
        role: role.clone(),
        protocol_name: cfg.protocol_name.clone(),
        parameters: cfg.parameters.clone(),
        states: fragment.states,
        transitions: fragment.transitions,
        initial_state: fragment.initial,
        terminal_states: fragment.terminals,
        interleaving: InterleavingMode::Eager,
    })
}

/// Result of projecting every declared role.
#[derive(Debug, Clone)]
pub struct ProjectionSet {
    /// Machines, in role declaration order.
    pub cfsms: Vec<(RoleName, Cfsm)>,
    /// Per-role failures.
    pub errors: Vec<ProtocolError>,
}

impl ProjectionSet {
    /// Machine of one role.
    pub fn machine(&self, role: &RoleName) -> Option<&Cfsm> {
        self.cfsms.iter().find(|(r, _)| r == role).map(|(_, m)| m)
    }
}

/// Project every declared role; per-role failures are aggregated, never
/// raised.
pub fn project_all(cfg: &Cfg) -> ProjectionSet {
    project_all_with(cfg, &ProjectionConfig::default())
}

/// Project every declared role with explicit bounds.
pub fn project_all_with(cfg: &Cfg, config: &ProjectionConfig) -> ProjectionSet {
    let mut cfsms = Vec::new();
    let mut errors = Vec::new();
    for role in &cfg.roles {
        match project_with(cfg, role, config) {
            Ok(machine) => cfsms.push((role.clone(), machine)),
            Err(error) => errors.push(error),
        }
    }
    ProjectionSet { cfsms, errors }
}

/// A machine fragment under construction: the full projection, or one
/// parallel branch projected against its join boundary.
struct Fragment {
    states: Vec<StateId>,
    transitions: Vec<Transition>,
    initial: StateId,
    terminals: Vec<StateId>,
}

impl Fragment {
    fn unused_role() -> Self {
        Self {
            states: vec![StateId(0), StateId(1)],
            transitions: vec![Transition {
                id: TransitionId(0),
                from: StateId(0),
                to: StateId(1),
                action: LocalAction::tau(),
            }],
            initial: StateId(0),
            terminals: vec![StateId(1)],
        }
    }
}

/// Canonical closure of a set of CFG nodes for one role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Closure {
    /// Nodes at which the role observes something (messages it takes part
    /// in, sub-protocol calls naming it, involved forks).
    stops: BTreeSet<NodeId>,
    /// Recursion anchors crossed on the way.
    anchors: BTreeSet<NodeId>,
    /// Whether a terminal (or the fragment boundary) is silently reachable.
    terminal: bool,
}

struct Projector<'a> {
    cfg: &'a Cfg,
    index: &'a CfgIndex,
    role: &'a RoleName,
    config: &'a ProjectionConfig,
    /// parallel id of each fork → its join node.
    joins: HashMap<NodeId, NodeId>,
}

/// Fork node → matching join node.
fn join_map(cfg: &Cfg) -> HashMap<NodeId, NodeId> {
    let mut by_parallel = HashMap::new();
    for node in &cfg.nodes {
        if let CfgNodeKind::Join { parallel_id } = node.kind {
            by_parallel.insert(parallel_id, node.id);
        }
    }
    let mut map = HashMap::new();
    for node in &cfg.nodes {
        if let CfgNodeKind::Fork { parallel_id } = node.kind {
            if let Some(join) = by_parallel.get(&parallel_id) {
                map.insert(node.id, *join);
            }
        }
    }
    map
}

/// Mutable construction state for one fragment.
struct FragmentBuilder {
    states: Vec<StateId>,
    transitions: Vec<Transition>,
    terminals: Vec<StateId>,
    next_state: u64,
    next_transition: u64,
    by_closure: HashMap<Closure, StateId>,
}

impl FragmentBuilder {
    fn new() -> Self {
        Self {
            states: Vec::new(),
            transitions: Vec::new(),
            terminals: Vec::new(),
            next_state: 0,
            next_transition: 0,
            by_closure: HashMap::new(),
        }
    }

    fn fresh_state(&mut self) -> StateId {
        let id = StateId(self.next_state);
        self.next_state += 1;
        self.states.push(id);
        id
    }

    fn mark_terminal(&mut self, state: StateId) {
        if !self.terminals.contains(&state) {
            self.terminals.push(state);
        }
    }

    fn add_transition(&mut self, from: StateId, to: StateId, action: LocalAction) {
        let duplicate = self
            .transitions
            .iter()
            .any(|t| t.from == from && t.to == to && t.action == action);
        if duplicate {
            return;
        }
        let id = TransitionId(self.next_transition);
        self.next_transition += 1;
        self.transitions.push(Transition {
            id,
            from,
            to,
            action,
        });
    }
}

impl<'a> Projector<'a> {
    /// Project the subgraph rooted at `entry`, treating `boundary` (a join
    /// node) as local termination when given.
    fn project_fragment(
        &self,
        entry: NodeId,
        boundary: Option<NodeId>,
    ) -> Result<Fragment, ProtocolError> {
        let mut builder = FragmentBuilder::new();
        let mut worklist: VecDeque<(StateId, Closure)> = VecDeque::new();

        let initial_closure = self.closure(&[entry], boundary);
        let initial =
            self.state_for(&mut builder, &mut worklist, initial_closure);

        while let Some((state, closure)) = worklist.pop_front() {
            for stop in closure.stops.iter().copied() {
                self.emit_stop(&mut builder, &mut worklist, state, stop, boundary)?;
            }
            for anchor in closure.anchors.iter().copied() {
                // The exit continuation of a crossed recursion anchor keeps
                // the machine's terminals reachable even when every body
                // path continues.
                if let Some(exit) = self.recursion_exit(anchor) {
                    let target_closure = self.closure(&[exit], boundary);
                    let target =
                        self.state_for(&mut builder, &mut worklist, target_closure);
                    if target != state {
                        builder.add_transition(state, target, LocalAction::tau());
                    }
                }
            }
        }

        Ok(Fragment {
            states: builder.states,
            transitions: builder.transitions,
            initial,
            terminals: builder.terminals,
        })
    }

    /// Get or create the state for a closure, enqueueing it when new.
    fn state_for(
        &self,
        builder: &mut FragmentBuilder,
        worklist: &mut VecDeque<(StateId, Closure)>,
        closure: Closure,
    ) -> StateId {
        if let Some(state) = builder.by_closure.get(&closure) {
            return *state;
        }
        let state = builder.fresh_state();
        if closure.terminal {
            builder.mark_terminal(state);
        }
        builder.by_closure.insert(closure.clone(), state);
        worklist.push_back((state, closure));
        state
    }

    /// Emit the transitions contributed by one stop node.
    fn emit_stop(
        &self,
        builder: &mut FragmentBuilder,
        worklist: &mut VecDeque<(StateId, Closure)>,
        state: StateId,
        stop: NodeId,
        boundary: Option<NodeId>,
    ) -> Result<(), ProtocolError> {
        let node = self.cfg.node(stop).expect("stop node exists");
        match &node.kind {
            CfgNodeKind::Action {
                action: CfgAction::Message { from, to, message },
            } => {
                let successor_closure =
                    self.closure(&self.successors(stop), boundary);
                let target = self.state_for(builder, worklist, successor_closure);
                self.emit_message(builder, state, target, from, to, message);
            }
            CfgNodeKind::Action {
                action: CfgAction::SubProtocol { protocol, .. },
            } => {
                let successor_closure =
                    self.closure(&self.successors(stop), boundary);
                let target = self.state_for(builder, worklist, successor_closure);
                builder.add_transition(
                    state,
                    target,
                    LocalAction::Tau {
                        note: Some(protocol.clone()),
                    },
                );
            }
            CfgNodeKind::Fork { .. } => {
                self.emit_fork(builder, worklist, state, stop, boundary)?;
            }
            other => unreachable!("not a stop node: {:?}", other),
        }
        Ok(())
    }

    /// Sender side: one send per receiver, in declaration order, chained
    /// through fresh states. Receiver side: a single receive. A role that is
    /// both sends first and then receives.
    fn emit_message(
        &self,
        builder: &mut FragmentBuilder,
        state: StateId,
        target: StateId,
        from: &RoleName,
        to: &[RoleName],
        message: &MessageSig,
    ) {
        let mut actions = Vec::new();
        if from == self.role {
            for receiver in to {
                actions.push(LocalAction::Send {
                    to: receiver.clone(),
                    message: message.clone(),
                });
            }
        }
        if to.contains(self.role) && from != self.role {
            actions.push(LocalAction::Receive {
                from: from.clone(),
                message: message.clone(),
            });
        }
        if from == self.role && to.contains(self.role) {
            // Self-communication: the send chain completes with the
            // matching receive.
            actions.push(LocalAction::Receive {
                from: from.clone(),
                message: message.clone(),
            });
        }
        debug_assert!(!actions.is_empty(), "stop node must involve the role");

        let mut current = state;
        for (i, action) in actions.iter().enumerate() {
            let next = if i + 1 == actions.len() {
                target
            } else {
                builder.fresh_state()
            };
            builder.add_transition(current, next, action.clone());
            current = next;
        }
    }

    /// Eager interleaving of an involved parallel scope.
    fn emit_fork(
        &self,
        builder: &mut FragmentBuilder,
        worklist: &mut VecDeque<(StateId, Closure)>,
        state: StateId,
        fork: NodeId,
        boundary: Option<NodeId>,
    ) -> Result<(), ProtocolError> {
        let join = *self.joins.get(&fork).expect("fork has a join");
        let after_closure = self.closure(&self.successors(join), boundary);
        let after = self.state_for(builder, worklist, after_closure);

        // Project each branch against the join, keep the observable ones.
        let mut fragments = Vec::new();
        for edge_id in self.index.edges_from(fork) {
            let edge = self.cfg.edge(*edge_id).expect("edge exists");
            let fragment = self.project_fragment(edge.to, Some(join))?;
            if !fragment.transitions.is_empty() {
                fragments.push(fragment);
            }
        }

        match fragments.len() {
            0 => {
                // Uninvolved scopes are crossed by the closure; an involved
                // scope always keeps at least one fragment.
                builder.add_transition(state, after, LocalAction::tau());
            }
            1 => self.splice_fragment(builder, state, after, &fragments[0]),
            _ => self.product(builder, state, after, &fragments)?,
        }
        Ok(())
    }

    /// Copy a single branch fragment into the machine between `state` and
    /// `after`.
    fn splice_fragment(
        &self,
        builder: &mut FragmentBuilder,
        state: StateId,
        after: StateId,
        fragment: &Fragment,
    ) {
        let mut map: HashMap<StateId, StateId> = HashMap::new();
        map.insert(fragment.initial, state);
        for terminal in &fragment.terminals {
            map.entry(*terminal).or_insert(after);
        }
        for local in &fragment.states {
            if !map.contains_key(local) {
                map.insert(*local, builder.fresh_state());
            }
        }
        for transition in &fragment.transitions {
            builder.add_transition(
                map[&transition.from],
                map[&transition.to],
                transition.action.clone(),
            );
        }
        if fragment.terminals.contains(&fragment.initial) {
            builder.add_transition(state, after, LocalAction::tau());
        }
    }

    /// Product composition of branch fragments: a product state per
    /// reachable tuple of branch states, transitions firing on any branch.
    fn product(
        &self,
        builder: &mut FragmentBuilder,
        state: StateId,
        after: StateId,
        fragments: &[Fragment],
    ) -> Result<(), ProtocolError> {
        let initial: Vec<StateId> = fragments.iter().map(|f| f.initial).collect();
        let all_terminal = |tuple: &[StateId]| {
            fragments
                .iter()
                .zip(tuple)
                .all(|(f, s)| f.terminals.contains(s))
        };

        let mut tuple_state: HashMap<Vec<StateId>, StateId> = HashMap::new();
        tuple_state.insert(initial.clone(), state);
        let mut queue = VecDeque::new();
        queue.push_back(initial);

        while let Some(tuple) = queue.pop_front() {
            if tuple_state.len() > self.config.max_shuffle_states {
                return Err(ProtocolError::Projection {
                    role: self.role.clone(),
                    detail: format!(
                        "parallel interleaving exceeds {} states",
                        self.config.max_shuffle_states
                    ),
                });
            }
            let source = tuple_state[&tuple];
            for (i, fragment) in fragments.iter().enumerate() {
                for transition in &fragment.transitions {
                    if transition.from != tuple[i] {
                        continue;
                    }
                    let mut next = tuple.clone();
                    next[i] = transition.to;
                    let target = if all_terminal(&next) {
                        after
                    } else if let Some(existing) = tuple_state.get(&next) {
                        *existing
                    } else {
                        let fresh = builder.fresh_state();
                        tuple_state.insert(next.clone(), fresh);
                        queue.push_back(next);
                        fresh
                    };
                    builder.add_transition(source, target, transition.action.clone());
                }
            }
        }
        Ok(())
    }

    /// Closure: silently cross everything the role cannot observe.
    fn closure(&self, entries: &[NodeId], boundary: Option<NodeId>) -> Closure {
        let mut closure = Closure {
            stops: BTreeSet::new(),
            anchors: BTreeSet::new(),
            terminal: false,
        };
        let mut seen: BTreeSet<NodeId> = BTreeSet::new();
        let mut queue: VecDeque<NodeId> = entries.iter().copied().collect();
        seen.extend(entries.iter().copied());

        while let Some(node_id) = queue.pop_front() {
            if Some(node_id) == boundary {
                closure.terminal = true;
                continue;
            }
            let Some(node) = self.cfg.node(node_id) else {
                continue;
            };
            let step: Vec<NodeId> = match &node.kind {
                CfgNodeKind::Terminal => {
                    closure.terminal = true;
                    continue;
                }
                CfgNodeKind::Action {
                    action: CfgAction::Message { from, to, .. },
                } => {
                    if from == self.role || to.contains(self.role) {
                        closure.stops.insert(node_id);
                        continue;
                    }
                    self.successors(node_id)
                }
                CfgNodeKind::Action {
                    action: CfgAction::SubProtocol { role_args, .. },
                } => {
                    if role_args.contains(self.role) {
                        closure.stops.insert(node_id);
                        continue;
                    }
                    self.successors(node_id)
                }
                CfgNodeKind::Action {
                    action: CfgAction::Dynamic { .. },
                } => self.successors(node_id),
                CfgNodeKind::Fork { .. } => {
                    if self.fork_involved(node_id) {
                        closure.stops.insert(node_id);
                        continue;
                    }
                    // Cross the whole scope.
                    let join = self.joins.get(&node_id).copied();
                    join.map(|j| self.successors(j)).unwrap_or_default()
                }
                CfgNodeKind::Recursive { .. } => {
                    closure.anchors.insert(node_id);
                    self.recursion_body(node_id).into_iter().collect()
                }
                CfgNodeKind::Initial
                | CfgNodeKind::Branch { .. }
                | CfgNodeKind::Merge
                | CfgNodeKind::Join { .. } => self.successors(node_id),
            };
            for next in step {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        closure
    }

    /// All outgoing edge targets, in edge order. Back-edges included: a
    /// continue edge leads to its recursion anchor, whose closure converges
    /// on the loop-head state.
    fn successors(&self, node: NodeId) -> Vec<NodeId> {
        self.index
            .edges_from(node)
            .iter()
            .filter_map(|id| self.cfg.edge(*id))
            .map(|e| e.to)
            .collect()
    }

    /// Body entry of a recursion anchor: the first outgoing sequence edge.
    /// A degenerate anchor whose body was retagged to a back-edge has only
    /// its exit continuation left.
    fn recursion_body(&self, node: NodeId) -> Option<NodeId> {
        let seq: Vec<NodeId> = self
            .index
            .edges_from(node)
            .iter()
            .filter_map(|id| self.cfg.edge(*id))
            .filter(|e| e.kind == CfgEdgeKind::Sequence)
            .map(|e| e.to)
            .collect();
        seq.first().copied()
    }

    /// Exit continuation of a recursion anchor: the second outgoing
    /// sequence edge (or the only one, for a degenerate anchor).
    fn recursion_exit(&self, node: NodeId) -> Option<NodeId> {
        let seq: Vec<NodeId> = self
            .index
            .edges_from(node)
            .iter()
            .filter_map(|id| self.cfg.edge(*id))
            .filter(|e| e.kind == CfgEdgeKind::Sequence)
            .map(|e| e.to)
            .collect();
        match seq.len() {
            0 | 1 => seq.first().copied(),
            _ => seq.get(1).copied(),
        }
    }

    /// Whether the role takes part anywhere inside a fork's scope.
    fn fork_involved(&self, fork: NodeId) -> bool {
        let Some(join) = self.joins.get(&fork) else {
            return false;
        };
        let scope = crate::verify::scope_until(self.cfg, self.index, fork, *join);
        scope.iter().any(|id| {
            match self.cfg.node(*id).map(|n| &n.kind) {
                Some(CfgNodeKind::Action {
                    action: CfgAction::Message { from, to, .. },
                }) => from == self.role || to.contains(self.role),
                Some(CfgNodeKind::Action {
                    action: CfgAction::SubProtocol { role_args, .. },
                }) => role_args.contains(self.role),
                _ => false,
            }
        })
    }
}
