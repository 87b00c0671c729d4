//! Well-formedness verification of global protocol graphs.
//!
//! Each check is a total function over the CFG returning `{valid,
//! violations}`; nothing here ever fails on a well-typed graph. The
//! aggregate report is part of the snapshot surface, so every type
//! serializes with a stable shape.

pub mod choice;
pub mod parallel;
pub mod progress;
pub mod roles;
pub mod structural;

use crate::cfg::{Cfg, CfgAction, CfgIndex, CfgNodeKind, NodeId};
use crate::types::{Label, RoleName, SourceLocation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Stable violation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationCode {
    /// The graph structure breaks a builder invariant.
    MalformedGraph,
    /// A role is referenced but never declared.
    UndefinedRole,
    /// A declared role takes part in no message.
    UnusedRole,
    /// A role sends a message to itself.
    SelfCommunication,
    /// Two branches of a choice start with the same communication.
    NonDeterministicChoice,
    /// A role outside the deciding role cannot learn which branch was taken.
    NonMergeableChoice,
    /// An action cannot reach any terminal.
    ProgressViolation,
    /// Sibling fork branches open with interfering first messages.
    ParallelDeadlock,
    /// A channel is used by more than one branch of a parallel scope.
    RaceCondition,
}

/// One verification finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Stable machine-readable code.
    pub code: ViolationCode,
    /// Human-readable description.
    pub message: String,
    /// Source site of the offending construct, when known.
    pub location: Option<SourceLocation>,
    /// Structured context, sorted by key for stable snapshots.
    pub details: BTreeMap<String, String>,
}

impl Violation {
    /// A violation with no extra details.
    pub fn new(code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            location: None,
            details: BTreeMap::new(),
        }
    }

    /// Attach a source site.
    pub fn at(mut self, location: Option<SourceLocation>) -> Self {
        self.location = location;
        self
    }

    /// Attach one detail entry.
    pub fn detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Whether the check passed.
    pub valid: bool,
    /// The findings, in discovery order.
    pub violations: Vec<Violation>,
}

impl CheckResult {
    /// A result from collected violations.
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
        }
    }

    /// A passing result.
    pub fn ok() -> Self {
        Self {
            valid: true,
            violations: Vec::new(),
        }
    }
}

/// Aggregate verification report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Protocol the report describes.
    pub protocol_name: String,
    /// Builder-invariant recheck.
    pub structural: CheckResult,
    /// Every declared role communicates; every used role is declared.
    pub connectedness: CheckResult,
    /// Distinct branches start with distinct communications.
    pub determinism: CheckResult,
    /// Uninvolved roles can follow the chosen branch.
    pub mergeability: CheckResult,
    /// Every action can reach a terminal.
    pub progress: CheckResult,
    /// Fork siblings do not open with interfering messages.
    pub parallel_deadlock: CheckResult,
    /// Channels are not shared across parallel branches.
    pub races: CheckResult,
}

impl VerificationReport {
    /// Whether every check passed.
    pub fn is_valid(&self) -> bool {
        self.structural.valid
            && self.connectedness.valid
            && self.determinism.valid
            && self.mergeability.valid
            && self.progress.valid
            && self.parallel_deadlock.valid
            && self.races.valid
    }

    /// All violations across checks, in report order.
    pub fn all_violations(&self) -> Vec<&Violation> {
        [
            &self.structural,
            &self.connectedness,
            &self.determinism,
            &self.mergeability,
            &self.progress,
            &self.parallel_deadlock,
            &self.races,
        ]
        .into_iter()
        .flat_map(|c| c.violations.iter())
        .collect()
    }
}

/// Run every check over a CFG. Pure; never fails.
pub fn verify_protocol(cfg: &Cfg) -> VerificationReport {
    let index = CfgIndex::build(cfg);
    VerificationReport {
        protocol_name: cfg.protocol_name.clone(),
        structural: structural::check(cfg, &index),
        connectedness: roles::check(cfg),
        determinism: choice::check_determinism(cfg, &index),
        mergeability: choice::check_mergeability(cfg, &index),
        progress: progress::check(cfg, &index),
        parallel_deadlock: parallel::check_deadlock(cfg, &index),
        races: parallel::check_races(cfg, &index),
    }
}

/// A first observable communication on some path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct FirstMessage {
    pub from: RoleName,
    pub to: Vec<RoleName>,
    pub label: Label,
}

/// Collect the first message actions reachable from `start` along forward
/// edges, stopping at message nodes and at `stop` (exclusive).
pub(crate) fn first_messages(
    cfg: &Cfg,
    index: &CfgIndex,
    start: NodeId,
    stop: Option<NodeId>,
) -> Vec<FirstMessage> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(start);
    seen.insert(start);

    while let Some(node_id) = queue.pop_front() {
        if Some(node_id) == stop {
            continue;
        }
        let Some(node) = cfg.node(node_id) else {
            continue;
        };
        if let Some((from, to, sig)) = node.message_action() {
            found.push(FirstMessage {
                from: from.clone(),
                to: to.to_vec(),
                label: sig.label.clone(),
            });
            continue;
        }
        for succ in index.forward_successors(cfg, node_id) {
            if seen.insert(succ) {
                queue.push_back(succ);
            }
        }
    }
    found.sort();
    found.dedup();
    found
}

/// Nodes reachable from `start` along forward edges, stopping at `stop`
/// (exclusive), including `start`.
pub(crate) fn scope_until(
    cfg: &Cfg,
    index: &CfgIndex,
    start: NodeId,
    stop: NodeId,
) -> HashSet<NodeId> {
    let mut scope = HashSet::new();
    let mut queue = VecDeque::new();
    if start == stop {
        return scope;
    }
    scope.insert(start);
    queue.push_back(start);
    while let Some(node) = queue.pop_front() {
        for succ in index.forward_successors(cfg, node) {
            if succ != stop && scope.insert(succ) {
                queue.push_back(succ);
            }
        }
    }
    scope
}

/// Nodes reachable from `start` over every edge kind, including back-edges.
pub(crate) fn reachable_all(cfg: &Cfg, start: NodeId) -> HashSet<NodeId> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(start);
    queue.push_back(start);
    while let Some(node) = queue.pop_front() {
        for edge in cfg.edges_from(node) {
            if seen.insert(edge.to) {
                queue.push_back(edge.to);
            }
        }
    }
    seen
}

/// The merge node where the branches of `branch_node` converge: the first
/// node, in storage (topological) order, that is a Merge reachable from
/// every branch. Back-edges count - a branch ending in `continue` converges
/// through its loop.
pub(crate) fn choice_merge(cfg: &Cfg, _index: &CfgIndex, branch_node: NodeId) -> Option<NodeId> {
    let targets: Vec<NodeId> = cfg.edges_from(branch_node).iter().map(|e| e.to).collect();
    let mut common: Option<HashSet<NodeId>> = None;
    for target in targets {
        let reach = reachable_all(cfg, target);
        common = Some(match common {
            None => reach,
            Some(prev) => prev.intersection(&reach).copied().collect(),
        });
    }
    let common = common?;
    cfg.nodes
        .iter()
        .find(|n| matches!(n.kind, CfgNodeKind::Merge) && common.contains(&n.id))
        .map(|n| n.id)
}

/// All branch nodes of a CFG, in storage order.
pub(crate) fn branch_nodes(cfg: &Cfg) -> Vec<(NodeId, RoleName)> {
    cfg.nodes
        .iter()
        .filter_map(|n| match &n.kind {
            CfgNodeKind::Branch { at } => Some((n.id, at.clone())),
            _ => None,
        })
        .collect()
}

/// All message triples `(from, to, label)` inside a node scope, expanded per
/// receiver, in storage order.
pub(crate) fn channels_in_scope(cfg: &Cfg, scope: &HashSet<NodeId>) -> Vec<(RoleName, RoleName, Label)> {
    let mut channels = Vec::new();
    for node in &cfg.nodes {
        if !scope.contains(&node.id) {
            continue;
        }
        if let CfgNodeKind::Action {
            action: CfgAction::Message { from, to, message },
        } = &node.kind
        {
            for receiver in to {
                channels.push((from.clone(), receiver.clone(), message.label.clone()));
            }
        }
    }
    channels
}
