//! Parallel-scope checks: sibling interference and channel races.
//!
//! Both checks work per Fork/Join pair. The branch scope of a fork branch is
//! everything reachable from its entry on forward edges, stopping at the
//! matching join.

use crate::cfg::{Cfg, CfgIndex, CfgNodeKind, NodeId, ParallelId};
use crate::verify::{
    channels_in_scope, first_messages, scope_until, CheckResult, Violation, ViolationCode,
};
use std::collections::HashMap;

/// Fork siblings must not open with messages that engage each other's
/// starters: a branch whose first message is awaited from a role that is
/// itself receiving first in a sibling can hold the whole scope up.
pub fn check_deadlock(cfg: &Cfg, index: &CfgIndex) -> CheckResult {
    let mut violations = Vec::new();

    for (fork, join, _) in fork_join_pairs(cfg) {
        let entries = branch_entries(cfg, fork);
        let firsts: Vec<_> = entries
            .iter()
            .map(|entry| first_messages(cfg, index, *entry, Some(join)))
            .collect();

        for i in 0..firsts.len() {
            for j in 0..firsts.len() {
                if i == j {
                    continue;
                }
                for first_i in &firsts[i] {
                    for first_j in &firsts[j] {
                        if first_i.to.contains(&first_j.from) {
                            violations.push(
                                Violation::new(
                                    ViolationCode::ParallelDeadlock,
                                    format!(
                                        "branch {} starts by sending '{}' to '{}', which must \
                                         first send '{}' in branch {}",
                                        i + 1,
                                        first_i.label,
                                        first_j.from,
                                        first_j.label,
                                        j + 1
                                    ),
                                )
                                .detail("role", first_j.from.as_str())
                                .detail("first_branch", (i + 1).to_string())
                                .detail("second_branch", (j + 1).to_string())
                                .at(cfg.node(fork).and_then(|n| n.location.clone())),
                            );
                        }
                    }
                }
            }
        }
    }

    CheckResult::from_violations(violations)
}

/// Within one parallel scope, each `(sender, receiver, label)` channel may
/// be used by at most one branch.
pub fn check_races(cfg: &Cfg, index: &CfgIndex) -> CheckResult {
    let mut violations = Vec::new();

    for (fork, join, parallel_id) in fork_join_pairs(cfg) {
        let entries = branch_entries(cfg, fork);
        let mut channel_owner: HashMap<(String, String, String), usize> = HashMap::new();

        for (branch_index, entry) in entries.iter().enumerate() {
            let scope = scope_until(cfg, index, *entry, join);
            for (from, to, label) in channels_in_scope(cfg, &scope) {
                let key = (
                    from.as_str().to_string(),
                    to.as_str().to_string(),
                    label.as_str().to_string(),
                );
                match channel_owner.get(&key) {
                    None => {
                        channel_owner.insert(key, branch_index);
                    }
                    Some(owner) if *owner != branch_index => {
                        violations.push(
                            Violation::new(
                                ViolationCode::RaceCondition,
                                format!(
                                    "channel {} -> {}: {} is used by branches {} and {} of the \
                                     same parallel scope",
                                    from,
                                    to,
                                    label,
                                    owner + 1,
                                    branch_index + 1
                                ),
                            )
                            .detail("sender", from.as_str())
                            .detail("receiver", to.as_str())
                            .detail("label", label.as_str())
                            .detail("parallel_id", format!("{:?}", parallel_id))
                            .at(cfg.node(fork).and_then(|n| n.location.clone())),
                        );
                    }
                    Some(_) => {}
                }
            }
        }
    }

    CheckResult::from_violations(violations)
}

fn fork_join_pairs(cfg: &Cfg) -> Vec<(NodeId, NodeId, ParallelId)> {
    let mut joins = HashMap::new();
    for node in &cfg.nodes {
        if let CfgNodeKind::Join { parallel_id } = node.kind {
            joins.insert(parallel_id, node.id);
        }
    }
    cfg.nodes
        .iter()
        .filter_map(|node| match node.kind {
            CfgNodeKind::Fork { parallel_id } => joins
                .get(&parallel_id)
                .map(|join| (node.id, *join, parallel_id)),
            _ => None,
        })
        .collect()
}

fn branch_entries(cfg: &Cfg, fork: NodeId) -> Vec<NodeId> {
    cfg.edges_from(fork).into_iter().map(|e| e.to).collect()
}
