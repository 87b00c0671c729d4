//! Choice determinism and mergeability.
//!
//! Determinism: no two branches of a choice may begin with the same
//! communication. Mergeability: a role other than the decider must either
//! see identical first actions in every branch or be able to tell the
//! branches apart by the labels it receives.

use crate::cfg::{Cfg, CfgAction, CfgIndex, CfgNodeKind, NodeId};
use crate::types::{Label, RoleName};
use crate::verify::{choice_merge, first_messages, CheckResult, Violation, ViolationCode};
use std::collections::{BTreeSet, HashSet, VecDeque};

/// Run the determinism check.
pub fn check_determinism(cfg: &Cfg, index: &CfgIndex) -> CheckResult {
    let mut violations = Vec::new();

    for (branch_id, at) in crate::verify::branch_nodes(cfg) {
        let merge = choice_merge(cfg, index, branch_id);
        let branches = branch_targets(cfg, branch_id);

        let firsts: Vec<(Option<Label>, BTreeSet<_>)> = branches
            .iter()
            .map(|(label, target)| {
                (
                    label.clone(),
                    first_messages(cfg, index, *target, merge).into_iter().collect(),
                )
            })
            .collect();

        for i in 0..firsts.len() {
            for j in (i + 1)..firsts.len() {
                for shared in firsts[i].1.intersection(&firsts[j].1) {
                    violations.push(
                        Violation::new(
                            ViolationCode::NonDeterministicChoice,
                            format!(
                                "branches {} and {} of the choice at '{}' both start with {} -> {:?}: {}",
                                branch_name(&firsts[i].0, i),
                                branch_name(&firsts[j].0, j),
                                at,
                                shared.from,
                                shared.to.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
                                shared.label,
                            ),
                        )
                        .detail("at", at.as_str())
                        .detail("label", shared.label.as_str())
                        .detail("first_branch", branch_name(&firsts[i].0, i))
                        .detail("second_branch", branch_name(&firsts[j].0, j))
                        .at(cfg.node(branch_id).and_then(|n| n.location.clone())),
                    );
                }
            }
        }
    }

    CheckResult::from_violations(violations)
}

/// Run the mergeability check.
pub fn check_mergeability(cfg: &Cfg, index: &CfgIndex) -> CheckResult {
    let mut violations = Vec::new();

    for (branch_id, at) in crate::verify::branch_nodes(cfg) {
        let merge = choice_merge(cfg, index, branch_id);
        let branches = branch_targets(cfg, branch_id);
        if branches.len() < 2 {
            continue;
        }

        for role in &cfg.roles {
            if role == &at {
                continue;
            }
            let views: Vec<BTreeSet<RoleView>> = branches
                .iter()
                .map(|(_, target)| role_first_actions(cfg, index, role, *target, merge))
                .collect();

            if views.windows(2).all(|w| w[0] == w[1]) {
                continue;
            }

            let mergeable = disjoint_receives(&views);
            if !mergeable {
                violations.push(
                    Violation::new(
                        ViolationCode::NonMergeableChoice,
                        format!(
                            "role '{}' cannot follow the choice at '{}': branch first actions \
                             neither coincide nor are distinguished by received labels",
                            role, at
                        ),
                    )
                    .detail("role", role.as_str())
                    .detail("at", at.as_str())
                    .at(cfg.node(branch_id).and_then(|n| n.location.clone())),
                );
            }
        }
    }

    CheckResult::from_violations(violations)
}

/// What one role observes first on some path of a branch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum RoleView {
    Send { to: Vec<RoleName>, label: Label },
    Receive { from: RoleName, label: Label },
}

/// First observable actions of `role` from `start`, stopping at the
/// choice's merge.
fn role_first_actions(
    cfg: &Cfg,
    index: &CfgIndex,
    role: &RoleName,
    start: NodeId,
    stop: Option<NodeId>,
) -> BTreeSet<RoleView> {
    let mut views = BTreeSet::new();
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
        if let CfgNodeKind::Action {
            action: CfgAction::Message { from, to, message },
        } = &node.kind
        {
            if from == role {
                views.insert(RoleView::Send {
                    to: to.clone(),
                    label: message.label.clone(),
                });
                continue;
            }
            if to.contains(role) {
                views.insert(RoleView::Receive {
                    from: from.clone(),
                    label: message.label.clone(),
                });
                continue;
            }
        }
        for succ in index.forward_successors(cfg, node_id) {
            if seen.insert(succ) {
                queue.push_back(succ);
            }
        }
    }
    views
}

/// Branches are distinguishable when every possible first action is a
/// receive and no `(peer, label)` pair appears in two branches.
fn disjoint_receives(views: &[BTreeSet<RoleView>]) -> bool {
    let involved: Vec<&BTreeSet<RoleView>> = views.iter().filter(|v| !v.is_empty()).collect();
    if involved.len() != views.len() {
        // Observable in some branches and silent in others: no way to learn
        // the outcome.
        return false;
    }
    let mut seen: BTreeSet<(RoleName, Label)> = BTreeSet::new();
    for branch in involved {
        for view in branch.iter() {
            match view {
                RoleView::Send { .. } => return false,
                RoleView::Receive { from, label } => {
                    if !seen.insert((from.clone(), label.clone())) {
                        return false;
                    }
                }
            }
        }
    }
    true
}

fn branch_targets(cfg: &Cfg, branch_id: NodeId) -> Vec<(Option<Label>, NodeId)> {
    cfg.edges_from(branch_id)
        .into_iter()
        .map(|e| (e.label.clone(), e.to))
        .collect()
}

fn branch_name(label: &Option<Label>, index: usize) -> String {
    label
        .as_ref()
        .map(|l| l.as_str().to_string())
        .unwrap_or_else(|| format!("branch{}", index + 1))
}
