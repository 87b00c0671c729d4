//! Builder-invariant recheck.
//!
//! The builder guarantees these properties by construction; this check
//! re-establishes them over the finished arena so hand-built or rewritten
//! graphs are held to the same contract.

use crate::cfg::{Cfg, CfgIndex, CfgNodeKind, NodeId};
use crate::verify::{CheckResult, Violation, ViolationCode};
use std::collections::{HashMap, HashSet, VecDeque};

/// Run the structural check.
pub fn check(cfg: &Cfg, index: &CfgIndex) -> CheckResult {
    let mut violations = Vec::new();

    check_entry_and_exits(cfg, &mut violations);
    check_edge_endpoints(cfg, &mut violations);
    check_reachability(cfg, index, &mut violations);
    check_fork_join_pairing(cfg, index, &mut violations);
    check_branch_convergence(cfg, index, &mut violations);

    CheckResult::from_violations(violations)
}

fn check_entry_and_exits(cfg: &Cfg, violations: &mut Vec<Violation>) {
    let initials: Vec<&crate::cfg::CfgNode> = cfg
        .nodes
        .iter()
        .filter(|n| matches!(n.kind, CfgNodeKind::Initial))
        .collect();
    if initials.len() != 1 {
        violations.push(
            Violation::new(
                ViolationCode::MalformedGraph,
                format!("expected exactly one initial node, found {}", initials.len()),
            )
            .detail("count", initials.len().to_string()),
        );
    } else if initials[0].id != cfg.initial {
        violations.push(Violation::new(
            ViolationCode::MalformedGraph,
            "the recorded initial node is not the graph's Initial",
        ));
    }

    let terminals: HashSet<NodeId> = cfg
        .nodes
        .iter()
        .filter(|n| n.is_terminal())
        .map(|n| n.id)
        .collect();
    if terminals.is_empty() {
        violations.push(Violation::new(
            ViolationCode::MalformedGraph,
            "graph has no terminal node",
        ));
    }
    for id in &cfg.terminals {
        if !terminals.contains(id) {
            violations.push(
                Violation::new(
                    ViolationCode::MalformedGraph,
                    "recorded terminal is not a Terminal node",
                )
                .detail("node", format!("{:?}", id)),
            );
        }
    }
}

fn check_edge_endpoints(cfg: &Cfg, violations: &mut Vec<Violation>) {
    let ids: HashSet<NodeId> = cfg.nodes.iter().map(|n| n.id).collect();
    for edge in &cfg.edges {
        for endpoint in [edge.from, edge.to] {
            if !ids.contains(&endpoint) {
                violations.push(
                    Violation::new(
                        ViolationCode::MalformedGraph,
                        "edge references a node that does not exist",
                    )
                    .detail("edge", format!("{:?}", edge.id))
                    .detail("node", format!("{:?}", endpoint)),
                );
            }
        }
    }
}

fn check_reachability(cfg: &Cfg, index: &CfgIndex, violations: &mut Vec<Violation>) {
    // Forward: every node is reachable from the initial node.
    let reachable: HashSet<NodeId> = index
        .forward_reachable(cfg, cfg.initial)
        .into_iter()
        .collect();
    for node in &cfg.nodes {
        if !reachable.contains(&node.id) {
            violations.push(
                Violation::new(
                    ViolationCode::MalformedGraph,
                    "node is unreachable from the initial node",
                )
                .detail("node", format!("{:?}", node.id))
                .at(node.location.clone()),
            );
        }
    }

    // Backward: every non-terminal node reaches some terminal. Back-edges
    // count here: a loop escapes through its recursion anchor's exit
    // continuation.
    let mut co_reachable: HashSet<NodeId> = cfg.terminals.iter().copied().collect();
    let mut incoming: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for edge in &cfg.edges {
        incoming.entry(edge.to).or_default().push(edge.from);
    }
    let mut queue: VecDeque<NodeId> = cfg.terminals.iter().copied().collect();
    while let Some(node) = queue.pop_front() {
        if let Some(preds) = incoming.get(&node) {
            for pred in preds {
                if co_reachable.insert(*pred) {
                    queue.push_back(*pred);
                }
            }
        }
    }
    for node in &cfg.nodes {
        if !node.is_terminal() && !co_reachable.contains(&node.id) {
            violations.push(
                Violation::new(
                    ViolationCode::MalformedGraph,
                    "node cannot reach any terminal",
                )
                .detail("node", format!("{:?}", node.id))
                .at(node.location.clone()),
            );
        }
    }
}

fn check_fork_join_pairing(cfg: &Cfg, index: &CfgIndex, violations: &mut Vec<Violation>) {
    let mut joins = HashMap::new();
    for node in &cfg.nodes {
        if let CfgNodeKind::Join { parallel_id } = node.kind {
            if joins.insert(parallel_id, node.id).is_some() {
                violations.push(
                    Violation::new(
                        ViolationCode::MalformedGraph,
                        "two joins share a parallel id",
                    )
                    .detail("parallel_id", format!("{:?}", parallel_id)),
                );
            }
        }
    }
    for node in &cfg.nodes {
        if let CfgNodeKind::Fork { parallel_id } = node.kind {
            match joins.get(&parallel_id) {
                None => violations.push(
                    Violation::new(
                        ViolationCode::MalformedGraph,
                        "fork has no matching join",
                    )
                    .detail("parallel_id", format!("{:?}", parallel_id)),
                ),
                Some(join) => {
                    let reach = index.forward_reachable(cfg, node.id);
                    if !reach.contains(join) {
                        violations.push(
                            Violation::new(
                                ViolationCode::MalformedGraph,
                                "fork cannot reach its matching join",
                            )
                            .detail("parallel_id", format!("{:?}", parallel_id)),
                        );
                    }
                }
            }
        }
    }
}

fn check_branch_convergence(cfg: &Cfg, index: &CfgIndex, violations: &mut Vec<Violation>) {
    for (branch_id, at) in crate::verify::branch_nodes(cfg) {
        if crate::verify::choice_merge(cfg, index, branch_id).is_none() {
            let node = cfg.node(branch_id);
            violations.push(
                Violation::new(
                    ViolationCode::MalformedGraph,
                    format!("branches of the choice at '{}' do not converge at a merge", at),
                )
                .detail("node", format!("{:?}", branch_id))
                .at(node.and_then(|n| n.location.clone())),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{GlobalInteraction, GlobalProtocolDecl};
    use crate::cfg::build_cfg;
    use crate::types::RoleName;

    fn verify_structural(decl: &GlobalProtocolDecl) -> CheckResult {
        let cfg = build_cfg(decl).unwrap();
        let index = CfgIndex::build(&cfg);
        check(&cfg, &index)
    }

    #[test]
    fn test_built_graphs_pass() {
        let decl = GlobalProtocolDecl::new(
            "P",
            vec![RoleName::new("A"), RoleName::new("B")],
            vec![
                GlobalInteraction::message("A", "B", "m"),
                GlobalInteraction::choice(
                    "A",
                    vec![
                        ("x", vec![GlobalInteraction::message("A", "B", "x")]),
                        ("y", vec![GlobalInteraction::message("A", "B", "y")]),
                    ],
                ),
            ],
        );
        let result = verify_structural(&decl);
        assert!(result.valid, "violations: {:?}", result.violations);
    }

    #[test]
    fn test_loops_still_reach_terminals() {
        let decl = GlobalProtocolDecl::new(
            "Ping",
            vec![RoleName::new("A"), RoleName::new("B")],
            vec![GlobalInteraction::rec(
                "L",
                vec![
                    GlobalInteraction::message("A", "B", "ping"),
                    GlobalInteraction::message("B", "A", "pong"),
                    GlobalInteraction::continue_to("L"),
                ],
            )],
        );
        let result = verify_structural(&decl);
        assert!(result.valid, "violations: {:?}", result.violations);
    }

    #[test]
    fn test_dangling_edge_is_reported() {
        let decl = GlobalProtocolDecl::new(
            "P",
            vec![RoleName::new("A"), RoleName::new("B")],
            vec![GlobalInteraction::message("A", "B", "m")],
        );
        let mut cfg = build_cfg(&decl).unwrap();
        cfg.edges[0].to = crate::cfg::NodeId(999);
        let index = CfgIndex::build(&cfg);
        let result = check(&cfg, &index);
        assert!(!result.valid);
        assert!(result
            .violations
            .iter()
            .any(|v| v.code == ViolationCode::MalformedGraph));
    }
}
