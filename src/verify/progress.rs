//! Progress: every reachable action can finish the protocol.
//!
//! An action that cannot reach any terminal marks a path on which the
//! session can never complete. Back-edges count towards reachability here:
//! a loop escapes through its recursion anchor's exit continuation.

use crate::cfg::{Cfg, CfgIndex, CfgNodeKind, NodeId};
use crate::verify::{CheckResult, Violation, ViolationCode};
use std::collections::{HashMap, HashSet, VecDeque};

/// Run the progress check.
pub fn check(cfg: &Cfg, index: &CfgIndex) -> CheckResult {
    let reachable: HashSet<NodeId> = index
        .forward_reachable(cfg, cfg.initial)
        .into_iter()
        .collect();

    // Co-reachability over all edges.
    let mut can_finish: HashSet<NodeId> = cfg.terminals.iter().copied().collect();
    let mut incoming: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for edge in &cfg.edges {
        incoming.entry(edge.to).or_default().push(edge.from);
    }
    let mut queue: VecDeque<NodeId> = cfg.terminals.iter().copied().collect();
    while let Some(node) = queue.pop_front() {
        if let Some(preds) = incoming.get(&node) {
            for pred in preds {
                if can_finish.insert(*pred) {
                    queue.push_back(*pred);
                }
            }
        }
    }

    let mut violations = Vec::new();
    for node in &cfg.nodes {
        if !matches!(node.kind, CfgNodeKind::Action { .. }) {
            continue;
        }
        if reachable.contains(&node.id) && !can_finish.contains(&node.id) {
            let description = node
                .message_action()
                .map(|(from, to, sig)| {
                    format!(
                        "{} -> {:?}: {}",
                        from,
                        to.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
                        sig.label
                    )
                })
                .unwrap_or_else(|| "internal action".to_string());
            violations.push(
                Violation::new(
                    ViolationCode::ProgressViolation,
                    format!("action ({}) can never reach a terminal", description),
                )
                .detail("node", format!("{:?}", node.id))
                .at(node.location.clone()),
            );
        }
    }

    CheckResult::from_violations(violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{GlobalInteraction, GlobalProtocolDecl};
    use crate::cfg::build_cfg;
    use crate::types::RoleName;

    #[test]
    fn test_straight_line_protocol_progresses() {
        let decl = GlobalProtocolDecl::new(
            "P",
            vec![RoleName::new("A"), RoleName::new("B")],
            vec![GlobalInteraction::message("A", "B", "m")],
        );
        let cfg = build_cfg(&decl).unwrap();
        let index = CfgIndex::build(&cfg);
        assert!(check(&cfg, &index).valid);
    }

    #[test]
    fn test_infinite_loop_still_progresses_via_exit_continuation() {
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
        let cfg = build_cfg(&decl).unwrap();
        let index = CfgIndex::build(&cfg);
        let result = check(&cfg, &index);
        assert!(result.valid, "violations: {:?}", result.violations);
    }
}
