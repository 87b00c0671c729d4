//! Role connectedness.
//!
//! Every declared role must take part in some message; every role a message
//! or choice names must be declared; nobody messages themselves.

use crate::cfg::{Cfg, CfgAction, CfgNodeKind};
use crate::types::RoleName;
use crate::verify::{CheckResult, Violation, ViolationCode};
use std::collections::HashSet;

/// Run the connectedness check.
pub fn check(cfg: &Cfg) -> CheckResult {
    let declared: HashSet<&RoleName> = cfg.roles.iter().collect();
    let mut communicating: HashSet<&RoleName> = HashSet::new();
    let mut violations = Vec::new();

    for node in &cfg.nodes {
        match &node.kind {
            CfgNodeKind::Action {
                action: CfgAction::Message { from, to, message },
            } => {
                communicating.insert(from);
                for role in [from].into_iter().chain(to.iter()) {
                    if !declared.contains(role) {
                        violations.push(
                            Violation::new(
                                ViolationCode::UndefinedRole,
                                format!("role '{}' is not declared by the protocol", role),
                            )
                            .detail("role", role.as_str())
                            .detail("message", message.label.as_str())
                            .at(node.location.clone()),
                        );
                    }
                }
                for receiver in to {
                    communicating.insert(receiver);
                    if receiver == from {
                        violations.push(
                            Violation::new(
                                ViolationCode::SelfCommunication,
                                format!("role '{}' sends '{}' to itself", from, message.label),
                            )
                            .detail("role", from.as_str())
                            .detail("message", message.label.as_str())
                            .at(node.location.clone()),
                        );
                    }
                }
            }
            CfgNodeKind::Branch { at } => {
                if !declared.contains(at) {
                    violations.push(
                        Violation::new(
                            ViolationCode::UndefinedRole,
                            format!("choice is made at undeclared role '{}'", at),
                        )
                        .detail("role", at.as_str())
                        .at(node.location.clone()),
                    );
                }
            }
            _ => {}
        }
    }

    for role in &cfg.roles {
        if !communicating.contains(role) {
            violations.push(
                Violation::new(
                    ViolationCode::UnusedRole,
                    format!("role '{}' takes part in no message", role),
                )
                .detail("role", role.as_str()),
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

    #[test]
    fn test_unused_role_is_reported() {
        let decl = GlobalProtocolDecl::new(
            "P",
            vec![RoleName::new("A"), RoleName::new("B"), RoleName::new("C")],
            vec![GlobalInteraction::message("A", "B", "m")],
        );
        let result = check(&build_cfg(&decl).unwrap());
        assert!(!result.valid);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].code, ViolationCode::UnusedRole);
        assert_eq!(result.violations[0].details["role"], "C");
    }

    #[test]
    fn test_undeclared_sender_is_reported() {
        let decl = GlobalProtocolDecl::new(
            "P",
            vec![RoleName::new("A"), RoleName::new("B")],
            vec![GlobalInteraction::message("Ghost", "B", "m")],
        );
        let result = check(&build_cfg(&decl).unwrap());
        assert!(result
            .violations
            .iter()
            .any(|v| v.code == ViolationCode::UndefinedRole));
    }

    #[test]
    fn test_self_message_is_reported() {
        let decl = GlobalProtocolDecl::new(
            "P",
            vec![RoleName::new("A"), RoleName::new("B")],
            vec![
                GlobalInteraction::message("A", "A", "note"),
                GlobalInteraction::message("A", "B", "m"),
            ],
        );
        let result = check(&build_cfg(&decl).unwrap());
        assert!(result
            .violations
            .iter()
            .any(|v| v.code == ViolationCode::SelfCommunication));
    }

    #[test]
    fn test_fully_connected_protocol_passes() {
        let decl = GlobalProtocolDecl::new(
            "P",
            vec![RoleName::new("A"), RoleName::new("B")],
            vec![GlobalInteraction::message("A", "B", "m")],
        );
        assert!(check(&build_cfg(&decl).unwrap()).valid);
    }
}
