//! Abstract syntax tree for global protocols.
//!
//! The AST is the contract with the parser front-end: a module of
//! declarations, of which the kernel consumes global protocol declarations.
//! Bodies are ordered interaction lists; every interaction may carry a
//! source location for diagnostics. ASTs are immutable after parsing.

use crate::types::{Label, MessageSig, RoleName, SourceLocation};
use serde::{Deserialize, Serialize};

/// An ordered collection of top-level declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// Declarations in source order.
    pub declarations: Vec<Declaration>,
}

impl Module {
    /// Module holding the given declarations.
    pub fn new(declarations: Vec<Declaration>) -> Self {
        Self { declarations }
    }

    /// Module holding a single global protocol.
    pub fn single(protocol: GlobalProtocolDecl) -> Self {
        Self {
            declarations: vec![Declaration::GlobalProtocol(protocol)],
        }
    }

    /// Iterate the global protocol declarations, in source order.
    pub fn global_protocols(&self) -> impl Iterator<Item = &GlobalProtocolDecl> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::GlobalProtocol(p) => Some(p),
            _ => None,
        })
    }
}

/// A top-level declaration.
///
/// The kernel only interprets global protocols; the remaining variants are
/// carried through so a module can be represented faithfully and ignored
/// deliberately rather than lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Declaration {
    /// A global protocol declaration.
    GlobalProtocol(GlobalProtocolDecl),

    /// A local protocol declaration (not interpreted).
    LocalProtocol {
        /// Declared name.
        name: String,
    },

    /// An import (not interpreted).
    Import {
        /// Imported module path.
        module: String,
    },

    /// A payload type declaration (not interpreted).
    TypeDecl {
        /// Declared type name.
        name: String,
    },
}

/// A global protocol: name, parameters, roles and an ordered body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalProtocolDecl {
    /// Protocol name.
    pub name: String,

    /// Type and signature parameters, in declaration order.
    pub parameters: Vec<Parameter>,

    /// Role declarations, in declaration order.
    pub roles: Vec<RoleDecl>,

    /// The protocol body.
    pub body: Vec<GlobalInteraction>,

    /// Declaration site.
    pub location: Option<SourceLocation>,
}

impl GlobalProtocolDecl {
    /// A protocol with no parameters and the given roles and body.
    pub fn new(
        name: impl Into<String>,
        roles: Vec<RoleName>,
        body: Vec<GlobalInteraction>,
    ) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            roles: roles.into_iter().map(RoleDecl::new).collect(),
            body,
            location: None,
        }
    }

    /// Names of all declared roles, in declaration order.
    pub fn role_names(&self) -> Vec<RoleName> {
        self.roles.iter().map(|r| r.name.clone()).collect()
    }

    /// Whether `role` is declared by this protocol.
    pub fn declares_role(&self, role: &RoleName) -> bool {
        self.roles.iter().any(|r| &r.name == role)
    }
}

/// Kind of a protocol parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// A payload type parameter.
    Type,
    /// A message signature parameter.
    Sig,
}

/// A protocol parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name.
    pub name: String,
    /// Parameter kind.
    pub kind: ParameterKind,
}

/// A role declaration, optionally marked dynamic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDecl {
    /// Role name.
    pub name: RoleName,
    /// Whether the role is created at run time rather than at session start.
    pub dynamic: bool,
}

impl RoleDecl {
    /// A static role.
    pub fn new(name: impl Into<RoleName>) -> Self {
        Self {
            name: name.into(),
            dynamic: false,
        }
    }

    /// A dynamic role.
    pub fn dynamic(name: impl Into<RoleName>) -> Self {
        Self {
            name: name.into(),
            dynamic: true,
        }
    }
}

/// One labelled branch of a choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceBranch {
    /// Branch label; `None` for positional branches.
    pub label: Option<Label>,
    /// The branch body.
    pub body: Vec<GlobalInteraction>,
}

/// A global interaction.
///
/// Matching on this enum must stay exhaustive: a new construct has to be
/// acknowledged by the builder, the projector and the simulator before the
/// crate compiles again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GlobalInteraction {
    /// A message from one role to one or more receivers.
    MessageTransfer {
        /// Sending role.
        from: RoleName,
        /// Receiving roles (one entry for a unicast).
        to: Vec<RoleName>,
        /// The message signature.
        message: MessageSig,
        /// Source site.
        location: Option<SourceLocation>,
    },

    /// A choice made by one role between ordered branches.
    Choice {
        /// The deciding role.
        at: RoleName,
        /// The branches, in source order.
        branches: Vec<ChoiceBranch>,
        /// Source site.
        location: Option<SourceLocation>,
    },

    /// Parallel composition of ordered branches.
    Parallel {
        /// The branch bodies, in source order.
        branches: Vec<Vec<GlobalInteraction>>,
        /// Source site.
        location: Option<SourceLocation>,
    },

    /// A labelled recursion scope.
    Recursion {
        /// Recursion label.
        label: String,
        /// The scope body.
        body: Vec<GlobalInteraction>,
        /// Source site.
        location: Option<SourceLocation>,
    },

    /// Jump back to an enclosing recursion label.
    Continue {
        /// Target label.
        label: String,
        /// Source site.
        location: Option<SourceLocation>,
    },

    /// Static sub-protocol invocation.
    Do {
        /// Callee protocol name.
        protocol: String,
        /// Actual roles substituted for the callee's formal roles.
        role_args: Vec<RoleName>,
        /// Source site.
        location: Option<SourceLocation>,
    },

    /// Declaration of a dynamic role mid-protocol.
    DynamicRole {
        /// The declared role.
        role: RoleName,
        /// Source site.
        location: Option<SourceLocation>,
    },

    /// Creation of participants for a dynamic role.
    CreateParticipants {
        /// The role whose participants are created.
        role: RoleName,
        /// Source site.
        location: Option<SourceLocation>,
    },

    /// Invitation of a participant into a running session.
    Invitation {
        /// Inviting role.
        from: RoleName,
        /// Invited role.
        to: RoleName,
        /// Protocol the invitee joins.
        protocol: String,
        /// Source site.
        location: Option<SourceLocation>,
    },

    /// `continue label with { body }`: recursion jump that installs an
    /// updated body for the next iteration.
    ContinueWith {
        /// Target label.
        label: String,
        /// The replacement body.
        body: Vec<GlobalInteraction>,
        /// Source site.
        location: Option<SourceLocation>,
    },
}

impl GlobalInteraction {
    /// Unicast message with no payload.
    pub fn message(
        from: impl Into<RoleName>,
        to: impl Into<RoleName>,
        label: impl Into<Label>,
    ) -> Self {
        GlobalInteraction::MessageTransfer {
            from: from.into(),
            to: vec![to.into()],
            message: MessageSig::new(label),
            location: None,
        }
    }

    /// Unicast message carrying a payload type.
    pub fn message_with_payload(
        from: impl Into<RoleName>,
        to: impl Into<RoleName>,
        label: impl Into<Label>,
        payload: impl Into<String>,
    ) -> Self {
        GlobalInteraction::MessageTransfer {
            from: from.into(),
            to: vec![to.into()],
            message: MessageSig::with_payload(label, payload),
            location: None,
        }
    }

    /// Multicast message with no payload.
    pub fn multicast(
        from: impl Into<RoleName>,
        to: Vec<RoleName>,
        label: impl Into<Label>,
    ) -> Self {
        GlobalInteraction::MessageTransfer {
            from: from.into(),
            to,
            message: MessageSig::new(label),
            location: None,
        }
    }

    /// Choice at `at` with labelled branches.
    pub fn choice(
        at: impl Into<RoleName>,
        branches: Vec<(&str, Vec<GlobalInteraction>)>,
    ) -> Self {
        GlobalInteraction::Choice {
            at: at.into(),
            branches: branches
                .into_iter()
                .map(|(label, body)| ChoiceBranch {
                    label: Some(Label::new(label)),
                    body,
                })
                .collect(),
            location: None,
        }
    }

    /// Parallel composition of branch bodies.
    pub fn parallel(branches: Vec<Vec<GlobalInteraction>>) -> Self {
        GlobalInteraction::Parallel {
            branches,
            location: None,
        }
    }

    /// Recursion scope.
    pub fn rec(label: impl Into<String>, body: Vec<GlobalInteraction>) -> Self {
        GlobalInteraction::Recursion {
            label: label.into(),
            body,
            location: None,
        }
    }

    /// Jump to an enclosing recursion label.
    pub fn continue_to(label: impl Into<String>) -> Self {
        GlobalInteraction::Continue {
            label: label.into(),
            location: None,
        }
    }

    /// Sub-protocol invocation.
    pub fn call(protocol: impl Into<String>, role_args: Vec<RoleName>) -> Self {
        GlobalInteraction::Do {
            protocol: protocol.into(),
            role_args,
            location: None,
        }
    }

    /// The source location of this interaction, when known.
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            GlobalInteraction::MessageTransfer { location, .. }
            | GlobalInteraction::Choice { location, .. }
            | GlobalInteraction::Parallel { location, .. }
            | GlobalInteraction::Recursion { location, .. }
            | GlobalInteraction::Continue { location, .. }
            | GlobalInteraction::Do { location, .. }
            | GlobalInteraction::DynamicRole { location, .. }
            | GlobalInteraction::CreateParticipants { location, .. }
            | GlobalInteraction::Invitation { location, .. }
            | GlobalInteraction::ContinueWith { location, .. } => location.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_helper_is_unicast() {
        let msg = GlobalInteraction::message("A", "B", "ping");
        match msg {
            GlobalInteraction::MessageTransfer { from, to, message, .. } => {
                assert_eq!(from, RoleName::new("A"));
                assert_eq!(to, vec![RoleName::new("B")]);
                assert_eq!(message.label.as_str(), "ping");
                assert!(message.payload.is_none());
            }
            other => panic!("expected MessageTransfer, got {:?}", other),
        }
    }

    #[test]
    fn test_choice_branches_keep_order() {
        let choice = GlobalInteraction::choice(
            "s",
            vec![
                ("ok", vec![GlobalInteraction::message("s", "c", "ok")]),
                ("cancel", vec![GlobalInteraction::message("s", "c", "cancel")]),
            ],
        );
        match choice {
            GlobalInteraction::Choice { branches, .. } => {
                let labels: Vec<_> = branches
                    .iter()
                    .map(|b| b.label.as_ref().unwrap().as_str().to_string())
                    .collect();
                assert_eq!(labels, vec!["ok", "cancel"]);
            }
            other => panic!("expected Choice, got {:?}", other),
        }
    }

    #[test]
    fn test_module_filters_global_protocols() {
        let module = Module::new(vec![
            Declaration::Import {
                module: "common".into(),
            },
            Declaration::GlobalProtocol(GlobalProtocolDecl::new(
                "P",
                vec![RoleName::new("A"), RoleName::new("B")],
                vec![GlobalInteraction::message("A", "B", "hello")],
            )),
            Declaration::TypeDecl { name: "Str".into() },
        ]);
        let names: Vec<_> = module.global_protocols().map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["P"]);
    }
}
