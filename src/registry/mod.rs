//! Protocol registry - name resolution, dependency analysis, CFG caching.
//!
//! The registry is built once from a module and validated eagerly: a missing
//! reference or a dependency cycle makes it non-constructible. After
//! construction it is immutable; `get_cfg` memoizes built graphs behind a
//! mutex so concurrent readers observe a consistent value.

use crate::ast::{GlobalInteraction, GlobalProtocolDecl, Module};
use crate::cfg::{build_cfg, Cfg};
use crate::error::ProtocolError;
use crate::types::RoleName;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Registry of the global protocols declared by one module.
#[derive(Debug)]
pub struct ProtocolRegistry {
    /// Declarations in source order.
    protocols: Vec<GlobalProtocolDecl>,

    /// Name → index into `protocols`.
    by_name: HashMap<String, usize>,

    /// Memoized CFGs.
    cfg_cache: Mutex<HashMap<String, Arc<Cfg>>>,
}

/// A structured dependency problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DependencyError {
    /// `protocol` references `reference`, which is not declared.
    Missing {
        /// The referencing protocol.
        protocol: String,
        /// The unresolved name.
        reference: String,
    },
    /// The dependency graph contains a cycle.
    Cycle {
        /// The cycle path, starting and ending at its first re-entry.
        path: Vec<String>,
    },
}

/// Result of `validate_dependencies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyReport {
    /// Whether every reference resolves and no cycle exists.
    pub valid: bool,
    /// The problems found, in discovery order.
    pub errors: Vec<DependencyError>,
}

/// Bidirectional bijection between a callee's formal roles and the actual
/// roles supplied at a call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMapping {
    /// Pairs of (formal, actual), in the callee's declaration order.
    pub pairs: Vec<(RoleName, RoleName)>,
}

impl RoleMapping {
    /// Map a formal role to the actual role bound at the call site.
    pub fn to_actual(&self, formal: &RoleName) -> Option<&RoleName> {
        self.pairs.iter().find(|(f, _)| f == formal).map(|(_, a)| a)
    }

    /// Map an actual role back to the callee's formal role.
    pub fn to_formal(&self, actual: &RoleName) -> Option<&RoleName> {
        self.pairs.iter().find(|(_, a)| a == actual).map(|(f, _)| f)
    }
}

impl ProtocolRegistry {
    /// Build and validate a registry from a module.
    ///
    /// Local protocols, imports and type declarations are ignored. Fails
    /// with `protocol-not-found` or `circular-dependency` if the module's
    /// sub-protocol references are unsound.
    pub fn from_module(module: &Module) -> Result<Self, ProtocolError> {
        let mut protocols = Vec::new();
        let mut by_name = HashMap::new();
        for decl in module.global_protocols() {
            if by_name.contains_key(&decl.name) {
                continue;
            }
            by_name.insert(decl.name.clone(), protocols.len());
            protocols.push(decl.clone());
        }

        let registry = Self {
            protocols,
            by_name,
            cfg_cache: Mutex::new(HashMap::new()),
        };

        let report = registry.validate_dependencies();
        if let Some(error) = report.errors.first() {
            return Err(match error {
                DependencyError::Missing { reference, .. } => ProtocolError::ProtocolNotFound {
                    name: reference.clone(),
                },
                DependencyError::Cycle { path } => ProtocolError::CircularDependency {
                    cycle: path.clone(),
                },
            });
        }
        Ok(registry)
    }

    /// Look up a protocol declaration.
    pub fn resolve(&self, name: &str) -> Result<&GlobalProtocolDecl, ProtocolError> {
        self.by_name
            .get(name)
            .map(|i| &self.protocols[*i])
            .ok_or_else(|| ProtocolError::ProtocolNotFound {
                name: name.to_string(),
            })
    }

    /// Whether a protocol is declared.
    pub fn has(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Declared protocol names, in source order.
    pub fn protocol_names(&self) -> Vec<String> {
        self.protocols.iter().map(|p| p.name.clone()).collect()
    }

    /// Names referenced by `name` via sub-protocol calls, anywhere in its
    /// body. Unique, in first-reference order.
    pub fn get_dependencies(&self, name: &str) -> Result<Vec<String>, ProtocolError> {
        let decl = self.resolve(name)?;
        let mut deps = Vec::new();
        let mut seen = HashSet::new();
        collect_references(&decl.body, &mut |reference| {
            if seen.insert(reference.to_string()) {
                deps.push(reference.to_string());
            }
        });
        Ok(deps)
    }

    /// Check every reference resolves and the dependency graph is acyclic.
    ///
    /// Cycle detection is a depth-first search with an explicit recursion
    /// stack; the first cycle reported is the path from its first re-entry.
    pub fn validate_dependencies(&self) -> DependencyReport {
        let mut errors = Vec::new();

        let mut deps_of: HashMap<&str, Vec<String>> = HashMap::new();
        for decl in &self.protocols {
            let mut deps = Vec::new();
            let mut seen = HashSet::new();
            collect_references(&decl.body, &mut |reference| {
                if seen.insert(reference.to_string()) {
                    deps.push(reference.to_string());
                }
            });
            for reference in &deps {
                if !self.by_name.contains_key(reference) {
                    errors.push(DependencyError::Missing {
                        protocol: decl.name.clone(),
                        reference: reference.clone(),
                    });
                }
            }
            deps_of.insert(decl.name.as_str(), deps);
        }

        // Cycles only make sense over resolvable references.
        let mut visited = HashSet::new();
        for decl in &self.protocols {
            if visited.contains(decl.name.as_str()) {
                continue;
            }
            let mut stack = Vec::new();
            if let Some(cycle) =
                find_cycle(decl.name.as_str(), &deps_of, &mut visited, &mut stack)
            {
                errors.push(DependencyError::Cycle { path: cycle });
                break;
            }
        }

        DependencyReport {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Check that a call site's actual roles fit the callee's arity and form
    /// a bijection.
    pub fn validate_role_mapping(
        &self,
        sub_name: &str,
        actual_roles: &[RoleName],
    ) -> Result<(), ProtocolError> {
        self.create_role_mapping(sub_name, actual_roles).map(|_| ())
    }

    /// Build the formal↔actual role bijection for a call site.
    pub fn create_role_mapping(
        &self,
        sub_name: &str,
        actual_roles: &[RoleName],
    ) -> Result<RoleMapping, ProtocolError> {
        let decl = self.resolve(sub_name)?;
        let formals = decl.role_names();
        if formals.len() != actual_roles.len() {
            return Err(ProtocolError::RoleMismatch {
                protocol: sub_name.to_string(),
                expected: formals.len(),
                actual: actual_roles.len(),
            });
        }
        let distinct: HashSet<&RoleName> = actual_roles.iter().collect();
        if distinct.len() != actual_roles.len() {
            return Err(ProtocolError::RoleMismatch {
                protocol: sub_name.to_string(),
                expected: formals.len(),
                actual: distinct.len(),
            });
        }
        Ok(RoleMapping {
            pairs: formals
                .into_iter()
                .zip(actual_roles.iter().cloned())
                .collect(),
        })
    }

    /// The CFG of a declared protocol, memoized.
    pub fn get_cfg(&self, name: &str) -> Result<Arc<Cfg>, ProtocolError> {
        if let Some(cfg) = self.cfg_cache.lock().expect("cache lock").get(name) {
            return Ok(Arc::clone(cfg));
        }
        let decl = self.resolve(name)?;
        let cfg = Arc::new(build_cfg(decl)?);
        self.cfg_cache
            .lock()
            .expect("cache lock")
            .insert(name.to_string(), Arc::clone(&cfg));
        Ok(cfg)
    }
}

/// Walk a body and report every sub-protocol reference, in source order.
fn collect_references(body: &[GlobalInteraction], report: &mut impl FnMut(&str)) {
    for interaction in body {
        match interaction {
            GlobalInteraction::Do { protocol, .. } => report(protocol),
            GlobalInteraction::Choice { branches, .. } => {
                for branch in branches {
                    collect_references(&branch.body, report);
                }
            }
            GlobalInteraction::Parallel { branches, .. } => {
                for branch in branches {
                    collect_references(branch, report);
                }
            }
            GlobalInteraction::Recursion { body, .. }
            | GlobalInteraction::ContinueWith { body, .. } => {
                collect_references(body, report);
            }
            GlobalInteraction::Invitation { protocol, .. } => report(protocol),
            GlobalInteraction::MessageTransfer { .. }
            | GlobalInteraction::Continue { .. }
            | GlobalInteraction::DynamicRole { .. }
            | GlobalInteraction::CreateParticipants { .. } => {}
        }
    }
}

/// DFS with recursion stack. Returns the first cycle found, as the path from
/// its first re-entered protocol back to itself.
fn find_cycle(
    name: &str,
    deps_of: &HashMap<&str, Vec<String>>,
    visited: &mut HashSet<String>,
    stack: &mut Vec<String>,
) -> Option<Vec<String>> {
    if let Some(pos) = stack.iter().position(|n| n == name) {
        let mut cycle: Vec<String> = stack[pos..].to_vec();
        cycle.push(name.to_string());
        return Some(cycle);
    }
    if visited.contains(name) {
        return None;
    }
    stack.push(name.to_string());
    if let Some(deps) = deps_of.get(name) {
        for dep in deps {
            // Unresolvable references are reported separately.
            if deps_of.contains_key(dep.as_str()) {
                if let Some(cycle) = find_cycle(dep, deps_of, visited, stack) {
                    return Some(cycle);
                }
            }
        }
    }
    stack.pop();
    visited.insert(name.to_string());
    None
}
