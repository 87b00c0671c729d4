//! Core type definitions shared by every layer of the kernel.
//!
//! All types are designed for:
//! - Deterministic serialization (struct field order is the key order)
//! - Cheap cloning (protocols are small; clarity beats interning)
//! - Immutability after construction

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a protocol participant.
///
/// Roles are compared and hashed by their textual name; the AST, the CFG and
/// every projected machine refer to the same role by the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(String);

impl RoleName {
    /// Create a role name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The textual name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoleName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for RoleName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Message or branch label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    /// Create a label.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The textual label.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl From<String> for Label {
    fn from(label: String) -> Self {
        Self(label)
    }
}

/// Message signature: a label plus an optional payload type name.
///
/// Payload types are opaque strings; the kernel never interprets them beyond
/// equality (a payload disagreement between a send and a receive is a
/// type-mismatch violation, not a parse problem).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageSig {
    /// Message label.
    pub label: Label,

    /// Optional payload type name, e.g. `Str` or `Bool`.
    pub payload: Option<String>,
}

impl MessageSig {
    /// Signature with no payload.
    pub fn new(label: impl Into<Label>) -> Self {
        Self {
            label: label.into(),
            payload: None,
        }
    }

    /// Signature carrying a payload type.
    pub fn with_payload(label: impl Into<Label>, payload: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            payload: Some(payload.into()),
        }
    }
}

impl fmt::Display for MessageSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Some(p) => write!(f, "{}({})", self.label, p),
            None => write!(f, "{}()", self.label),
        }
    }
}

/// Position of a construct in the protocol source text.
///
/// Locations are diagnostic payload only; no analysis depends on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Source file, when known.
    pub file: Option<String>,

    /// 1-based line.
    pub line: u32,

    /// 1-based column.
    pub column: u32,

    /// Byte offset from the start of the file.
    pub offset: u32,
}

impl SourceLocation {
    /// Create a location without a file name.
    pub fn new(line: u32, column: u32, offset: u32) -> Self {
        Self {
            file: None,
            line,
            column,
            offset,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", file, self.line, self.column),
            None => write!(f, "{}:{}", self.line, self.column),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_name_round_trip() {
        let role = RoleName::new("Client");
        assert_eq!(role.as_str(), "Client");
        assert_eq!(role.to_string(), "Client");
        assert_eq!(role, RoleName::from("Client"));
    }

    #[test]
    fn test_message_sig_display() {
        assert_eq!(MessageSig::new("ping").to_string(), "ping()");
        assert_eq!(
            MessageSig::with_payload("auth", "Bool").to_string(),
            "auth(Bool)"
        );
    }

    #[test]
    fn test_sig_equality_includes_payload() {
        assert_ne!(
            MessageSig::new("data"),
            MessageSig::with_payload("data", "Str")
        );
    }

    #[test]
    fn test_location_display() {
        let loc = SourceLocation::new(4, 7, 120);
        assert_eq!(loc.to_string(), "4:7");
    }
}
