//! Stable snapshot rendering for golden tests.
//!
//! Everything here is a pure function of the structure being rendered:
//! struct field order fixes the JSON key order, arenas are already in
//! deterministic order, and violation details live in sorted maps. Repeated
//! runs produce byte-identical output.

use crate::cfg::Cfg;
use crate::cfsm::Cfsm;
use crate::semantics::safety::SafetyResult;
use crate::verify::VerificationReport;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Render any snapshot-surface value as stable pretty JSON.
pub fn to_canonical_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).expect("snapshot types serialize")
}

/// Stable JSON of a CFG.
pub fn snapshot_cfg(cfg: &Cfg) -> String {
    to_canonical_json(cfg)
}

/// Stable JSON of a projected machine.
pub fn snapshot_cfsm(machine: &Cfsm) -> String {
    to_canonical_json(machine)
}

/// Stable JSON of a verification report.
pub fn snapshot_report(report: &VerificationReport) -> String {
    to_canonical_json(report)
}

/// Stable JSON of a safety result, with the wall-clock reading zeroed so
/// snapshots compare across runs.
pub fn snapshot_safety(result: &SafetyResult) -> String {
    let mut stable = result.clone();
    stable.diagnostics.elapsed_ms = 0;
    to_canonical_json(&stable)
}

/// SHA-256 digest of a rendered snapshot.
pub fn digest(snapshot: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(snapshot.as_bytes());
    format!("{:x}", hasher.finalize())
}
