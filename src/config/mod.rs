//! Operational configuration.
//!
//! All exploration bounds in one serde struct with sane defaults, loadable
//! from TOML. Partial files work: omitted sections fall back to defaults.

use crate::project::ProjectionConfig;
use crate::semantics::reducer::{ContextReducer, ReducerConfig};
use crate::semantics::BasicSafety;
use crate::sim::{ChoiceStrategy, ForkScheduling, SimulatorOptions};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Kernel-wide analysis configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Projection bounds.
    pub projection: ProjectionConfig,

    /// Reduction bounds.
    pub reducer: ReducerLimits,

    /// Safety exploration bounds.
    pub safety: SafetyLimits,

    /// Simulator bounds.
    pub simulator: SimulatorLimits,
}

/// Reduction bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducerLimits {
    /// Default bound for `execute_to_completion`.
    pub max_steps: usize,
    /// Guard on internal-closure chains per role.
    pub max_tau_steps: usize,
}

/// Safety exploration bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyLimits {
    /// Bound on explored contexts.
    pub max_contexts: usize,
}

/// Simulator bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorLimits {
    /// Step bound.
    pub max_steps: usize,
    /// Capture emitted events.
    pub record_trace: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            projection: ProjectionConfig::default(),
            reducer: ReducerLimits::default(),
            safety: SafetyLimits::default(),
            simulator: SimulatorLimits::default(),
        }
    }
}

impl Default for ReducerLimits {
    fn default() -> Self {
        let defaults = ReducerConfig::default();
        Self {
            max_steps: defaults.max_steps,
            max_tau_steps: defaults.max_tau_steps,
        }
    }
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_contexts: 100_000,
        }
    }
}

impl Default for SimulatorLimits {
    fn default() -> Self {
        Self {
            max_steps: 1_000,
            record_trace: true,
        }
    }
}

impl AnalysisConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid analysis configuration")
    }

    /// Load a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// A reducer honoring these bounds.
    pub fn reducer(&self) -> ContextReducer {
        ContextReducer {
            config: ReducerConfig {
                max_steps: self.reducer.max_steps,
                max_tau_steps: self.reducer.max_tau_steps,
            },
        }
    }

    /// A safety checker honoring these bounds.
    pub fn safety_checker(&self) -> BasicSafety {
        BasicSafety::new().with_max_contexts(self.safety.max_contexts)
    }

    /// Simulator options honoring these bounds.
    pub fn simulator_options(&self) -> SimulatorOptions {
        SimulatorOptions {
            max_steps: self.simulator.max_steps,
            record_trace: self.simulator.record_trace,
            fork_scheduling: ForkScheduling::Deterministic,
            choice_strategy: ChoiceStrategy::Interactive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AnalysisConfig::default();
        assert_eq!(config.safety.max_contexts, 100_000);
        assert_eq!(config.projection.max_shuffle_states, 4096);
        assert!(config.simulator.record_trace);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AnalysisConfig::from_toml_str(
            r#"
            [safety]
            max_contexts = 500

            [simulator]
            max_steps = 25
            record_trace = false
            "#,
        )
        .unwrap();
        assert_eq!(config.safety.max_contexts, 500);
        assert_eq!(config.simulator.max_steps, 25);
        assert!(!config.simulator.record_trace);
        // Untouched sections keep their defaults.
        assert_eq!(config.reducer.max_steps, 10_000);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(AnalysisConfig::from_toml_str("safety = 3").is_err());
    }
}
