//! Optimiser configuration.
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```json
//! { "rho": 0.02, "hierarchy": { "max_nodes": 10 }, "phases": ["rosy"] }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::state::FieldPhase;
use crate::graph::{HierarchyLimits, SeedSelection};
use crate::{Error, Result};

/// Which nodes a smoothing pass visits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeSelection {
    /// Every node once, in a freshly shuffled order.
    #[default]
    AllInRandomOrder,
    /// The `count` nodes with the highest local error, worst first.
    WorstFirst { count: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimiserConfig {
    /// Target mesh spacing ρ.
    pub rho: f32,
    /// Percent error reduction per pass below which a tier has converged.
    pub convergence_threshold: f32,
    /// Passes after which a tier counts as converged regardless of error.
    pub max_iterations_per_tier: usize,
    pub hierarchy: HierarchyLimits,
    pub seed_selection: SeedSelection,
    pub node_selection: NodeSelection,
    /// Phases run in order, each from the coarsest tier to tier 0.
    pub phases: Vec<FieldPhase>,
    /// Seed for [`FieldOptimiser::from_config`](super::FieldOptimiser::from_config).
    pub seed: u64,
}

impl Default for OptimiserConfig {
    fn default() -> Self {
        Self {
            rho: 1.0,
            convergence_threshold: 0.5,
            max_iterations_per_tier: 20,
            hierarchy: HierarchyLimits::tiers(5),
            seed_selection: SeedSelection::Random,
            node_selection: NodeSelection::AllInRandomOrder,
            phases: vec![FieldPhase::Rosy, FieldPhase::Posy],
            seed: 0,
        }
    }
}

impl OptimiserConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.rho.is_finite() && self.rho > 0.0) {
            return Err(Error::InvalidArgument(format!("rho must be > 0, got {}", self.rho)));
        }
        if !(self.convergence_threshold.is_finite() && self.convergence_threshold >= 0.0) {
            return Err(Error::InvalidArgument(format!(
                "convergence_threshold must be >= 0, got {}",
                self.convergence_threshold
            )));
        }
        if self.max_iterations_per_tier == 0 {
            return Err(Error::InvalidArgument("max_iterations_per_tier must be at least 1".into()));
        }
        if self.phases.is_empty() {
            return Err(Error::InvalidArgument("At least one field phase is required".into()));
        }
        if self.node_selection == (NodeSelection::WorstFirst { count: 0 }) {
            return Err(Error::InvalidArgument("WorstFirst needs a count of at least 1".into()));
        }
        self.hierarchy.validate()
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_is_valid() {
        let config = OptimiserConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_iterations_per_tier, 20);
        assert_eq!(config.phases, vec![FieldPhase::Rosy, FieldPhase::Posy]);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = OptimiserConfig::from_json_str(
            r#"{ "rho": 0.25, "hierarchy": { "max_nodes": 10 }, "phases": ["rosy"],
                 "node_selection": { "worst_first": { "count": 3 } } }"#,
        )
        .unwrap();

        assert_eq!(config.rho, 0.25);
        assert_eq!(config.hierarchy, HierarchyLimits::nodes(10));
        assert_eq!(config.phases, vec![FieldPhase::Rosy]);
        assert_eq!(config.node_selection, NodeSelection::WorstFirst { count: 3 });
        assert_eq!(config.convergence_threshold, 0.5);
        assert_eq!(config.seed_selection, SeedSelection::Random);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for json in [
            r#"{ "rho": 0.0 }"#,
            r#"{ "convergence_threshold": -1.0 }"#,
            r#"{ "max_iterations_per_tier": 0 }"#,
            r#"{ "phases": [] }"#,
            r#"{ "hierarchy": {} }"#,
            r#"{ "node_selection": { "worst_first": { "count": 0 } } }"#,
        ] {
            assert!(
                matches!(OptimiserConfig::from_json_str(json), Err(Error::InvalidArgument(_))),
                "{json} should be rejected"
            );
        }
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(OptimiserConfig::from_json_str("{ rho: "), Err(Error::Json(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = OptimiserConfig::from_json_file("/nonexistent/optimiser.json");
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
