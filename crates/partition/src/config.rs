//! Configuration parsing and validation for the partitioning protocol

use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use spatial::{SpatialKey, TreeParams};

use crate::error::PartitionError;

/// Tuning knobs for sorting, tree construction and ghost exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Depth of the Morton keys and deepest tree level
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// A tree node holding more particles than this is split
    #[serde(default = "default_leaf_threshold")]
    pub leaf_threshold: usize,
    /// Relative deviation from `total / ranks` tolerated before warning
    #[serde(default = "default_load_balance_slack")]
    pub load_balance_slack: f64,
    /// Global box padding, as a fraction of its largest extent
    #[serde(default = "default_boundary_margin_factor")]
    pub boundary_margin_factor: f64,
    /// Target number of samples each rank contributes per splitter
    #[serde(default = "default_sample_oversampling")]
    pub sample_oversampling: usize,
    /// Depth of the tree nodes published as branches during the exchange
    #[serde(default = "default_branch_depth")]
    pub branch_depth: u32,
    /// Upper bound on any single wait inside a collective (milliseconds)
    #[serde(default = "default_comm_timeout_ms")]
    pub comm_timeout_ms: u64,
}

// Default values
fn default_max_depth() -> u32 {
    16
}

fn default_leaf_threshold() -> usize {
    16
}

fn default_load_balance_slack() -> f64 {
    0.1
}

fn default_boundary_margin_factor() -> f64 {
    1.0e-3
}

fn default_sample_oversampling() -> usize {
    128
}

fn default_branch_depth() -> u32 {
    3
}

fn default_comm_timeout_ms() -> u64 {
    30_000
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            leaf_threshold: default_leaf_threshold(),
            load_balance_slack: default_load_balance_slack(),
            boundary_margin_factor: default_boundary_margin_factor(),
            sample_oversampling: default_sample_oversampling(),
            branch_depth: default_branch_depth(),
            comm_timeout_ms: default_comm_timeout_ms(),
        }
    }
}

impl PartitionConfig {
    /// Load configuration from a JSON file and validate it for `dimension`.
    pub fn load(path: &str, dimension: usize) -> Result<Self, PartitionError> {
        let contents = fs::read_to_string(path)?;
        let config: PartitionConfig = serde_json::from_str(&contents)?;
        config.validate_for_dimension(dimension)?;
        tracing::debug!("Loaded partition config from {}", path);
        Ok(config)
    }

    /// Validate the configuration for particles living in `dimension` axes.
    pub fn validate_for_dimension(&self, dimension: usize) -> Result<(), PartitionError> {
        if dimension == 0 {
            return invalid("dimension must be at least 1");
        }

        // Keys must fit the 63 usable bits
        let deepest = SpatialKey::max_depth_for(dimension);
        if self.max_depth == 0 || self.max_depth > deepest {
            return invalid(format!(
                "max_depth must be in 1..={deepest} for {dimension} dimensions, got {}",
                self.max_depth
            ));
        }

        if self.leaf_threshold == 0 {
            return invalid("leaf_threshold must be at least 1");
        }

        if !(self.load_balance_slack >= 0.0) {
            return invalid("load_balance_slack must be non-negative");
        }

        if !(self.boundary_margin_factor >= 0.0) || !self.boundary_margin_factor.is_finite() {
            return invalid("boundary_margin_factor must be finite and non-negative");
        }

        if self.sample_oversampling == 0 {
            return invalid("sample_oversampling must be at least 1");
        }

        if self.branch_depth > self.max_depth {
            return invalid("branch_depth must not exceed max_depth");
        }

        if self.comm_timeout_ms == 0 {
            return invalid("comm_timeout_ms must be at least 1");
        }

        Ok(())
    }

    /// Tree shape derived from this configuration.
    pub fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            leaf_threshold: self.leaf_threshold,
        }
    }

    /// Collective receive timeout.
    pub fn comm_timeout(&self) -> Duration {
        Duration::from_millis(self.comm_timeout_ms)
    }
}

fn invalid<T>(message: impl Into<String>) -> Result<T, PartitionError> {
    Err(PartitionError::InvalidConfig(message.into()))
}
