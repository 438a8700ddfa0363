use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{wlog_debug, Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub assignment: AssignmentConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on assigned plus in-progress tasks.
    pub max_parallel_tasks: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    /// Agents above this workload are not offered new work.
    pub max_workload: f64,
    /// Agents above this workload are rebalanced.
    pub rebalance_threshold: f64,
    /// Agents below this workload may receive rebalanced work.
    pub underload_threshold: f64,
    /// Smoothing factor for the reliability moving average.
    pub reliability_alpha: f64,
    pub weights: AssignmentWeights,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            max_workload: 0.9,
            rebalance_threshold: 0.8,
            underload_threshold: 0.5,
            reliability_alpha: 0.2,
            weights: AssignmentWeights::default(),
        }
    }
}

/// Relative weight of each scoring factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentWeights {
    pub capability: f64,
    pub workload: f64,
    pub reliability: f64,
    pub affinity: f64,
}

impl Default for AssignmentWeights {
    fn default() -> Self {
        Self {
            capability: 0.35,
            workload: 0.25,
            reliability: 0.20,
            affinity: 0.20,
        }
    }
}

impl AssignmentWeights {
    pub fn sum(&self) -> f64 {
        self.capability + self.workload + self.reliability + self.affinity
    }
}

impl Config {
    pub fn taskweave_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".taskweave"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::taskweave_dir()?.join("taskweave.toml"))
    }

    /// Load from `~/.taskweave/taskweave.toml`, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from an explicit path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        wlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            wlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        wlog_debug!(
            "Config loaded: max_parallel_tasks={}, max_workload={}, weights={:?}",
            config.orchestrator.max_parallel_tasks,
            config.assignment.max_workload,
            config.assignment.weights
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                wlog_debug!("Creating config directory: {}", dir.display());
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        wlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Reject values the schedulers cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.max_parallel_tasks == 0 {
            return Err(Error::Validation(
                "orchestrator.max_parallel_tasks must be at least 1".to_string(),
            ));
        }

        let a = &self.assignment;
        for (name, value) in [
            ("max_workload", a.max_workload),
            ("rebalance_threshold", a.rebalance_threshold),
            ("underload_threshold", a.underload_threshold),
            ("reliability_alpha", a.reliability_alpha),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Validation(format!(
                    "assignment.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if a.underload_threshold > a.rebalance_threshold {
            return Err(Error::Validation(
                "assignment.underload_threshold must not exceed rebalance_threshold".to_string(),
            ));
        }

        let w = &a.weights;
        for (name, value) in [
            ("capability", w.capability),
            ("workload", w.workload),
            ("reliability", w.reliability),
            ("affinity", w.affinity),
        ] {
            if value < 0.0 || !value.is_finite() {
                return Err(Error::Validation(format!(
                    "assignment.weights.{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if w.sum() <= 0.0 {
            return Err(Error::Validation(
                "assignment.weights must not all be zero".to_string(),
            ));
        }
        Ok(())
    }
}
