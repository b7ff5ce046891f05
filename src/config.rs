//! Coordinator configuration
//!
//! Defaults, then an optional JSON file (~/.config/change-coordinator/config.json),
//! then `COORDINATOR_*` environment variables.

use crate::error::{CoordinationError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Strictness above which an overall "warning" verdict blocks execution
pub const WARNING_BLOCK_THRESHOLD: f64 = 0.8;

/// Environment variable prefix
const ENV_PREFIX: &str = "COORDINATOR_";

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoordinationError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_lowercase().replace('-', "_").as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(CoordinationError::Config(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

/// How far dependency analysis goes per file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisDepth {
    /// Nodes and edges only, no symbol extraction
    Shallow,
    #[default]
    Standard,
    /// Adds per-file line counts
    Deep,
    Comprehensive,
}

string_enum!(AnalysisDepth {
    Shallow => "shallow",
    Standard => "standard",
    Deep => "deep",
    Comprehensive => "comprehensive",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    /// Skips type and test-coverage checks
    Basic,
    #[default]
    Standard,
    /// Test discovery walks the whole workspace
    Thorough,
    Exhaustive,
}

string_enum!(ValidationLevel {
    Basic => "basic",
    Standard => "standard",
    Thorough => "thorough",
    Exhaustive => "exhaustive",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    /// Checkpoint after every group
    Conservative,
    #[default]
    Balanced,
    /// Only the pre-execution backup is taken
    Aggressive,
    Custom,
}

string_enum!(OptimizationStrategy {
    Conservative => "conservative",
    Balanced => "balanced",
    Aggressive => "aggressive",
    Custom => "custom",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    Sequential,
    #[default]
    Parallel,
    /// Parallel grouping with group size capped at `max_parallel_operations`
    Adaptive,
    Custom,
}

string_enum!(ConcurrencyMode {
    Sequential => "sequential",
    Parallel => "parallel",
    Adaptive => "adaptive",
    Custom => "custom",
});

/// Recovery policy applied when execution fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStrategy {
    /// Restore the newest checkpoint that was syntax-valid with resolved dependencies
    #[default]
    FullRevert,
    /// Run the rollback plan's explicit procedures
    PartialRevert,
    /// Restore the newest checkpoint unconditionally
    CheckpointRestore,
    VersionControlRevert,
    ForwardFix,
    /// Leave the workspace untouched
    None,
}

string_enum!(RollbackStrategy {
    FullRevert => "full_revert",
    PartialRevert => "partial_revert",
    CheckpointRestore => "checkpoint_restore",
    VersionControlRevert => "version_control_revert",
    ForwardFix => "forward_fix",
    None => "none",
});

/// Configuration for a coordinator and every session it runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinatorConfig {
    pub analysis_depth: AnalysisDepth,
    pub validation_level: ValidationLevel,
    pub optimization_strategy: OptimizationStrategy,
    pub concurrency_mode: ConcurrencyMode,
    /// Used when a change set does not carry its own rollback strategy
    pub rollback_strategy: RollbackStrategy,
    pub max_parallel_operations: usize,
    /// Seconds
    pub analysis_timeout: u64,
    /// Seconds
    pub validation_timeout: u64,
    /// Insert a checkpoint marker every N groups (0 disables)
    pub checkpoint_frequency: usize,
    /// 0.0 - 1.0
    pub validation_strictness: f64,
    pub dry_run: bool,
    pub create_backups: bool,
    pub fail_fast: bool,
    /// Buffer size of the lifecycle event channel
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            analysis_depth: AnalysisDepth::default(),
            validation_level: ValidationLevel::default(),
            optimization_strategy: OptimizationStrategy::default(),
            concurrency_mode: ConcurrencyMode::default(),
            rollback_strategy: RollbackStrategy::default(),
            max_parallel_operations: num_cpus::get().max(1),
            analysis_timeout: 120,
            validation_timeout: 60,
            checkpoint_frequency: 3,
            validation_strictness: 0.5,
            dry_run: false,
            create_backups: true,
            fail_fast: false,
            event_capacity: 256,
        }
    }
}

impl CoordinatorConfig {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("change-coordinator")
            .join("config.json")
    }

    /// Load from a JSON file; missing keys fall back to defaults
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then the default config file if present, then environment overrides
    pub fn resolve() -> Result<Self> {
        // .env is optional
        let _ = dotenvy::dotenv();

        let path = Self::default_path();
        let mut config = if path.exists() {
            tracing::debug!(path = %path.display(), "Loading coordinator config");
            Self::load(&path)?
        } else {
            Self::default()
        };

        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `COORDINATOR_*` overrides from an iterator of key/value pairs
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };

            match name {
                "ANALYSIS_DEPTH" => self.analysis_depth = value.parse()?,
                "VALIDATION_LEVEL" => self.validation_level = value.parse()?,
                "OPTIMIZATION_STRATEGY" => self.optimization_strategy = value.parse()?,
                "CONCURRENCY_MODE" => self.concurrency_mode = value.parse()?,
                "ROLLBACK_STRATEGY" => self.rollback_strategy = value.parse()?,
                "MAX_PARALLEL_OPERATIONS" => self.max_parallel_operations = parse_number(name, &value)?,
                "ANALYSIS_TIMEOUT" => self.analysis_timeout = parse_number(name, &value)?,
                "VALIDATION_TIMEOUT" => self.validation_timeout = parse_number(name, &value)?,
                "CHECKPOINT_FREQUENCY" => self.checkpoint_frequency = parse_number(name, &value)?,
                "VALIDATION_STRICTNESS" => self.validation_strictness = parse_number(name, &value)?,
                "DRY_RUN" => self.dry_run = parse_flag(name, &value)?,
                "CREATE_BACKUPS" => self.create_backups = parse_flag(name, &value)?,
                "FAIL_FAST" => self.fail_fast = parse_flag(name, &value)?,
                "EVENT_CAPACITY" => self.event_capacity = parse_number(name, &value)?,
                _ => tracing::warn!(key = %key, "Ignoring unknown coordinator setting"),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.validation_strictness) {
            return Err(CoordinationError::Config(format!(
                "validationStrictness must be within 0..1, got {}",
                self.validation_strictness
            )));
        }
        if self.max_parallel_operations == 0 {
            return Err(CoordinationError::Config(
                "maxParallelOperations must be at least 1".to_string(),
            ));
        }
        if self.analysis_timeout == 0 || self.validation_timeout == 0 {
            return Err(CoordinationError::Config("timeouts must be non-zero".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(CoordinationError::Config("eventCapacity must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout)
    }

    /// Checkpoint interval after applying the optimization strategy
    pub fn effective_checkpoint_frequency(&self) -> usize {
        match self.optimization_strategy {
            OptimizationStrategy::Conservative => 1,
            OptimizationStrategy::Aggressive => 0,
            OptimizationStrategy::Balanced | OptimizationStrategy::Custom => self.checkpoint_frequency,
        }
    }

    /// Whether a "warning" verdict is strict enough to block execution
    pub fn warnings_block(&self) -> bool {
        self.validation_strictness > WARNING_BLOCK_THRESHOLD
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CoordinationError::Config(format!("{} is not a valid number: {}", name, value)))
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CoordinationError::Config(format!("{} is not a valid flag: {}", name, value))),
    }
}
