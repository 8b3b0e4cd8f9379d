//! Run configuration, read from TOML.
//!
//! Lookup order: an explicit `--config` path, then `./streval.toml`, then
//! `<config dir>/streval/config.toml`, then built-in defaults. Environment
//! variables override whatever was loaded.

use crate::error::{EvalError, EvalResult};
use crate::lookup::Corpus;
use crate::repair::RetryPolicy;
use crate::score::{Weights, WEIGHT_TOLERANCE};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const LOCAL_CONFIG: &str = "streval.toml";
const ENV_VALIDATOR_CMD: &str = "STREVAL_VALIDATOR_CMD";
const ENV_FIXER_CMD: &str = "STREVAL_FIXER_CMD";
const ENV_MAX_ATTEMPTS: &str = "STREVAL_MAX_ATTEMPTS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    pub max_attempts: usize,
    pub service_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: u32,
    /// Rayon pool size; 0 picks the rayon default.
    pub workers: usize,
    /// Try the built-in END_* block fixer before the external fixer.
    pub static_fixer: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            service_retries: 2,
            initial_backoff_ms: 500,
            backoff_multiplier: 2,
            workers: 0,
            static_fixer: true,
        }
    }
}

/// An external program plus arguments. `{file}`, `{name}` and
/// `{diagnostics}` are substituted per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub command: Vec<String>,
    pub call_timeout_secs: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            call_timeout_secs: 80,
        }
    }
}

impl CommandConfig {
    pub fn is_configured(&self) -> bool {
        !self.command.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Kept raw so a bad value is reported as `InvalidWeights`, not as a
    /// corrupt file.
    pub weights: [f64; 4],
    pub weight_tolerance: f64,
    pub trend_epsilon: f64,
    pub workers: usize,
    pub corpus: Corpus,
    pub strip_declarations_in_history: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: Weights::uniform().values(),
            weight_tolerance: WEIGHT_TOLERANCE,
            trend_epsilon: 1e-3,
            workers: 0,
            corpus: Corpus::default(),
            strip_declarations_in_history: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Store root holding one directory per project.
    pub output_root: PathBuf,
    /// Holds `generation_context_ground_truth/` and `project_code/`.
    pub dataset_root: PathBuf,
    /// Where the generation `results.jsonl` files live; defaults to
    /// `output_root`.
    pub results_root: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("."),
            dataset_root: PathBuf::from("dataset"),
            results_root: None,
        }
    }
}

impl PathsConfig {
    pub fn results_root(&self) -> &Path {
        self.results_root.as_deref().unwrap_or(&self.output_root)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub repair: RepairConfig,
    pub validator: CommandConfig,
    pub fixer: CommandConfig,
    pub scoring: ScoringConfig,
    pub paths: PathsConfig,
}

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("streval"))
    }

    /// Files tried, in order, when no explicit path is given.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(dir) = Self::config_dir() {
            paths.push(dir.join("config.toml"));
        }
        paths
    }

    /// Load, apply environment overrides and validate.
    pub fn load(explicit: Option<&Path>) -> EvalResult<Self> {
        let mut config = match explicit {
            Some(path) => Self::read(path)?,
            None => Self::discover(&Self::search_paths()),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse one file. Any failure is an error.
    pub fn read(path: &Path) -> EvalResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EvalError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| EvalError::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// First readable file of `candidates`. A file that does not parse is
    /// moved aside and defaults are used.
    pub fn discover(candidates: &[PathBuf]) -> Self {
        for path in candidates {
            let Ok(content) = fs::read_to_string(path) else {
                continue;
            };
            match toml::from_str(&content) {
                Ok(config) => {
                    debug!(path = %path.display(), "loaded config");
                    return config;
                }
                Err(err) => {
                    let backup = preserve_corrupt_config(path, &content);
                    warn!(
                        path = %path.display(),
                        backup = %backup.display(),
                        error = %err,
                        "config file was corrupted; a backup was saved and defaults were loaded"
                    );
                    return Self::default();
                }
            }
        }
        Self::default()
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> EvalResult<()> {
        if let Some(command) = lookup(ENV_VALIDATOR_CMD) {
            self.validator.command = split_command(&command);
        }
        if let Some(command) = lookup(ENV_FIXER_CMD) {
            self.fixer.command = split_command(&command);
        }
        if let Some(value) = lookup(ENV_MAX_ATTEMPTS) {
            self.repair.max_attempts = value.trim().parse().map_err(|_| {
                EvalError::Config(format!("{} must be a number, got {:?}", ENV_MAX_ATTEMPTS, value))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> EvalResult<()> {
        self.weights()?;
        if !self.scoring.trend_epsilon.is_finite() || self.scoring.trend_epsilon < 0.0 {
            return Err(EvalError::Config(format!(
                "trend_epsilon must be a non-negative number, got {}",
                self.scoring.trend_epsilon
            )));
        }
        if self.repair.backoff_multiplier == 0 {
            return Err(EvalError::Config(
                "backoff_multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn weights(&self) -> EvalResult<Weights> {
        Weights::with_tolerance(self.scoring.weights, self.scoring.weight_tolerance)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.repair.service_retries,
            initial_backoff: Duration::from_millis(self.repair.initial_backoff_ms),
            multiplier: self.repair.backoff_multiplier,
        }
    }
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

fn preserve_corrupt_config(path: &Path, content: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| LOCAL_CONFIG.to_string());
    let corrupt_path = path.with_file_name(format!(
        "{}.corrupt-{}",
        name,
        Utc::now().format("%Y%m%d-%H%M%S")
    ));
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
    corrupt_path
}
