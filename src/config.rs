//! Runner configuration.
//!
//! Settings come from an optional `apprunner.toml` in the work directory.
//! Every key has a default, so an absent file and an empty file behave the
//! same.
//!
//! ```toml
//! work_dir = "."
//! source_suffixes = [".rs"]
//! ignore_dirs = [".git", "target"]
//! debounce_ms = 300
//! grace_period_ms = 5000
//! kill_timeout_ms = 1000
//! app_stop_timeout_ms = 5000
//! log_level = "info"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::supervisor::SupervisorConfig;
use crate::watch::WatchOptions;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// `apprunner.toml` structure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    pub work_dir: PathBuf,
    pub source_suffixes: Vec<String>,
    pub ignore_dirs: Vec<String>,
    pub debounce_ms: u64,
    pub grace_period_ms: u64,
    pub kill_timeout_ms: u64,
    pub app_stop_timeout_ms: u64,
    pub log_level: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            source_suffixes: to_strings(constants::DEFAULT_SOURCE_SUFFIXES),
            ignore_dirs: to_strings(constants::DEFAULT_IGNORE_DIRS),
            debounce_ms: constants::DEFAULT_DEBOUNCE_MS,
            grace_period_ms: constants::DEFAULT_GRACE_PERIOD_MS,
            kill_timeout_ms: constants::DEFAULT_KILL_TIMEOUT_MS,
            app_stop_timeout_ms: constants::DEFAULT_APP_STOP_TIMEOUT_MS,
            log_level: constants::DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

impl RunnerConfig {
    /// Load `apprunner.toml` from `dir`, or defaults if there is none.
    ///
    /// A relative `work_dir` in the file is resolved against `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let path = dir.join(constants::CONFIG_FILE);
        if !path.exists() {
            return Ok(Self {
                work_dir: dir.to_path_buf(),
                ..Self::default()
            });
        }

        let mut config = Self::load_from(&path)?;
        if config.work_dir.is_relative() {
            config.work_dir = dir.join(&config.work_dir);
        }
        Ok(config)
    }

    /// Load configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file contains invalid TOML syntax
    /// - A key is unknown or has the wrong type
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: RunnerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error listing every problem found:
    /// - Empty or blank source suffixes
    /// - Zero grace period or kill timeout
    /// - Missing work directory
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.source_suffixes.is_empty() {
            errors.push("source_suffixes cannot be empty".to_string());
        }
        if self.source_suffixes.iter().any(|s| s.trim().is_empty()) {
            errors.push("source_suffixes cannot contain an empty suffix".to_string());
        }

        if self.grace_period_ms == 0 {
            errors.push("grace_period_ms must be greater than 0".to_string());
        }
        if self.kill_timeout_ms == 0 {
            errors.push("kill_timeout_ms must be greater than 0".to_string());
        }

        if !self.work_dir.exists() {
            errors.push(format!(
                "work_dir does not exist: {}",
                self.work_dir.display()
            ));
        } else if !self.work_dir.is_dir() {
            errors.push(format!(
                "work_dir is not a directory: {}",
                self.work_dir.display()
            ));
        }

        if self.kill_timeout_ms > self.grace_period_ms {
            warnings.push(format!(
                "kill_timeout_ms ({}) is longer than grace_period_ms ({})",
                self.kill_timeout_ms, self.grace_period_ms
            ));
        }
        if self.debounce_ms == 0 {
            warnings.push("debounce_ms is 0, every file event restarts separately".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }

        Ok(ValidationResult { warnings })
    }

    /// Restart and stop settings for the supervisor.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::default()
            .with_source_suffixes(self.source_suffixes.iter().cloned())
            .with_stop_timeouts(
                Duration::from_millis(self.grace_period_ms),
                Duration::from_millis(self.kill_timeout_ms),
            )
    }

    /// Watcher settings.
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            debounce: Duration::from_millis(self.debounce_ms),
            ignore_dirs: self.ignore_dirs.clone(),
        }
    }

    /// Bound on `Application::stop` inside a worker.
    pub fn app_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.app_stop_timeout_ms)
    }
}
