//! Project-level configuration support
//!
//! Loads per-project configuration from `repotoire.toml` or
//! `.repotoirerc.json` in the repository root.
//!
//! # Configuration Format
//!
//! ```toml
//! # repotoire.toml
//!
//! [shared_state]
//! frequency_threshold = 5
//! critical_data = ["balance", "token"]
//! lock_names = ["_guard"]
//! assume_concurrent = false
//!
//! [lock_order]
//! lock_names = ["_guard"]
//! follow_self_calls = true
//!
//! [stress]
//! threads = 10
//! iterations = 1000
//! timeout_secs = 30.0
//!
//! [exclude]
//! paths = ["generated/", "migrations/"]
//!
//! [defaults]
//! format = "text"
//! severity = "low"
//! ```

use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};

/// Default exclusion patterns applied unless `skip_defaults` is set
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "**/.venv/**",
    "**/venv/**",
    "**/node_modules/**",
    "**/__pycache__/**",
    "**/site-packages/**",
    "**/build/**",
    "**/dist/**",
];

/// Written by `init`
pub const EXAMPLE_CONFIG: &str = r#"# Repotoire concurrency analysis configuration

[shared_state]
# Accesses above this count raise severity
frequency_threshold = 5
# Attribute name fragments treated as critical data
critical_data = ["balance", "account", "payment", "password", "secret", "token", "session"]
# Extra attribute/variable names to treat as locks
lock_names = []
# Analyze files even when they show no sign of threading
assume_concurrent = false

[lock_order]
lock_names = []
# Follow self.method() calls made while holding a lock
follow_self_calls = true

[stress]
threads = 10
iterations = 1000
timeout_secs = 30.0

[exclude]
paths = []

[defaults]
format = "text"
severity = "low"
"#;

/// Project-level configuration loaded from repotoire.toml or similar
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub shared_state: SharedStateConfig,

    #[serde(default)]
    pub lock_order: LockOrderConfig,

    /// Defaults for `test race` / `test stress`
    #[serde(default)]
    pub stress: StressDefaults,

    /// Path exclusion patterns
    #[serde(default)]
    pub exclude: ExcludeConfig,

    /// Default CLI flags
    #[serde(default)]
    pub defaults: CliDefaults,
}

/// Shared-state analyzer settings
#[derive(Debug, Clone, Deserialize)]
pub struct SharedStateConfig {
    /// Access count above which an attribute counts as frequently used
    #[serde(default = "default_frequency_threshold")]
    pub frequency_threshold: usize,

    /// Attribute name fragments that mark critical data (case-insensitive)
    #[serde(default = "default_critical_data")]
    pub critical_data: Vec<String>,

    /// Extra attribute names to treat as locks
    #[serde(default)]
    pub lock_names: Vec<String>,

    /// Analyze units even when they show no concurrency markers
    #[serde(default)]
    pub assume_concurrent: bool,
}

impl Default for SharedStateConfig {
    fn default() -> Self {
        Self {
            frequency_threshold: default_frequency_threshold(),
            critical_data: default_critical_data(),
            lock_names: Vec::new(),
            assume_concurrent: false,
        }
    }
}

fn default_frequency_threshold() -> usize {
    5
}

fn default_critical_data() -> Vec<String> {
    [
        "balance", "account", "payment", "password", "secret", "token", "session",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Lock-order analyzer settings
#[derive(Debug, Clone, Deserialize)]
pub struct LockOrderConfig {
    /// Extra attribute/variable names to treat as locks
    #[serde(default)]
    pub lock_names: Vec<String>,

    /// Propagate locks acquired by `self.method()` callees
    #[serde(default = "default_true")]
    pub follow_self_calls: bool,
}

impl Default for LockOrderConfig {
    fn default() -> Self {
        Self {
            lock_names: Vec::new(),
            follow_self_calls: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Stress harness defaults
#[derive(Debug, Clone, Deserialize)]
pub struct StressDefaults {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
}

impl Default for StressDefaults {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            iterations: default_iterations(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_threads() -> usize {
    10
}
fn default_iterations() -> u64 {
    1000
}
fn default_timeout_secs() -> f64 {
    30.0
}

/// Path exclusion configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExcludeConfig {
    /// Paths/patterns to exclude from analysis
    #[serde(default)]
    pub paths: Vec<String>,

    /// If true, disable built-in default exclusion patterns
    #[serde(default)]
    pub skip_defaults: bool,
}

impl ExcludeConfig {
    /// Returns effective exclusion patterns (defaults + user patterns).
    /// If `skip_defaults` is true, only user patterns are returned.
    pub fn effective_patterns(&self) -> Vec<String> {
        let mut patterns = Vec::new();

        if !self.skip_defaults {
            patterns.extend(DEFAULT_EXCLUDE_PATTERNS.iter().map(|s| s.to_string()));
        }

        for p in &self.paths {
            if !patterns.contains(p) {
                patterns.push(p.clone());
            }
        }

        patterns
    }
}

/// Default CLI flags that can be set in project config
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CliDefaults {
    /// Default output format (text, json)
    #[serde(default)]
    pub format: Option<String>,

    /// Default minimum severity filter for `concurrency check`
    #[serde(default)]
    pub severity: Option<String>,
}

/// Load project configuration from the repository root.
///
/// Searches for configuration files in this order:
/// 1. `repotoire.toml`
/// 2. `.repotoirerc.json`
///
/// Returns default configuration if no config file is found. When `path`
/// is a file, its parent directory is searched.
pub fn load_project_config(path: &Path) -> ProjectConfig {
    let repo_path = if path.is_file() {
        path.parent().unwrap_or(path)
    } else {
        path
    };

    let toml_path = repo_path.join("repotoire.toml");
    if toml_path.exists() {
        match load_toml_config(&toml_path) {
            Ok(config) => {
                debug!("Loaded project config from {}", toml_path.display());
                return config;
            }
            Err(e) => {
                warn!("Failed to load {}: {}", toml_path.display(), e);
            }
        }
    }

    let json_path = repo_path.join(".repotoirerc.json");
    if json_path.exists() {
        match load_json_config(&json_path) {
            Ok(config) => {
                debug!("Loaded project config from {}", json_path.display());
                return config;
            }
            Err(e) => {
                warn!("Failed to load {}: {}", json_path.display(), e);
            }
        }
    }

    debug!("No project config found, using defaults");
    ProjectConfig::default()
}

/// Load configuration from a TOML file
fn load_toml_config(path: &Path) -> anyhow::Result<ProjectConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: ProjectConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Load configuration from a JSON file
fn load_json_config(path: &Path) -> anyhow::Result<ProjectConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: ProjectConfig = serde_json::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests;
