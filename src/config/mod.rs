//! Configuration module for Repotoire concurrency analysis
//!
//! This module handles:
//! - Project-level configuration (repotoire.toml)
//! - Analyzer threshold overrides
//! - Stress-test defaults
//! - CLI defaults

mod project_config;

pub use project_config::{
    load_project_config, CliDefaults, ExcludeConfig, LockOrderConfig, ProjectConfig,
    SharedStateConfig, StressDefaults, DEFAULT_EXCLUDE_PATTERNS, EXAMPLE_CONFIG,
};
