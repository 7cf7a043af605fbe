//! Output reporters for concurrency analysis results
//!
//! Supports two output formats:
//! - `text` - Terminal output with colors
//! - `json` - Machine-readable JSON with stable field names

mod json;
mod text;

use crate::models::{ConcurrencyReport, DeadlockReport, StressReport, TestResult};
use anyhow::{anyhow, Result};
use std::str::FromStr;

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" | "terminal" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(anyhow!("Unknown format '{}'. Valid formats: text, json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Render the result of `concurrency check`
pub fn render_races(report: &ConcurrencyReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(text::render_races(report)),
        OutputFormat::Json => json::render(report),
    }
}

/// Render the result of `concurrency deadlock`
pub fn render_deadlocks(report: &DeadlockReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(text::render_deadlocks(report)),
        OutputFormat::Json => json::render(report),
    }
}

/// Render the result of `test race`
pub fn render_test_result(result: &TestResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(text::render_test_result(result)),
        OutputFormat::Json => json::render(result),
    }
}

/// Render the result of `test stress`
pub fn render_stress(report: &StressReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(text::render_stress(report)),
        OutputFormat::Json => json::render(report),
    }
}
