//! JSON reporter
//!
//! Outputs reports as pretty-printed JSON. Field names follow the model
//! structs exactly so quality gates can evaluate thresholds against them.

use anyhow::Result;
use serde::Serialize;

/// Render any report as JSON
pub fn render<T: Serialize + ?Sized>(report: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}
