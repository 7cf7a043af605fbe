//! Init command - write an example repotoire.toml

use crate::config::EXAMPLE_CONFIG;
use anyhow::{Context, Result};
use console::style;
use std::path::Path;

/// Run the init command
pub fn run(path: &Path) -> Result<()> {
    let repo_path = path
        .canonicalize()
        .with_context(|| format!("Path does not exist: {}", path.display()))?;

    if !repo_path.is_dir() {
        anyhow::bail!("Path is not a directory: {}", repo_path.display());
    }

    let config_path = repo_path.join("repotoire.toml");
    if config_path.exists() {
        println!(
            "{} Already initialized at {}",
            style("✓").green(),
            style(config_path.display()).cyan()
        );
        return Ok(());
    }

    std::fs::write(&config_path, EXAMPLE_CONFIG)
        .with_context(|| format!("Failed to create {}", config_path.display()))?;
    println!(
        "{} Created {}",
        style("✓").green(),
        style(config_path.display()).cyan()
    );

    println!("\nNext steps:");
    println!(
        "  {} Find unsynchronized shared state",
        style("repotoire-concurrency concurrency check .").cyan()
    );
    println!(
        "  {} Find lock-order cycles",
        style("repotoire-concurrency concurrency deadlock .").cyan()
    );

    Ok(())
}
