//! `concurrency check` and `concurrency deadlock`

use super::emit;
use crate::config::{load_project_config, ProjectConfig};
use crate::detectors::{LockOrderAnalyzer, SharedStateAnalyzer};
use crate::models::{ConcurrencyReport, DeadlockReport, Diagnostic, FindingsSummary, Severity};
use crate::parsers::{collect_source_files, parse_units, SourceUnit};
use crate::reporters::{self, OutputFormat};
use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn spinner(message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(spinner_style());
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Resolve the output format: flag, then config default, then text
pub(super) fn resolve_format(flag: Option<&str>, config: &ProjectConfig) -> Result<OutputFormat> {
    match flag.or(config.defaults.format.as_deref()) {
        Some(f) => OutputFormat::from_str(f),
        None => Ok(OutputFormat::Text),
    }
}

/// Load config, collect and parse every source unit under `path`
fn load(path: &Path) -> Result<(ProjectConfig, Vec<SourceUnit>, Vec<Diagnostic>)> {
    let path = path
        .canonicalize()
        .with_context(|| format!("Path does not exist: {}", path.display()))?;
    let config = load_project_config(&path);

    let files = collect_source_files(&path, &config.exclude)?;
    let bar = spinner("Parsing source files...");
    let (units, diagnostics) = parse_units(&files);
    bar.finish_and_clear();
    info!(
        "Parsed {} of {} files under {}",
        units.len(),
        files.len(),
        path.display()
    );
    Ok((config, units, diagnostics))
}

/// Run the shared-state analyzer and exit 1 when a race meets the threshold
pub fn run_check(
    path: &Path,
    severity: Option<&str>,
    format: Option<&str>,
    output: Option<&Path>,
) -> Result<ExitCode> {
    let (config, units, mut diagnostics) = load(path)?;
    let format = resolve_format(format, &config)?;
    let threshold = match severity.or(config.defaults.severity.as_deref()) {
        Some(s) => Severity::from_str(s)?,
        None => Severity::Low,
    };

    let bar = spinner("Analyzing shared state...");
    let analyzer = SharedStateAnalyzer::with_config(config.shared_state.clone());
    let (run, shared_states) = analyzer.analyze_all(&units);
    bar.finish_and_clear();

    let files_analyzed = run.units_analyzed;
    diagnostics.extend(run.diagnostics);
    let race_conditions: Vec<_> = run
        .findings
        .into_iter()
        .filter(|r| r.severity >= threshold)
        .collect();
    let summary = FindingsSummary::from_severities(race_conditions.iter().map(|r| r.severity));

    let report = ConcurrencyReport {
        race_conditions,
        summary,
        diagnostics,
        files_analyzed,
        shared_states,
    };
    emit(&reporters::render_races(&report, format)?, output)?;

    if report.summary.at_or_above(threshold) > 0 {
        if format == OutputFormat::Text {
            eprintln!(
                "{} {} race condition(s) at or above {}",
                style("✗").red(),
                report.summary.at_or_above(threshold),
                threshold
            );
        }
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Build the global lock-order graph and exit 1 when it has a cycle
pub fn run_deadlock(path: &Path, format: Option<&str>, output: Option<&Path>) -> Result<ExitCode> {
    let (config, units, mut diagnostics) = load(path)?;
    let format = resolve_format(format, &config)?;

    let bar = spinner("Building lock-order graph...");
    let analyzer = LockOrderAnalyzer::with_config(config.lock_order.clone());
    let (run, graph) = analyzer.analyze_with_graph(&units);
    bar.finish_and_clear();

    diagnostics.extend(run.diagnostics);
    let report = DeadlockReport {
        deadlocks: run.findings,
        diagnostics,
        files_analyzed: run.units_analyzed,
        locks: graph.lock_count(),
        lock_pairs: graph.edge_count(),
    };
    emit(&reporters::render_deadlocks(&report, format)?, output)?;

    if report.deadlocks.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        if format == OutputFormat::Text {
            eprintln!(
                "{} {} potential deadlock(s)",
                style("✗").red(),
                report.deadlocks.len()
            );
        }
        Ok(ExitCode::from(1))
    }
}
