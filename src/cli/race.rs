//! `test race` and `test stress`

use super::check::resolve_format;
use super::emit;
use crate::config::{load_project_config, ProjectConfig};
use crate::reporters::{self, OutputFormat};
use crate::stress::targets::{self, CounterService, Target};
use crate::stress::{StressConfig, StressError, StressTester};
use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

fn running(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn resolve_target(spec: &str) -> Result<Target> {
    targets::resolve(spec).map_err(|e| {
        anyhow::anyhow!("{}. Available targets: {}", e, targets::available().join(", "))
    })
}

fn verdict_exit(race_detected: bool, format: OutputFormat) -> ExitCode {
    if !race_detected {
        return ExitCode::SUCCESS;
    }
    if format == OutputFormat::Text {
        eprintln!("{} race detected", style("✗").red());
    }
    ExitCode::from(1)
}

fn project_config() -> ProjectConfig {
    load_project_config(Path::new("."))
}

/// Run a fixed-iteration race test; exit 1 when a race was detected
pub fn run_race(
    target: &str,
    threads: Option<usize>,
    iterations: Option<u64>,
    timeout: Option<f64>,
    format: Option<&str>,
) -> Result<ExitCode> {
    let config = project_config();
    let format = resolve_format(format, &config)?;
    let target = resolve_target(target)?;
    let stress = StressConfig::from_secs(
        threads.unwrap_or(config.stress.threads),
        iterations.unwrap_or(config.stress.iterations),
        timeout.unwrap_or(config.stress.timeout_secs),
    )?;
    stress.validate()?;
    info!(
        "Race test {:?}: {} threads x {} iterations",
        target, stress.threads, stress.iterations
    );

    let tester = StressTester::new().with_timeout(stress.timeout);
    let bar = running(format!(
        "Running {} threads x {} iterations...",
        stress.threads, stress.iterations
    ));
    let result = match &target {
        Target::Method { method } => {
            tester.test_method::<CounterService>(method, stress.threads, stress.iterations)
        }
        Target::Function { .. } => match target.counter_fn() {
            Some(run) => tester.test_with_config(run, stress),
            None => Err(StressError::UnknownTarget(format!("{:?}", target))),
        },
    };
    bar.finish_and_clear();
    let result = result?;

    emit(&reporters::render_test_result(&result, format)?, None)?;
    Ok(verdict_exit(result.race_detected, format))
}

/// Run a duration-bounded stress test; exit 1 when a race was detected
pub fn run_stress(
    target: &str,
    threads: Option<usize>,
    duration_secs: f64,
    format: Option<&str>,
) -> Result<ExitCode> {
    let config = project_config();
    let format = resolve_format(format, &config)?;
    let target = resolve_target(target)?;
    let threads = threads.unwrap_or(config.stress.threads);
    let duration = Duration::try_from_secs_f64(duration_secs)
        .map_err(|e| StressError::InvalidConfiguration(format!("duration: {}", e)))?;

    let tester = StressTester::from_defaults(&config.stress).with_threads(threads);
    let bar = running(format!("Stressing with {} threads for {:.1}s...", threads, duration_secs));
    let report = match &target {
        Target::Method { method } => tester.stress_method::<CounterService>(method, duration),
        Target::Function { .. } => match target.counter_fn() {
            Some(run) => tester.stress_test(run, duration),
            None => Err(StressError::UnknownTarget(format!("{:?}", target))),
        },
    };
    bar.finish_and_clear();
    let report = report?;

    emit(&reporters::render_stress(&report, format)?, None)?;
    Ok(verdict_exit(report.result.race_detected, format))
}
