//! Text (terminal) reporter with colors and formatting

use crate::models::{
    AccessKind, ConcurrencyReport, DeadlockReport, Diagnostic, FindingsSummary, Severity,
    StressReport, TestResult,
};
use std::fmt::Write;

/// Severity colors
fn severity_color(severity: &Severity) -> &'static str {
    match severity {
        Severity::Critical => "\x1b[31m", // Red
        Severity::High => "\x1b[91m",     // Light red
        Severity::Medium => "\x1b[33m",   // Yellow
        Severity::Low => "\x1b[34m",      // Blue
    }
}

/// Reset ANSI color
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";

/// Severity tag
fn severity_tag(severity: &Severity) -> &'static str {
    match severity {
        Severity::Critical => "[C]",
        Severity::High => "[H]",
        Severity::Medium => "[M]",
        Severity::Low => "[L]",
    }
}

fn header(out: &mut String, title: &str) {
    let _ = writeln!(out, "\n{BOLD}{title}{RESET}");
    let _ = writeln!(out, "{DIM}──────────────────────────────────────{RESET}");
}

fn summary_line(summary: &FindingsSummary) -> String {
    let mut parts = Vec::new();
    if summary.critical > 0 {
        parts.push(format!("\x1b[31m{} critical{RESET}", summary.critical));
    }
    if summary.high > 0 {
        parts.push(format!("\x1b[91m{} high{RESET}", summary.high));
    }
    if summary.medium > 0 {
        parts.push(format!("\x1b[33m{} medium{RESET}", summary.medium));
    }
    if summary.low > 0 {
        parts.push(format!("\x1b[34m{} low{RESET}", summary.low));
    }
    parts.join(" | ")
}

fn diagnostics(out: &mut String, diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }
    let _ = writeln!(out, "{BOLD}DIAGNOSTICS{RESET} ({} skipped)", diagnostics.len());
    for d in diagnostics {
        let location = match d.line_number {
            Some(line) => format!("{}:{}", d.file_path.display(), line),
            None => d.file_path.display().to_string(),
        };
        let _ = writeln!(out, "  {DIM}{:?}{RESET}  {}  {}", d.kind, location, d.message);
    }
    out.push('\n');
}

/// Render race conditions, one block per finding
pub fn render_races(report: &ConcurrencyReport) -> String {
    let mut out = String::new();
    header(&mut out, "Shared-State Analysis");
    let _ = writeln!(
        out,
        "Files: {}  Shared attributes: {}\n",
        report.files_analyzed, report.shared_states
    );

    let _ = writeln!(
        out,
        "{BOLD}RACE CONDITIONS{RESET} ({} total)",
        report.summary.total
    );
    let summary = summary_line(&report.summary);
    if !summary.is_empty() {
        let _ = writeln!(out, "  {}", summary);
    }
    out.push('\n');

    for race in &report.race_conditions {
        let state = &race.shared_state;
        let _ = writeln!(
            out,
            "{}{}{RESET} {BOLD}{}{RESET}  {DIM}{}:{}  #{}{RESET}",
            severity_color(&race.severity),
            severity_tag(&race.severity),
            state.name,
            state.file_path.display(),
            state.line_number,
            race.id
        );
        let _ = writeln!(out, "    {}", race.description);
        for ap in &race.access_points {
            let kind = match ap.kind {
                AccessKind::Read => "read ",
                AccessKind::Write => "write",
            };
            let guard = match (&ap.protection, ap.lock_held) {
                (Some(p), _) => p.clone(),
                (None, true) => "locked".to_string(),
                (None, false) => format!("{RED}unprotected{RESET}"),
            };
            let _ = writeln!(
                out,
                "    {DIM}{} line {:<5} {:<28}{RESET} {}",
                kind, ap.line_number, ap.routine, guard
            );
        }
        let _ = writeln!(out, "    {GREEN}Fix:{RESET} {}\n", race.suggestion);
    }

    diagnostics(&mut out, &report.diagnostics);
    if report.race_conditions.is_empty() {
        let _ = writeln!(out, "{DIM}No race conditions found.{RESET}");
    }
    out
}

/// Render lock-order cycles
pub fn render_deadlocks(report: &DeadlockReport) -> String {
    let mut out = String::new();
    header(&mut out, "Lock-Order Analysis");
    let _ = writeln!(
        out,
        "Files: {}  Locks: {}  Ordered pairs: {}\n",
        report.files_analyzed, report.locks, report.lock_pairs
    );
    let _ = writeln!(
        out,
        "{BOLD}DEADLOCK SCENARIOS{RESET} ({} total)\n",
        report.deadlocks.len()
    );

    for scenario in &report.deadlocks {
        let mut cycle = scenario.locks.clone();
        if let Some(first) = scenario.locks.first() {
            cycle.push(first.clone());
        }
        let _ = writeln!(
            out,
            "{}{}{RESET} {BOLD}{}{RESET}  {DIM}#{}{RESET}",
            severity_color(&scenario.severity),
            severity_tag(&scenario.severity),
            cycle.join(" -> "),
            scenario.id
        );
        for site in &scenario.acquisition_sites {
            let _ = writeln!(
                out,
                "    {} while holding {}  {DIM}{} ({}:{}){RESET}",
                site.acquired,
                site.held,
                site.routine,
                site.file_path.display(),
                site.line_number
            );
        }
        let _ = writeln!(out, "    {GREEN}Fix:{RESET} {}\n", scenario.suggestion);
    }

    diagnostics(&mut out, &report.diagnostics);
    if report.deadlocks.is_empty() {
        let _ = writeln!(out, "{DIM}No lock-order cycles found.{RESET}");
    }
    out
}

fn result_block(out: &mut String, result: &TestResult) {
    let verdict = if result.race_detected {
        format!("{RED}{BOLD}RACE DETECTED{RESET}")
    } else {
        format!("{GREEN}{BOLD}NO RACE DETECTED{RESET}")
    };
    let _ = writeln!(out, "Verdict: {}", verdict);
    let _ = writeln!(
        out,
        "Threads: {}  Iterations/thread: {}  Duration: {:.3}s  Throughput: {:.0} ops/s",
        result.threads,
        result.iterations_per_thread,
        result.duration.as_secs_f64(),
        result.operations_per_second
    );
    let _ = writeln!(
        out,
        "Total: {}  Successful: {GREEN}{}{RESET}  Failed: {}{}{RESET}",
        result.total_iterations,
        result.successful,
        if result.failed > 0 { RED } else { DIM },
        result.failed
    );
    if let (Some(expected), Some(observed)) = (result.expected_value, result.observed_value) {
        let _ = writeln!(out, "Shared state: expected {}, observed {}", expected, observed);
    }
    if result.timed_out_workers > 0 {
        let _ = writeln!(out, "{RED}Timed out workers: {}{RESET}", result.timed_out_workers);
    }

    if !result.failure_details.is_empty() {
        let _ = writeln!(out, "\n{BOLD}FAILURES{RESET}");
        for detail in result.failure_details.iter().take(10) {
            let _ = writeln!(out, "  - {}", detail);
        }
        let remaining = result.failure_details.len().saturating_sub(10);
        if remaining > 0 {
            let _ = writeln!(out, "  {DIM}...and {} more{RESET}", remaining);
        }
    }
}

/// Render a fixed-iteration race test
pub fn render_test_result(result: &TestResult) -> String {
    let mut out = String::new();
    header(&mut out, "Race Test");
    result_block(&mut out, result);
    out
}

/// Render a duration-bounded stress run
pub fn render_stress(report: &StressReport) -> String {
    let mut out = String::new();
    header(&mut out, "Stress Test");
    result_block(&mut out, &report.result);
    match report.peak_memory_bytes {
        Some(bytes) => {
            let _ = writeln!(out, "Peak memory: {:.1} MiB", bytes as f64 / (1024.0 * 1024.0));
        }
        None => {
            let _ = writeln!(out, "{DIM}Peak memory: unavailable{RESET}");
        }
    }
    out
}
