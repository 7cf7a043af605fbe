//! Base analyzer trait and run types
//!
//! This module defines the abstractions shared by the static analyzers:
//! - `Analyzer` trait naming and describing each analyzer
//! - `AnalysisRun` for capturing findings plus per-unit diagnostics
//! - `AnalysisError` for units that must be skipped

use crate::models::{Diagnostic, DiagnosticKind};
use crate::parsers::SourceUnit;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::warn;

/// Errors that make a single unit unanalyzable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("{}: syntax error at line {line}, unit skipped", path.display())]
    Malformed { path: PathBuf, line: u32 },

    #[error("{}: expected a Python module, found '{kind}'", path.display())]
    UnexpectedRoot { path: PathBuf, kind: String },
}

impl AnalysisError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            AnalysisError::Malformed { path, line } => Diagnostic {
                file_path: path.clone(),
                line_number: Some(*line),
                kind: DiagnosticKind::MalformedUnit,
                message: self.to_string(),
            },
            AnalysisError::UnexpectedRoot { path, .. } => Diagnostic {
                file_path: path.clone(),
                line_number: None,
                kind: DiagnosticKind::MalformedUnit,
                message: self.to_string(),
            },
        }
    }
}

/// Reject units the analyzers cannot trust
pub fn check_unit(unit: &SourceUnit) -> Result<(), AnalysisError> {
    let root = unit.root();
    if root.kind() != "module" {
        return Err(AnalysisError::UnexpectedRoot {
            path: unit.path.clone(),
            kind: root.kind().to_string(),
        });
    }
    if let Some(line) = unit.first_error_line() {
        return Err(AnalysisError::Malformed {
            path: unit.path.clone(),
            line,
        });
    }
    Ok(())
}

/// Trait for the static concurrency analyzers
pub trait Analyzer {
    /// Unique identifier, also used when hashing finding ids
    fn name(&self) -> &'static str;

    /// Human-readable description of what this analyzer finds
    fn description(&self) -> &'static str;

    /// Category of issues this analyzer finds
    fn category(&self) -> &'static str {
        "concurrency"
    }
}

/// Result of running one analyzer over many units
#[derive(Debug, Clone)]
pub struct AnalysisRun<T> {
    /// Name of the analyzer that produced these results
    pub analyzer: &'static str,
    pub findings: Vec<T>,
    /// Units that were skipped, one entry each
    pub diagnostics: Vec<Diagnostic>,
    pub units_analyzed: usize,
    pub units_skipped: usize,
    /// Execution time in milliseconds
    pub duration_ms: u64,
}

impl<T> AnalysisRun<T> {
    pub fn new(analyzer: &'static str) -> Self {
        Self {
            analyzer,
            findings: Vec::new(),
            diagnostics: Vec::new(),
            units_analyzed: 0,
            units_skipped: 0,
            duration_ms: 0,
        }
    }

    /// Record a unit that was skipped instead of aborting the run
    pub fn record_skip(&mut self, error: &AnalysisError) {
        warn!("{}: {}", self.analyzer, error);
        self.units_skipped += 1;
        self.diagnostics.push(error.to_diagnostic());
    }

    pub(crate) fn finish(mut self, started: Instant) -> Self {
        self.duration_ms = started.elapsed().as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::python::parse_source;
    use std::path::Path;

    #[test]
    fn test_check_unit_accepts_valid_module() {
        let unit = parse_source("x = 1\n", Path::new("ok.py")).unwrap();
        assert!(check_unit(&unit).is_ok());
    }

    #[test]
    fn test_check_unit_rejects_syntax_errors() {
        let unit = parse_source("def broken(:\n    pass\n", Path::new("bad.py")).unwrap();
        let err = check_unit(&unit).unwrap_err();
        assert!(matches!(err, AnalysisError::Malformed { .. }));
        let diag = err.to_diagnostic();
        assert_eq!(diag.kind, DiagnosticKind::MalformedUnit);
        assert_eq!(diag.file_path, Path::new("bad.py"));
        assert!(diag.line_number.is_some());
    }

    #[test]
    fn test_record_skip_counts_and_keeps_diagnostic() {
        let mut run: AnalysisRun<()> = AnalysisRun::new("TestAnalyzer");
        run.record_skip(&AnalysisError::Malformed {
            path: PathBuf::from("a.py"),
            line: 3,
        });
        assert_eq!(run.units_skipped, 1);
        assert_eq!(run.diagnostics.len(), 1);
        assert_eq!(run.diagnostics[0].line_number, Some(3));
    }
}
