//! Core data models for Repotoire concurrency analysis
//!
//! These models are shared by the static analyzers, the stress harness
//! and the reporters. Field names are part of the JSON contract consumed
//! by external quality gates, so renames here are breaking changes.

use serde::{Deserialize, Serialize, Serializer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Generate a deterministic finding ID based on content hash.
///
/// This ensures findings have stable IDs across runs, enabling:
/// - Tracking findings over time (fixed vs new vs recurring)
/// - Suppression by ID in config files
/// - Reliable deduplication
///
/// The ID is a 16-character hex string derived from hashing:
/// - analyzer name (which analyzer found it)
/// - file path (where it was found)
/// - line number (specific location)
/// - title (what the issue is)
pub fn deterministic_finding_id(analyzer: &str, file: &str, line: u32, title: &str) -> String {
    // MD5 is stable across Rust/compiler versions, DefaultHasher is not.
    let input = format!("{analyzer}\n{file}\n{line}\n{title}");
    let digest = md5::compute(input.as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

/// Severity levels for findings
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(anyhow::anyhow!(
                "Unknown severity '{}'. Valid values: low, medium, high, critical",
                s
            )),
        }
    }
}

/// How a shared attribute is touched, aggregated over all its access points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Read,
    Write,
    Both,
}

/// Kind of a single access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Read,
    Write,
}

/// One read or write of a shared attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub kind: AccessKind,
    pub file_path: PathBuf,
    pub line_number: u32,
    /// Whether a lock was held at this point
    pub lock_held: bool,
    /// Method (or `<class body>`) containing the access
    pub routine: String,
    /// `x += 1` style update: read and write are not one atomic step
    #[serde(default)]
    pub read_modify_write: bool,
    /// Name the attribute was reached through (`self`, `cls`, the class name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    /// Protection idiom that covered this access, if any
    #[serde(default)]
    pub protection: Option<String>,
}

/// A mutable attribute discovered during one analysis pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    /// Qualified name, `Class.attribute`
    pub name: String,
    pub file_path: PathBuf,
    /// Line of the declaring assignment (or first access if never declared)
    pub line_number: u32,
    pub access_type: AccessType,
    /// True when every write is protected
    pub protected: bool,
    /// Lock guarding the protected writes, when one was seen
    pub lock_name: Option<String>,
    pub access_points: Vec<AccessPoint>,
}

impl SharedState {
    pub fn writes(&self) -> impl Iterator<Item = &AccessPoint> {
        self.access_points
            .iter()
            .filter(|ap| ap.kind == AccessKind::Write)
    }

    pub fn has_write(&self) -> bool {
        self.writes().next().is_some()
    }
}

/// A shared attribute with unprotected or inconsistently protected writes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceCondition {
    pub id: String,
    pub shared_state: Arc<SharedState>,
    pub severity: Severity,
    pub description: String,
    pub suggestion: String,
    pub access_points: Vec<AccessPoint>,
}

/// Where an edge of the lock-order graph was observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionSite {
    /// Lock already held
    pub held: String,
    /// Lock acquired while `held` was held
    pub acquired: String,
    pub file_path: PathBuf,
    pub line_number: u32,
    pub routine: String,
}

/// An elementary cycle in the lock-order graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlockScenario {
    pub id: String,
    /// Lock names in acquisition order; the last lock leads back to the first
    pub locks: Vec<String>,
    pub severity: Severity,
    pub description: String,
    pub suggestion: String,
    /// One site per edge of the cycle, in cycle order
    pub acquisition_sites: Vec<AcquisitionSite>,
}

/// Outcome of a single stress-test invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub total_iterations: u64,
    pub successful: u64,
    pub failed: u64,
    pub race_detected: bool,
    pub failure_details: Vec<String>,
    /// Wall-clock time actually spent, in seconds
    #[serde(serialize_with = "serialize_secs", deserialize_with = "deserialize_secs")]
    pub duration: Duration,
    pub operations_per_second: f64,
    #[serde(default)]
    pub threads: usize,
    #[serde(default)]
    pub iterations_per_thread: u64,
    /// Final fixture value expected if no update was lost
    #[serde(default)]
    pub expected_value: Option<u64>,
    #[serde(default)]
    pub observed_value: Option<u64>,
    #[serde(default)]
    pub timed_out_workers: usize,
}

impl TestResult {
    /// Whether the result satisfies `total_iterations == successful + failed`
    pub fn is_consistent(&self) -> bool {
        self.total_iterations == self.successful + self.failed
    }
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

fn deserialize_secs<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(d)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

/// What went wrong with an input that could not be analyzed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    ReadError,
    ParseError,
    MalformedUnit,
}

/// A tool-side problem reported alongside findings, never instead of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file_path: PathBuf,
    pub line_number: Option<u32>,
    pub kind: DiagnosticKind,
    pub message: String,
}

/// Summary of findings by severity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingsSummary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub total: usize,
}

impl FindingsSummary {
    pub fn from_severities(severities: impl IntoIterator<Item = Severity>) -> Self {
        let mut summary = Self::default();
        for severity in severities {
            match severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
            }
            summary.total += 1;
        }
        summary
    }

    /// Number of findings at `threshold` or above
    pub fn at_or_above(&self, threshold: Severity) -> usize {
        match threshold {
            Severity::Critical => self.critical,
            Severity::High => self.critical + self.high,
            Severity::Medium => self.critical + self.high + self.medium,
            Severity::Low => self.total,
        }
    }
}

/// Output of `concurrency check`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyReport {
    pub race_conditions: Vec<RaceCondition>,
    pub summary: FindingsSummary,
    pub diagnostics: Vec<Diagnostic>,
    pub files_analyzed: usize,
    pub shared_states: usize,
}

/// Output of `concurrency deadlock`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlockReport {
    pub deadlocks: Vec<DeadlockScenario>,
    pub diagnostics: Vec<Diagnostic>,
    pub files_analyzed: usize,
    pub locks: usize,
    pub lock_pairs: usize,
}

/// Output of a duration-bounded stress run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressReport {
    pub result: TestResult,
    /// Highest resident memory sampled during the run, in bytes
    pub peak_memory_bytes: Option<u64>,
    pub throughput: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_finding_id_is_stable() {
        let a = deterministic_finding_id("SharedStateAnalyzer", "a.py", 10, "x");
        let b = deterministic_finding_id("SharedStateAnalyzer", "a.py", 10, "x");
        let c = deterministic_finding_id("SharedStateAnalyzer", "a.py", 11, "x");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_severity_ordering_and_parsing() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::from_str("HIGH").unwrap(), Severity::High);
        assert!(Severity::from_str("info").is_err());
        assert_eq!(Severity::Medium.to_string(), "medium");
    }

    #[test]
    fn test_summary_threshold_counts() {
        let summary = FindingsSummary::from_severities([
            Severity::Critical,
            Severity::Medium,
            Severity::Low,
            Severity::Low,
        ]);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.at_or_above(Severity::Critical), 1);
        assert_eq!(summary.at_or_above(Severity::High), 1);
        assert_eq!(summary.at_or_above(Severity::Medium), 2);
        assert_eq!(summary.at_or_above(Severity::Low), 4);
    }

    #[test]
    fn test_test_result_duration_serializes_as_seconds() {
        let result = TestResult {
            total_iterations: 10,
            successful: 10,
            failed: 0,
            race_detected: false,
            failure_details: vec![],
            duration: Duration::from_millis(1500),
            operations_per_second: 6.6,
            threads: 2,
            iterations_per_thread: 5,
            expected_value: Some(10),
            observed_value: Some(10),
            timed_out_workers: 0,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["duration"], 1.5);
        assert_eq!(json["total_iterations"], 10);
        let back: TestResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.duration, Duration::from_millis(1500));
        assert!(back.is_consistent());
    }
}
