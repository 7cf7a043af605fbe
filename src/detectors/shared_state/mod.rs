//! Shared-state race detector
//!
//! Finds mutable attributes whose writes are not serialized.
//!
//! # Algorithm
//!
//! 1. Walk every class of the unit, recording each `self.attr` read and
//!    write together with the locks that must be held at that point
//! 2. Group accesses into one `SharedState` per `Class.attr`
//! 3. Classify each write as lock-held, atomic, thread-confined or
//!    unprotected (see [`ProtectionKind`])
//! 4. Emit one `RaceCondition` per state with an unprotected write. When
//!    other writes of the same state are synchronized, the finding is
//!    reported as inconsistent locking.

mod model;
mod protection;

pub use model::{SharedStateModel, TrackedState};
pub use protection::{Confinement, ProtectionKind, CONSTRUCTOR_METHODS};

use crate::config::SharedStateConfig;
use crate::detectors::base::{check_unit, AnalysisError, AnalysisRun, Analyzer};
use crate::detectors::locks::{imports_concurrency, LockPatterns};
use crate::detectors::severity::RiskFactors;
use crate::detectors::walker::{walk_unit, HoldMode};
use crate::models::{deterministic_finding_id, AccessPoint, RaceCondition};
use crate::parsers::SourceUnit;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Detects unprotected and inconsistently protected shared state
pub struct SharedStateAnalyzer {
    config: SharedStateConfig,
    patterns: LockPatterns,
}

impl Default for SharedStateAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for SharedStateAnalyzer {
    fn name(&self) -> &'static str {
        "SharedStateAnalyzer"
    }

    fn description(&self) -> &'static str {
        "Detects shared mutable attributes written without synchronization"
    }
}

impl SharedStateAnalyzer {
    /// Create a new analyzer with default config
    pub fn new() -> Self {
        Self::with_config(SharedStateConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: SharedStateConfig) -> Self {
        let patterns = LockPatterns::new(&config.lock_names);
        Self { config, patterns }
    }

    /// Build the shared-state model of one unit
    pub fn model(&self, unit: &SourceUnit) -> Result<Vec<TrackedState>, AnalysisError> {
        check_unit(unit)?;
        let mut model = SharedStateModel::default();
        walk_unit(unit, &self.patterns, HoldMode::Must, &mut model);
        let concurrent =
            self.config.assume_concurrent || model.saw_lock() || imports_concurrency(unit);
        if !concurrent {
            debug!(
                "{}: no concurrency markers, treating as single-threaded",
                unit.path.display()
            );
        }
        Ok(model.finish(&unit.path, concurrent))
    }

    /// Analyze one unit
    pub fn analyze(&self, unit: &SourceUnit) -> Result<Vec<RaceCondition>, AnalysisError> {
        let states = self.model(unit)?;
        let mut findings: Vec<RaceCondition> = states
            .into_iter()
            .filter_map(|tracked| self.create_finding(tracked))
            .collect();
        findings.sort_by(|a, b| {
            a.shared_state
                .line_number
                .cmp(&b.shared_state.line_number)
                .then_with(|| a.shared_state.name.cmp(&b.shared_state.name))
        });
        Ok(findings)
    }

    /// Analyze many units, skipping malformed ones with a diagnostic.
    ///
    /// Returns the run and the number of shared states tracked.
    pub fn analyze_all(&self, units: &[SourceUnit]) -> (AnalysisRun<RaceCondition>, usize) {
        let started = Instant::now();
        let mut run = AnalysisRun::new(self.name());
        let mut tracked = 0;

        for unit in units {
            match self.model(unit) {
                Ok(states) => {
                    run.units_analyzed += 1;
                    tracked += states.len();
                    let before = run.findings.len();
                    run.findings
                        .extend(states.into_iter().filter_map(|s| self.create_finding(s)));
                    debug!(
                        "{}: {} findings",
                        unit.path.display(),
                        run.findings.len() - before
                    );
                }
                Err(e) => run.record_skip(&e),
            }
        }

        run.findings.sort_by(|a, b| {
            a.shared_state
                .file_path
                .cmp(&b.shared_state.file_path)
                .then_with(|| a.shared_state.line_number.cmp(&b.shared_state.line_number))
                .then_with(|| a.shared_state.name.cmp(&b.shared_state.name))
        });
        info!(
            "{}: {} race conditions in {} units ({} skipped, {} shared states)",
            self.name(),
            run.findings.len(),
            run.units_analyzed,
            run.units_skipped,
            tracked
        );
        (run.finish(started), tracked)
    }

    fn is_critical(&self, name: &str) -> bool {
        let attr = name.rsplit('.').next().unwrap_or(name).to_lowercase();
        self.config
            .critical_data
            .iter()
            .any(|fragment| attr.contains(&fragment.to_lowercase()))
    }

    fn create_finding(&self, tracked: TrackedState) -> Option<RaceCondition> {
        let unprotected: Vec<&AccessPoint> = tracked
            .writes()
            .filter(|(_, p)| p.is_none())
            .map(|(ap, _)| ap)
            .collect();
        if unprotected.is_empty() {
            return None;
        }
        let synchronized: Vec<(&AccessPoint, &ProtectionKind)> = tracked
            .writes()
            .filter_map(|(ap, p)| p.filter(|p| p.is_synchronizing()).map(|p| (ap, p)))
            .collect();
        let inconsistent = !synchronized.is_empty();

        let state = &tracked.state;
        let factors = RiskFactors {
            write_present: true,
            high_frequency: state.access_points.len() > self.config.frequency_threshold,
            critical_data: self.is_critical(&state.name),
            unprotected: true,
        };

        let unprotected_lines = format_lines(unprotected.iter().map(|ap| ap.line_number));
        let total_writes = state.writes().count();
        let (title, description) = if inconsistent {
            let guards: Vec<String> = synchronized.iter().map(|(_, p)| p.label()).collect();
            (
                format!("Inconsistent locking on {}", state.name),
                format!(
                    "`{}` is written with synchronization ({}) at {} but without it at {}. \
                     The unguarded writes can interleave with the guarded ones.",
                    state.name,
                    dedup(guards).join(", "),
                    format_lines(synchronized.iter().map(|(ap, _)| ap.line_number)),
                    unprotected_lines
                ),
            )
        } else {
            (
                format!("Unprotected write to {}", state.name),
                format!(
                    "`{}` is written without synchronization at {} ({} of {} writes unprotected).",
                    state.name,
                    unprotected_lines,
                    unprotected.len(),
                    total_writes
                ),
            )
        };
        let read_modify_write = unprotected.iter().any(|ap| ap.read_modify_write);
        let receiver = unprotected
            .iter()
            .find_map(|ap| ap.receiver.as_deref())
            .unwrap_or("self");
        let suggestion = suggest_fix(
            &state.name,
            receiver,
            state.lock_name.as_deref(),
            read_modify_write,
        );

        let id = deterministic_finding_id(
            self.name(),
            &state.file_path.display().to_string(),
            state.line_number,
            &title,
        );
        let access_points = state.access_points.clone();
        debug!("{}: {} ({:?})", id, title, factors);

        Some(RaceCondition {
            id,
            severity: factors.severity(),
            description,
            suggestion,
            access_points,
            shared_state: Arc::new(state.clone()),
        })
    }
}

fn suggest_fix(
    name: &str,
    receiver: &str,
    lock: Option<&str>,
    read_modify_write: bool,
) -> String {
    let attr = name.rsplit('.').next().unwrap_or(name);
    let target = format!("{}.{}", receiver, attr);
    match lock {
        Some(lock) if lock.contains(".@") => {
            let decorator = lock.rsplit('.').next().unwrap_or(lock);
            format!(
                "Apply `{}` to every method that writes `{}`, or guard those \
                 writes with an explicit lock.",
                decorator, target
            )
        }
        Some(lock) => {
            // module-level locks are named bare
            let guard = match lock.rsplit_once('.') {
                Some((_, lock_attr)) => format!("{}.{}", receiver, lock_attr),
                None => lock.to_string(),
            };
            format!(
                "Hold `{}` around every write to `{}` (`with {}:`), \
                 including the paths that currently skip it.",
                guard, target, guard
            )
        }
        None if read_modify_write => format!(
            "`{target}` is updated with a read-modify-write. Wrap the update in \
             `with {receiver}._lock:` using a `threading.Lock`, or switch to an atomic \
             counter such as `itertools.count()`."
        ),
        None => format!(
            "Protect writes to `{target}` with a `threading.Lock` held for the whole \
             update, or hand the data between threads through a `queue.Queue`."
        ),
    }
}

fn format_lines(lines: impl Iterator<Item = u32>) -> String {
    let mut lines: Vec<u32> = lines.collect();
    lines.sort_unstable();
    lines.dedup();
    let joined: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    if lines.len() == 1 {
        format!("line {}", joined[0])
    } else {
        format!("lines {}", joined.join(", "))
    }
}

fn dedup(mut items: Vec<String>) -> Vec<String> {
    items.sort();
    items.dedup();
    items
}
