//! Lock-order (deadlock) detector
//!
//! Builds one global lock-order graph across all units, since the two
//! halves of an ordering violation usually live in different routines or
//! files, then reports every elementary cycle as a `DeadlockScenario`.
//!
//! Edges are inserted whenever nesting is possible on some path (may-hold
//! semantics), and one level of `self.method()` calls is followed: calling
//! `self.m()` while holding `A` adds `A -> L` for each lock `L` taken by `m`.

mod graph;

pub use graph::{LockGraph, LockGraphBuilder, MAX_CYCLES};

use crate::config::LockOrderConfig;
use crate::detectors::base::{check_unit, AnalysisError, AnalysisRun, Analyzer};
use crate::detectors::locks::LockPatterns;
use crate::detectors::walker::{walk_unit, HeldLocks, HoldMode, Routine, RoutineKind, WalkEvents};
use crate::models::{deterministic_finding_id, AcquisitionSite, DeadlockScenario, Severity};
use crate::parsers::SourceUnit;
use rustc_hash::FxHashMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Detects lock-acquisition cycles
pub struct LockOrderAnalyzer {
    config: LockOrderConfig,
    patterns: LockPatterns,
}

impl Default for LockOrderAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for LockOrderAnalyzer {
    fn name(&self) -> &'static str {
        "LockOrderAnalyzer"
    }

    fn description(&self) -> &'static str {
        "Detects locks acquired in conflicting orders that can deadlock"
    }
}

struct PendingCall {
    caller: String,
    callee: String,
    held: Vec<String>,
    line: u32,
}

/// Per-unit event sink feeding the caller's builder
struct UnitScan<'b> {
    file_path: &'b Path,
    builder: &'b mut LockGraphBuilder,
    /// `Class.method` -> locks it acquires directly
    acquisitions: FxHashMap<String, Vec<String>>,
    pending: Vec<PendingCall>,
    edges_added: usize,
}

impl WalkEvents for UnitScan<'_> {
    fn acquire(&mut self, routine: &Routine, held: &HeldLocks, lock: &str, line: u32) {
        self.builder.add_lock(lock);
        if routine.kind == RoutineKind::Method {
            let locks = self.acquisitions.entry(routine.name.clone()).or_default();
            if !locks.iter().any(|l| l == lock) {
                locks.push(lock.to_string());
            }
        }
        for outer in held.names() {
            let added = self.builder.add_edge(AcquisitionSite {
                held: outer.to_string(),
                acquired: lock.to_string(),
                file_path: self.file_path.to_path_buf(),
                line_number: line,
                routine: routine.name.clone(),
            });
            if added {
                self.edges_added += 1;
            }
        }
    }

    fn self_call(&mut self, routine: &Routine, held: &HeldLocks, method: &str, line: u32) {
        let Some(class) = routine.class.as_deref() else {
            return;
        };
        if held.is_empty() {
            return;
        }
        self.pending.push(PendingCall {
            caller: routine.name.clone(),
            callee: format!("{}.{}", class, method),
            held: held.names().map(String::from).collect(),
            line,
        });
    }
}

impl UnitScan<'_> {
    fn resolve_self_calls(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for call in pending {
            let Some(locks) = self.acquisitions.get(&call.callee) else {
                continue;
            };
            for held in &call.held {
                for lock in locks {
                    let added = self.builder.add_edge(AcquisitionSite {
                        held: held.clone(),
                        acquired: lock.clone(),
                        file_path: self.file_path.to_path_buf(),
                        line_number: call.line,
                        routine: format!("{} -> {}", call.caller, call.callee),
                    });
                    if added {
                        self.edges_added += 1;
                    }
                }
            }
        }
    }
}

impl LockOrderAnalyzer {
    /// Create a new analyzer with default config
    pub fn new() -> Self {
        Self::with_config(LockOrderConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: LockOrderConfig) -> Self {
        let patterns = LockPatterns::new(&config.lock_names);
        Self { config, patterns }
    }

    /// Add the lock-order edges of one unit to `builder`.
    ///
    /// Returns the number of new edges.
    pub fn scan_unit(
        &self,
        unit: &SourceUnit,
        builder: &mut LockGraphBuilder,
    ) -> Result<usize, AnalysisError> {
        check_unit(unit)?;
        let mut scan = UnitScan {
            file_path: &unit.path,
            builder,
            acquisitions: FxHashMap::default(),
            pending: Vec::new(),
            edges_added: 0,
        };
        walk_unit(unit, &self.patterns, HoldMode::May, &mut scan);
        if self.config.follow_self_calls {
            scan.resolve_self_calls();
        }
        Ok(scan.edges_added)
    }

    /// Analyze all units against one global graph
    pub fn analyze(&self, units: &[SourceUnit]) -> AnalysisRun<DeadlockScenario> {
        self.analyze_with_graph(units).0
    }

    /// Like [`analyze`](Self::analyze), also returning the finished graph
    pub fn analyze_with_graph(
        &self,
        units: &[SourceUnit],
    ) -> (AnalysisRun<DeadlockScenario>, LockGraph) {
        let started = Instant::now();
        let mut run = AnalysisRun::new(self.name());
        let mut builder = LockGraphBuilder::new();

        for unit in units {
            match self.scan_unit(unit, &mut builder) {
                Ok(added) => {
                    run.units_analyzed += 1;
                    debug!("{}: {} lock-order edges", unit.path.display(), added);
                }
                Err(e) => run.record_skip(&e),
            }
        }

        let graph = builder.finish();
        run.findings = self.scenarios(&graph);
        info!(
            "{}: {} locks, {} ordered pairs, {} deadlock cycles",
            self.name(),
            graph.lock_count(),
            graph.edge_count(),
            run.findings.len()
        );
        (run.finish(started), graph)
    }

    /// Convert every cycle of a finished graph into a scenario
    pub fn scenarios(&self, graph: &LockGraph) -> Vec<DeadlockScenario> {
        graph
            .elementary_cycles()
            .into_iter()
            .map(|cycle| self.create_scenario(graph, cycle))
            .collect()
    }

    fn create_scenario(&self, graph: &LockGraph, locks: Vec<String>) -> DeadlockScenario {
        let acquisition_sites: Vec<AcquisitionSite> = locks
            .iter()
            .zip(locks.iter().cycle().skip(1))
            .filter_map(|(a, b)| graph.site(a, b).cloned())
            .collect();

        let mut path = locks.clone();
        if let Some(first) = locks.first() {
            path.push(first.clone());
        }
        let title = format!("Lock-order cycle {}", path.join(" -> "));

        let mut description = format!(
            "Locks {} are acquired in a circular order; threads following \
             different edges of the cycle can block each other forever.",
            path.join(" -> ")
        );
        for site in &acquisition_sites {
            description.push_str(&format!(
                "\n  - `{}` taken while holding `{}` in {} ({}:{})",
                site.acquired,
                site.held,
                site.routine,
                site.file_path.display(),
                site.line_number
            ));
        }

        let suggestion = format!(
            "Pick one global acquisition order (for example always `{}` first) and \
             follow it everywhere, or replace these {} locks with a single lock.",
            locks.first().map(String::as_str).unwrap_or_default(),
            locks.len()
        );

        let (file, line) = acquisition_sites
            .first()
            .map(|s| (s.file_path.display().to_string(), s.line_number))
            .unwrap_or_default();
        let id = deterministic_finding_id(self.name(), &file, line, &title);

        DeadlockScenario {
            id,
            locks,
            severity: Severity::Critical,
            description,
            suggestion,
            acquisition_sites,
        }
    }
}

#[cfg(test)]
mod tests;
