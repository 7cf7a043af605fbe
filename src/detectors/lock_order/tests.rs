use super::*;
use crate::models::DiagnosticKind;
use crate::parsers::python::parse_source;

fn unit(path: &str, source: &str) -> SourceUnit {
    parse_source(source, Path::new(path)).unwrap()
}

#[test]
fn test_cycle_across_files_is_one_scenario() {
    let a = unit(
        "a.py",
        r#"
import threading
lock_a = threading.Lock()
lock_b = threading.Lock()
lock_c = threading.Lock()

def first():
    with lock_a:
        with lock_b:
            pass

def second():
    with lock_b:
        with lock_c:
            pass
"#,
    );
    let b = unit(
        "b.py",
        r#"
from a import lock_a, lock_c

def third():
    with lock_c:
        with lock_a:
            pass
"#,
    );

    let run = LockOrderAnalyzer::new().analyze(&[a, b]);
    assert_eq!(run.findings.len(), 1);
    let scenario = &run.findings[0];
    assert_eq!(scenario.locks, vec!["lock_a", "lock_b", "lock_c"]);
    assert_eq!(scenario.severity, Severity::Critical);
    assert_eq!(scenario.acquisition_sites.len(), 3);
    assert_eq!(scenario.acquisition_sites[2].file_path, Path::new("b.py"));
    assert_eq!(scenario.acquisition_sites[2].routine, "third");
}

#[test]
fn test_consistent_order_has_no_scenarios() {
    let source = unit(
        "ordered.py",
        r#"
import threading

class Transfer:
    def __init__(self):
        self.lock_a = threading.Lock()
        self.lock_b = threading.Lock()
        self.lock_c = threading.Lock()

    def one(self):
        with self.lock_a:
            with self.lock_b:
                pass

    def two(self):
        with self.lock_b, self.lock_c:
            pass

    def three(self):
        with self.lock_a:
            with self.lock_c:
                pass
"#,
    );
    let (run, graph) = LockOrderAnalyzer::new().analyze_with_graph(&[source]);
    assert!(run.findings.is_empty());
    assert_eq!(graph.lock_count(), 3);
    assert_eq!(graph.edge_count(), 3);
}

#[test]
fn test_classic_two_lock_deadlock() {
    let source = unit(
        "bank.py",
        r#"
import threading

class Bank:
    def __init__(self):
        self.accounts_lock = threading.Lock()
        self.audit_lock = threading.Lock()

    def transfer(self):
        self.accounts_lock.acquire()
        try:
            with self.audit_lock:
                pass
        finally:
            self.accounts_lock.release()

    def audit(self):
        with self.audit_lock:
            with self.accounts_lock:
                pass
"#,
    );
    let run = LockOrderAnalyzer::new().analyze(&[source]);
    assert_eq!(run.findings.len(), 1);
    assert_eq!(
        run.findings[0].locks,
        vec!["Bank.accounts_lock", "Bank.audit_lock"]
    );
    assert!(run.findings[0].description.contains("Bank.transfer"));
}

#[test]
fn test_self_call_propagation() {
    let source = r#"
import threading

class Cache:
    def __init__(self):
        self._lock = threading.Lock()
        self._stats_lock = threading.Lock()

    def get(self, key):
        with self._lock:
            self._record()

    def _record(self):
        with self._stats_lock:
            pass

    def flush(self):
        with self._stats_lock:
            with self._lock:
                pass
"#;
    let run = LockOrderAnalyzer::new().analyze(&[unit("cache.py", source)]);
    assert_eq!(run.findings.len(), 1);
    let via_call = run.findings[0]
        .acquisition_sites
        .iter()
        .find(|s| s.held == "Cache._lock")
        .unwrap();
    assert_eq!(via_call.routine, "Cache.get -> Cache._record");

    let config = LockOrderConfig {
        follow_self_calls: false,
        ..Default::default()
    };
    let run = LockOrderAnalyzer::with_config(config).analyze(&[unit("cache.py", source)]);
    assert!(run.findings.is_empty());
}

#[test]
fn test_conditional_acquire_still_adds_edge() {
    let source = unit(
        "maybe.py",
        r#"
import threading
left = threading.Lock()
right = threading.Lock()

def maybe(flag):
    if flag:
        left.acquire()
    with right:
        pass

def other():
    with right:
        with left:
            pass
"#,
    );
    let run = LockOrderAnalyzer::new().analyze(&[source]);
    assert_eq!(run.findings.len(), 1);
}

#[test]
fn test_reentrant_acquire_is_not_a_cycle() {
    let source = unit(
        "rlock.py",
        r#"
import threading

class Tree:
    def __init__(self):
        self._lock = threading.RLock()

    def walk(self):
        with self._lock:
            with self._lock:
                pass
"#,
    );
    let (run, graph) = LockOrderAnalyzer::new().analyze_with_graph(&[source]);
    assert!(run.findings.is_empty());
    assert_eq!(graph.edge_count(), 0);
}

#[test]
fn test_scenario_ids_are_deterministic() {
    let source = r#"
import threading
x_lock = threading.Lock()
y_lock = threading.Lock()

def f():
    with x_lock:
        with y_lock:
            pass

def g():
    with y_lock:
        with x_lock:
            pass
"#;
    let first = LockOrderAnalyzer::new().analyze(&[unit("d.py", source)]);
    let second = LockOrderAnalyzer::new().analyze(&[unit("d.py", source)]);
    assert_eq!(first.findings[0].id, second.findings[0].id);
}

#[test]
fn test_malformed_units_are_skipped() {
    let bad = unit("bad.py", "def f(:\n    with a_lock:\n        pass\n");
    let good = unit("good.py", "import threading\nx = 1\n");
    let run = LockOrderAnalyzer::new().analyze(&[bad, good]);
    assert_eq!(run.units_skipped, 1);
    assert_eq!(run.units_analyzed, 1);
    assert_eq!(run.diagnostics[0].kind, DiagnosticKind::MalformedUnit);
}
