//! Shared fixtures handed to stress targets

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Integer cell shared by every worker of one run.
///
/// `get`/`set` are independent relaxed operations, so `set(get() + 1)`
/// is a non-atomic read-modify-write that can lose updates exactly like an
/// unguarded `counter.value += 1`. `fetch_add` is atomic, and `lock`
/// provides a mutex for targets that synchronize themselves.
#[derive(Debug, Default)]
pub struct SharedCounter {
    value: AtomicU64,
    mutex: Mutex<()>,
}

impl SharedCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed)
    }

    /// Atomic increment, returns the previous value
    pub fn fetch_add(&self, n: u64) -> u64 {
        self.value.fetch_add(n, Ordering::SeqCst)
    }

    /// Acquire the counter's own mutex. A poisoned mutex is recovered, a
    /// panicking target must not wedge the remaining workers.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A type whose methods can be stress-tested by name on one shared instance
pub trait StressSubject: Send + Sync {
    /// Method names accepted by [`call`](Self::call)
    fn methods(&self) -> &'static [&'static str];

    /// Invoke `method` once
    fn call(&self, method: &str) -> anyhow::Result<()>;

    /// Number of successful invocations as recorded by the instance itself,
    /// compared against the expected count to detect lost updates
    fn observed(&self) -> Option<u64> {
        None
    }

    fn supports(&self, method: &str) -> bool {
        self.methods().contains(&method)
    }
}

/// Failure list shared by all workers; the only serialized bookkeeping in
/// the harness
#[derive(Debug, Default)]
pub(crate) struct FailureSink {
    failures: Mutex<Vec<String>>,
}

impl FailureSink {
    pub(crate) fn push(&self, failure: String) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }

    pub(crate) fn snapshot(&self) -> Vec<String> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
