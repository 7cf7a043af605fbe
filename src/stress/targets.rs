//! Built-in stress targets addressable from the command line
//!
//! A target is named `counter:<name>` for free functions over a
//! [`SharedCounter`], or `counter:CounterService.<method>` for a method on a
//! shared [`CounterService`] instance.

use super::{SharedCounter, StressError, StressSubject};
use anyhow::bail;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// Function-style target over the shared counter
pub type CounterFn = fn(&SharedCounter) -> anyhow::Result<()>;

/// Unguarded read-modify-write; loses updates under contention
pub fn unsafe_increment(counter: &SharedCounter) -> anyhow::Result<()> {
    let current = counter.get();
    thread::yield_now();
    counter.set(current + 1);
    Ok(())
}

pub fn locked_increment(counter: &SharedCounter) -> anyhow::Result<()> {
    let _guard = counter.lock();
    counter.set(counter.get() + 1);
    Ok(())
}

pub fn atomic_increment(counter: &SharedCounter) -> anyhow::Result<()> {
    counter.fetch_add(1);
    Ok(())
}

/// Locked increment that reports an error on every 97th value
pub fn flaky_increment(counter: &SharedCounter) -> anyhow::Result<()> {
    let _guard = counter.lock();
    let current = counter.get();
    if current % 97 == 96 {
        // the value is consumed so the next call succeeds
        counter.set(current + 1);
        bail!("counter reached {}", current);
    }
    counter.set(current + 1);
    Ok(())
}

/// Locked increment that holds the lock for 10ms
pub fn slow_increment(counter: &SharedCounter) -> anyhow::Result<()> {
    let _guard = counter.lock();
    thread::sleep(Duration::from_millis(10));
    counter.set(counter.get() + 1);
    Ok(())
}

const COUNTER_FUNCTIONS: &[(&str, CounterFn)] = &[
    ("unsafe_increment", unsafe_increment),
    ("locked_increment", locked_increment),
    ("atomic_increment", atomic_increment),
    ("flaky_increment", flaky_increment),
    ("slow_increment", slow_increment),
];

/// Service object with one racy and two synchronized counters
#[derive(Debug, Default)]
pub struct CounterService {
    count: AtomicU64,
    lock: Mutex<()>,
}

impl CounterService {
    pub const NAME: &'static str = "CounterService";

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn increment(&self) {
        let current = self.count.load(Ordering::Relaxed);
        thread::yield_now();
        self.count.store(current + 1, Ordering::Relaxed);
    }

    fn increment_locked(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.increment();
    }

    fn increment_atomic(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

impl StressSubject for CounterService {
    fn methods(&self) -> &'static [&'static str] {
        &["increment", "increment_locked", "increment_atomic"]
    }

    fn call(&self, method: &str) -> anyhow::Result<()> {
        match method {
            "increment" => self.increment(),
            "increment_locked" => self.increment_locked(),
            "increment_atomic" => self.increment_atomic(),
            other => bail!("{} has no method '{}'", Self::NAME, other),
        }
        Ok(())
    }

    fn observed(&self) -> Option<u64> {
        Some(self.count())
    }
}

/// A resolved target specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Function { name: &'static str },
    Method { method: String },
}

impl Target {
    /// The counter function for [`Target::Function`]
    pub fn counter_fn(&self) -> Option<CounterFn> {
        match self {
            Target::Function { name } => COUNTER_FUNCTIONS
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, run)| *run),
            Target::Method { .. } => None,
        }
    }
}

/// Resolve `counter:<name>` or `counter:CounterService.<method>`
pub fn resolve(spec: &str) -> Result<Target, StressError> {
    let unknown = || StressError::UnknownTarget(spec.to_string());
    let name = spec.strip_prefix("counter:").ok_or_else(unknown)?;

    if let Some(method) = name
        .strip_prefix(CounterService::NAME)
        .and_then(|rest| rest.strip_prefix('.'))
    {
        if !CounterService::default().supports(method) {
            return Err(unknown());
        }
        return Ok(Target::Method {
            method: method.to_string(),
        });
    }

    COUNTER_FUNCTIONS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(name, _)| Target::Function { name: *name })
        .ok_or_else(unknown)
}

/// Every accepted target specification
pub fn available() -> Vec<String> {
    let service = CounterService::default();
    COUNTER_FUNCTIONS
        .iter()
        .map(|(name, _)| format!("counter:{}", name))
        .chain(
            service
                .methods()
                .iter()
                .map(|m| format!("counter:{}.{}", CounterService::NAME, m)),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_functions_and_methods() {
        let target = resolve("counter:locked_increment").unwrap();
        assert_eq!(
            target,
            Target::Function {
                name: "locked_increment"
            }
        );
        assert!(target.counter_fn().is_some());
        assert_eq!(
            resolve("counter:CounterService.increment_atomic").unwrap(),
            Target::Method {
                method: "increment_atomic".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_rejects_unknown_targets() {
        for spec in [
            "locked_increment",
            "counter:nope",
            "counter:CounterService.reset",
            "counter:CounterService",
        ] {
            assert_eq!(
                resolve(spec),
                Err(StressError::UnknownTarget(spec.to_string()))
            );
        }
    }

    #[test]
    fn test_available_lists_every_target() {
        let all = available();
        assert_eq!(all.len(), 8);
        for spec in &all {
            assert!(resolve(spec).is_ok(), "{} should resolve", spec);
        }
    }

    #[test]
    fn test_flaky_increment_fails_periodically() {
        let counter = SharedCounter::new();
        let failures = (0..200)
            .filter(|_| flaky_increment(&counter).is_err())
            .count();
        assert_eq!(failures, 2);
        assert_eq!(counter.get(), 200);
    }

    #[test]
    fn test_service_rejects_unknown_method() {
        let service = CounterService::default();
        assert!(service.call("increment").is_ok());
        assert!(service.call("decrement").is_err());
        assert_eq!(service.observed(), Some(1));
    }
}
