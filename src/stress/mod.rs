//! Concurrent stress tester
//!
//! Runs a target on a pool of real OS threads against one shared fixture
//! and compares the observed outcome with the analytically expected one.
//!
//! # Control flow
//!
//! ```text
//!  validate config ──► spawn N named workers ──► recv_deadline(start + timeout)
//!                          │                            │
//!                          │ each: M x catch_unwind     │ finished workers joined,
//!                          │ (target(&fixture))         │ unfinished ones detached
//!                          ▼                            ▼
//!                   FailureSink (Mutex)           tally -> TestResult
//! ```
//!
//! Workers touch the fixture with no synchronization beyond what the target
//! itself does. The only serialized state is the failure list.

mod fixture;
mod memory;
pub mod targets;

pub use fixture::{SharedCounter, StressSubject};
pub use memory::{current_rss, MemorySampler};

use crate::config::StressDefaults;
use crate::models::{StressReport, TestResult};
use crossbeam_channel::{unbounded, RecvTimeoutError};
use fixture::FailureSink;
use std::any::Any;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised before any worker is spawned
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StressError {
    #[error("invalid stress configuration: {0}")]
    InvalidConfiguration(String),

    #[error("unknown stress target '{0}'")]
    UnknownTarget(String),
}

/// Parameters of one fixed-iteration run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StressConfig {
    pub threads: usize,
    pub iterations: u64,
    pub timeout: Duration,
}

impl StressConfig {
    pub fn new(threads: usize, iterations: u64, timeout: Duration) -> Self {
        Self {
            threads,
            iterations,
            timeout,
        }
    }

    /// Build from a timeout in (possibly fractional or invalid) seconds
    pub fn from_secs(threads: usize, iterations: u64, timeout_secs: f64) -> Result<Self, StressError> {
        if !(timeout_secs.is_finite() && timeout_secs > 0.0) {
            return Err(StressError::InvalidConfiguration(format!(
                "timeout must be positive, got {}",
                timeout_secs
            )));
        }
        let timeout = Duration::try_from_secs_f64(timeout_secs)
            .map_err(|e| StressError::InvalidConfiguration(format!("timeout: {}", e)))?;
        Ok(Self::new(threads, iterations, timeout))
    }

    pub fn validate(&self) -> Result<(), StressError> {
        if self.threads == 0 {
            return Err(StressError::InvalidConfiguration(
                "threads must be at least 1".to_string(),
            ));
        }
        if self.iterations == 0 {
            return Err(StressError::InvalidConfiguration(
                "iterations must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(StressError::InvalidConfiguration(
                "timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn total_iterations(&self) -> u64 {
        self.threads as u64 * self.iterations
    }
}

impl From<&StressDefaults> for StressConfig {
    fn from(defaults: &StressDefaults) -> Self {
        Self {
            threads: defaults.threads,
            iterations: defaults.iterations,
            timeout: Duration::try_from_secs_f64(defaults.timeout_secs).unwrap_or(Duration::ZERO),
        }
    }
}

/// One invocation of the target under test
type Operation = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Default)]
struct WorkerProgress {
    attempted: AtomicU64,
    succeeded: AtomicU64,
}

/// How long each worker keeps invoking the target
#[derive(Debug, Clone, Copy)]
enum Plan {
    Iterations(u64),
    Until(Instant),
}

/// Starts one named worker thread
type Spawner<'a> =
    dyn FnMut(String, Box<dyn FnOnce() + Send>) -> io::Result<thread::JoinHandle<()>> + 'a;

struct Outcome {
    progress: Arc<Vec<WorkerProgress>>,
    /// Workers that reported completion before the deadline
    finished: Vec<bool>,
    /// Per worker, the error that kept its thread from starting
    spawn_errors: Vec<Option<String>>,
    failures: Vec<String>,
    elapsed: Duration,
}

impl Outcome {
    fn spawned(&self) -> usize {
        self.spawn_errors.iter().filter(|e| e.is_none()).count()
    }

    /// Workers that started but had not reported by the deadline
    fn timed_out(&self) -> usize {
        self.finished
            .iter()
            .zip(&self.spawn_errors)
            .filter(|(finished, error)| !**finished && error.is_none())
            .count()
    }

    fn succeeded(&self, only_finished: bool) -> u64 {
        self.progress
            .iter()
            .zip(&self.finished)
            .filter(|(_, finished)| **finished || !only_finished)
            .map(|(p, _)| p.succeeded.load(Ordering::Acquire))
            .sum()
    }

    fn attempted(&self) -> u64 {
        self.progress
            .iter()
            .map(|p| p.attempted.load(Ordering::Acquire))
            .sum()
    }
}

/// Multi-threaded stress harness
#[derive(Debug, Clone)]
pub struct StressTester {
    /// Worker count for duration-bounded runs
    threads: usize,
    /// Join timeout for `test_method` and grace period for `stress_test`
    timeout: Duration,
    sample_interval: Duration,
}

impl Default for StressTester {
    fn default() -> Self {
        Self {
            threads: 10,
            timeout: Duration::from_secs(30),
            sample_interval: Duration::from_millis(50),
        }
    }
}

impl StressTester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_defaults(defaults: &StressDefaults) -> Self {
        let config = StressConfig::from(defaults);
        let mut tester = Self::default().with_threads(config.threads);
        if !config.timeout.is_zero() {
            tester = tester.with_timeout(config.timeout);
        }
        tester
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Run `target` `iterations` times on each of `threads` workers against a
    /// fresh [`SharedCounter`]. The counter must end at `threads * iterations`.
    pub fn test<F>(
        &self,
        target: F,
        threads: usize,
        iterations: u64,
        timeout: Duration,
    ) -> Result<TestResult, StressError>
    where
        F: Fn(&SharedCounter) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.test_with_config(target, StressConfig::new(threads, iterations, timeout))
    }

    pub fn test_with_config<F>(&self, target: F, config: StressConfig) -> Result<TestResult, StressError>
    where
        F: Fn(&SharedCounter) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        config.validate()?;
        let counter = Arc::new(SharedCounter::new());
        let fixture = Arc::clone(&counter);
        let op: Operation = Arc::new(move || target(&fixture));

        let outcome = drive(op, config.threads, Plan::Iterations(config.iterations), config.timeout);
        Ok(fixed_verdict(&config, outcome, Some(counter.get())))
    }

    /// Call `method` on one fresh `T` shared by all workers
    pub fn test_method<T>(
        &self,
        method: &str,
        threads: usize,
        iterations: u64,
    ) -> Result<TestResult, StressError>
    where
        T: StressSubject + Default + 'static,
    {
        let config = StressConfig::new(threads, iterations, self.timeout);
        config.validate()?;
        let subject = Arc::new(T::default());
        let op = method_operation(&subject, method)?;

        let outcome = drive(op, config.threads, Plan::Iterations(config.iterations), config.timeout);
        Ok(fixed_verdict(&config, outcome, subject.observed()))
    }

    /// Run `target` on `self.threads` workers until `duration` elapses,
    /// reporting throughput and peak memory
    pub fn stress_test<F>(&self, target: F, duration: Duration) -> Result<StressReport, StressError>
    where
        F: Fn(&SharedCounter) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.validate_duration(duration)?;
        let counter = Arc::new(SharedCounter::new());
        let fixture = Arc::clone(&counter);
        let op: Operation = Arc::new(move || target(&fixture));
        Ok(self.run_for(op, duration, || Some(counter.get())))
    }

    /// Duration-bounded variant of [`test_method`](Self::test_method)
    pub fn stress_method<T>(&self, method: &str, duration: Duration) -> Result<StressReport, StressError>
    where
        T: StressSubject + Default + 'static,
    {
        self.validate_duration(duration)?;
        let subject = Arc::new(T::default());
        let op = method_operation(&subject, method)?;
        Ok(self.run_for(op, duration, || subject.observed()))
    }

    fn validate_duration(&self, duration: Duration) -> Result<(), StressError> {
        if duration.is_zero() {
            return Err(StressError::InvalidConfiguration(
                "duration must be positive".to_string(),
            ));
        }
        StressConfig::new(self.threads, 1, self.timeout).validate()
    }

    fn run_for(
        &self,
        op: Operation,
        duration: Duration,
        observe: impl FnOnce() -> Option<u64>,
    ) -> StressReport {
        let sampler = MemorySampler::start(self.sample_interval);
        let stop_at = Instant::now() + duration;
        let outcome = drive(op, self.threads, Plan::Until(stop_at), duration + self.timeout);
        let peak_memory_bytes = sampler.finish();

        let result = duration_verdict(self.threads, outcome, observe());
        let throughput = result.operations_per_second;
        info!(
            "Stress run: {} ops in {:.2}s ({:.0} ops/s), race_detected={}",
            result.total_iterations,
            result.duration.as_secs_f64(),
            throughput,
            result.race_detected
        );
        StressReport {
            result,
            peak_memory_bytes,
            throughput,
        }
    }
}

fn method_operation<T>(subject: &Arc<T>, method: &str) -> Result<Operation, StressError>
where
    T: StressSubject + 'static,
{
    if !subject.supports(method) {
        return Err(StressError::InvalidConfiguration(format!(
            "unknown method '{}', expected one of: {}",
            method,
            subject.methods().join(", ")
        )));
    }
    let subject = Arc::clone(subject);
    let method = method.to_string();
    Ok(Arc::new(move || subject.call(&method)))
}

/// Spawn the workers and wait for them until `wait` has passed since start
fn drive(op: Operation, threads: usize, plan: Plan, wait: Duration) -> Outcome {
    drive_with(
        op,
        threads,
        plan,
        wait,
        &mut |name: String, body: Box<dyn FnOnce() + Send>| {
            thread::Builder::new().name(name).spawn(body)
        },
    )
}

fn drive_with(
    op: Operation,
    threads: usize,
    plan: Plan,
    wait: Duration,
    spawn: &mut Spawner<'_>,
) -> Outcome {
    let started = Instant::now();
    let deadline = started + wait;
    let progress: Arc<Vec<WorkerProgress>> =
        Arc::new((0..threads).map(|_| WorkerProgress::default()).collect());
    let sink = Arc::new(FailureSink::default());
    let (done_tx, done_rx) = unbounded::<usize>();

    let mut handles = Vec::with_capacity(threads);
    let mut spawn_errors = vec![None; threads];
    for worker in 0..threads {
        let op = Arc::clone(&op);
        let progress = Arc::clone(&progress);
        let worker_sink = Arc::clone(&sink);
        let done_tx = done_tx.clone();
        let body: Box<dyn FnOnce() + Send> = Box::new(move || {
            run_worker(worker, &op, &progress[worker], &worker_sink, plan);
            let _ = done_tx.send(worker);
        });
        match spawn(format!("stress-worker-{}", worker), body) {
            Ok(handle) => handles.push((worker, handle)),
            Err(e) => {
                warn!("Worker {} failed to spawn: {}", worker, e);
                spawn_errors[worker] = Some(e.to_string());
            }
        }
    }
    drop(done_tx);
    let spawned = handles.len();

    let mut finished = vec![false; threads];
    let mut reported = 0;
    while reported < spawned {
        match done_rx.recv_deadline(deadline) {
            Ok(worker) => {
                finished[worker] = true;
                reported += 1;
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "{} of {} workers still running after {:?}",
                    spawned - reported,
                    spawned,
                    wait
                );
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    for (worker, handle) in handles {
        if finished[worker] {
            if handle.join().is_err() {
                sink.push(format!("worker {}: thread panicked outside the target", worker));
            }
        }
        // unfinished workers are detached; they cannot be preempted safely
    }
    let elapsed = started.elapsed();

    Outcome {
        progress,
        finished,
        spawn_errors,
        failures: sink.snapshot(),
        elapsed,
    }
}

fn run_worker(worker: usize, op: &Operation, progress: &WorkerProgress, sink: &FailureSink, plan: Plan) {
    let mut iteration: u64 = 0;
    loop {
        let keep_going = match plan {
            Plan::Iterations(n) => iteration < n,
            Plan::Until(stop_at) => Instant::now() < stop_at,
        };
        if !keep_going {
            break;
        }
        progress.attempted.fetch_add(1, Ordering::Relaxed);
        match catch_unwind(AssertUnwindSafe(|| op())) {
            Ok(Ok(())) => {
                progress.succeeded.fetch_add(1, Ordering::Release);
            }
            Ok(Err(e)) => sink.push(format!("worker {} iteration {}: {:#}", worker, iteration, e)),
            Err(panic) => sink.push(format!(
                "worker {} iteration {}: panicked: {}",
                worker,
                iteration,
                panic_message(panic.as_ref())
            )),
        }
        iteration += 1;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Successful count after discounting updates the fixture lost (or gained)
fn reconcile(completed: u64, expected: u64, observed: Option<u64>) -> u64 {
    match observed {
        Some(observed) if observed <= expected => completed.min(observed),
        Some(observed) => completed.saturating_sub(observed - expected),
        None => completed,
    }
}

fn fixed_verdict(config: &StressConfig, outcome: Outcome, observed: Option<u64>) -> TestResult {
    let total = config.total_iterations();
    let completed = outcome.succeeded(true);
    let successful = reconcile(completed, total, observed);
    let failed = total - successful;

    let mut failure_details = outcome.failures.clone();
    for (worker, (finished, spawn_error)) in
        outcome.finished.iter().zip(&outcome.spawn_errors).enumerate()
    {
        match spawn_error {
            Some(e) => failure_details.push(format!(
                "worker {}: failed to spawn ({}); {} planned iterations counted as failed",
                worker, e, config.iterations
            )),
            None if !finished => failure_details.push(format!(
                "worker {}: did not finish within {:?}; {} planned iterations counted as failed",
                worker, config.timeout, config.iterations
            )),
            None => {}
        }
    }
    if let Some(observed) = observed {
        if observed != total {
            failure_details.push(format!(
                "shared state ended at {} but {} updates were expected ({} lost)",
                observed,
                total,
                total as i128 - observed as i128
            ));
        }
    }

    let race_detected = failed > 0 || !outcome.failures.is_empty();
    let secs = outcome.elapsed.as_secs_f64();
    let result = TestResult {
        total_iterations: total,
        successful,
        failed,
        race_detected,
        failure_details,
        duration: outcome.elapsed,
        operations_per_second: if secs > 0.0 { completed as f64 / secs } else { 0.0 },
        threads: config.threads,
        iterations_per_thread: config.iterations,
        expected_value: observed.map(|_| total),
        observed_value: observed,
        timed_out_workers: outcome.timed_out(),
    };
    debug!(
        "Stress verdict: {}/{} successful, {} timed out, {} spawned",
        result.successful, result.total_iterations, result.timed_out_workers, outcome.spawned()
    );
    result
}

fn duration_verdict(threads: usize, outcome: Outcome, observed: Option<u64>) -> TestResult {
    let total = outcome.attempted();
    let completed = outcome.succeeded(false);
    // a call that returned Ok should have left exactly one update behind;
    // detached workers may still be counting, so clamp to what was attempted
    let successful = reconcile(completed, completed, observed).min(total);
    let failed = total - successful;

    let mut failure_details = outcome.failures.clone();
    if let Some(observed) = observed {
        if observed != completed {
            failure_details.push(format!(
                "shared state ended at {} after {} successful calls",
                observed, completed
            ));
        }
    }
    let not_spawned = outcome.spawn_errors.len() - outcome.spawned();
    if not_spawned > 0 {
        failure_details.push(format!("{} workers failed to spawn", not_spawned));
    }
    let timed_out = outcome.timed_out();
    if timed_out > 0 {
        failure_details.push(format!(
            "{} workers were still running after the grace period",
            timed_out
        ));
    }

    let secs = outcome.elapsed.as_secs_f64();
    TestResult {
        total_iterations: total,
        successful,
        failed,
        race_detected: failed > 0 || !outcome.failures.is_empty(),
        failure_details,
        duration: outcome.elapsed,
        operations_per_second: if secs > 0.0 { completed as f64 / secs } else { 0.0 },
        threads,
        iterations_per_thread: if threads > 0 { total / threads as u64 } else { 0 },
        expected_value: observed.map(|_| completed),
        observed_value: observed,
        timed_out_workers: timed_out,
    }
}

#[cfg(test)]
mod tests;
