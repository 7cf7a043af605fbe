use super::targets::{
    atomic_increment, flaky_increment, locked_increment, slow_increment, unsafe_increment,
    CounterService,
};
use super::*;

const GENEROUS: Duration = Duration::from_secs(60);

#[test]
fn test_unsynchronized_increment_loses_updates() {
    let tester = StressTester::new();
    // lost updates are probabilistic; a few attempts make this reliable
    let detected = (0..5).any(|_| {
        let result = tester.test(unsafe_increment, 50, 1000, GENEROUS).unwrap();
        assert!(result.is_consistent());
        assert_eq!(result.total_iterations, 50_000);
        result.race_detected && result.successful < 50_000
    });
    assert!(detected, "expected at least one run to lose updates");
}

#[test]
fn test_locked_increment_is_deterministic() {
    let tester = StressTester::new();
    for _ in 0..2 {
        let result = tester.test(locked_increment, 10, 1000, GENEROUS).unwrap();
        assert!(!result.race_detected, "{:?}", result.failure_details);
        assert_eq!(result.successful, 10_000);
        assert_eq!(result.failed, 0);
        assert_eq!(result.observed_value, Some(10_000));
        assert_eq!(result.expected_value, Some(10_000));
        assert!(result.failure_details.is_empty());
        assert!(result.operations_per_second > 0.0);
    }
}

#[test]
fn test_atomic_increment_has_no_race() {
    let result = StressTester::new()
        .test(atomic_increment, 8, 5000, GENEROUS)
        .unwrap();
    assert!(!result.race_detected);
    assert_eq!(result.successful, 40_000);
}

#[test]
fn test_invalid_configuration_is_rejected_before_running() {
    let tester = StressTester::new();
    let calls = Arc::new(AtomicU64::new(0));
    for (threads, iterations, timeout) in [
        (0, 10, GENEROUS),
        (4, 0, GENEROUS),
        (4, 10, Duration::ZERO),
    ] {
        let counted = Arc::clone(&calls);
        let err = tester
            .test(
                move |_: &SharedCounter| {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                threads,
                iterations,
                timeout,
            )
            .unwrap_err();
        assert!(matches!(err, StressError::InvalidConfiguration(_)));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert!(StressConfig::from_secs(1, 1, -1.0).is_err());
    assert!(StressConfig::from_secs(1, 1, f64::NAN).is_err());
    assert_eq!(
        StressConfig::from_secs(2, 3, 0.5).unwrap().timeout,
        Duration::from_millis(500)
    );
}

#[test]
fn test_timeout_counts_unfinished_iterations_as_failed() {
    // 4 workers x 100 iterations x 10ms under one lock cannot finish in 200ms
    let result = StressTester::new()
        .test(slow_increment, 4, 100, Duration::from_millis(200))
        .unwrap();
    assert!(result.is_consistent());
    assert!(result.timed_out_workers > 0);
    assert!(result.race_detected);
    assert!(result.failed > 0);
    assert!(result.duration < Duration::from_secs(5));
    assert!(result
        .failure_details
        .iter()
        .any(|d| d.contains("did not finish")));
}

#[test]
fn test_worker_errors_and_panics_are_captured() {
    let tester = StressTester::new();
    let result = tester.test(flaky_increment, 2, 100, GENEROUS).unwrap();
    assert!(result.is_consistent());
    assert!(result.race_detected);
    assert_eq!(result.failed, 2);
    assert!(result.failure_details[0].contains("counter reached"));

    let result = tester
        .test(
            |counter: &SharedCounter| {
                if counter.fetch_add(1) == 3 {
                    panic!("boom at three");
                }
                Ok(())
            },
            2,
            10,
            GENEROUS,
        )
        .unwrap();
    assert!(result.is_consistent());
    assert_eq!(result.successful, 19);
    assert!(result
        .failure_details
        .iter()
        .any(|d| d.contains("panicked: boom at three")));
}

#[test]
fn test_method_on_shared_instance() {
    let tester = StressTester::new().with_timeout(GENEROUS);
    let result = tester
        .test_method::<CounterService>("increment_locked", 8, 500)
        .unwrap();
    assert!(!result.race_detected);
    assert_eq!(result.observed_value, Some(4000));

    let err = tester
        .test_method::<CounterService>("reset", 8, 500)
        .unwrap_err();
    assert!(matches!(err, StressError::InvalidConfiguration(_)));
}

#[test]
fn test_duration_bounded_run() {
    let report = StressTester::new()
        .with_threads(4)
        .with_sample_interval(Duration::from_millis(10))
        .stress_test(atomic_increment, Duration::from_millis(100))
        .unwrap();
    let result = &report.result;
    assert!(result.is_consistent());
    assert!(!result.race_detected, "{:?}", result.failure_details);
    assert!(result.total_iterations > 0);
    assert!(result.duration >= Duration::from_millis(90));
    assert!(report.throughput > 0.0);
    assert_eq!(result.threads, 4);

    let err = StressTester::new()
        .stress_test(atomic_increment, Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, StressError::InvalidConfiguration(_)));
}

#[test]
fn test_worker_that_fails_to_spawn_counts_as_failed() {
    let config = StressConfig::new(3, 100, GENEROUS);
    let counter = Arc::new(SharedCounter::new());
    let fixture = Arc::clone(&counter);
    let op: Operation = Arc::new(move || locked_increment(&fixture));

    let outcome = drive_with(
        op,
        config.threads,
        Plan::Iterations(config.iterations),
        config.timeout,
        &mut |name: String, body: Box<dyn FnOnce() + Send>| {
            if name == "stress-worker-1" {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "no threads left"));
            }
            thread::Builder::new().name(name).spawn(body)
        },
    );
    assert_eq!(outcome.spawned(), 2);
    assert_eq!(outcome.timed_out(), 0);

    let result = fixed_verdict(&config, outcome, Some(counter.get()));
    assert!(result.is_consistent());
    assert_eq!(result.total_iterations, 300);
    assert_eq!(result.successful, 200);
    assert_eq!(result.failed, 100);
    assert_eq!(result.timed_out_workers, 0);
    assert!(result.race_detected);
    assert!(result
        .failure_details
        .iter()
        .any(|d| d.starts_with("worker 1: failed to spawn (no threads left)")));
    assert!(!result
        .failure_details
        .iter()
        .any(|d| d.contains("did not finish")));
}

#[test]
fn test_from_defaults() {
    let defaults = StressDefaults {
        threads: 3,
        iterations: 7,
        timeout_secs: 2.0,
    };
    let config = StressConfig::from(&defaults);
    assert_eq!(config.total_iterations(), 21);
    assert_eq!(config.timeout, Duration::from_secs(2));
}

#[test]
fn test_reconcile() {
    assert_eq!(reconcile(100, 100, Some(100)), 100);
    assert_eq!(reconcile(100, 100, Some(60)), 60);
    assert_eq!(reconcile(50, 100, Some(80)), 50);
    assert_eq!(reconcile(100, 100, Some(130)), 70);
    assert_eq!(reconcile(100, 100, None), 100);
}
