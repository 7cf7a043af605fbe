//! Peak resident memory sampling for duration-bounded runs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use sysinfo::{ProcessesToUpdate, System};
use tracing::debug;

/// Resident memory of the current process in bytes
pub fn current_rss() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|p| p.memory())
}

/// Background sampler keeping the highest RSS seen
pub struct MemorySampler {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Option<u64>>>,
}

impl MemorySampler {
    pub fn start(interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = match thread::Builder::new()
            .name("stress-memory".to_string())
            .spawn(move || sample_until(&flag, interval))
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!("Memory sampler not started: {}", e);
                None
            }
        };
        Self { stop, handle }
    }

    /// Stop sampling and return the peak, if any sample succeeded
    pub fn finish(mut self) -> Option<u64> {
        self.stop.store(true, Ordering::Release);
        self.handle.take()?.join().ok().flatten()
    }
}

fn sample_until(stop: &AtomicBool, interval: Duration) -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    let mut peak: Option<u64> = None;
    loop {
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        if let Some(process) = system.process(pid) {
            peak = Some(peak.map_or(process.memory(), |p| p.max(process.memory())));
        }
        if stop.load(Ordering::Acquire) {
            break;
        }
        thread::sleep(interval);
    }
    peak
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_reports_nonzero_peak() {
        let sampler = MemorySampler::start(Duration::from_millis(5));
        thread::sleep(Duration::from_millis(20));
        if let Some(peak) = sampler.finish() {
            assert!(peak > 0);
        }
    }
}
