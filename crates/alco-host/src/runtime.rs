//! Thread runner for periodic tasks
//!
//! Every loop runs on its own OS thread with the same shape: check the
//! shutdown flag, run one full cycle, sleep. Shutdown latency is therefore
//! bounded by one period plus one cycle.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use alco_core::task::PeriodicTask;
use log::{debug, info};

/// Process-wide shutdown flag, polled once per loop iteration
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Drive `task` until shutdown, then call its `finish`.
pub fn run_periodic<T: PeriodicTask>(task: &mut T, shutdown: &Shutdown) {
    info!("{} loop started, period {:?}", task.name(), task.period());
    let mut cycles: u64 = 0;
    while !shutdown.is_requested() {
        task.run_cycle();
        cycles += 1;
        thread::sleep(task.period());
    }
    debug!("{} loop ran {} cycles", task.name(), cycles);
    task.finish();
    info!("{} loop stopped", task.name());
}

/// Spawn `task` on a named thread. The task is handed back on join.
pub fn spawn_periodic<T>(mut task: T, shutdown: Shutdown) -> io::Result<JoinHandle<T>>
where
    T: PeriodicTask + Send + 'static,
{
    thread::Builder::new()
        .name(task.name().to_string())
        .spawn(move || {
            run_periodic(&mut task, &shutdown);
            task
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    struct Counter {
        cycles: u32,
        finished: bool,
    }

    impl PeriodicTask for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn period(&self) -> Duration {
            Duration::from_millis(100)
        }

        fn run_cycle(&mut self) {
            self.cycles += 1;
        }

        fn finish(&mut self) {
            self.finished = true;
        }
    }

    #[test]
    fn test_stops_within_one_period_and_finishes() {
        let shutdown = Shutdown::new();
        let handle = spawn_periodic(
            Counter {
                cycles: 0,
                finished: false,
            },
            shutdown.clone(),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(250));
        let requested_at = Instant::now();
        shutdown.request();
        let task = handle.join().unwrap();

        // One period plus scheduling slack
        assert!(requested_at.elapsed() < Duration::from_millis(100) + Duration::from_millis(150));
        assert!(task.cycles >= 2);
        assert!(task.finished);
    }

    #[test]
    fn test_no_cycle_runs_when_already_shut_down() {
        let shutdown = Shutdown::new();
        shutdown.request();
        let mut task = Counter {
            cycles: 0,
            finished: false,
        };
        run_periodic(&mut task, &shutdown);
        assert_eq!(task.cycles, 0);
        assert!(task.finished);
    }
}
