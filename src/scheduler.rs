//! Background job scheduling.
//!
//! Periodic jobs run on their own tokio task driven by an interval ticker.
//! Every task watches a shared shutdown flag, and [`Scheduler::shutdown`]
//! waits for all of them to finish their current iteration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Work executed on every tick of a periodic task.
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn run(&self, now: DateTime<Utc>);
}

/// Receiving side of the scheduler's shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A standalone signal and the sender that trips it.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown was requested or the sender is gone.
    pub async fn recv(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Owns the background tasks of the engine.
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    signal: ShutdownSignal,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown, signal) = ShutdownSignal::channel();
        Self {
            shutdown,
            signal,
            tasks: Vec::new(),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Run `job` every `period`, starting one period from now.
    pub fn spawn_periodic(&mut self, job: Arc<dyn PeriodicJob>, period: Duration) {
        let name = job.name().to_string();
        let mut shutdown = self.signal();
        info!(job = %name, period_ms = period.as_millis() as u64, "Scheduling periodic job");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!(job = %job.name(), "Running periodic job");
                        job.run(Utc::now()).await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
            debug!(job = %job.name(), "Periodic job stopped");
        });
        self.tasks.push((name, handle));
    }

    /// Run a long-lived worker that is handed the shutdown signal.
    pub fn spawn_worker<F, Fut>(&mut self, name: impl Into<String>, worker: F)
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        info!(worker = %name, "Starting background worker");
        let handle = tokio::spawn(worker(self.signal()));
        self.tasks.push((name, handle));
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal every task and wait for them to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let (names, handles): (Vec<String>, Vec<JoinHandle<()>>) = self.tasks.into_iter().unzip();
        let results = futures::future::join_all(handles).await;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                warn!(task = %name, error = %e, "Background task ended abnormally");
            }
        }
        info!(tasks = names.len(), "Scheduler stopped");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tick {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl PeriodicJob for Tick {
        fn name(&self) -> &str {
            "tick"
        }

        async fn run(&self, _now: DateTime<Utc>) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_job_runs_each_period() {
        let job = Arc::new(Tick {
            runs: AtomicUsize::new(0),
        });
        let mut scheduler = Scheduler::new();
        scheduler.spawn_periodic(job.clone(), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);

        scheduler.shutdown().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_worker_receives_shutdown() {
        let mut scheduler = Scheduler::new();
        let stopped = Arc::new(AtomicUsize::new(0));
        let flag = stopped.clone();
        scheduler.spawn_worker("waiter", move |mut signal| async move {
            signal.recv().await;
            flag.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(scheduler.task_count(), 1);

        scheduler.shutdown().await;
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_signal_resolves_when_sender_dropped() {
        let (tx, mut signal) = ShutdownSignal::channel();
        assert!(!signal.is_shutdown());
        drop(tx);
        signal.recv().await;
    }
}
