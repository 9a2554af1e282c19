// src/scheduler.rs
// Self-scheduling cycle runner. States: stopped, waiting, running. One tokio
// task owns the timing; a single atomic running flag is the re-entrancy
// guard, so at most one cycle is in flight no matter how long it takes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::types::CycleObserver;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Run a cycle immediately on `start()` instead of waiting one interval.
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            run_on_start: true,
        }
    }
}

struct Shared {
    active: AtomicBool,
    running: AtomicBool,
    /// Bumped on every `start()`; a loop from a previous activation exits as
    /// soon as it notices the epoch moved on.
    epoch: AtomicU64,
    stop: Notify,
}

impl Shared {
    fn live(&self, epoch: u64) -> bool {
        self.active.load(Ordering::SeqCst) && self.epoch.load(Ordering::SeqCst) == epoch
    }
}

pub struct CycleScheduler<F> {
    cycle: Arc<F>,
    config: SchedulerConfig,
    observer: Arc<dyn CycleObserver>,
    shared: Arc<Shared>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<F, Fut> CycleScheduler<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    /// A non-positive interval is a configuration error, caught here rather
    /// than as a hot loop at the first tick.
    pub fn new(
        cycle: F,
        config: SchedulerConfig,
        observer: Arc<dyn CycleObserver>,
    ) -> anyhow::Result<Self> {
        if config.interval.is_zero() {
            bail!("scheduler interval must be greater than zero");
        }
        Ok(Self {
            cycle: Arc::new(cycle),
            config,
            observer,
            shared: Arc::new(Shared {
                active: AtomicBool::new(false),
                running: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                stop: Notify::new(),
            }),
            task: std::sync::Mutex::new(None),
        })
    }

    /// Transition stopped -> active. Idempotent: calling `start` while active
    /// is a no-op.
    pub fn start(&self) {
        if self.shared.active.swap(true, Ordering::SeqCst) {
            return;
        }
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let shared = self.shared.clone();
        let cycle = self.cycle.clone();
        let observer = self.observer.clone();
        let interval = self.config.interval;
        let run_on_start = self.config.run_on_start;

        let handle = tokio::spawn(async move {
            if !run_on_start && !wait_interval(&shared, interval, epoch).await {
                return;
            }
            loop {
                if !shared.live(epoch) {
                    break;
                }
                // Tick while a cycle is still in flight is a no-op.
                if shared
                    .running
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    if let Err(error) = (cycle)().await {
                        observer.on_cycle_error(&error);
                    }
                    shared.running.store(false, Ordering::SeqCst);
                }
                if !wait_interval(&shared, interval, epoch).await {
                    break;
                }
            }
            tracing::debug!(target: "ingest", "scheduler loop exited");
        });

        *self.task.lock().unwrap() = Some(handle);
    }

    /// Deactivate and disarm the timer. An in-flight cycle finishes; no
    /// further cycle is scheduled.
    pub fn stop(&self) {
        self.shared.active.store(false, Ordering::SeqCst);
        self.shared.stop.notify_waiters();
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

/// Sleep one interval, waking early on `stop()`. Returns whether this loop
/// is still the live activation and should continue.
async fn wait_interval(shared: &Shared, interval: Duration, epoch: u64) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => shared.live(epoch),
        _ = shared.stop.notified() => false,
    }
}
