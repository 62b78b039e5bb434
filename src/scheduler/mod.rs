use crate::collector;
use crate::storage::{Settings, Storage};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at};
use tracing::{error, info};

const FALLBACK_INTERVAL_MINUTES: u64 = 60;

pub fn interval_from_settings(settings: &Settings) -> Duration {
    let minutes = match u64::from(settings.snapshot_interval_minutes) {
        0 => FALLBACK_INTERVAL_MINUTES,
        value => value,
    };

    Duration::from_secs(minutes * 60)
}

/// Owns the single periodic auto-snapshot task. Starting again replaces the
/// running task instead of adding a second one.
#[derive(Debug, Default)]
pub struct AutoSnapshotController {
    task: Option<JoinHandle<()>>,
    every: Option<Duration>,
}

impl AutoSnapshotController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `tick` every `every`, first after one full period. Must be called
    /// from inside a tokio runtime.
    pub fn start<F>(&mut self, every: Duration, mut tick: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.stop();

        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.task = Some(tokio::spawn(async move {
            loop {
                ticker.tick().await;
                tick();
            }
        }));
        self.every = Some(every);

        info!(seconds = every.as_secs(), "auto-snapshot started");
    }

    /// Returns whether a task was running.
    pub fn stop(&mut self) -> bool {
        self.every = None;

        match self.task.take() {
            Some(task) => {
                task.abort();
                info!("auto-snapshot stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn interval(&self) -> Option<Duration> {
        self.every
    }

    /// (Re)starts with the interval from the stored settings, snapshotting the
    /// current clan data on every tick.
    pub fn start_from_settings(&mut self, storage: Arc<Mutex<Storage>>) {
        let every = match storage.lock() {
            Ok(guard) => interval_from_settings(&guard.get_settings()),
            Err(_) => Duration::from_secs(FALLBACK_INTERVAL_MINUTES * 60),
        };

        self.start(every, move || match storage.lock() {
            Ok(mut guard) => {
                collector::snapshot_current_clan(&mut guard);
            }
            Err(_) => error!("storage lock poisoned, skipping auto-snapshot"),
        });
    }
}

impl Drop for AutoSnapshotController {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
