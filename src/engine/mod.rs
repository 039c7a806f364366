//! The seat and console-slot allocation engine.
//!
//! One cycle repeats passes of aging → adjacent → flexible → console until a
//! pass changes nothing or the pass cap is hit. Every allocator re-reads the
//! store, so a pass never works from stale occupancy.

mod activation;
mod adjacent;
mod aging;
mod console;
mod error;
mod flexible;
mod lifecycle;
mod occupancy;

pub use adjacent::best_fit;
pub use error::EngineError;
pub use flexible::take_seats;
pub use occupancy::{free_blocks, Occupancy};

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::store::ReservationStore;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub passes: u32,
    pub aged: u32,
    pub adjacent: u32,
    pub flexible: u32,
    pub console: u32,
    /// The last pass still made changes when the pass cap was reached.
    pub capped: bool,
}

impl CycleReport {
    pub fn activations(&self) -> u32 {
        self.adjacent + self.flexible + self.console
    }
}

pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<dyn ReservationStore>,
    pub notify: Arc<NotifyHub>,
    /// Single-flight: one cycle at a time, so two triggers can't both see a
    /// seat as free and both assign it.
    cycle_lock: Mutex<()>,
}

impl Engine {
    pub fn new(config: EngineConfig, store: Arc<dyn ReservationStore>, notify: Arc<NotifyHub>) -> Self {
        Self {
            config,
            store,
            notify,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one allocation cycle now. Callable after any seat-affecting change.
    pub async fn run_cycle(&self) -> Result<CycleReport, EngineError> {
        self.run_cycle_at(now_ms()).await
    }

    /// Run one allocation cycle as of `now`. A storage failure aborts the cycle
    /// and is returned; activations made by earlier passes stay.
    pub async fn run_cycle_at(&self, now: Ms) -> Result<CycleReport, EngineError> {
        let started = Instant::now();
        let _cycle = self.cycle_lock.lock().await;

        let result = self.drive_passes(now).await;

        metrics::histogram!(crate::observability::CYCLE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        let outcome = match &result {
            Ok(report) if report.capped => "capped",
            Ok(_) => "settled",
            Err(_) => "failed",
        };
        metrics::counter!(crate::observability::CYCLES_TOTAL, "outcome" => outcome).increment(1);

        match &result {
            Ok(report) => {
                metrics::histogram!(crate::observability::CYCLE_PASSES).record(report.passes as f64);
                if report.capped {
                    tracing::warn!(passes = report.passes, "allocation cycle hit pass cap");
                }
                tracing::debug!(?report, "allocation cycle finished");
                self.record_waitlist_depth().await;
            }
            Err(e) => tracing::error!("allocation cycle aborted: {e}"),
        }
        result
    }

    async fn drive_passes(&self, now: Ms) -> Result<CycleReport, EngineError> {
        let mut report = CycleReport::default();
        while report.passes < self.config.max_passes {
            report.passes += 1;
            report.aged += self.age_waitlist(now).await?;

            let mut changed = false;
            if self.try_adjacent(now).await? {
                report.adjacent += 1;
                changed = true;
            }
            let seated = self.try_flexible(now).await?;
            if seated > 0 {
                report.flexible += seated;
                changed = true;
            }
            if self.try_console(now).await? {
                report.console += 1;
                changed = true;
            }

            if !changed {
                return Ok(report);
            }
            tracing::debug!(pass = report.passes, "pass made changes, restarting");
        }
        report.capped = true;
        Ok(report)
    }

    async fn record_waitlist_depth(&self) {
        if let Ok(docs) = self.store.list().await {
            let waiting = docs.iter().filter(|r| r.status == Status::Waitlisted).count();
            metrics::gauge!(crate::observability::WAITLIST_DEPTH).set(waiting as f64);
        }
    }

    /// Party prefers the restricted game and so may only use restricted seats.
    pub(crate) fn is_restricted_party(&self, r: &Reservation) -> bool {
        r.prefers(&self.config.restricted_game)
    }
}
