//! The periodic sweep task.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::PetasosConfig;
use crate::matrix::{ActivityMatrix, SweepReport};
use crate::observability::SpanTimer;

/// Runs [`ActivityMatrix::run_sweep`] on a fixed interval.
#[derive(Debug, Clone)]
pub struct Sweeper {
    matrix: Arc<ActivityMatrix>,
    config: PetasosConfig,
    passes: Arc<AtomicU64>,
    last_report: Arc<Mutex<Option<SweepReport>>>,
}

impl Sweeper {
    /// Creates a sweeper over a matrix.
    #[must_use]
    pub fn new(matrix: Arc<ActivityMatrix>, config: PetasosConfig) -> Self {
        Self {
            matrix,
            config,
            passes: Arc::new(AtomicU64::new(0)),
            last_report: Arc::new(Mutex::new(None)),
        }
    }

    /// Runs a single pass now.
    pub fn run_once(&self) -> SweepReport {
        let timer = SpanTimer::start("sweep");
        let report = self.matrix.run_sweep(&self.config);
        let pass = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(pass, duration_ms = timer.finish(), "Sweep pass finished");
        *self.last_report.lock() = Some(report.clone());
        report
    }

    /// Returns how many passes have run.
    #[must_use]
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Returns the report of the latest pass.
    #[must_use]
    pub fn last_report(&self) -> Option<SweepReport> {
        self.last_report.lock().clone()
    }

    /// Spawns the sweep loop on the current tokio runtime.
    #[must_use]
    pub fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let sweeper = self.clone();
        let interval = self.config.sweep_interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            info!(interval_ms = sweeper.config.sweep_interval_ms, "Sweeper started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!(passes = sweeper.passes(), "Sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        sweeper.run_once();
                    }
                }
            }
        });

        SweeperHandle {
            sweeper: self,
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }
}

/// Handle to a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    sweeper: Sweeper,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Returns the sweeper behind the handle.
    #[must_use]
    pub fn sweeper(&self) -> &Sweeper {
        &self.sweeper
    }

    /// Returns true while the loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the loop and waits for the current pass to complete.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "Sweeper task ended abnormally");
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some() {
            self.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Identifier, Parcel, ProcessingStatus, UnitOfWork};
    use std::time::Duration;

    fn id(s: &str) -> Identifier {
        Identifier::parse(s).unwrap()
    }

    #[test]
    fn test_run_once_records_report() {
        let sweeper = Sweeper::new(Arc::new(ActivityMatrix::default()), PetasosConfig::default());
        assert!(sweeper.last_report().is_none());

        let report = sweeper.run_once();
        assert!(report.is_quiet());
        assert_eq!(sweeper.passes(), 1);
        assert_eq!(sweeper.last_report(), Some(report));
    }

    #[tokio::test]
    async fn test_started_sweeper_propagates_and_stops() {
        let matrix = Arc::new(ActivityMatrix::default());
        let mut parcels = Vec::new();
        for processor in ["wup.a", "wup.b"] {
            let uow = UnitOfWork::new(id("uow.lab"), id("lab.1"));
            let parcel = Parcel::new(id("step.parse"), id(processor), None, uow);
            let parcel_id = parcel.instance_id.clone();
            matrix.registry().add(parcel).unwrap();
            matrix.register_work_unit_activity(&parcel_id, &id("lab.1"), &id(processor), &id("step.parse"));
            parcels.push(parcel_id);
        }
        matrix
            .update_work_unit_activity(&parcels[0], &id("lab.1"), ProcessingStatus::Finished)
            .unwrap();

        let config = PetasosConfig::new().with_sweep_interval(Duration::from_millis(10));
        let handle = Sweeper::new(matrix.clone(), config).start();
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(handle.sweeper().passes() >= 1);
        assert_eq!(
            matrix
                .get_status_element(&parcels[1], &id("lab.1"))
                .unwrap()
                .processing_status,
            ProcessingStatus::FinishedElsewhere
        );

        handle.shutdown().await;
    }
}
