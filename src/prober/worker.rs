use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use super::probe::{CycleReport, Prober};

/// Scheduler that runs a probe cycle over the static target list on a fixed interval
pub struct ProbeWorker {
    prober: Arc<Prober>,
    targets: Arc<Vec<String>>,
    interval: Duration,
    running: Arc<AtomicBool>,
    last_report: RwLock<Option<CycleReport>>,
}

impl ProbeWorker {
    pub fn new(prober: Arc<Prober>, targets: Arc<Vec<String>>, interval: Duration) -> Self {
        Self {
            prober,
            targets,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            last_report: RwLock::new(None),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!(
                "Probe worker started with interval {:?} for {} targets",
                self.interval,
                self.targets.len()
            );

            let mut interval = time::interval(self.interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                self.run_once().await;
            }

            tracing::info!("Probe worker stopped");
        })
    }

    /// Run one cycle now and remember its report
    pub async fn run_once(&self) -> CycleReport {
        let report = self.prober.run_cycle(&self.targets).await;
        *self.last_report.write() = Some(report.clone());
        report
    }

    /// Most recent cycle report, if any cycle has run
    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().clone()
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Stop the worker
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if worker is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
