//! Periodic sweep scheduler with manual trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::broadcast;

use super::{SweepReport, Sweeper};
use crate::storage::ArtifactCleanup;

pub struct SweepScheduler {
    sweeper: Arc<Sweeper>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl SweepScheduler {
    pub fn new(sweeper: Arc<Sweeper>, interval: Duration) -> Self {
        Self {
            sweeper,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the sweep loop in a background thread.
    /// Accepts a trigger receiver for manual sweep requests.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let sweeper = Arc::clone(&self.sweeper);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Sweep scheduler could not start its runtime: {}", e);
                    return;
                }
            };

            rt.block_on(async {
                let mut interval_timer = tokio::time::interval(interval);
                interval_timer.tick().await; // skip immediate first tick

                loop {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    tokio::select! {
                        _ = interval_timer.tick() => {},
                        Ok(()) = trigger_rx.recv() => {
                            log::info!("Manual sweep triggered");
                        },
                    }

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    let sweeper = Arc::clone(&sweeper);
                    let outcome = tokio::task::spawn_blocking(move || {
                        let report = sweeper.sweep();
                        let orphans = sweeper.remove_orphans();
                        (report, orphans)
                    })
                    .await;

                    match outcome {
                        Ok((report, orphans)) => {
                            for (level, line) in outcome_lines(&report, &orphans) {
                                log::log!(level, "{}", line);
                            }
                        }
                        Err(e) => log::error!("Scheduled sweep panicked: {}", e),
                    }
                }
            });
        })
    }

    /// Signals the scheduler to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

/// Log lines for one scheduled run. Quiet runs produce nothing.
fn outcome_lines(report: &SweepReport, orphans: &ArtifactCleanup) -> Vec<(log::Level, String)> {
    let mut lines = Vec::new();
    if report.jobs_expired > 0 || report.files_deleted > 0 || orphans.files_deleted > 0 {
        lines.push((
            log::Level::Info,
            format!(
                "Scheduled sweep: {} expired, {} files deleted, {} orphaned files removed",
                report.jobs_expired, report.files_deleted, orphans.files_deleted
            ),
        ));
    }
    for error in &orphans.errors {
        lines.push((log::Level::Warn, format!("Orphan cleanup error: {}", error)));
    }
    lines
}
