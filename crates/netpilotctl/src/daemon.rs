//! `inspect --daemon`: run one inspection on a fixed interval until shutdown.
//!
//! The first run starts immediately. A run that fails is logged and the
//! loop waits for the next tick; shutdown also stops the run in flight.

use anyhow::Result;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DaemonConfig {
    pub every: Duration,
    /// Stop after this many runs
    pub max_runs: Option<u64>,
}

pub struct InspectionDaemon {
    config: DaemonConfig,
    runs: u64,
    failures: u64,
    started: Instant,
}

impl InspectionDaemon {
    pub fn new(config: DaemonConfig) -> Self {
        Self { config, runs: 0, failures: 0, started: Instant::now() }
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Tick until `shutdown` is cancelled or `max_runs` is reached. Each run
    /// gets its number and the shutdown token.
    pub async fn run<F, Fut>(&mut self, shutdown: &CancellationToken, mut run_fn: F) -> Result<u64>
    where
        F: FnMut(u64, CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut ticker = interval(self.config.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Inspection daemon started, every {:?}", self.config.every);

        loop {
            if self.config.max_runs.is_some_and(|max| self.runs >= max) {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = run_fn(self.runs, shutdown.clone()).await {
                        self.failures += 1;
                        warn!("Scheduled run {} failed: {:#}", self.runs + 1, e);
                    }
                    self.runs += 1;
                }
            }
        }

        info!(
            "Inspection daemon stopped after {} run(s), {} failed, {:?}",
            self.runs,
            self.failures,
            self.started.elapsed()
        );
        Ok(self.runs)
    }
}

/// Cancel `token` on Ctrl-C
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            token.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stops_after_max_runs() {
        let mut daemon = InspectionDaemon::new(DaemonConfig { every: Duration::from_millis(10), max_runs: Some(3) });
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        let runs = daemon
            .run(&CancellationToken::new(), move |_, _| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();
        assert_eq!(runs, 3);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shutdown_ends_loop() {
        let mut daemon = InspectionDaemon::new(DaemonConfig { every: Duration::from_millis(20), max_runs: None });
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(70)).await;
            trigger.cancel();
        });
        let runs = daemon.run(&shutdown, |_, _| async { Ok(()) }).await.unwrap();
        // Immediate first run, then every 20ms until 70ms
        assert!((2..=5).contains(&runs), "runs: {}", runs);
    }

    #[tokio::test]
    async fn test_failed_run_keeps_schedule() {
        let mut daemon = InspectionDaemon::new(DaemonConfig { every: Duration::from_millis(5), max_runs: Some(2) });
        let runs = daemon
            .run(&CancellationToken::new(), |n, _| async move {
                if n == 0 {
                    anyhow::bail!("device unreachable");
                }
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(runs, 2);
        assert_eq!(daemon.failures(), 1);
    }

    #[tokio::test]
    async fn test_pre_cancelled_never_runs() {
        let mut daemon = InspectionDaemon::new(DaemonConfig { every: Duration::from_millis(5), max_runs: None });
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert_eq!(daemon.run(&shutdown, |_, _| async { Ok(()) }).await.unwrap(), 0);
    }
}
