pub mod scanner;

use std::sync::Arc;
use std::time::Duration;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use shared::types::{DiscoveryStatusInfo, ScanReport, ServiceStatus};
use crate::config::{DiscoveryConfig, ScannerConfig};
use crate::registry::RegistryHandle;

/// Drives discovery runs: collects a scan, hands it to the registry and keeps
/// the summary of the latest run.
pub struct DiscoveryRunner {
    registry: RegistryHandle,
    scanner: ScannerConfig,
    scan_timeout: Option<Duration>,
    status_tx: watch::Sender<DiscoveryStatusInfo>,
    // Two runs never interleave, whether scheduled, triggered or pushed.
    run_lock: Mutex<()>,
}

impl DiscoveryRunner {
    pub fn new(
        registry: RegistryHandle,
        scanner: ScannerConfig,
        scan_timeout: Option<Duration>,
    ) -> Self {
        let (status_tx, _) = watch::channel(DiscoveryStatusInfo::default());
        Self {
            registry,
            scanner,
            scan_timeout,
            status_tx,
            run_lock: Mutex::new(()),
        }
    }

    pub fn scanner_enabled(&self) -> bool {
        self.scanner != ScannerConfig::Disabled
    }

    pub fn status(&self) -> DiscoveryStatusInfo {
        self.status_tx.borrow().clone()
    }

    /// Scan with the configured scanner and reconcile the result
    pub async fn run_once(&self) -> Result<DiscoveryStatusInfo> {
        let _guard = self.run_lock.lock().await;
        let started = Utc::now();
        tracing::info!("Discovery run started");

        match self.scan().await {
            Ok(report) => self.reconcile_report(started, report).await,
            Err(e) => Err(self.record_failure(started, e)),
        }
    }

    async fn scan(&self) -> Result<ScanReport> {
        let Some(limit) = self.scan_timeout else {
            return scanner::scan(&self.scanner).await;
        };
        tokio::time::timeout(limit, scanner::scan(&self.scanner))
            .await
            .map_err(|_| anyhow!("Scanner timed out after {}s", limit.as_secs()))?
    }

    /// Reconcile a report pushed by an external scanner
    pub async fn ingest(&self, report: ScanReport) -> Result<DiscoveryStatusInfo> {
        let _guard = self.run_lock.lock().await;
        self.reconcile_report(Utc::now(), report).await
    }

    async fn reconcile_report(
        &self,
        started: DateTime<Utc>,
        report: ScanReport,
    ) -> Result<DiscoveryStatusInfo> {
        let mut summary = DiscoveryStatusInfo {
            last_started_at: Some(started),
            scanned_units: report.scanned_units,
            active_units: report
                .services
                .iter()
                .filter(|s| s.status == ServiceStatus::Running)
                .count(),
            matched_ports: report.matched_ports,
            discovered_services: report.services.len(),
            ..Default::default()
        };

        let tally = match self.registry.reconcile(report.services).await {
            Ok(tally) => tally,
            Err(e) => return Err(self.record_failure(started, e)),
        };

        summary.added = tally.added;
        summary.updated = tally.updated;
        summary.unchanged = tally.unchanged;
        summary.rejected = tally.rejected;
        summary.ignored_locks = tally.ignored_locks;
        summary.conflicts = tally.conflicts;
        summary.last_finished_at = Some(Utc::now());

        tracing::info!(
            "Discovery run finished: {} discovered, {} added, {} updated, {} unchanged, {} rejected, {} conflicts",
            summary.discovered_services,
            summary.added,
            summary.updated,
            summary.unchanged,
            summary.rejected,
            summary.conflicts.len()
        );

        self.status_tx.send_replace(summary.clone());
        Ok(summary)
    }

    /// Keep the previous counts, stamp the failure on the status.
    fn record_failure(&self, started: DateTime<Utc>, error: anyhow::Error) -> anyhow::Error {
        tracing::error!("Discovery run failed: {:#}", error);
        self.status_tx.send_modify(|status| {
            status.last_started_at = Some(started);
            status.last_finished_at = Some(Utc::now());
            status.last_error = Some(format!("{error:#}"));
        });
        error
    }
}

/// Discovery schedule loop - runs until cancelled
pub async fn run(
    runner: Arc<DiscoveryRunner>,
    config: DiscoveryConfig,
    cancel: CancellationToken,
) -> Result<()> {
    if !runner.scanner_enabled() {
        tracing::info!("No discovery scanner configured; waiting for pushed observations");
        return Ok(());
    }

    if config.run_on_startup {
        tokio::select! {
            _ = runner.run_once() => {}
            _ = cancel.cancelled() => return Ok(()),
        }
    }

    if config.interval_secs == 0 {
        return Ok(());
    }

    let period = Duration::from_secs(config.interval_secs);
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // Failures are already recorded on the status.
                tokio::select! {
                    _ = runner.run_once() => {}
                    _ = cancel.cancelled() => {
                        tracing::info!("Discovery run abandoned for shutdown");
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Discovery loop shutting down");
                break;
            }
        }
    }

    Ok(())
}
