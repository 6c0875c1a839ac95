use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use shared::types::{ObservedService, ScanReport};
use crate::config::ScannerConfig;

/// Scanners may send a full report or just the list of observations.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ScanPayload {
    Services(Vec<ObservedService>),
    Report(ScanReport),
}

impl From<ScanPayload> for ScanReport {
    fn from(payload: ScanPayload) -> Self {
        match payload {
            ScanPayload::Services(services) => ScanReport::from(services),
            ScanPayload::Report(report) => report,
        }
    }
}

pub fn parse_report(bytes: &[u8]) -> Result<ScanReport> {
    let payload: ScanPayload =
        serde_json::from_slice(bytes).context("Scanner output is not a valid scan report")?;
    Ok(payload.into())
}

/// Collect one scan from the configured external scanner
pub async fn scan(config: &ScannerConfig) -> Result<ScanReport> {
    match config {
        ScannerConfig::Command { program, args } => {
            tracing::debug!("Running scanner {} {:?}", program, args);
            let output = Command::new(program)
                .args(args)
                .kill_on_drop(true)
                .output()
                .await
                .with_context(|| format!("Failed to spawn scanner {}", program))?;

            if !output.status.success() {
                bail!(
                    "Scanner {} exited with {:?}: {}",
                    program,
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            parse_report(&output.stdout)
        }
        ScannerConfig::Feed { path } => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read scan feed {}", path.display()))?;
            parse_report(&bytes)
        }
        ScannerConfig::Disabled => bail!("No discovery scanner is configured"),
    }
}
