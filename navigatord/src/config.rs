use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use anyhow::{Context, Result};
use shared::identity::IdentityMode;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/home-server-navigator/navigatord.toml";
pub const DEFAULT_DATA_DIR: &str = "/var/lib/home-server-navigator";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub navigator: NavigatorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigatorConfig {
    /// Host used for manually created services that do not name one
    #[serde(default = "default_host")]
    pub default_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Seconds between scheduled runs; 0 disables the schedule
    #[serde(default = "default_discovery_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub run_on_startup: bool,
    #[serde(default)]
    pub identity: IdentityMode,
    #[serde(default = "default_true")]
    pub mark_unseen_unknown: bool,
    /// Upper bound on one scanner invocation; 0 waits forever
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_secs: u64,
    #[serde(default)]
    pub scanner: ScannerConfig,
}

impl DiscoveryConfig {
    pub fn scan_timeout(&self) -> Option<Duration> {
        (self.scan_timeout_secs > 0).then(|| Duration::from_secs(self.scan_timeout_secs))
    }
}

/// Where discovery observations come from. Scanning itself is external.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScannerConfig {
    /// Run a program that prints a JSON scan report on stdout
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Read a JSON scan report written by another process
    Feed { path: PathBuf },
    /// Only accept observations pushed over the API
    #[default]
    Disabled,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_db_path() -> PathBuf {
    Path::new(DEFAULT_DATA_DIR).join("services.db")
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_discovery_interval() -> u64 {
    300
}

fn default_scan_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            default_host: default_host(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_discovery_interval(),
            run_on_startup: true,
            identity: IdentityMode::default(),
            mark_unseen_unknown: true,
            scan_timeout_secs: default_scan_timeout(),
            scanner: ScannerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}
