use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use crate::error::UnknownValue;
use crate::fields::{LockSet, LockableField};
use crate::naming::build_service_url;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceProtocol {
    Http,
    Https,
    Tcp,
    #[default]
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Running,
    Stopped,
    #[default]
    Unknown,
}

/// Where the content of a record came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceSource {
    /// Created by discovery and never edited.
    Auto,
    /// Created or fully defined by a user.
    Manual,
    /// Fields from both origins coexist.
    Merged,
}

impl ServiceProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceProtocol::Http => "http",
            ServiceProtocol::Https => "https",
            ServiceProtocol::Tcp => "tcp",
            ServiceProtocol::Other => "other",
        }
    }
}

impl FromStr for ServiceProtocol {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "http" => Ok(ServiceProtocol::Http),
            "https" => Ok(ServiceProtocol::Https),
            "tcp" => Ok(ServiceProtocol::Tcp),
            "other" => Ok(ServiceProtocol::Other),
            _ => Err(UnknownValue::new("protocol", value)),
        }
    }
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Unknown => "unknown",
        }
    }
}

impl FromStr for ServiceStatus {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "running" => Ok(ServiceStatus::Running),
            "stopped" => Ok(ServiceStatus::Stopped),
            "unknown" => Ok(ServiceStatus::Unknown),
            _ => Err(UnknownValue::new("status", value)),
        }
    }
}

impl ServiceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceSource::Auto => "auto",
            ServiceSource::Manual => "manual",
            ServiceSource::Merged => "merged",
        }
    }
}

impl FromStr for ServiceSource {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "auto" => Ok(ServiceSource::Auto),
            "manual" => Ok(ServiceSource::Manual),
            "merged" => Ok(ServiceSource::Merged),
            _ => Err(UnknownValue::new("source", value)),
        }
    }
}

/// A discovered or manually defined network service.
/// This is the canonical record stored by the registry and served by the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceEntry {
    /// Stable identifier, assigned once at creation
    pub id: String,

    /// Machine-derived name, e.g. "nginx.service"
    pub service_name: String,

    /// Human label shown on the dashboard
    pub display_name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub protocol: ServiceProtocol,

    #[serde(default)]
    pub path: Option<String>,

    /// Explicit link override; wins over the composed URL
    #[serde(default)]
    pub url: Option<String>,

    /// Liveness as last reported by the scanner
    #[serde(default)]
    pub status: ServiceStatus,

    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default)]
    pub hidden: bool,

    #[serde(default)]
    pub favorite: bool,

    pub source: ServiceSource,

    /// Fields discovery must never overwrite
    #[serde(default)]
    pub locked_fields: LockSet,

    /// Last time a discovery observation matched this record
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,

    /// Last mutation of any kind
    pub updated_at: DateTime<Utc>,
}

impl ServiceEntry {
    /// The link the dashboard opens: the explicit override, else one composed
    /// from protocol, host, port and path.
    pub fn resolved_url(&self) -> Option<String> {
        if let Some(url) = &self.url {
            return Some(url.clone());
        }
        build_service_url(self.protocol, &self.host, self.port, self.path.as_deref())
    }

    pub fn is_locked(&self, field: LockableField) -> bool {
        self.locked_fields.contains(&field)
    }

    /// Whether discovery has ever contributed to this record.
    pub fn has_discovery_contribution(&self) -> bool {
        self.source != ServiceSource::Manual || self.last_seen_at.is_some()
    }
}

/// One candidate produced by an external discovery scan.
///
/// Only discovery-derivable fields are carried. `display_name`, `group` and
/// `icon` are weak guesses; `hidden` is only honoured when a record is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ObservedService {
    pub service_name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub protocol: Option<ServiceProtocol>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub status: ServiceStatus,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub hidden: Option<bool>,
}

/// Output of one external scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ScanReport {
    #[serde(default)]
    pub scanned_units: usize,
    #[serde(default)]
    pub matched_ports: usize,
    #[serde(default)]
    pub services: Vec<ObservedService>,
}

impl From<Vec<ObservedService>> for ScanReport {
    fn from(services: Vec<ObservedService>) -> Self {
        Self {
            scanned_units: services.len(),
            matched_ports: services.iter().filter(|s| s.port.is_some()).count(),
            services,
        }
    }
}

/// Sparse manual edit.
///
/// An absent key means "no change". For the nullable fields an explicit JSON
/// `null` means "clear", which is why they are `Option<Option<_>>`. Enum names
/// and out-of-range ports arrive unparsed so they fail as field-level
/// validation errors. A value of the wrong JSON type (a string port, a
/// fractional number) still fails body decoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EditPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub port: Option<Option<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub path: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub url: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub group: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub icon: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favorite: Option<bool>,
    /// Full replacement of the lock set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_fields: Option<Vec<String>>,
    /// Lock every field this edit changes; on unless explicitly disabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_lock: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CreateServiceRequest {
    pub service_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<i64>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub hidden: Option<bool>,
    #[serde(default)]
    pub favorite: Option<bool>,
    #[serde(default)]
    pub locked_fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ServiceQuery {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub status: Option<ServiceStatus>,
    #[serde(default)]
    pub include_hidden: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityConflictReport {
    pub key: String,
    pub ids: Vec<String>,
}

/// Summary of the latest discovery run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DiscoveryStatusInfo {
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub scanned_units: usize,
    pub active_units: usize,
    pub matched_ports: usize,
    pub discovered_services: usize,
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Observations that could not become a record
    #[serde(default)]
    pub rejected: usize,
    /// Locked fields an observation tried to change
    #[serde(default)]
    pub ignored_locks: usize,
    #[serde(default)]
    pub conflicts: Vec<IdentityConflictReport>,
}

/// Distinguishes an explicit `null` (`Some(None)`) from an absent key (`None`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
