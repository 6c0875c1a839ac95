//! Identity matching between discovery observations and stored records.
//!
//! How an observation is paired with a record is a deployment decision, so it is
//! injected as an [`IdentityStrategy`] rather than hard-coded in the merge.

use serde::{Deserialize, Serialize};
use crate::error::ReconcileError;
use crate::naming::{infer_protocol_from_port, service_id};
use crate::types::{ObservedService, ServiceEntry, ServiceProtocol};

pub trait IdentityStrategy: Send + Sync {
    fn observed_key(&self, observed: &ObservedService) -> String;
    fn entry_key(&self, entry: &ServiceEntry) -> String;
}

/// Match on the slug of the service (unit) name.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitNameIdentity;

impl IdentityStrategy for UnitNameIdentity {
    fn observed_key(&self, observed: &ObservedService) -> String {
        service_id(&observed.service_name)
    }

    fn entry_key(&self, entry: &ServiceEntry) -> String {
        service_id(&entry.service_name)
    }
}

/// Match on `host:port/protocol`.
///
/// Records whose host, port or protocol were changed by hand stop matching the
/// scanner's view of the same endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointIdentity;

impl EndpointIdentity {
    fn key(host: &str, port: Option<u16>, protocol: ServiceProtocol) -> String {
        let port = port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        format!("{}:{}/{}", host.trim().to_lowercase(), port, protocol.as_str())
    }
}

impl IdentityStrategy for EndpointIdentity {
    fn observed_key(&self, observed: &ObservedService) -> String {
        let protocol = observed
            .protocol
            .unwrap_or_else(|| infer_protocol_from_port(observed.port));
        Self::key(&observed.host, observed.port, protocol)
    }

    fn entry_key(&self, entry: &ServiceEntry) -> String {
        Self::key(&entry.host, entry.port, entry.protocol)
    }
}

/// Identity strategy selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    #[default]
    UnitName,
    Endpoint,
}

impl IdentityMode {
    pub fn strategy(&self) -> Box<dyn IdentityStrategy> {
        match self {
            IdentityMode::UnitName => Box::new(UnitNameIdentity),
            IdentityMode::Endpoint => Box::new(EndpointIdentity),
        }
    }
}

/// Index of the single record matching `observed`.
///
/// More than one match is an [`ReconcileError::IdentityConflict`]; the caller
/// must not merge into any of them.
pub fn find_match(
    strategy: &dyn IdentityStrategy,
    entries: &[ServiceEntry],
    observed: &ObservedService,
) -> Result<Option<usize>, ReconcileError> {
    let key = strategy.observed_key(observed);
    let matches: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| strategy.entry_key(entry) == key)
        .map(|(index, _)| index)
        .collect();

    match matches.as_slice() {
        [] => Ok(None),
        [index] => Ok(Some(*index)),
        _ => Err(ReconcileError::IdentityConflict {
            key,
            ids: matches.iter().map(|&i| entries[i].id.clone()).collect(),
        }),
    }
}
