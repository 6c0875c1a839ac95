use serde::Serialize;
use sha2::{Digest, Sha256};
use shared::fields::LockSet;
use shared::types::{ServiceEntry, ServiceProtocol, ServiceSource, ServiceStatus};

/// Stable fields only: `last_seen_at` and `updated_at` move on every discovery
/// run without the dashboard having anything new to show.
#[derive(Serialize)]
struct DigestView<'a> {
    id: &'a str,
    service_name: &'a str,
    display_name: &'a str,
    description: Option<&'a str>,
    host: &'a str,
    port: Option<u16>,
    protocol: ServiceProtocol,
    path: Option<&'a str>,
    url: Option<&'a str>,
    status: ServiceStatus,
    group: Option<&'a str>,
    tags: &'a [String],
    icon: Option<&'a str>,
    hidden: bool,
    favorite: bool,
    source: ServiceSource,
    locked_fields: &'a LockSet,
}

/// SHA-256 over the registry contents, sorted by id so insertion order does
/// not matter. Clients poll it to decide whether to reload the list.
pub fn compute_digest(services: &[ServiceEntry]) -> String {
    let mut indices: Vec<usize> = (0..services.len()).collect();
    indices.sort_by(|&a, &b| services[a].id.cmp(&services[b].id));

    let mut hasher = Sha256::new();
    for s in indices.iter().map(|&i| &services[i]) {
        let view = DigestView {
            id: &s.id,
            service_name: &s.service_name,
            display_name: &s.display_name,
            description: s.description.as_deref(),
            host: &s.host,
            port: s.port,
            protocol: s.protocol,
            path: s.path.as_deref(),
            url: s.url.as_deref(),
            status: s.status,
            group: s.group.as_deref(),
            tags: &s.tags,
            icon: s.icon.as_deref(),
            hidden: s.hidden,
            favorite: s.favorite,
            source: s.source,
            locked_fields: &s.locked_fields,
        };
        // Plain data with string keys; serialization cannot fail.
        if let Ok(json) = serde_json::to_vec(&view) {
            hasher.update(&json);
            hasher.update(b"\n");
        }
    }

    hex::encode(hasher.finalize())
}
