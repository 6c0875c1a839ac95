//! Merging discovery observations and manual edits into service records.
//!
//! Everything here is a pure function of its inputs; the caller supplies `now`
//! and is responsible for serializing calls that touch the same record.
//!
//! The contract between the two writers:
//! * discovery only fills fields it can observe, never clears them, and never
//!   touches a field listed in `locked_fields`;
//! * `status` belongs to the scanner and is outside the lock contract;
//! * a manual edit is validated in full before anything is applied, and with
//!   `auto_lock` it locks every field it changed.

use std::collections::HashSet;
use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::error::{ReconcileError, UnknownValue};
use crate::fields::{parse_lock_set, LockSet, LockableField};
use crate::identity::{find_match, IdentityStrategy};
use crate::naming::{
    clean_optional, humanize_service_name, infer_protocol_from_port, normalize_tags, same_tags,
    service_id, unique_id,
};
use crate::types::{
    CreateServiceRequest, EditPayload, IdentityConflictReport, ObservedService, ServiceEntry,
    ServiceProtocol, ServiceSource, ServiceStatus,
};

/// Per-record outcome of a discovery merge, used for run tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordChange {
    Added,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryMerge {
    pub entry: ServiceEntry,
    pub change: RecordChange,
    /// Locked fields the observation would have changed. Diagnostic only.
    pub ignored_locked: Vec<LockableField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualEdit {
    pub entry: ServiceEntry,
    /// Fields whose value differs from the record before the edit
    pub changed: Vec<LockableField>,
}

/// Merge one observation into its matching record, or create a record when
/// there is none.
///
/// A new record takes `service_id(service_name)` as its id; callers holding
/// other records must make it unique (see [`reconcile_run`]).
pub fn apply_discovery_observation(
    existing: Option<&ServiceEntry>,
    observed: &ObservedService,
    now: DateTime<Utc>,
) -> Result<DiscoveryMerge, ReconcileError> {
    let Some(existing) = existing else {
        return Ok(DiscoveryMerge {
            entry: new_auto_entry(observed, now)?,
            change: RecordChange::Added,
            ignored_locked: Vec::new(),
        });
    };

    let mut entry = existing.clone();
    let ignored_locked = merge_observed_fields(&mut entry, observed);

    entry.status = observed.status;
    entry.source = if existing.source == ServiceSource::Auto && existing.locked_fields.is_empty() {
        ServiceSource::Auto
    } else {
        ServiceSource::Merged
    };

    let changed = !same_content(existing, &entry);
    entry.last_seen_at = Some(now);
    if changed {
        entry.updated_at = now;
    }

    Ok(DiscoveryMerge {
        entry,
        change: if changed {
            RecordChange::Updated
        } else {
            RecordChange::Unchanged
        },
        ignored_locked,
    })
}

/// Apply a sparse manual edit. Rejected edits leave nothing applied.
pub fn apply_manual_edit(
    existing: &ServiceEntry,
    edit: &EditPayload,
    now: DateTime<Utc>,
) -> Result<ManualEdit, ReconcileError> {
    let edit = ValidatedEdit::parse(edit)?;

    let mut entry = existing.clone();
    edit.apply_to(&mut entry);

    let changed = changed_fields(existing, &entry);
    if let Some(locks) = edit.locked_fields {
        entry.locked_fields = locks;
    }
    if edit.auto_lock {
        entry.locked_fields.extend(changed.iter().copied());
    }

    entry.source = if existing.has_discovery_contribution() {
        ServiceSource::Merged
    } else {
        ServiceSource::Manual
    };
    entry.updated_at = now;

    Ok(ManualEdit { entry, changed })
}

/// Build a user-defined record. Every field is locked unless the request says otherwise.
///
/// The id is the slug of the service name; callers make it unique.
pub fn create_manual_entry(
    request: &CreateServiceRequest,
    default_host: &str,
    now: DateTime<Utc>,
) -> Result<ServiceEntry, ReconcileError> {
    let service_name = request.service_name.trim();
    if service_name.is_empty() {
        return Err(ReconcileError::validation("service_name", "must not be empty"));
    }
    let display_name = match &request.display_name {
        Some(name) => non_empty_required("display_name", name)?,
        None => humanize_service_name(service_name),
    };
    let host = clean_optional(request.host.as_deref()).unwrap_or_else(|| default_host.to_string());
    let port = request.port.map(validate_port).transpose()?;
    let protocol = match &request.protocol {
        Some(protocol) => parse_protocol(protocol)?,
        None => infer_protocol_from_port(port),
    };
    let locked_fields = match &request.locked_fields {
        Some(names) => parse_locks(names)?,
        None => LockableField::all(),
    };

    Ok(ServiceEntry {
        id: service_id(service_name),
        service_name: service_name.to_string(),
        display_name,
        description: clean_optional(request.description.as_deref()),
        host,
        port,
        protocol,
        path: clean_optional(request.path.as_deref()),
        url: clean_optional(request.url.as_deref()),
        status: ServiceStatus::Unknown,
        group: clean_optional(request.group.as_deref()),
        tags: request.tags.as_deref().map(normalize_tags).unwrap_or_default(),
        icon: clean_optional(request.icon.as_deref()),
        hidden: request.hidden.unwrap_or(false),
        favorite: request.favorite.unwrap_or(false),
        source: ServiceSource::Manual,
        locked_fields,
        last_seen_at: None,
        updated_at: now,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Set records that were seen by an earlier run but not this one to `unknown`.
    pub mark_unseen_unknown: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mark_unseen_unknown: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTally {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub rejected: usize,
    pub ignored_locks: usize,
    pub conflicts: Vec<IdentityConflictReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub entries: Vec<ServiceEntry>,
    pub tally: RunTally,
}

/// Reconcile a whole scan against the current records.
///
/// Observations are applied one at a time in input order, each against the
/// working set left by the previous one.
pub fn reconcile_run(
    current: Vec<ServiceEntry>,
    observations: &[ObservedService],
    strategy: &dyn IdentityStrategy,
    options: RunOptions,
    now: DateTime<Utc>,
) -> RunOutcome {
    let mut entries = current;
    let mut tally = RunTally::default();
    let mut seen: HashSet<String> = HashSet::new();

    for observed in observations {
        match find_match(strategy, &entries, observed) {
            Ok(Some(index)) => {
                let Ok(merge) = apply_discovery_observation(Some(&entries[index]), observed, now)
                else {
                    tally.rejected += 1;
                    continue;
                };
                match merge.change {
                    RecordChange::Updated => tally.updated += 1,
                    _ => tally.unchanged += 1,
                }
                tally.ignored_locks += merge.ignored_locked.len();
                seen.insert(merge.entry.id.clone());
                entries[index] = merge.entry;
            }
            Ok(None) => match apply_discovery_observation(None, observed, now) {
                Ok(mut merge) => {
                    merge.entry.id =
                        unique_id(&merge.entry.id, |candidate| entries.iter().any(|e| e.id == candidate));
                    tally.added += 1;
                    seen.insert(merge.entry.id.clone());
                    entries.push(merge.entry);
                }
                Err(_) => tally.rejected += 1,
            },
            Err(ReconcileError::IdentityConflict { key, ids }) => {
                seen.extend(ids.iter().cloned());
                tally.conflicts.push(IdentityConflictReport { key, ids });
            }
            Err(_) => tally.rejected += 1,
        }
    }

    if options.mark_unseen_unknown {
        for entry in entries.iter_mut() {
            if entry.last_seen_at.is_some()
                && !seen.contains(&entry.id)
                && entry.status != ServiceStatus::Unknown
            {
                entry.status = ServiceStatus::Unknown;
                entry.updated_at = now;
            }
        }
    }

    RunOutcome { entries, tally }
}

fn new_auto_entry(observed: &ObservedService, now: DateTime<Utc>) -> Result<ServiceEntry, ReconcileError> {
    let service_name = observed.service_name.trim();
    if service_name.is_empty() {
        return Err(ReconcileError::InvalidObservation {
            reason: "service_name is empty".to_string(),
        });
    }
    let host = observed.host.trim();
    if host.is_empty() {
        return Err(ReconcileError::InvalidObservation {
            reason: format!("{service_name} has no host"),
        });
    }
    let port = observed.port.filter(|port| *port > 0);

    Ok(ServiceEntry {
        id: service_id(service_name),
        service_name: service_name.to_string(),
        display_name: clean_optional(observed.display_name.as_deref())
            .unwrap_or_else(|| humanize_service_name(service_name)),
        description: None,
        host: host.to_string(),
        port,
        protocol: observed
            .protocol
            .unwrap_or_else(|| infer_protocol_from_port(port)),
        path: clean_optional(observed.path.as_deref()),
        url: None,
        status: observed.status,
        group: clean_optional(observed.group.as_deref()),
        tags: Vec::new(),
        icon: clean_optional(observed.icon.as_deref()),
        hidden: observed.hidden.unwrap_or(false),
        favorite: false,
        source: ServiceSource::Auto,
        locked_fields: LockSet::new(),
        last_seen_at: Some(now),
        updated_at: now,
    })
}

/// Copy every present observed value into an unlocked field. Returns the locked
/// fields the observation disagreed with.
fn merge_observed_fields(entry: &mut ServiceEntry, observed: &ObservedService) -> Vec<LockableField> {
    let mut ignored = Vec::new();
    let locks = &entry.locked_fields;

    if let Some(service_name) = clean_optional(Some(observed.service_name.as_str())) {
        entry.service_name = service_name;
    }
    if let Some(display_name) = clean_optional(observed.display_name.as_deref()) {
        offer(locks, LockableField::DisplayName, &mut entry.display_name, display_name, &mut ignored);
    }
    if let Some(host) = clean_optional(Some(observed.host.as_str())) {
        offer(locks, LockableField::Host, &mut entry.host, host, &mut ignored);
    }
    if let Some(port) = observed.port.filter(|port| *port > 0) {
        offer(locks, LockableField::Port, &mut entry.port, Some(port), &mut ignored);
    }
    if let Some(protocol) = observed.protocol {
        offer(locks, LockableField::Protocol, &mut entry.protocol, protocol, &mut ignored);
    }
    if let Some(path) = clean_optional(observed.path.as_deref()) {
        offer(locks, LockableField::Path, &mut entry.path, Some(path), &mut ignored);
    }
    if let Some(group) = clean_optional(observed.group.as_deref()) {
        offer(locks, LockableField::Group, &mut entry.group, Some(group), &mut ignored);
    }
    if let Some(icon) = clean_optional(observed.icon.as_deref()) {
        offer(locks, LockableField::Icon, &mut entry.icon, Some(icon), &mut ignored);
    }

    ignored
}

fn offer<T: PartialEq>(
    locks: &LockSet,
    field: LockableField,
    slot: &mut T,
    value: T,
    ignored: &mut Vec<LockableField>,
) {
    if !locks.contains(&field) {
        *slot = value;
    } else if *slot != value {
        ignored.push(field);
    }
}

/// Equal apart from the bookkeeping timestamps.
fn same_content(before: &ServiceEntry, after: &ServiceEntry) -> bool {
    let normalized = ServiceEntry {
        last_seen_at: before.last_seen_at,
        updated_at: before.updated_at,
        ..after.clone()
    };
    normalized == *before
}

fn changed_fields(before: &ServiceEntry, after: &ServiceEntry) -> Vec<LockableField> {
    LockableField::ALL
        .into_iter()
        .filter(|field| match field {
            LockableField::DisplayName => before.display_name != after.display_name,
            LockableField::Description => before.description != after.description,
            LockableField::Host => before.host != after.host,
            LockableField::Port => before.port != after.port,
            LockableField::Protocol => before.protocol != after.protocol,
            LockableField::Path => before.path != after.path,
            LockableField::Url => before.url != after.url,
            LockableField::Group => before.group != after.group,
            LockableField::Tags => !same_tags(&before.tags, &after.tags),
            LockableField::Icon => before.icon != after.icon,
            LockableField::Hidden => before.hidden != after.hidden,
            LockableField::Favorite => before.favorite != after.favorite,
        })
        .collect()
}

/// An [`EditPayload`] with every value parsed and checked.
struct ValidatedEdit {
    display_name: Option<String>,
    description: Option<Option<String>>,
    host: Option<String>,
    port: Option<Option<u16>>,
    protocol: Option<ServiceProtocol>,
    path: Option<Option<String>>,
    url: Option<Option<String>>,
    status: Option<ServiceStatus>,
    group: Option<Option<String>>,
    tags: Option<Vec<String>>,
    icon: Option<Option<String>>,
    hidden: Option<bool>,
    favorite: Option<bool>,
    locked_fields: Option<LockSet>,
    auto_lock: bool,
}

impl ValidatedEdit {
    fn parse(edit: &EditPayload) -> Result<Self, ReconcileError> {
        Ok(Self {
            display_name: edit
                .display_name
                .as_deref()
                .map(|name| non_empty_required("display_name", name))
                .transpose()?,
            description: clearable(&edit.description),
            host: edit
                .host
                .as_deref()
                .map(|host| non_empty_required("host", host))
                .transpose()?,
            port: match edit.port {
                Some(Some(port)) => Some(Some(validate_port(port)?)),
                Some(None) => Some(None),
                None => None,
            },
            protocol: edit.protocol.as_deref().map(parse_protocol).transpose()?,
            path: clearable(&edit.path),
            url: clearable(&edit.url),
            status: edit
                .status
                .as_deref()
                .map(|status| {
                    status
                        .trim()
                        .parse::<ServiceStatus>()
                        .map_err(|e| ReconcileError::validation("status", e.to_string()))
                })
                .transpose()?,
            group: clearable(&edit.group),
            tags: edit.tags.as_deref().map(normalize_tags),
            icon: clearable(&edit.icon),
            hidden: edit.hidden,
            favorite: edit.favorite,
            locked_fields: edit.locked_fields.as_deref().map(parse_locks).transpose()?,
            auto_lock: edit.auto_lock.unwrap_or(true),
        })
    }

    fn apply_to(&self, entry: &mut ServiceEntry) {
        if let Some(display_name) = &self.display_name {
            entry.display_name = display_name.clone();
        }
        if let Some(description) = &self.description {
            entry.description = description.clone();
        }
        if let Some(host) = &self.host {
            entry.host = host.clone();
        }
        if let Some(port) = self.port {
            entry.port = port;
        }
        if let Some(protocol) = self.protocol {
            entry.protocol = protocol;
        }
        if let Some(path) = &self.path {
            entry.path = path.clone();
        }
        if let Some(url) = &self.url {
            entry.url = url.clone();
        }
        if let Some(status) = self.status {
            entry.status = status;
        }
        if let Some(group) = &self.group {
            entry.group = group.clone();
        }
        if let Some(tags) = &self.tags {
            entry.tags = tags.clone();
        }
        if let Some(icon) = &self.icon {
            entry.icon = icon.clone();
        }
        if let Some(hidden) = self.hidden {
            entry.hidden = hidden;
        }
        if let Some(favorite) = self.favorite {
            entry.favorite = favorite;
        }
    }
}

/// `null` and blank strings both clear the field.
fn clearable(value: &Option<Option<String>>) -> Option<Option<String>> {
    value.as_ref().map(|inner| clean_optional(inner.as_deref()))
}

fn non_empty_required(field: &str, value: &str) -> Result<String, ReconcileError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ReconcileError::validation(field, "must not be empty"))
    } else {
        Ok(trimmed.to_string())
    }
}

fn validate_port(port: i64) -> Result<u16, ReconcileError> {
    u16::try_from(port)
        .ok()
        .filter(|port| *port > 0)
        .ok_or_else(|| ReconcileError::validation("port", format!("{port} is not in 1..=65535")))
}

fn parse_protocol(value: &str) -> Result<ServiceProtocol, ReconcileError> {
    value
        .trim()
        .parse()
        .map_err(|e: UnknownValue| ReconcileError::validation("protocol", e.to_string()))
}

fn parse_locks(names: &[String]) -> Result<LockSet, ReconcileError> {
    parse_lock_set(names).map_err(|e| ReconcileError::validation("locked_fields", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::identity::{EndpointIdentity, UnitNameIdentity};

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    fn base_service() -> ServiceEntry {
        ServiceEntry {
            id: "s1".to_string(),
            service_name: "nginx.service".to_string(),
            display_name: "Old".to_string(),
            description: None,
            host: "10.0.0.1".to_string(),
            port: Some(80),
            protocol: ServiceProtocol::Http,
            path: None,
            url: None,
            status: ServiceStatus::Unknown,
            group: None,
            tags: Vec::new(),
            icon: None,
            hidden: false,
            favorite: false,
            source: ServiceSource::Manual,
            locked_fields: LockSet::from([LockableField::DisplayName]),
            last_seen_at: None,
            updated_at: now() - Duration::days(1),
        }
    }

    fn nginx_observation() -> ObservedService {
        ObservedService {
            service_name: "nginx".to_string(),
            host: "10.0.0.1".to_string(),
            port: Some(80),
            display_name: Some("nginx-guess".to_string()),
            status: ServiceStatus::Running,
            ..Default::default()
        }
    }

    #[test]
    fn test_locked_display_name_survives_observation() {
        let existing = base_service();

        let merge = apply_discovery_observation(Some(&existing), &nginx_observation(), now()).unwrap();

        assert_eq!(merge.entry.display_name, "Old");
        assert_eq!(merge.entry.status, ServiceStatus::Running);
        assert_eq!(merge.entry.source, ServiceSource::Merged);
        assert_eq!(merge.change, RecordChange::Updated);
        assert_eq!(merge.ignored_locked, vec![LockableField::DisplayName]);
        assert_eq!(merge.entry.last_seen_at, Some(now()));
        assert_eq!(merge.entry.updated_at, now());
    }

    #[test]
    fn test_new_observation_creates_auto_record() {
        let merge = apply_discovery_observation(None, &nginx_observation(), now()).unwrap();

        assert_eq!(merge.change, RecordChange::Added);
        assert_eq!(merge.entry.id, "nginx");
        assert_eq!(merge.entry.source, ServiceSource::Auto);
        assert!(merge.entry.locked_fields.is_empty());
        assert_eq!(merge.entry.display_name, "nginx-guess");
        assert_eq!(merge.entry.protocol, ServiceProtocol::Http);
        assert_eq!(merge.entry.last_seen_at, Some(now()));
    }

    #[test]
    fn test_new_observation_without_host_is_rejected() {
        let observed = ObservedService {
            service_name: "sshd.service".to_string(),
            ..Default::default()
        };
        let err = apply_discovery_observation(None, &observed, now()).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidObservation { .. }));
    }

    #[test]
    fn test_locked_fields_never_change_across_observations() {
        let mut entry = base_service();
        entry.locked_fields = LockSet::from([LockableField::Host, LockableField::Port, LockableField::Group]);
        entry.group = Some("proxy".to_string());

        for (i, port) in [8080u16, 443, 9000].into_iter().enumerate() {
            let observed = ObservedService {
                service_name: "nginx.service".to_string(),
                host: format!("10.0.0.{}", i + 2),
                port: Some(port),
                group: Some("web".to_string()),
                status: ServiceStatus::Stopped,
                ..Default::default()
            };
            entry = apply_discovery_observation(Some(&entry), &observed, now()).unwrap().entry;

            assert_eq!(entry.host, "10.0.0.1");
            assert_eq!(entry.port, Some(80));
            assert_eq!(entry.group.as_deref(), Some("proxy"));
            assert_eq!(entry.status, ServiceStatus::Stopped);
        }
    }

    #[test]
    fn test_discovery_never_clears_fields() {
        let mut existing = base_service();
        existing.locked_fields.clear();
        existing.source = ServiceSource::Auto;
        existing.path = Some("/admin".to_string());
        existing.icon = Some("web".to_string());

        let observed = ObservedService {
            service_name: "nginx.service".to_string(),
            host: String::new(),
            port: None,
            path: Some("  ".to_string()),
            status: ServiceStatus::Running,
            ..Default::default()
        };
        let merge = apply_discovery_observation(Some(&existing), &observed, now()).unwrap();

        assert_eq!(merge.entry.display_name, "Old");
        assert_eq!(merge.entry.host, "10.0.0.1");
        assert_eq!(merge.entry.port, Some(80));
        assert_eq!(merge.entry.path.as_deref(), Some("/admin"));
        assert_eq!(merge.entry.icon.as_deref(), Some("web"));
        assert_eq!(merge.entry.source, ServiceSource::Auto);
    }

    #[test]
    fn test_same_observation_twice_is_unchanged() {
        let existing = base_service();
        let observed = nginx_observation();

        let first = apply_discovery_observation(Some(&existing), &observed, now()).unwrap();
        let second = apply_discovery_observation(Some(&first.entry), &observed, now()).unwrap();

        assert_eq!(second.change, RecordChange::Unchanged);
        assert_eq!(second.entry, first.entry);

        let later = now() + Duration::minutes(5);
        let third = apply_discovery_observation(Some(&second.entry), &observed, later).unwrap();
        assert_eq!(third.change, RecordChange::Unchanged);
        assert_eq!(third.entry.updated_at, first.entry.updated_at);
        assert_eq!(third.entry.last_seen_at, Some(later));
    }

    #[test]
    fn test_manual_edit_trims_and_dedups_tags() {
        let edit = EditPayload {
            tags: Some(vec![" a ".to_string(), "a".to_string(), "b".to_string()]),
            ..Default::default()
        };
        let result = apply_manual_edit(&base_service(), &edit, now()).unwrap();

        assert_eq!(result.entry.tags, vec!["a", "b"]);
        assert_eq!(result.changed, vec![LockableField::Tags]);
    }

    #[test]
    fn test_manual_edit_rejects_zero_port() {
        let existing = base_service();
        let edit = EditPayload {
            display_name: Some("New".to_string()),
            port: Some(Some(0)),
            ..Default::default()
        };
        let err = apply_manual_edit(&existing, &edit, now()).unwrap_err();

        assert_eq!(err.field(), Some("port"));
    }

    #[test]
    fn test_manual_edit_rejects_bad_values() {
        let existing = base_service();
        let cases = [
            (EditPayload { port: Some(Some(-1)), ..Default::default() }, "port"),
            (EditPayload { port: Some(Some(70000)), ..Default::default() }, "port"),
            (EditPayload { protocol: Some("gopher".to_string()), ..Default::default() }, "protocol"),
            (EditPayload { display_name: Some("   ".to_string()), ..Default::default() }, "display_name"),
            (EditPayload { host: Some(String::new()), ..Default::default() }, "host"),
            (EditPayload { status: Some("asleep".to_string()), ..Default::default() }, "status"),
            (
                EditPayload { locked_fields: Some(vec!["status".to_string()]), ..Default::default() },
                "locked_fields",
            ),
        ];
        for (edit, field) in cases {
            let err = apply_manual_edit(&existing, &edit, now()).unwrap_err();
            assert_eq!(err.field(), Some(field), "{edit:?}");
        }
    }

    #[test]
    fn test_auto_lock_adds_changed_fields() {
        let mut existing = base_service();
        existing.source = ServiceSource::Auto;
        existing.last_seen_at = Some(now() - Duration::hours(1));
        existing.locked_fields = LockSet::from([LockableField::Icon]);

        let edit = EditPayload {
            display_name: Some("Reverse Proxy".to_string()),
            port: Some(Some(8080)),
            host: Some("10.0.0.1".to_string()),
            status: Some("stopped".to_string()),
            ..Default::default()
        };
        let result = apply_manual_edit(&existing, &edit, now()).unwrap();

        assert_eq!(result.changed, vec![LockableField::DisplayName, LockableField::Port]);
        assert_eq!(
            result.entry.locked_fields,
            LockSet::from([LockableField::DisplayName, LockableField::Port, LockableField::Icon])
        );
        assert_eq!(result.entry.status, ServiceStatus::Stopped);
        assert_eq!(result.entry.source, ServiceSource::Merged);
        assert_eq!(result.entry.updated_at, now());
    }

    #[test]
    fn test_explicit_locks_replace_then_auto_lock_unions() {
        let mut existing = base_service();
        existing.locked_fields = LockSet::from([LockableField::DisplayName, LockableField::Host]);

        let edit = EditPayload {
            favorite: Some(true),
            locked_fields: Some(vec!["path".to_string()]),
            ..Default::default()
        };
        let result = apply_manual_edit(&existing, &edit, now()).unwrap();
        assert_eq!(
            result.entry.locked_fields,
            LockSet::from([LockableField::Path, LockableField::Favorite])
        );

        let edit = EditPayload {
            favorite: Some(false),
            locked_fields: Some(Vec::new()),
            auto_lock: Some(false),
            ..Default::default()
        };
        let result = apply_manual_edit(&existing, &edit, now()).unwrap();
        assert!(result.entry.locked_fields.is_empty());
        assert!(!result.entry.favorite);
    }

    #[test]
    fn test_manual_edit_null_clears_optional_fields() {
        let mut existing = base_service();
        existing.description = Some("front door".to_string());
        existing.group = Some("proxy".to_string());

        let edit = EditPayload {
            description: Some(None),
            group: Some(Some("  ".to_string())),
            port: Some(None),
            ..Default::default()
        };
        let result = apply_manual_edit(&existing, &edit, now()).unwrap();

        assert_eq!(result.entry.description, None);
        assert_eq!(result.entry.group, None);
        assert_eq!(result.entry.port, None);
        assert_eq!(result.entry.source, ServiceSource::Manual);
    }

    #[test]
    fn test_manual_edit_on_manual_record_stays_manual() {
        let result = apply_manual_edit(
            &base_service(),
            &EditPayload {
                display_name: Some("  Gateway ".to_string()),
                ..Default::default()
            },
            now(),
        )
        .unwrap();

        assert_eq!(result.entry.display_name, "Gateway");
        assert_eq!(result.entry.source, ServiceSource::Manual);
    }

    #[test]
    fn test_manual_lock_then_discovery_keeps_edit() {
        let mut existing = apply_discovery_observation(None, &nginx_observation(), now())
            .unwrap()
            .entry;
        existing.id = "s1".to_string();

        let edited = apply_manual_edit(
            &existing,
            &EditPayload {
                display_name: Some("Front Proxy".to_string()),
                ..Default::default()
            },
            now(),
        )
        .unwrap()
        .entry;
        assert_eq!(edited.source, ServiceSource::Merged);

        let later = now() + Duration::minutes(1);
        let merged = apply_discovery_observation(Some(&edited), &nginx_observation(), later).unwrap();
        assert_eq!(merged.entry.display_name, "Front Proxy");
        assert_eq!(merged.change, RecordChange::Unchanged);
    }

    #[test]
    fn test_create_manual_entry_defaults() {
        let request = CreateServiceRequest {
            service_name: " home-assistant.service ".to_string(),
            port: Some(8123),
            tags: Some(vec!["home".to_string(), " home".to_string()]),
            ..Default::default()
        };
        let entry = create_manual_entry(&request, "nas.local", now()).unwrap();

        assert_eq!(entry.id, "home-assistant-service");
        assert_eq!(entry.display_name, "Home Assistant");
        assert_eq!(entry.host, "nas.local");
        assert_eq!(entry.protocol, ServiceProtocol::Tcp);
        assert_eq!(entry.tags, vec!["home"]);
        assert_eq!(entry.source, ServiceSource::Manual);
        assert_eq!(entry.locked_fields, LockableField::all());
        assert_eq!(entry.last_seen_at, None);
    }

    #[test]
    fn test_create_manual_entry_requires_service_name() {
        let err = create_manual_entry(&CreateServiceRequest::default(), "nas.local", now()).unwrap_err();
        assert_eq!(err.field(), Some("service_name"));
    }

    #[test]
    fn test_run_tallies_and_marks_unseen() {
        let mut seen_before = base_service();
        seen_before.id = "grafana-service".to_string();
        seen_before.service_name = "grafana.service".to_string();
        seen_before.status = ServiceStatus::Running;
        seen_before.last_seen_at = Some(now() - Duration::hours(1));

        let mut manual_only = base_service();
        manual_only.id = "router".to_string();
        manual_only.service_name = "router".to_string();
        manual_only.status = ServiceStatus::Running;

        let mut nginx = base_service();
        nginx.id = "nginx-service".to_string();

        let observations = vec![
            ObservedService {
                service_name: "nginx.service".to_string(),
                host: "10.0.0.1".to_string(),
                port: Some(80),
                status: ServiceStatus::Running,
                ..Default::default()
            },
            ObservedService {
                service_name: "jellyfin.service".to_string(),
                host: "10.0.0.1".to_string(),
                port: Some(8096),
                status: ServiceStatus::Running,
                ..Default::default()
            },
            ObservedService {
                service_name: "broken.service".to_string(),
                ..Default::default()
            },
        ];

        let outcome = reconcile_run(
            vec![seen_before, manual_only, nginx],
            &observations,
            &UnitNameIdentity,
            RunOptions::default(),
            now(),
        );

        assert_eq!(outcome.tally.added, 1);
        assert_eq!(outcome.tally.updated, 1);
        assert_eq!(outcome.tally.unchanged, 0);
        assert_eq!(outcome.tally.rejected, 1);
        assert_eq!(outcome.entries.len(), 4);

        let find = |id: &str| outcome.entries.iter().find(|e| e.id == id).unwrap();
        assert_eq!(find("grafana-service").status, ServiceStatus::Unknown);
        assert_eq!(find("router").status, ServiceStatus::Running);
        assert_eq!(find("jellyfin-service").source, ServiceSource::Auto);
        assert_eq!(find("nginx-service").status, ServiceStatus::Running);
    }

    #[test]
    fn test_run_reports_identity_conflict_without_merging() {
        let mut first = base_service();
        first.locked_fields.clear();
        let mut second = base_service();
        second.id = "s2".to_string();
        second.display_name = "Other".to_string();
        second.locked_fields.clear();

        let outcome = reconcile_run(
            vec![first.clone(), second.clone()],
            &[nginx_observation()],
            &EndpointIdentity,
            RunOptions::default(),
            now(),
        );

        assert_eq!(
            outcome.tally.conflicts,
            vec![IdentityConflictReport {
                key: "10.0.0.1:80/http".to_string(),
                ids: vec!["s1".to_string(), "s2".to_string()],
            }]
        );
        assert_eq!(outcome.entries, vec![first, second]);
    }

    #[test]
    fn test_run_assigns_unique_ids_to_new_records() {
        let mut manual = base_service();
        manual.id = "nginx".to_string();
        manual.service_name = "edge".to_string();

        let outcome = reconcile_run(
            vec![manual],
            &[nginx_observation()],
            &UnitNameIdentity,
            RunOptions::default(),
            now(),
        );

        assert_eq!(outcome.tally.added, 1);
        assert_eq!(outcome.entries[1].id, "nginx-2");
    }
}
