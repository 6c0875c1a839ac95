use crate::types::{ServiceEntry, ServiceQuery};

/// Services visible under `query`, ordered by display name.
pub fn filter_services<'a, I>(services: I, query: &ServiceQuery) -> Vec<ServiceEntry>
where
    I: IntoIterator<Item = &'a ServiceEntry>,
{
    let mut matches: Vec<ServiceEntry> = services
        .into_iter()
        .filter(|entry| matches_query(entry, query))
        .cloned()
        .collect();
    sort_by_display_name(&mut matches);
    matches
}

pub fn sort_by_display_name(services: &mut [ServiceEntry]) {
    services.sort_by(|left, right| {
        left.display_name
            .cmp(&right.display_name)
            .then_with(|| left.id.cmp(&right.id))
    });
}

/// Hidden services are excluded unless `include_hidden` is set. The free-text
/// needle matches display name, service name, tags, group and port.
pub fn matches_query(entry: &ServiceEntry, query: &ServiceQuery) -> bool {
    if entry.hidden && !query.include_hidden.unwrap_or(false) {
        return false;
    }

    if let Some(group) = query.group.as_deref().filter(|group| !group.is_empty()) {
        if entry.group.as_deref() != Some(group) {
            return false;
        }
    }

    if let Some(status) = query.status {
        if entry.status != status {
            return false;
        }
    }

    let Some(needle) = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_lowercase)
    else {
        return true;
    };

    entry.display_name.to_lowercase().contains(&needle)
        || entry.service_name.to_lowercase().contains(&needle)
        || entry.tags.iter().any(|tag| tag.to_lowercase().contains(&needle))
        || entry
            .group
            .as_deref()
            .is_some_and(|group| group.to_lowercase().contains(&needle))
        || entry
            .port
            .is_some_and(|port| port.to_string().contains(&needle))
}
