use crate::types::ServiceProtocol;

/// Lowercase slug of a service name: "Jellyfin Server.service" -> "jellyfin-server-service".
/// Falls back to "service" when nothing alphanumeric is left.
pub fn service_id(service_name: &str) -> String {
    let mut output = String::with_capacity(service_name.len());
    let mut previous_dash = false;
    for character in service_name.chars().flat_map(char::to_lowercase) {
        if character.is_ascii_alphanumeric() {
            output.push(character);
            previous_dash = false;
        } else if !previous_dash {
            output.push('-');
            previous_dash = true;
        }
    }
    let slug = output.trim_matches('-');
    if slug.is_empty() {
        "service".to_string()
    } else {
        slug.to_string()
    }
}

/// First of `base`, `base-2`, `base-3`, ... that `taken` rejects.
pub fn unique_id(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|suffix| format!("{base}-{suffix}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

pub fn infer_protocol_from_port(port: Option<u16>) -> ServiceProtocol {
    match port {
        Some(443 | 8443) => ServiceProtocol::Https,
        Some(80 | 3000 | 5000 | 8080 | 8096 | 9000) => ServiceProtocol::Http,
        Some(_) => ServiceProtocol::Tcp,
        None => ServiceProtocol::Other,
    }
}

pub fn build_service_url(
    protocol: ServiceProtocol,
    host: &str,
    port: Option<u16>,
    path: Option<&str>,
) -> Option<String> {
    let scheme = match protocol {
        ServiceProtocol::Http => "http",
        ServiceProtocol::Https => "https",
        _ => return None,
    };
    let port = port?;
    let mut url = format!("{scheme}://{host}:{port}");
    match path.map(str::trim) {
        Some(path) if path.starts_with('/') => url.push_str(path),
        Some(path) if !path.is_empty() => {
            url.push('/');
            url.push_str(path);
        }
        _ => {}
    }
    Some(url)
}

/// "home-assistant.service" -> "Home Assistant"
pub fn humanize_service_name(service_name: &str) -> String {
    service_name
        .trim()
        .trim_end_matches(".service")
        .split(['-', '_', '.'])
        .filter(|word| !word.is_empty())
        .map(capitalize_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Trimmed value, or `None` when blank.
pub fn clean_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_string)
}

/// Trim, drop blanks and drop repeats, keeping first-seen order.
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut output: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !output.iter().any(|existing| existing == tag) {
            output.push(tag.to_string());
        }
    }
    output
}

/// Tag lists are compared as sets.
pub fn same_tags(left: &[String], right: &[String]) -> bool {
    let mut left: Vec<&str> = left.iter().map(String::as_str).collect();
    let mut right: Vec<&str> = right.iter().map(String::as_str).collect();
    left.sort_unstable();
    left.dedup();
    right.sort_unstable();
    right.dedup();
    left == right
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_id_slugs() {
        assert_eq!(service_id("nginx.service"), "nginx-service");
        assert_eq!(service_id("  Home__Assistant "), "home-assistant");
        assert_eq!(service_id("???"), "service");
    }

    #[test]
    fn test_unique_id_appends_suffix() {
        let taken = ["nginx-service", "nginx-service-2"];
        assert_eq!(unique_id("grafana", |c| taken.contains(&c)), "grafana");
        assert_eq!(unique_id("nginx-service", |c| taken.contains(&c)), "nginx-service-3");
    }

    #[test]
    fn test_humanize_service_name() {
        assert_eq!(humanize_service_name("home-assistant.service"), "Home Assistant");
        assert_eq!(humanize_service_name("qbittorrent_nox"), "Qbittorrent Nox");
    }

    #[test]
    fn test_infer_protocol_from_port() {
        assert_eq!(infer_protocol_from_port(Some(443)), ServiceProtocol::Https);
        assert_eq!(infer_protocol_from_port(Some(8096)), ServiceProtocol::Http);
        assert_eq!(infer_protocol_from_port(Some(5432)), ServiceProtocol::Tcp);
        assert_eq!(infer_protocol_from_port(None), ServiceProtocol::Other);
    }

    #[test]
    fn test_build_service_url_normalizes_path() {
        assert_eq!(
            build_service_url(ServiceProtocol::Https, "nas.local", Some(8443), Some(" /ui ")),
            Some("https://nas.local:8443/ui".to_string())
        );
        assert_eq!(
            build_service_url(ServiceProtocol::Http, "nas.local", Some(80), Some("web")),
            Some("http://nas.local:80/web".to_string())
        );
        assert_eq!(build_service_url(ServiceProtocol::Tcp, "nas.local", Some(22), None), None);
        assert_eq!(build_service_url(ServiceProtocol::Http, "nas.local", None, None), None);
    }

    #[test]
    fn test_normalize_tags() {
        assert_eq!(normalize_tags(&[" a ", "a", "", "b"]), vec!["a", "b"]);
    }

    #[test]
    fn test_same_tags_ignores_order() {
        let left = vec!["media".to_string(), "web".to_string()];
        let right = vec!["web".to_string(), "media".to_string()];
        assert!(same_tags(&left, &right));
        assert!(!same_tags(&left, &["web".to_string()]));
    }
}
