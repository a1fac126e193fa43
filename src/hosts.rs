use crate::{
    error::Error,
    settings::HostSource,
};
use std::collections::BTreeMap;

/// Hostname to service address, ordered by hostname. Duplicate hostnames are
/// resolved last-write-wins during parsing.
pub type HostMap = BTreeMap<String, String>;

/// Port used for subdomain entries that carry no (or an unparseable) port.
pub const DEFAULT_SUBDOMAIN_PORT: u16 = 80;

pub fn resolve(source: &HostSource) -> Result<HostMap, Error> {
    match source {
        HostSource::Hosts(raw) => {
            info!("HOSTS mode: dns records are not managed here, create them with your dns provider");
            parse_hosts(raw)
        }
        HostSource::Subdomains { subdomains, domain } => parse_subdomains(subdomains, domain),
    }
}

/// Parse a comma separated `hostname:service` list. The service part may
/// itself contain colons (`http://host:port`), so each entry splits on the
/// first colon only. Invalid entries are skipped with a warning.
pub fn parse_hosts(raw: &str) -> Result<HostMap, Error> {
    let mut map = HostMap::new();

    for token in raw.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        let Some((hostname, service)) = token.split_once(':') else {
            warn!("skipping HOSTS entry without a service: {token:?}");
            continue;
        };
        let hostname = hostname.trim();
        let service = service.trim();

        if !is_valid_hostname(hostname) {
            warn!("skipping HOSTS entry with invalid hostname: {hostname:?}");
            continue;
        }
        if !is_valid_service(service) {
            warn!("skipping HOSTS entry with invalid service: {service:?}");
            continue;
        }

        map.insert(hostname.to_string(), service.to_string());
    }

    if map.is_empty() {
        return Err(Error::NoValidHosts);
    }
    Ok(map)
}

/// Parse a comma separated `label[:port]` list against a base domain. A
/// missing or unparseable port falls back to [`DEFAULT_SUBDOMAIN_PORT`].
pub fn parse_subdomains(raw: &str, domain: &str) -> Result<HostMap, Error> {
    let mut map = HostMap::new();

    for token in raw.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        let (label, port) = match token.split_once(':') {
            None => (token, DEFAULT_SUBDOMAIN_PORT),
            Some((label, port)) => match port.trim().parse::<u16>() {
                Ok(port) => (label.trim(), port),
                Err(_) => {
                    warn!(
                        "invalid port {port:?} for subdomain {label:?}, falling back to {DEFAULT_SUBDOMAIN_PORT}"
                    );
                    (label.trim(), DEFAULT_SUBDOMAIN_PORT)
                }
            },
        };

        let hostname = format!("{label}.{domain}");
        if !is_valid_hostname(&hostname) {
            warn!("skipping subdomain with invalid hostname: {hostname:?}");
            continue;
        }

        map.insert(hostname, format!("http://localhost:{port}"));
    }

    if map.is_empty() {
        return Err(Error::NoValidHosts);
    }
    Ok(map)
}

/// Labels of alphanumerics and inner hyphens, at least two labels, final
/// label at least two alphabetic characters.
pub fn is_valid_hostname(name: &str) -> bool {
    let labels: Vec<&str> = name.split('.').collect();
    let Some((tld, rest)) = labels.split_last() else {
        return false;
    };
    if rest.is_empty() {
        return false;
    }
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return false;
    }
    rest.iter().all(|label| is_valid_label(label))
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// `http(s)://host[:port]`, `tcp://host:port` or `unix:/path`.
pub fn is_valid_service(service: &str) -> bool {
    if let Some(path) = service.strip_prefix("unix:") {
        return path.starts_with('/');
    }
    if let Some(rest) = service.strip_prefix("tcp://") {
        return matches!(split_host_port(rest), Some((_, Some(_))));
    }
    for scheme in ["http://", "https://"] {
        if let Some(rest) = service.strip_prefix(scheme) {
            return split_host_port(rest).is_some();
        }
    }
    false
}

fn split_host_port(rest: &str) -> Option<(&str, Option<u16>)> {
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    match rest.rsplit_once(':') {
        None => Some((rest, None)),
        Some((host, port)) => {
            if host.is_empty() {
                return None;
            }
            let port = port.parse::<u16>().ok()?;
            Some((host, Some(port)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosts_split_on_first_colon_only() {
        let map = parse_hosts("app.example.com:http://localhost:3000").unwrap();
        assert_eq!(map.get("app.example.com").map(String::as_str), Some("http://localhost:3000"));
    }

    #[test]
    fn hosts_skip_empty_tokens_and_invalid_services() {
        let map = parse_hosts("a.com:http://localhost:1,,b.com:bad-service").unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("a.com").map(String::as_str), Some("http://localhost:1"));
    }

    #[test]
    fn hosts_skip_invalid_hostnames() {
        let map = parse_hosts("-bad-.com:http://localhost:1,ok.example.com:tcp://db:5432").unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("ok.example.com"));
    }

    #[test]
    fn hosts_last_write_wins_on_duplicates() {
        let map = parse_hosts("a.com:http://localhost:1,a.com:http://localhost:2").unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("a.com").map(String::as_str), Some("http://localhost:2"));
    }

    #[test]
    fn hosts_empty_input_is_an_error() {
        assert!(matches!(parse_hosts(""), Err(Error::NoValidHosts)));
        assert!(matches!(parse_hosts(",,"), Err(Error::NoValidHosts)));
        assert!(matches!(parse_hosts("only-a-hostname"), Err(Error::NoValidHosts)));
    }

    #[test]
    fn subdomains_default_and_explicit_ports() {
        let map = parse_subdomains("web:3000,api", "example.com").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("web.example.com").map(String::as_str), Some("http://localhost:3000"));
        assert_eq!(map.get("api.example.com").map(String::as_str), Some("http://localhost:80"));
    }

    #[test]
    fn subdomains_bad_port_falls_back_to_default() {
        let map = parse_subdomains("web:abc", "example.com").unwrap();
        assert_eq!(map.get("web.example.com").map(String::as_str), Some("http://localhost:80"));
    }

    #[test]
    fn subdomains_skip_empty_and_invalid_labels() {
        let map = parse_subdomains("web,,-bad-", "example.com").unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("web.example.com"));
    }

    #[test]
    fn subdomains_empty_input_is_an_error() {
        assert!(matches!(parse_subdomains("", "example.com"), Err(Error::NoValidHosts)));
    }

    #[test]
    fn map_iterates_sorted_by_hostname() {
        let map = parse_hosts("b.com:http://localhost:2,a.com:http://localhost:1").unwrap();
        let order: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(order, vec!["a.com", "b.com"]);
    }

    #[test]
    fn hostname_validation() {
        assert!(is_valid_hostname("a.com"));
        assert!(is_valid_hostname("sub.domain.example.com"));
        assert!(is_valid_hostname("with-hyphen.example.com"));
        assert!(!is_valid_hostname("nodots"));
        assert!(!is_valid_hostname("trailing.dot."));
        assert!(!is_valid_hostname("numeric.tld.12"));
        assert!(!is_valid_hostname("short.c"));
        assert!(!is_valid_hostname("-leading.example.com"));
        assert!(!is_valid_hostname("under_score.example.com"));
    }

    #[test]
    fn service_validation() {
        assert!(is_valid_service("http://localhost:3000"));
        assert!(is_valid_service("http://localhost"));
        assert!(is_valid_service("https://10.0.0.1:8443"));
        assert!(is_valid_service("tcp://db:5432"));
        assert!(is_valid_service("unix:/run/app.sock"));
        assert!(!is_valid_service("tcp://db"));
        assert!(!is_valid_service("ftp://host:21"));
        assert!(!is_valid_service("http://"));
        assert!(!is_valid_service("http://host:notaport"));
        assert!(!is_valid_service("unix:relative/path"));
        assert!(!is_valid_service("bad-service"));
    }
}
