//! Pulls a lower-cased, port-stripped hostname out of a network event's
//! `event_data` blob, trying `request.url`, then `url`, then
//! `response.url` in order.

use url::Url;

/// Extracts the host from whichever of `request.url` / `url` /
/// `response.url` is present and parseable in `event_data`. Returns
/// `None` if none of the candidate fields parse as a URL with a host.
pub fn extract_domain(event_data: &serde_json::Value) -> Option<String> {
    let candidates = [
        event_data.pointer("/request/url"),
        event_data.get("url"),
        event_data.pointer("/response/url"),
    ];

    for candidate in candidates.into_iter().flatten() {
        if let Some(raw) = candidate.as_str() {
            if let Some(host) = parse_host(raw) {
                return Some(host);
            }
        }
    }
    None
}

/// Parses `raw` as a URL, defaulting to `https://` when no scheme is
/// present, and returns the lower-cased host with port and IPv6 brackets
/// stripped.
fn parse_host(raw: &str) -> Option<String> {
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };

    let url = Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?;
    Some(host.trim_start_matches('[').trim_end_matches(']').to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_from_request_url() {
        let data = json!({"request": {"url": "https://Sub.Example.COM:443/x"}});
        assert_eq!(extract_domain(&data), Some("sub.example.com".to_string()));
    }

    #[test]
    fn extracts_from_bare_url_field() {
        let data = json!({"url": "https://example.com/path"});
        assert_eq!(extract_domain(&data), Some("example.com".to_string()));
    }

    #[test]
    fn extracts_from_response_url_as_fallback() {
        let data = json!({"response": {"url": "https://cdn.example.net/asset.js"}});
        assert_eq!(extract_domain(&data), Some("cdn.example.net".to_string()));
    }

    #[test]
    fn strips_ipv6_brackets() {
        let data = json!({"url": "http://[::1]:8080/"});
        assert_eq!(extract_domain(&data), Some("::1".to_string()));
    }

    #[test]
    fn defaults_scheme_when_missing() {
        let data = json!({"url": "example.com:8080/path"});
        assert_eq!(extract_domain(&data), Some("example.com".to_string()));
    }

    #[test]
    fn returns_none_when_no_candidate_parses() {
        let data = json!({"other_field": "not a url"});
        assert_eq!(extract_domain(&data), None);
    }
}
