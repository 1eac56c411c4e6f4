//! Header <-> message property translation

use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::HeaderMap;
use tracing::warn;

use crate::broker::Properties;

/// Transport-level request headers that are never forwarded to the broker
pub const EXCLUDED_HEADERS: [&str; 9] = [
    "content-length",
    "Accept",
    "User-Agent",
    "Connection",
    "Postman-Token",
    "Host",
    "cache-control",
    "accept-encoding",
    "Content-Type",
];

/// Hop-by-hop and framing headers the HTTP layer owns on the response side
pub const FRAMING_HEADERS: [&str; 8] = [
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "upgrade",
    "te",
    "trailer",
    "proxy-connection",
];

/// Content type used for replies that do not carry their own
pub const DEFAULT_REPLY_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Whether `name` is on the exclusion list.
///
/// HTTP field names are case-insensitive and arrive lowercased from hyper,
/// so the comparison ignores ASCII case.
pub fn is_excluded(name: &str) -> bool {
    EXCLUDED_HEADERS
        .iter()
        .any(|excluded| excluded.eq_ignore_ascii_case(name))
}

/// Project request headers onto message properties.
///
/// Excluded headers are dropped. Headers with several values keep the first.
pub fn filter_headers(headers: &HeaderMap) -> Properties {
    headers
        .keys()
        .filter(|name| !is_excluded(name.as_str()))
        .filter_map(|name| {
            headers.get(name).map(|value| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
        })
        .collect()
}

/// Rebuild response headers from reply message properties.
///
/// Properties that cannot be expressed as an HTTP header are skipped, and so
/// are framing headers, which must match the body hyper actually writes.
pub fn reply_headers(properties: &Properties) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(properties.len() + 1);

    for (key, value) in properties {
        let name = match HeaderName::from_bytes(key.as_bytes()) {
            Ok(name) => name,
            Err(_) => {
                warn!(property = %key, "Skipping reply property with invalid header name");
                continue;
            }
        };
        if FRAMING_HEADERS.contains(&name.as_str()) {
            warn!(property = %key, "Skipping reply property with framing header name");
            continue;
        }
        match HeaderValue::from_str(value) {
            Ok(value) => {
                headers.append(name, value);
            }
            Err(_) => {
                warn!(property = %key, "Skipping reply property with invalid header value");
            }
        }
    }

    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(DEFAULT_REPLY_CONTENT_TYPE),
        );
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_case::test_case;

    fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.append(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        headers
    }

    #[test_case("content-length" ; "content length")]
    #[test_case("accept" ; "accept")]
    #[test_case("user-agent" ; "user agent")]
    #[test_case("connection" ; "connection")]
    #[test_case("postman-token" ; "postman token")]
    #[test_case("host" ; "host")]
    #[test_case("cache-control" ; "cache control")]
    #[test_case("accept-encoding" ; "accept encoding")]
    #[test_case("content-type" ; "content type")]
    fn test_excluded_header_is_dropped(name: &str) {
        let headers = header_map(&[(name, "x"), ("x-trace-id", "t-1")]);
        let props = filter_headers(&headers);
        assert!(!props.contains_key(name));
        assert_eq!(props.get("x-trace-id").map(String::as_str), Some("t-1"));
    }

    #[test]
    fn test_exclusion_ignores_case() {
        assert!(is_excluded("ACCEPT"));
        assert!(is_excluded("Content-Length"));
        assert!(!is_excluded("accepted"));
    }

    #[test]
    fn test_multi_value_header_keeps_first() {
        let headers = header_map(&[("x-tag", "first"), ("x-tag", "second")]);
        let props = filter_headers(&headers);
        assert_eq!(props.len(), 1);
        assert_eq!(props["x-tag"], "first");
    }

    #[test]
    fn test_reply_headers_copy_properties() {
        let mut props = Properties::new();
        props.insert("X-Status".to_string(), "ok".to_string());
        let headers = reply_headers(&props);
        assert_eq!(headers.get("x-status").unwrap(), "ok");
        assert_eq!(
            headers.get(CONTENT_TYPE).unwrap(),
            DEFAULT_REPLY_CONTENT_TYPE
        );
    }

    #[test]
    fn test_reply_headers_keep_reply_content_type() {
        let mut props = Properties::new();
        props.insert("Content-Type".to_string(), "application/json".to_string());
        let headers = reply_headers(&props);
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_reply_headers_skip_invalid() {
        let mut props = Properties::new();
        props.insert("bad name".to_string(), "v".to_string());
        props.insert("x-bad-value".to_string(), "line\nbreak".to_string());
        props.insert("x-good".to_string(), "yes".to_string());
        let headers = reply_headers(&props);
        assert!(headers.get("x-bad-value").is_none());
        assert_eq!(headers.get("x-good").unwrap(), "yes");
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_reply_headers_skip_framing() {
        let mut props = Properties::new();
        props.insert("Content-Length".to_string(), "100".to_string());
        props.insert("transfer-encoding".to_string(), "chunked".to_string());
        props.insert("Connection".to_string(), "close".to_string());
        props.insert("x-status".to_string(), "ok".to_string());
        let headers = reply_headers(&props);
        assert!(headers.get("content-length").is_none());
        assert!(headers.get("transfer-encoding").is_none());
        assert!(headers.get("connection").is_none());
        assert_eq!(headers.get("x-status").unwrap(), "ok");
        assert_eq!(headers.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_filter_drops_only_excluded(
            pairs in proptest::collection::vec(
                ("[a-z][a-z0-9-]{0,15}", "[a-zA-Z0-9 ._-]{0,20}"),
                0..12,
            ),
            excluded_idx in proptest::collection::vec(0usize..EXCLUDED_HEADERS.len(), 0..4),
        ) {
            let mut headers = HeaderMap::new();
            for (k, v) in &pairs {
                headers.append(
                    HeaderName::from_bytes(k.as_bytes()).unwrap(),
                    HeaderValue::from_str(v).unwrap(),
                );
            }
            for idx in &excluded_idx {
                headers.append(
                    HeaderName::from_bytes(EXCLUDED_HEADERS[*idx].as_bytes()).unwrap(),
                    HeaderValue::from_static("excluded"),
                );
            }

            let props = filter_headers(&headers);

            for key in props.keys() {
                prop_assert!(!is_excluded(key));
            }
            for name in headers.keys() {
                if is_excluded(name.as_str()) {
                    continue;
                }
                let first = headers.get(name).unwrap().to_str().unwrap();
                prop_assert_eq!(props.get(name.as_str()).map(String::as_str), Some(first));
            }
        }
    }
}
