//! Effective status code resolution
//!
//! Error pages are often reached through a redirect (`302 Location:
//! /error/404`), and some hosts rewrite the status on the way out. The
//! status recorded in the snapshot is the one the user actually got.

use axum::http::{header, HeaderMap};

pub const STATUS_OVERRIDE_HEADER: &str = "x-status-code-override";

/// Resolve the effective status, first match wins:
/// 1. integer override header
/// 2. raw status when it is not a redirect
/// 3. raw status when `Location` is missing or empty
/// 4. raw status when `Location` has no `/error/` segment
/// 5. last `Location` path segment as an integer, else the raw status
pub fn resolve_status_code(raw: u16, headers: &HeaderMap) -> u16 {
    if let Some(code) = header_str(headers, STATUS_OVERRIDE_HEADER)
        .and_then(|v| v.trim().parse::<u16>().ok())
    {
        return code;
    }

    if !(300..400).contains(&raw) {
        return raw;
    }

    let Some(location) = header_str(headers, header::LOCATION.as_str()) else {
        return raw;
    };
    if location.trim().is_empty() {
        return raw;
    }

    let path = location_path(location);
    if !path.split('/').any(|segment| segment.eq_ignore_ascii_case("error")) {
        return raw;
    }

    path.split('/')
        .filter(|segment| !segment.is_empty())
        .last()
        .and_then(|segment| segment.parse::<u16>().ok())
        .unwrap_or(raw)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Path part of an absolute or relative `Location`, query and fragment stripped
fn location_path(location: &str) -> &str {
    let location = location.trim();
    let without_query = location
        .split(['?', '#'])
        .next()
        .unwrap_or(location);

    match without_query.find("://") {
        Some(scheme_end) => {
            let rest = &without_query[scheme_end + 3..];
            rest.find('/').map(|i| &rest[i..]).unwrap_or("")
        }
        None => without_query,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_override_header_wins() {
        let map = headers(&[(STATUS_OVERRIDE_HEADER, "418")]);
        assert_eq!(resolve_status_code(200, &map), 418);

        let map = headers(&[(STATUS_OVERRIDE_HEADER, "teapot"), ("location", "/error/404")]);
        assert_eq!(resolve_status_code(302, &map), 404);
    }

    #[test]
    fn test_redirect_to_error_page() {
        assert_eq!(resolve_status_code(302, &headers(&[("location", "/error/404?x=1")])), 404);
        assert_eq!(
            resolve_status_code(
                301,
                &headers(&[("location", "https://shop.example.com/Error/503/#top")])
            ),
            503
        );
    }

    #[test]
    fn test_redirect_kept_as_is() {
        assert_eq!(resolve_status_code(302, &headers(&[("location", "/home")])), 302);
        assert_eq!(resolve_status_code(302, &headers(&[("location", "/error/abc")])), 302);
        assert_eq!(resolve_status_code(302, &headers(&[("location", "")])), 302);
        assert_eq!(resolve_status_code(302, &HeaderMap::new()), 302);
        assert_eq!(resolve_status_code(302, &headers(&[("location", "/errors/404")])), 302);
    }

    #[test]
    fn test_non_redirect_ignores_location() {
        assert_eq!(resolve_status_code(200, &headers(&[("location", "/error/500")])), 200);
        assert_eq!(resolve_status_code(404, &headers(&[("location", "/error/500")])), 404);
    }
}
