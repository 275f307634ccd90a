//! HTTP-date precondition handling for the filtered-content endpoint.
//!
//! HTTP dates are second-grained, while file modification times are not, so
//! both checks allow one second of slack around the header's timestamp.

use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::time::{Duration, SystemTime};

/// Format a timestamp as an HTTP-date `Last-Modified` value.
pub(crate) fn http_date(time: SystemTime) -> HeaderValue {
    let time: chrono::DateTime<chrono::Utc> = time.into();
    let formatted = time.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    HeaderValue::from_str(&formatted).expect("HTTP-dates are valid header values")
}

fn parse_http_date(value: &HeaderValue) -> Option<SystemTime> {
    let value = value.to_str().ok()?;
    chrono::DateTime::parse_from_rfc2822(value)
        .ok()
        .map(Into::into)
}

/// Evaluate the request's preconditions against the raw file's modification
/// time. GET and HEAD honor `If-Modified-Since` with a 304; other methods
/// honor `If-Unmodified-Since` with a 412. A None means the request
/// proceeds.
pub(crate) fn check(
    method: &Method,
    headers: &HeaderMap,
    mod_time: SystemTime,
) -> Option<Response> {
    if method == Method::GET || method == Method::HEAD {
        let since = headers
            .get(header::IF_MODIFIED_SINCE)
            .and_then(parse_http_date)?;
        if mod_time < since + Duration::from_secs(1) {
            return Some(StatusCode::NOT_MODIFIED.into_response());
        }
    } else {
        let since = headers
            .get(header::IF_UNMODIFIED_SINCE)
            .and_then(parse_http_date)?;
        if mod_time > since - Duration::from_secs(1) {
            return Some(StatusCode::PRECONDITION_FAILED.into_response());
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    fn headers(name: header::HeaderName, value: &HeaderValue) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, value.clone());
        headers
    }

    #[test]
    fn test_http_date_round_trips() {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(784_111_777);
        let value = http_date(time);
        assert_eq!(value.to_str().unwrap(), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date(&value), Some(time));
    }

    #[test]
    fn test_if_modified_since_with_slack() {
        let mod_time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let headers = headers(header::IF_MODIFIED_SINCE, &http_date(mod_time));

        // Equal times are within the +1s slack: not modified.
        let response = check(&Method::GET, &headers, mod_time).unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

        // Sub-second staleness of the header is still within the slack.
        let newer = mod_time + Duration::from_millis(300);
        assert!(check(&Method::HEAD, &headers, newer).is_some());

        // Clearly newer content proceeds.
        let much_newer = mod_time + Duration::from_secs(5);
        assert!(check(&Method::GET, &headers, much_newer).is_none());
    }

    #[test]
    fn test_if_unmodified_since_applies_to_other_methods() {
        let mod_time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let headers = headers(header::IF_UNMODIFIED_SINCE, &http_date(mod_time));

        // GET ignores If-Unmodified-Since.
        assert!(check(&Method::GET, &headers, mod_time).is_none());

        let modified_later = mod_time + Duration::from_secs(5);
        let response = check(&Method::POST, &headers, modified_later).unwrap();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

        // Unmodified content proceeds.
        assert!(check(&Method::POST, &headers, mod_time).is_none());
    }

    #[test]
    fn test_absent_or_malformed_headers_proceed() {
        let mod_time = SystemTime::now();
        assert!(check(&Method::GET, &HeaderMap::new(), mod_time).is_none());

        let headers = headers(
            header::IF_MODIFIED_SINCE,
            &HeaderValue::from_static("not a date"),
        );
        assert!(check(&Method::GET, &headers, mod_time).is_none());
    }
}
