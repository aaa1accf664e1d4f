//! Blocking HTTP adapters for the search clusters and the record-management
//! service.

pub mod records;
pub mod search;

use std::time::Duration;

use ferry_types::error::MigrationError;

pub use records::HttpRecordService;
pub use search::HttpSearchClient;

const USER_AGENT: &str = concat!("ferry/", env!("CARGO_PKG_VERSION"));

pub(crate) fn agent(timeout_secs: u64) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
}

pub(crate) fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Status codes worth retrying as-is.
fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 502 | 503 | 504)
}

/// `Retry-After` in milliseconds. Only the delta-seconds form is honoured.
fn retry_after_ms(header: Option<&str>) -> Option<u64> {
    header?.trim().parse::<u64>().ok().map(|secs| secs * 1000)
}

/// Map a failed request to a typed error.
///
/// Transport failures and throttling statuses are transient; other statuses
/// are data errors carrying the response body.
pub(crate) fn classify(operation: &str, err: ureq::Error) -> MigrationError {
    match err {
        ureq::Error::Status(status, response) => {
            let retry_after = retry_after_ms(response.header("Retry-After"));
            let body = response.into_string().unwrap_or_default();
            status_error(operation, status, retry_after, &body)
        }
        ureq::Error::Transport(transport) => MigrationError::transient_network(
            "TRANSPORT",
            format!("{operation} failed: {transport}"),
        ),
    }
}

fn status_error(operation: &str, status: u16, retry_after: Option<u64>, body: &str) -> MigrationError {
    let code = format!("HTTP_{status}");
    let message = format!("{operation} returned {status}: {}", snippet(body));
    if is_transient_status(status) {
        let err = MigrationError::transient_network(code, message);
        match retry_after {
            Some(ms) => err.with_retry_after(ms),
            None => err,
        }
    } else {
        MigrationError::data(code, message)
    }
}

fn snippet(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map_or(body.len(), |(i, _)| i);
    body[..end].trim()
}

/// Decode a JSON response body.
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(
    operation: &str,
    response: ureq::Response,
) -> Result<T, MigrationError> {
    response.into_json().map_err(|e| {
        MigrationError::transient_network("BAD_RESPONSE", format!("{operation}: unreadable response body: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_types::error::ErrorCategory;

    #[test]
    fn throttling_is_transient_with_hint() {
        let err = status_error("bulk", 429, retry_after_ms(Some("3")), "slow down");
        assert_eq!(err.category, ErrorCategory::TransientNetwork);
        assert!(err.retryable);
        assert_eq!(err.retry_after_ms, Some(3000));
        assert_eq!(err.code, "HTTP_429");
    }

    #[test]
    fn gateway_errors_are_transient() {
        for status in [502, 503, 504] {
            assert!(status_error("search", status, None, "").retryable);
        }
    }

    #[test]
    fn client_errors_are_data_errors() {
        let err = status_error("create", 400, None, r#"{"message":"invalid"}"#);
        assert_eq!(err.category, ErrorCategory::Data);
        assert!(!err.retryable);
        assert!(err.message.contains("invalid"));
    }

    #[test]
    fn http_date_retry_after_is_ignored() {
        assert_eq!(retry_after_ms(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(retry_after_ms(None), None);
    }

    #[test]
    fn snippet_is_bounded() {
        let long = "é".repeat(500);
        assert_eq!(snippet(&long).chars().count(), 200);
    }
}
