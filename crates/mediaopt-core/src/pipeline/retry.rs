//! When and how long to wait before retrying the remote compression pass.

use crate::error::PipelineError;
use reqwest::StatusCode;
use std::time::Duration;

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Whether a failed Tinify call may succeed if repeated.
///
/// Timeouts, transport failures, 429 and 5xx are transient. Other responses
/// describe the request itself (bad key, unsupported or corrupt image) and
/// fail the same way every time.
pub fn is_retryable(error: &PipelineError) -> bool {
    match error {
        PipelineError::Timeout { .. } => true,
        PipelineError::Compression {
            status_code: Some(code),
            ..
        } => StatusCode::from_u16(*code)
            .map(|status| status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
            .unwrap_or(false),
        // No status: the request never got a response
        PipelineError::Compression {
            status_code: None,
            message,
        } => message.contains("request failed") || message.contains("download failed"),
        _ => false,
    }
}

/// Delay before retry number `attempt` (zero-based): doubles from
/// `base_delay_ms`, capped at 30 seconds.
pub fn backoff_duration(attempt: u32, base_delay_ms: u64) -> Duration {
    let delay = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tinify(code: u16, body: &str) -> PipelineError {
        PipelineError::Compression {
            message: format!("Tinify HTTP {code}: {body}"),
            status_code: Some(code),
        }
    }

    #[test]
    fn test_unsupported_image_is_final() {
        let err = tinify(
            415,
            r#"{"error":"Unsupported media type","message":"File type is not supported."}"#,
        );
        assert!(!is_retryable(&err));
    }

    #[test]
    fn test_bad_api_key_is_final() {
        assert!(!is_retryable(&tinify(401, r#"{"error":"Unauthorized"}"#)));
    }

    #[test]
    fn test_rate_limit_and_outage_are_retried() {
        assert!(is_retryable(&tinify(429, r#"{"error":"TooManyRequests"}"#)));
        assert!(is_retryable(&tinify(503, "")));
    }

    #[test]
    fn test_pass_timeout_is_retried() {
        assert!(is_retryable(&PipelineError::Timeout { timeout_ms: 30_000 }));
    }

    #[test]
    fn test_transport_failure_is_retried_but_bad_json_is_not() {
        let refused = PipelineError::Compression {
            message: "Tinify request failed: error trying to connect".into(),
            status_code: None,
        };
        assert!(is_retryable(&refused));

        let garbled = PipelineError::Compression {
            message: "Failed to parse Tinify response: expected value".into(),
            status_code: None,
        };
        assert!(!is_retryable(&garbled));
    }

    #[test]
    fn test_image_errors_are_never_retried() {
        let err = PipelineError::Decode {
            path: PathBuf::from("hero.jpg"),
            message: "invalid JPEG marker".into(),
        };
        assert!(!is_retryable(&err));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_duration(0, 500), Duration::from_millis(500));
        assert_eq!(backoff_duration(2, 500), Duration::from_millis(2000));
        assert_eq!(backoff_duration(10, 1000), MAX_BACKOFF);
        assert_eq!(backoff_duration(u32::MAX, 1000), MAX_BACKOFF);
    }
}
