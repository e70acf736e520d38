use thiserror::Error;

/// Classified failure from a single upstream HTTP round trip.
///
/// Every tool call performs at most one round trip and a failed attempt is
/// final for that invocation, so no variant carries retry state.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The request did not complete within the configured timeout.
    #[error("request to {url} timed out")]
    Timeout { url: String },
    /// TCP/TLS-level failure before any HTTP status was received.
    #[error("failed to reach Alertmanager at {url}: {message}")]
    Connect { url: String, message: String },
    /// Upstream answered with a non-2xx status.
    #[error("Alertmanager returned HTTP {status} {reason}")]
    Status { status: u16, reason: String },
    /// 2xx response whose body was not valid JSON or not the expected shape.
    #[error("failed to decode Alertmanager response: {message}")]
    Decode { message: String },
    /// The configured base URL plus path did not form a valid URL.
    #[error("invalid Alertmanager URL: {message}")]
    InvalidUrl { message: String },
}

impl UpstreamError {
    /// Machine-readable code for the variant, stable across message changes.
    pub fn code(&self) -> &'static str {
        match self {
            UpstreamError::Timeout { .. } => codes::UPSTREAM_TIMEOUT,
            UpstreamError::Connect { .. } => codes::UPSTREAM_UNREACHABLE,
            UpstreamError::Status { .. } => codes::UPSTREAM_STATUS,
            UpstreamError::Decode { .. } => codes::DECODE_FAILED,
            UpstreamError::InvalidUrl { .. } => codes::INVALID_URL,
        }
    }
}

/// Error codes used across the tool surface
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const UNKNOWN_TOOL: &str = "unknown_tool";
    pub const UPSTREAM_TIMEOUT: &str = "upstream_timeout";
    pub const UPSTREAM_UNREACHABLE: &str = "upstream_unreachable";
    pub const UPSTREAM_STATUS: &str = "upstream_status";
    pub const DECODE_FAILED: &str = "decode_failed";
    pub const INVALID_URL: &str = "invalid_url";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_message_embeds_numeric_code_and_reason() {
        let err = UpstreamError::Status {
            status: 404,
            reason: "Not Found".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("404"), "message should carry the code: {message}");
        assert!(message.contains("Not Found"));
    }

    #[test]
    fn timeout_error_names_the_target_url() {
        let err = UpstreamError::Timeout {
            url: "http://localhost:9093/api/v2/alerts".to_string(),
        };
        assert!(err.to_string().contains("/api/v2/alerts"));
        assert_eq!(err.code(), codes::UPSTREAM_TIMEOUT);
    }
}
