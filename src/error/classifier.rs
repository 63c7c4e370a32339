//! Maps raw collaborator failures onto [`ErrorKind`].
//!
//! An explicit status code decides on its own when it belongs to a known
//! category. Otherwise status codes embedded in the message are checked,
//! then whole-word textual markers. Within each step categories are checked
//! in a fixed order (auth, quota, connection) and the first match wins;
//! anything else is a stage-local degradation.

use super::{ErrorKind, ProviderError};
use crate::cache::contains_phrase;

const AUTH_STATUS: &[u16] = &[401, 403];
const QUOTA_STATUS: &[u16] = &[402, 429];
const CONNECTION_STATUS: &[u16] = &[502, 503, 504];

const AUTH_MARKERS: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "forbidden",
    "authentication",
    "auth",
    "api key",
    "api_key",
    "invalid key",
];

const QUOTA_MARKERS: &[&str] = &[
    "quota",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "too many requests",
    "insufficient credits",
    "usage limit",
];

const CONNECTION_MARKERS: &[&str] = &[
    "connection",
    "connect",
    "network",
    "dns",
    "unreachable",
    "refused",
    "reset by peer",
];

/// Classify a failure from an optional status code and its message text.
pub fn classify_failure(status: Option<u16>, text: &str) -> ErrorKind {
    if let Some(kind) = status.and_then(|s| kind_for_status(&[s])) {
        return kind;
    }
    if let Some(kind) = kind_for_status(&status_markers(text)) {
        return kind;
    }

    let has_marker = |set: &[&str]| set.iter().any(|m| contains_phrase(text, m));
    if has_marker(AUTH_MARKERS) {
        ErrorKind::ProviderAuthFailed
    } else if has_marker(QUOTA_MARKERS) {
        ErrorKind::ProviderQuotaExceeded
    } else if has_marker(CONNECTION_MARKERS) {
        ErrorKind::ProviderConnectionError
    } else {
        ErrorKind::StageDegraded
    }
}

fn kind_for_status(codes: &[u16]) -> Option<ErrorKind> {
    let any_in = |set: &[u16]| codes.iter().any(|c| set.contains(c));
    if any_in(AUTH_STATUS) {
        Some(ErrorKind::ProviderAuthFailed)
    } else if any_in(QUOTA_STATUS) {
        Some(ErrorKind::ProviderQuotaExceeded)
    } else if any_in(CONNECTION_STATUS) {
        Some(ErrorKind::ProviderConnectionError)
    } else {
        None
    }
}

/// Classify a typed collaborator error.
///
/// Timeouts and malformed responses are stage-local: a slow or confused
/// provider degrades one stage without halting the run.
pub fn classify_provider_error(err: &ProviderError) -> ErrorKind {
    match err {
        ProviderError::Api { status, message } => classify_failure(Some(*status), message),
        ProviderError::Timeout { .. } | ProviderError::InvalidResponse { .. } => {
            ErrorKind::StageDegraded
        }
        ProviderError::Connection { message } => match classify_failure(None, message) {
            ErrorKind::StageDegraded => ErrorKind::ProviderConnectionError,
            kind => kind,
        },
        ProviderError::Unavailable { message } => classify_failure(None, message),
    }
}

/// Three-digit HTTP-like status codes embedded in free text
/// (e.g. "API error: 429 - slow down").
fn status_markers(text: &str) -> Vec<u16> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|tok| tok.len() == 3)
        .filter_map(|tok| tok.parse::<u16>().ok())
        .filter(|code| (400..600).contains(code))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_classify() {
        assert_eq!(classify_failure(Some(401), ""), ErrorKind::ProviderAuthFailed);
        assert_eq!(classify_failure(Some(403), ""), ErrorKind::ProviderAuthFailed);
        assert_eq!(classify_failure(Some(429), ""), ErrorKind::ProviderQuotaExceeded);
        assert_eq!(classify_failure(Some(402), ""), ErrorKind::ProviderQuotaExceeded);
        assert_eq!(
            classify_failure(Some(503), ""),
            ErrorKind::ProviderConnectionError
        );
        assert_eq!(classify_failure(Some(500), "boom"), ErrorKind::StageDegraded);
    }

    #[test]
    fn test_text_markers_classify() {
        assert_eq!(
            classify_failure(None, "Invalid API key provided"),
            ErrorKind::ProviderAuthFailed
        );
        assert_eq!(
            classify_failure(None, "Monthly quota exhausted"),
            ErrorKind::ProviderQuotaExceeded
        );
        assert_eq!(
            classify_failure(None, "Rate limit reached, retry later"),
            ErrorKind::ProviderQuotaExceeded
        );
        assert_eq!(
            classify_failure(None, "Connection refused"),
            ErrorKind::ProviderConnectionError
        );
        assert_eq!(
            classify_failure(None, "something odd happened"),
            ErrorKind::StageDegraded
        );
    }

    #[test]
    fn test_first_match_wins_auth_before_quota() {
        assert_eq!(
            classify_failure(None, "unauthorized: rate limit key revoked"),
            ErrorKind::ProviderAuthFailed
        );
        assert_eq!(
            classify_failure(Some(429), "connection throttled"),
            ErrorKind::ProviderQuotaExceeded
        );
    }

    #[test]
    fn test_markers_match_whole_words_only() {
        assert_eq!(
            classify_failure(Some(500), "failed to load author metadata"),
            ErrorKind::StageDegraded
        );
        assert_eq!(
            classify_failure(None, "upstream oauth2-proxy misbehaved"),
            ErrorKind::StageDegraded
        );
        assert_eq!(
            classify_failure(None, "peer disconnected mid-stream"),
            ErrorKind::StageDegraded
        );
        assert_eq!(
            classify_failure(Some(500), "auth service rejected the token"),
            ErrorKind::ProviderAuthFailed
        );
    }

    #[test]
    fn test_explicit_status_outranks_text_markers() {
        assert_eq!(
            classify_failure(Some(429), "rate limit exceeded for this API key"),
            ErrorKind::ProviderQuotaExceeded
        );
        assert_eq!(
            classify_failure(Some(503), "unauthorized upstream"),
            ErrorKind::ProviderConnectionError
        );
        assert_eq!(
            classify_failure(None, "API error: 429 - rate limit for API key"),
            ErrorKind::ProviderQuotaExceeded
        );
    }

    #[test]
    fn test_embedded_status_code_is_a_marker() {
        assert_eq!(
            classify_failure(None, "API error: 429 - slow down"),
            ErrorKind::ProviderQuotaExceeded
        );
        assert_eq!(
            classify_failure(None, "API error: 401 - nope"),
            ErrorKind::ProviderAuthFailed
        );
        // Non-status numbers are ignored
        assert_eq!(
            classify_failure(None, "processed 1234 items then failed"),
            ErrorKind::StageDegraded
        );
    }

    #[test]
    fn test_provider_error_classification() {
        assert_eq!(
            classify_provider_error(&ProviderError::Timeout { timeout_ms: 100 }),
            ErrorKind::StageDegraded
        );
        assert_eq!(
            classify_provider_error(&ProviderError::Connection {
                message: "tcp closed".to_string()
            }),
            ErrorKind::ProviderConnectionError
        );
        assert_eq!(
            classify_provider_error(&ProviderError::Api {
                status: 429,
                message: "Too Many Requests".to_string()
            }),
            ErrorKind::ProviderQuotaExceeded
        );
        assert_eq!(
            classify_provider_error(&ProviderError::InvalidResponse {
                message: "missing field".to_string()
            }),
            ErrorKind::StageDegraded
        );
        assert_eq!(
            classify_provider_error(&ProviderError::Unavailable {
                message: "API error: 403 - forbidden".to_string()
            }),
            ErrorKind::ProviderAuthFailed
        );
    }
}
