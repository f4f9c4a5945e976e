//! Map HTTP outcomes onto transient/permanent delivery failures.

use pulse_core::error::DeliveryError;
use reqwest::StatusCode;

/// Timeouts, 408, 429 and 5xx are worth a retry; other 4xx are not.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

pub fn from_status(channel: &str, status: StatusCode, detail: &str) -> DeliveryError {
    let message = if detail.is_empty() {
        format!("{channel} returned {status}")
    } else {
        format!("{channel} returned {status}: {detail}")
    };
    if is_transient_status(status) {
        DeliveryError::transient(message)
    } else {
        DeliveryError::permanent(message)
    }
}

/// Transport-level failure. Building the request is the only permanent case.
pub fn from_reqwest(channel: &str, e: &reqwest::Error) -> DeliveryError {
    if let Some(status) = e.status() {
        return from_status(channel, status, "");
    }
    if e.is_builder() {
        DeliveryError::permanent(format!("{channel} request invalid: {e}"))
    } else if e.is_timeout() {
        DeliveryError::transient(format!("{channel} timed out: {e}"))
    } else {
        DeliveryError::transient(format!("{channel} send failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::error::DeliveryErrorKind;

    #[test]
    fn test_status_classification() {
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_from_status_message() {
        let err = from_status("telegram", StatusCode::UNAUTHORIZED, "Unauthorized");
        assert_eq!(err.kind, DeliveryErrorKind::Permanent);
        assert!(err.message.contains("401"));
        assert!(err.message.contains("Unauthorized"));
    }
}
