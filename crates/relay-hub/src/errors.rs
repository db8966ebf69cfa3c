//! Relay Hub error types.
//!
//! No error in the hub path is process-fatal. Errors map to HTTP status codes
//! for the upgrade endpoint; internal details are logged server-side but not
//! exposed to peers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Relay Hub error type.
///
/// Maps to HTTP status codes on the upgrade path:
/// - `InvalidRole`: `400 Bad Request`
/// - `Protocol`: `400 Bad Request`
/// - `HubUnavailable`: `503 Service Unavailable`
/// - `Internal`: `500 Internal Server Error`
#[derive(Debug, Error)]
pub enum RelayError {
    /// The hub mailbox is closed or the hub dropped its reply.
    #[error("Hub unavailable: {0}")]
    HubUnavailable(String),

    /// Connection requested without a valid `role` parameter.
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    /// Inbound frame could not be turned into an event.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Inbound frame decode/validation errors.
///
/// A protocol error drops the offending frame only; the connection stays open.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload is not a valid inbound event.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Frame exceeds the configured size limit.
    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// Declared role does not match the role the session connected with.
    #[error("Declared role {declared} does not match session role {actual}")]
    RoleMismatch { declared: String, actual: String },
}

/// Outbound queue enqueue failures.
///
/// Enqueue never blocks; a failed enqueue drops the event.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Queue is at capacity.
    #[error("Outbound queue full")]
    Full,

    /// Writer side has gone away.
    #[error("Outbound queue closed")]
    Closed,
}

impl EnqueueError {
    /// Bounded label for the `relay_events_dropped_total` metric.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            EnqueueError::Full => "queue_full",
            EnqueueError::Closed => "queue_closed",
        }
    }
}

impl ProtocolError {
    /// Bounded label for the `relay_frames_rejected_total` metric.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "malformed",
            ProtocolError::FrameTooLarge { .. } => "too_large",
            ProtocolError::RoleMismatch { .. } => "role_mismatch",
        }
    }
}

impl RelayError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidRole(_) | RelayError::Protocol(_) => StatusCode::BAD_REQUEST,
            RelayError::HubUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a peer-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RelayError::InvalidRole(_) => "Invalid role".to_string(),
            RelayError::Protocol(e) => e.to_string(),
            RelayError::HubUnavailable(_) => "Relay is shutting down, please reconnect".to_string(),
            RelayError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            // Log actual error server-side, return generic message to peer
            tracing::warn!(target: "relay.transport.ws", error = %self, "Upgrade request failed");
        }
        (status, self.client_message()).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            RelayError::InvalidRole("admin".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::Protocol(ProtocolError::Malformed("eof".to_string())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::HubUnavailable("closed".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            RelayError::Internal("oops".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = RelayError::Internal("encoder failed near 10.0.0.7:51234".to_string());
        assert!(!err.client_message().contains("10.0.0.7"));
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = RelayError::InvalidRole("superuser".to_string());
        assert_eq!(err.client_message(), "Invalid role");
    }

    #[test]
    fn test_into_response_uses_peer_safe_body() {
        let response = RelayError::InvalidRole("admin".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = RelayError::HubUnavailable("mailbox closed".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_protocol_error_conversion() {
        let err: RelayError = ProtocolError::FrameTooLarge { len: 10, max: 5 }.into();
        assert!(matches!(err, RelayError::Protocol(_)));
        assert_eq!(
            err.to_string(),
            "Protocol error: Frame too large: 10 bytes (max 5)"
        );
    }

    #[test]
    fn test_enqueue_error_reasons() {
        assert_eq!(EnqueueError::Full.reason(), "queue_full");
        assert_eq!(EnqueueError::Closed.reason(), "queue_closed");
        assert_eq!(EnqueueError::Full.to_string(), "Outbound queue full");
    }

    #[test]
    fn test_protocol_error_reasons() {
        assert_eq!(
            ProtocolError::Malformed("eof".to_string()).reason(),
            "malformed"
        );
        assert_eq!(
            ProtocolError::RoleMismatch {
                declared: "master".to_string(),
                actual: "client".to_string()
            }
            .reason(),
            "role_mismatch"
        );
        assert_eq!(
            ProtocolError::FrameTooLarge { len: 10, max: 5 }.reason(),
            "too_large"
        );
    }
}
