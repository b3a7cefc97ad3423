//! Error handling for the LPR ingestion server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::envelope::DecodeError;
use crate::record_store::StoreError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the REST handlers. The WebSocket and MQTT
/// adapters speak their own ack vocabularies and do not go through
/// this type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Envelope decode / schema failure
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A concurrent delivery of the same message is mid-pipeline
    #[error("Delivery in flight: {0}")]
    InFlight(String),

    /// Downstream persistence failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::Decode(e) => (StatusCode::BAD_REQUEST, "DECODE_ERROR", e.to_string()),
            Error::InFlight(msg) => (StatusCode::CONFLICT, "IN_FLIGHT", msg.clone()),
            Error::Store(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_ERROR",
                e.to_string(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: Error) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(Error::NotFound("camera CAM9".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(Error::Validation("empty plate_pattern".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(Error::Decode(DecodeError::MissingField("payload"))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(Error::InFlight("m1".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(Error::Store(StoreError::Unavailable("down".to_string()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
