//! Shared models and types
//!
//! Types shared across the web API and adapters.

use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub mqtt_enabled: bool,
    pub ws_connections: u64,
}

/// Server status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub cameras_total: usize,
    pub cameras_online: usize,
    pub records_stored: usize,
    pub alerts_total: usize,
    pub dedup_entries: usize,
    pub events_buffered: usize,
    pub ws_connections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_shapes() {
        let ok = ApiResponse::success(42);
        assert!(ok.ok);
        assert_eq!(ok.data, Some(42));
        assert!(ok.error.is_none());

        let err = ApiResponse::<()>::error("boom");
        assert!(!err.ok);
        assert!(err.data.is_none());
        assert_eq!(err.error.as_deref(), Some("boom"));
    }
}
