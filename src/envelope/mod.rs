//! Envelope Codec - Wire Envelope Validation
//!
//! ## Responsibilities
//!
//! - Parse the standard JSON envelope from any transport
//! - Validate presence and type of the five top-level fields
//! - Validate the payload against the per-data_type schema
//! - Produce the canonical in-memory event consumed downstream
//!
//! Decoding is a pure function; structural checks only. Semantically odd
//! but well-formed data (e.g. confidence exactly 0) passes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transport a message arrived on. Used for logging and the canonical
/// record only; the core never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    WebSocket,
    Mqtt,
    Rest,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::WebSocket => "websocket",
            Transport::Mqtt => "mqtt",
            Transport::Rest => "rest",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical event type carried by an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Detection,
    Health,
    Config,
    Control,
    Registration,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Detection => "detection",
            DataType::Health => "health",
            DataType::Config => "config",
            DataType::Control => "control",
            DataType::Registration => "registration",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "detection" => Some(DataType::Detection),
            "health" => Some(DataType::Health),
            "config" => Some(DataType::Config),
            "control" => Some(DataType::Control),
            "registration" => Some(DataType::Registration),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode failure. Redelivery cannot fix malformed input, so adapters
/// ack the transport delivery and drop the message on these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Payload is not valid JSON
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Envelope is not a JSON object
    #[error("envelope must be a JSON object")]
    NotAnObject,

    /// Required top-level field missing
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Top-level field has the wrong type
    #[error("field {field}: expected {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    /// data_type is not a known enum value
    #[error("unknown data_type: {0}")]
    UnknownType(String),

    /// Payload violates the per-data_type schema
    #[error("schema violation in payload field {field}: {message}")]
    SchemaViolation { field: String, message: String },
}

/// Canonical wire envelope, transport-agnostic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Globally unique per logical event; dedup key together with
    /// edge_device_id
    pub message_id: String,
    /// Device-clock time of event occurrence
    pub timestamp: DateTime<Utc>,
    pub edge_device_id: String,
    pub data_type: DataType,
    pub payload: Value,
    /// Opaque key-value bag, forwarded uninterpreted
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

/// Detection payload schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionPayload {
    pub plate: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

/// Health payload schema. All metrics optional; a device reports what it has.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_sec: Option<u64>,
}

/// Registration payload schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationPayload {
    pub camera_id: String,
    pub checkpoint_id: String,
}

/// Canonical event: one accepted envelope plus server-side receipt context
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalEvent {
    pub envelope: Envelope,
    pub transport: Transport,
    pub received_at: DateTime<Utc>,
}

impl Envelope {
    /// Wrap into the canonical form routed to downstream sinks
    pub fn into_canonical(self, transport: Transport, received_at: DateTime<Utc>) -> CanonicalEvent {
        CanonicalEvent {
            envelope: self,
            transport,
            received_at,
        }
    }

    /// Typed view of a detection payload. Only valid after decode()
    /// succeeded for a detection envelope.
    pub fn detection_payload(&self) -> Result<DetectionPayload, DecodeError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| DecodeError::SchemaViolation {
            field: "payload".to_string(),
            message: e.to_string(),
        })
    }

    /// Typed view of a health payload
    pub fn health_payload(&self) -> Result<HealthPayload, DecodeError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| DecodeError::SchemaViolation {
            field: "payload".to_string(),
            message: e.to_string(),
        })
    }

    /// Typed view of a registration payload
    pub fn registration_payload(&self) -> Result<RegistrationPayload, DecodeError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| DecodeError::SchemaViolation {
            field: "payload".to_string(),
            message: e.to_string(),
        })
    }
}

/// Decode raw bytes from any transport into a validated envelope.
///
/// `transport` is used only for log context; decoding is identical for
/// every transport.
pub fn decode(transport: Transport, raw: &[u8]) -> Result<Envelope, DecodeError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let message_id = required_string(obj, "message_id")?;
    let edge_device_id = required_string(obj, "edge_device_id")?;

    let timestamp_raw = obj
        .get("timestamp")
        .ok_or(DecodeError::MissingField("timestamp"))?
        .as_str()
        .ok_or(DecodeError::InvalidField {
            field: "timestamp",
            expected: "ISO8601 string",
        })?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp_raw)
        .map_err(|_| DecodeError::InvalidField {
            field: "timestamp",
            expected: "ISO8601 string",
        })?
        .with_timezone(&Utc);

    let data_type_raw = obj
        .get("data_type")
        .ok_or(DecodeError::MissingField("data_type"))?
        .as_str()
        .ok_or(DecodeError::InvalidField {
            field: "data_type",
            expected: "string",
        })?;
    let data_type = DataType::parse(data_type_raw)
        .ok_or_else(|| DecodeError::UnknownType(data_type_raw.to_string()))?;

    let payload = obj
        .get("payload")
        .ok_or(DecodeError::MissingField("payload"))?;
    if !payload.is_object() {
        return Err(DecodeError::InvalidField {
            field: "payload",
            expected: "object",
        });
    }

    let metadata = match obj.get("metadata") {
        None | Some(Value::Null) => serde_json::Map::new(),
        Some(Value::Object(m)) => m.clone(),
        Some(_) => {
            return Err(DecodeError::InvalidField {
                field: "metadata",
                expected: "object",
            })
        }
    };

    validate_payload(data_type, payload)?;

    tracing::trace!(
        transport = %transport,
        message_id = %message_id,
        edge_device_id = %edge_device_id,
        data_type = %data_type,
        "Envelope decoded"
    );

    Ok(Envelope {
        message_id,
        timestamp,
        edge_device_id,
        data_type,
        payload: payload.clone(),
        metadata,
    })
}

fn required_string(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<String, DecodeError> {
    let v = obj.get(field).ok_or(DecodeError::MissingField(field))?;
    let s = v.as_str().ok_or(DecodeError::InvalidField {
        field,
        expected: "string",
    })?;
    if s.is_empty() {
        return Err(DecodeError::SchemaViolation {
            field: field.to_string(),
            message: "must not be empty".to_string(),
        });
    }
    Ok(s.to_string())
}

/// Per-data_type payload schema validation. Structural checks only.
fn validate_payload(data_type: DataType, payload: &Value) -> Result<(), DecodeError> {
    match data_type {
        DataType::Detection => {
            let plate = payload
                .get("plate")
                .and_then(Value::as_str)
                .ok_or_else(|| DecodeError::SchemaViolation {
                    field: "plate".to_string(),
                    message: "required string".to_string(),
                })?;
            if plate.trim().is_empty() {
                return Err(DecodeError::SchemaViolation {
                    field: "plate".to_string(),
                    message: "must not be empty".to_string(),
                });
            }
            let confidence = payload
                .get("confidence")
                .and_then(Value::as_f64)
                .ok_or_else(|| DecodeError::SchemaViolation {
                    field: "confidence".to_string(),
                    message: "required number".to_string(),
                })?;
            if !(0.0..=1.0).contains(&confidence) {
                return Err(DecodeError::SchemaViolation {
                    field: "confidence".to_string(),
                    message: "must be in [0, 1]".to_string(),
                });
            }
            if let Some(image_ref) = payload.get("image_ref") {
                if !image_ref.is_string() && !image_ref.is_null() {
                    return Err(DecodeError::SchemaViolation {
                        field: "image_ref".to_string(),
                        message: "must be a string".to_string(),
                    });
                }
            }
            Ok(())
        }
        DataType::Health => {
            for field in ["cpu_percent", "memory_percent", "disk_percent"] {
                if let Some(v) = payload.get(field) {
                    if v.is_null() {
                        continue;
                    }
                    let n = v.as_f64().ok_or_else(|| DecodeError::SchemaViolation {
                        field: field.to_string(),
                        message: "must be a number".to_string(),
                    })?;
                    if !(0.0..=100.0).contains(&n) {
                        return Err(DecodeError::SchemaViolation {
                            field: field.to_string(),
                            message: "must be in [0, 100]".to_string(),
                        });
                    }
                }
            }
            if let Some(v) = payload.get("uptime_sec") {
                if !v.is_null() && v.as_u64().is_none() {
                    return Err(DecodeError::SchemaViolation {
                        field: "uptime_sec".to_string(),
                        message: "must be a non-negative integer".to_string(),
                    });
                }
            }
            Ok(())
        }
        DataType::Registration => {
            for field in ["camera_id", "checkpoint_id"] {
                let s = payload
                    .get(field)
                    .and_then(Value::as_str)
                    .ok_or_else(|| DecodeError::SchemaViolation {
                        field: field.to_string(),
                        message: "required string".to_string(),
                    })?;
                if s.is_empty() {
                    return Err(DecodeError::SchemaViolation {
                        field: field.to_string(),
                        message: "must not be empty".to_string(),
                    });
                }
            }
            Ok(())
        }
        // Config and control payloads are opaque to the core; the
        // top-level object check is all we require.
        DataType::Config | DataType::Control => Ok(()),
    }
}
