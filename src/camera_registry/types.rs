//! CameraRegistry data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::HealthPayload;

/// Camera connectivity state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    /// Implicitly created, no registration event seen yet
    Unregistered,
    /// Registration accepted, no further traffic yet
    Registered,
    /// Recent accepted event
    Online,
    /// Silent beyond the stale threshold
    Stale,
    /// Silent beyond the offline threshold, or explicit disconnect
    Offline,
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectivityState::Unregistered => "unregistered",
            ConnectivityState::Registered => "registered",
            ConnectivityState::Online => "online",
            ConnectivityState::Stale => "stale",
            ConnectivityState::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Whether an Offline camera revives on any accepted event or only on
/// explicit re-registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OfflineRevivalPolicy {
    #[default]
    AnyEvent,
    RequireRegistration,
}

impl OfflineRevivalPolicy {
    /// Parse the env-var form. Unknown values fall back to the default.
    pub fn parse(s: &str) -> Self {
        match s {
            "require_registration" => OfflineRevivalPolicy::RequireRegistration,
            "any_event" => OfflineRevivalPolicy::AnyEvent,
            other => {
                tracing::warn!(value = %other, "Unknown OFFLINE_REVIVAL value, using any_event");
                OfflineRevivalPolicy::AnyEvent
            }
        }
    }
}

/// Camera entity tracked by the registry. Never deleted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub camera_id: String,
    pub checkpoint_id: Option<String>,
    /// True once a registration event has been accepted
    pub registered: bool,
    pub registration_time: Option<DateTime<Utc>>,
    pub last_seen_time: DateTime<Utc>,
    pub state: ConnectivityState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health: Option<HealthPayload>,
    pub last_health_at: Option<DateTime<Utc>>,
}

/// Registry state transition, reported so callers can log or broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryTransition {
    pub camera_id: String,
    pub from: ConnectivityState,
    pub to: ConnectivityState,
}
