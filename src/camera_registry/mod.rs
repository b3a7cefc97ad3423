//! CameraRegistry - Camera Lifecycle State Machine
//!
//! ## Responsibilities
//!
//! - Track known cameras/checkpoints and their connectivity state
//! - Apply transitions driven by accepted (non-duplicate) events
//! - Time-based Stale/Offline demotion via a background sweep
//!
//! Only transitions are logged to avoid spamming the log on steady
//! traffic. Cameras are never deleted here; deletion belongs to an
//! external administrative action.

mod types;

pub use types::{Camera, ConnectivityState, OfflineRevivalPolicy, RegistryTransition};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::envelope::HealthPayload;

/// Tracks camera registration and connectivity.
///
/// Backed by a sharded map so unrelated devices never contend on a
/// single lock.
pub struct CameraRegistry {
    cameras: DashMap<String, Camera>,
    stale_threshold: Duration,
    offline_threshold: Duration,
    revival: OfflineRevivalPolicy,
}

impl CameraRegistry {
    pub fn new(
        stale_threshold: Duration,
        offline_threshold: Duration,
        revival: OfflineRevivalPolicy,
    ) -> Self {
        Self {
            cameras: DashMap::new(),
            stale_threshold,
            offline_threshold,
            revival,
        }
    }

    /// Apply an accepted registration event. Creates the camera on first
    /// sight; re-registration revives an Offline camera under either
    /// revival policy.
    pub fn record_registration(
        &self,
        camera_id: &str,
        checkpoint_id: &str,
        now: DateTime<Utc>,
    ) -> Option<RegistryTransition> {
        let mut entry = self
            .cameras
            .entry(camera_id.to_string())
            .or_insert_with(|| Camera {
                camera_id: camera_id.to_string(),
                checkpoint_id: None,
                registered: false,
                registration_time: None,
                last_seen_time: now,
                state: ConnectivityState::Unregistered,
                last_health: None,
                last_health_at: None,
            });

        let from = entry.state;
        entry.checkpoint_id = Some(checkpoint_id.to_string());
        entry.registered = true;
        entry.registration_time = Some(now);
        entry.last_seen_time = now;
        entry.state = ConnectivityState::Registered;

        self.transition(camera_id, from, ConnectivityState::Registered)
    }

    /// Apply any other accepted event. Unknown devices are implicitly
    /// created rather than dropped: losing a detection over a missed
    /// registration is worse than a registry inconsistency. Returns the
    /// transition (if any) and whether the camera was implicitly created.
    pub fn record_event(
        &self,
        camera_id: &str,
        now: DateTime<Utc>,
    ) -> (Option<RegistryTransition>, bool) {
        let mut implicitly_created = false;
        let mut entry = self
            .cameras
            .entry(camera_id.to_string())
            .or_insert_with(|| {
                implicitly_created = true;
                Camera {
                    camera_id: camera_id.to_string(),
                    checkpoint_id: None,
                    registered: false,
                    registration_time: None,
                    last_seen_time: now,
                    state: ConnectivityState::Unregistered,
                    last_health: None,
                    last_health_at: None,
                }
            });

        if implicitly_created {
            tracing::warn!(
                camera_id = %camera_id,
                "Event from unknown camera, implicitly created (anomaly)"
            );
        }

        let from = entry.state;
        entry.last_seen_time = now;

        let to = match from {
            ConnectivityState::Offline => match self.revival {
                OfflineRevivalPolicy::AnyEvent => ConnectivityState::Online,
                // Traffic still updates last_seen, but the camera stays
                // Offline until it re-registers
                OfflineRevivalPolicy::RequireRegistration => ConnectivityState::Offline,
            },
            _ => ConnectivityState::Online,
        };
        entry.state = to;
        drop(entry);

        (self.transition(camera_id, from, to), implicitly_created)
    }

    /// Record the latest health payload for a camera
    pub fn record_health(&self, camera_id: &str, payload: HealthPayload, now: DateTime<Utc>) {
        if let Some(mut camera) = self.cameras.get_mut(camera_id) {
            camera.last_health = Some(payload);
            camera.last_health_at = Some(now);
        }
    }

    /// Explicit disconnect signal (WebSocket close). The most timely
    /// liveness signal we have.
    pub fn mark_offline(&self, camera_id: &str) -> Option<RegistryTransition> {
        let from = {
            let mut camera = self.cameras.get_mut(camera_id)?;
            let from = camera.state;
            camera.state = ConnectivityState::Offline;
            from
        };
        self.transition(camera_id, from, ConnectivityState::Offline)
    }

    /// Time-based sweep: demote silent cameras to Stale, then Offline.
    /// Returns the transitions applied.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<RegistryTransition> {
        let mut transitions = Vec::new();
        for mut camera in self.cameras.iter_mut() {
            let silence = now - camera.last_seen_time;
            let from = camera.state;
            let to = match from {
                ConnectivityState::Online | ConnectivityState::Registered
                    if silence > self.offline_threshold =>
                {
                    ConnectivityState::Offline
                }
                ConnectivityState::Online | ConnectivityState::Registered
                    if silence > self.stale_threshold =>
                {
                    ConnectivityState::Stale
                }
                ConnectivityState::Stale if silence > self.offline_threshold => {
                    ConnectivityState::Offline
                }
                _ => continue,
            };
            camera.state = to;
            transitions.push(RegistryTransition {
                camera_id: camera.camera_id.clone(),
                from,
                to,
            });
        }

        for t in &transitions {
            tracing::warn!(
                camera_id = %t.camera_id,
                from = %t.from,
                to = %t.to,
                "Camera connectivity demoted by sweep"
            );
        }
        transitions
    }

    /// Get a camera snapshot
    pub fn get(&self, camera_id: &str) -> Option<Camera> {
        self.cameras.get(camera_id).map(|c| c.clone())
    }

    /// Snapshot of all cameras, ordered by camera_id for stable output
    pub fn list(&self) -> Vec<Camera> {
        let mut cameras: Vec<Camera> = self.cameras.iter().map(|c| c.clone()).collect();
        cameras.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        cameras
    }

    pub fn count(&self) -> usize {
        self.cameras.len()
    }

    pub fn online_count(&self) -> usize {
        self.cameras
            .iter()
            .filter(|c| c.state == ConnectivityState::Online)
            .count()
    }

    fn transition(
        &self,
        camera_id: &str,
        from: ConnectivityState,
        to: ConnectivityState,
    ) -> Option<RegistryTransition> {
        if from == to {
            return None;
        }
        tracing::info!(
            camera_id = %camera_id,
            from = %from,
            to = %to,
            "Camera state transition"
        );
        Some(RegistryTransition {
            camera_id: camera_id.to_string(),
            from,
            to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(revival: OfflineRevivalPolicy) -> CameraRegistry {
        CameraRegistry::new(Duration::seconds(120), Duration::seconds(600), revival)
    }

    #[test]
    fn test_registration_creates_camera() {
        let reg = registry(OfflineRevivalPolicy::AnyEvent);
        let now = Utc::now();
        let t = reg.record_registration("CAM1", "CP1", now).unwrap();
        assert_eq!(t.from, ConnectivityState::Unregistered);
        assert_eq!(t.to, ConnectivityState::Registered);

        let cam = reg.get("CAM1").unwrap();
        assert_eq!(cam.checkpoint_id.as_deref(), Some("CP1"));
        assert!(cam.registered);
    }

    #[test]
    fn test_event_after_registration_goes_online() {
        let reg = registry(OfflineRevivalPolicy::AnyEvent);
        let now = Utc::now();
        reg.record_registration("CAM1", "CP1", now);
        let (t, implicit) = reg.record_event("CAM1", now);
        assert!(!implicit);
        assert_eq!(t.unwrap().to, ConnectivityState::Online);
    }

    #[test]
    fn test_unknown_device_implicitly_created() {
        let reg = registry(OfflineRevivalPolicy::AnyEvent);
        let (t, implicit) = reg.record_event("CAM9", Utc::now());
        assert!(implicit);
        assert_eq!(t.unwrap().to, ConnectivityState::Online);
        assert!(!reg.get("CAM9").unwrap().registered);
    }

    #[test]
    fn test_sweep_stale_then_offline() {
        let reg = registry(OfflineRevivalPolicy::AnyEvent);
        let t0 = Utc::now();
        reg.record_registration("CAM1", "CP1", t0);
        reg.record_event("CAM1", t0);

        // Past stale threshold but before offline threshold
        let transitions = reg.sweep(t0 + Duration::seconds(121));
        assert_eq!(transitions.len(), 1);
        assert_eq!(reg.get("CAM1").unwrap().state, ConnectivityState::Stale);

        // Past offline threshold
        let transitions = reg.sweep(t0 + Duration::seconds(601));
        assert_eq!(transitions.len(), 1);
        assert_eq!(reg.get("CAM1").unwrap().state, ConnectivityState::Offline);
    }

    #[test]
    fn test_sweep_skips_recent_cameras() {
        let reg = registry(OfflineRevivalPolicy::AnyEvent);
        let t0 = Utc::now();
        reg.record_event("CAM1", t0);
        assert!(reg.sweep(t0 + Duration::seconds(60)).is_empty());
        assert_eq!(reg.get("CAM1").unwrap().state, ConnectivityState::Online);
    }

    #[test]
    fn test_stale_camera_revives_on_event() {
        let reg = registry(OfflineRevivalPolicy::AnyEvent);
        let t0 = Utc::now();
        reg.record_event("CAM1", t0);
        reg.sweep(t0 + Duration::seconds(121));
        let (t, _) = reg.record_event("CAM1", t0 + Duration::seconds(130));
        assert_eq!(t.unwrap().to, ConnectivityState::Online);
    }

    #[test]
    fn test_mark_offline() {
        let reg = registry(OfflineRevivalPolicy::AnyEvent);
        let now = Utc::now();
        reg.record_event("CAM1", now);
        let t = reg.mark_offline("CAM1").unwrap();
        assert_eq!(t.to, ConnectivityState::Offline);
    }

    #[test]
    fn test_offline_revival_any_event() {
        let reg = registry(OfflineRevivalPolicy::AnyEvent);
        let now = Utc::now();
        reg.record_event("CAM1", now);
        reg.mark_offline("CAM1");
        let (t, _) = reg.record_event("CAM1", now);
        assert_eq!(t.unwrap().to, ConnectivityState::Online);
    }

    #[test]
    fn test_offline_revival_requires_registration() {
        let reg = registry(OfflineRevivalPolicy::RequireRegistration);
        let now = Utc::now();
        reg.record_registration("CAM1", "CP1", now);
        reg.mark_offline("CAM1");

        // Plain traffic does not revive
        let (t, _) = reg.record_event("CAM1", now);
        assert!(t.is_none());
        assert_eq!(reg.get("CAM1").unwrap().state, ConnectivityState::Offline);

        // Re-registration does
        let t = reg.record_registration("CAM1", "CP1", now).unwrap();
        assert_eq!(t.to, ConnectivityState::Registered);
    }

    #[test]
    fn test_health_recorded() {
        let reg = registry(OfflineRevivalPolicy::AnyEvent);
        let now = Utc::now();
        reg.record_event("CAM1", now);
        reg.record_health(
            "CAM1",
            HealthPayload {
                cpu_percent: Some(42.0),
                memory_percent: None,
                disk_percent: None,
                uptime_sec: Some(3600),
            },
            now,
        );
        let cam = reg.get("CAM1").unwrap();
        assert_eq!(cam.last_health.unwrap().cpu_percent, Some(42.0));
    }
}
