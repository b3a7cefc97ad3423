//! AlertLog - Blacklist Alert Recording (Ring Buffer)
//!
//! Alerts emitted by the blacklist matcher. Alerting never blocks or
//! delays the underlying detection record's persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// One emitted alert, carrying the original detection and the matched
/// entry's reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub alert_id: u64,
    pub camera_id: String,
    pub plate: String,
    pub normalized_plate: String,
    pub matched_pattern: String,
    pub reason: String,
    /// Device-clock detection time
    pub detected_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

struct AlertRingBuffer {
    alerts: VecDeque<AlertEvent>,
    capacity: usize,
    next_id: u64,
}

impl AlertRingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            alerts: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    fn push(&mut self, mut alert: AlertEvent) -> u64 {
        alert.alert_id = self.next_id;
        self.next_id += 1;

        if self.alerts.len() >= self.capacity {
            self.alerts.pop_front();
        }
        let id = alert.alert_id;
        self.alerts.push_back(alert);
        id
    }
}

/// AlertLog instance
pub struct AlertLog {
    buffer: RwLock<AlertRingBuffer>,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(AlertRingBuffer::new(capacity)),
        }
    }

    /// Record an alert, returning its id
    pub async fn push(&self, alert: AlertEvent) -> u64 {
        let mut buffer = self.buffer.write().await;
        let id = buffer.push(alert);
        tracing::warn!(alert_id = id, "Blacklist alert recorded");
        id
    }

    /// Latest alerts, newest first
    pub async fn latest(&self, limit: usize) -> Vec<AlertEvent> {
        let buffer = self.buffer.read().await;
        buffer.alerts.iter().rev().take(limit).cloned().collect()
    }

    pub async fn count(&self) -> usize {
        let buffer = self.buffer.read().await;
        buffer.alerts.len()
    }
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::new(1000)
    }
}
