//! RecordStore - Persistence Sink Seam
//!
//! ## Responsibilities
//!
//! - `RecordStore` trait: the interface the core consumes for durable
//!   record persistence
//! - `InMemoryRecordStore`: capacity-bounded ring buffer implementation
//!   backing the REST read endpoints
//!
//! A database-backed implementation plugs in behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::RwLock;

use crate::envelope::{CanonicalEvent, DataType};

/// Monotonic record identifier assigned at store time
pub type RecordId = u64;

/// Persistence failure. Not acked to retry-capable transports so the
/// message is redelivered.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store rejected record: {0}")]
    Rejected(String),
}

/// One stored canonical record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record_id: RecordId,
    pub message_id: String,
    pub edge_device_id: String,
    pub data_type: DataType,
    /// Device-clock event time
    pub timestamp: DateTime<Utc>,
    /// Server receipt time
    pub received_at: DateTime<Utc>,
    pub transport: String,
    pub payload: Value,
    pub metadata: serde_json::Map<String, Value>,
}

/// Persistence sink interface consumed by the event router
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Durably store one canonical event
    async fn store(&self, event: &CanonicalEvent) -> Result<RecordId, StoreError>;
}

/// Ring buffer of stored records
struct RecordRingBuffer {
    records: VecDeque<StoredRecord>,
    capacity: usize,
    next_id: RecordId,
}

impl RecordRingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    fn push(&mut self, event: &CanonicalEvent) -> RecordId {
        let record_id = self.next_id;
        self.next_id += 1;

        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(StoredRecord {
            record_id,
            message_id: event.envelope.message_id.clone(),
            edge_device_id: event.envelope.edge_device_id.clone(),
            data_type: event.envelope.data_type,
            timestamp: event.envelope.timestamp,
            received_at: event.received_at,
            transport: event.transport.as_str().to_string(),
            payload: event.envelope.payload.clone(),
            metadata: event.envelope.metadata.clone(),
        });
        record_id
    }
}

/// In-memory record store (ring buffer, oldest evicted first)
pub struct InMemoryRecordStore {
    buffer: RwLock<RecordRingBuffer>,
}

impl InMemoryRecordStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(RecordRingBuffer::new(capacity)),
        }
    }

    /// Latest records, newest first
    pub async fn latest(&self, limit: usize) -> Vec<StoredRecord> {
        let buffer = self.buffer.read().await;
        buffer.records.iter().rev().take(limit).cloned().collect()
    }

    /// Latest records for one device, newest first
    pub async fn by_device(&self, edge_device_id: &str, limit: usize) -> Vec<StoredRecord> {
        let buffer = self.buffer.read().await;
        buffer
            .records
            .iter()
            .rev()
            .filter(|r| r.edge_device_id == edge_device_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// All records in insertion (store) order. Intended for tests and
    /// ordering verification.
    pub async fn all_in_order(&self) -> Vec<StoredRecord> {
        let buffer = self.buffer.read().await;
        buffer.records.iter().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        let buffer = self.buffer.read().await;
        buffer.records.len()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn store(&self, event: &CanonicalEvent) -> Result<RecordId, StoreError> {
        let mut buffer = self.buffer.write().await;
        let id = buffer.push(event);
        tracing::debug!(
            record_id = id,
            edge_device_id = %event.envelope.edge_device_id,
            data_type = %event.envelope.data_type,
            "Record stored"
        );
        Ok(id)
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{decode, Transport};
    use serde_json::json;

    fn event(message_id: &str, device: &str) -> CanonicalEvent {
        let raw = serde_json::to_vec(&json!({
            "message_id": message_id,
            "timestamp": "2026-08-26T10:00:00Z",
            "edge_device_id": device,
            "data_type": "detection",
            "payload": {"plate": "ABC123", "confidence": 0.9}
        }))
        .unwrap();
        decode(Transport::Rest, &raw)
            .unwrap()
            .into_canonical(Transport::Rest, Utc::now())
    }

    #[tokio::test]
    async fn test_store_assigns_monotonic_ids() {
        let store = InMemoryRecordStore::new(10);
        let a = store.store(&event("m1", "CAM1")).await.unwrap();
        let b = store.store(&event("m2", "CAM1")).await.unwrap();
        assert!(b > a);
        assert_eq!(store.count().await, 2);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let store = InMemoryRecordStore::new(2);
        store.store(&event("m1", "CAM1")).await.unwrap();
        store.store(&event("m2", "CAM1")).await.unwrap();
        store.store(&event("m3", "CAM1")).await.unwrap();
        let records = store.all_in_order().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message_id, "m2");
    }

    #[tokio::test]
    async fn test_by_device_filters() {
        let store = InMemoryRecordStore::new(10);
        store.store(&event("m1", "CAM1")).await.unwrap();
        store.store(&event("m2", "CAM2")).await.unwrap();
        let records = store.by_device("CAM2", 10).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message_id, "m2");
    }
}
