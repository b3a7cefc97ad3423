//! DedupLedger - Cross-Transport Message Deduplication
//!
//! ## Responsibilities
//!
//! - Track recently seen (edge_device_id, message_id) pairs
//! - Collapse duplicate deliveries across transports
//! - Two-phase accept: claim at intake, commit after persistence
//!
//! The ledger is a cache, not a source of truth. Losing an entry only
//! risks re-processing a duplicate, never silent data loss, so eviction
//! under memory pressure is safe.
//!
//! A claim that is never committed expires after a short TTL so a failed
//! delivery (e.g. persistence outage) can be retried by the transport.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Outcome of a claim attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// First sighting within the retention window; caller proceeds
    Fresh,
    /// Already committed; drop, but complete the transport handshake
    Duplicate,
    /// Another delivery of the same message is mid-pipeline. Drop without
    /// acking so the transport retries if that attempt fails.
    InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Claimed,
    Committed,
}

#[derive(Debug, Clone)]
struct DedupEntry {
    state: EntryState,
    /// Claim time while Claimed, commit time once Committed
    stamped_at: DateTime<Utc>,
}

/// Deduplication ledger keyed by (edge_device_id, message_id).
///
/// DashMap sharding gives per-key mutual exclusion: concurrent deliveries
/// of the same message serialize on one shard lock, unrelated devices
/// never contend.
pub struct DedupLedger {
    entries: DashMap<(String, String), DedupEntry>,
    /// How long committed entries are remembered; must cover the longest
    /// plausible redelivery delay across all transports
    retention: Duration,
    /// How long an uncommitted claim blocks redelivery
    claim_ttl: Duration,
}

impl DedupLedger {
    pub fn new(retention: Duration, claim_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
            claim_ttl,
        }
    }

    /// Atomically check-and-claim a message for processing.
    pub fn claim(&self, edge_device_id: &str, message_id: &str, now: DateTime<Utc>) -> Claim {
        let key = (edge_device_id.to_string(), message_id.to_string());
        match self.entries.entry(key) {
            Entry::Vacant(v) => {
                v.insert(DedupEntry {
                    state: EntryState::Claimed,
                    stamped_at: now,
                });
                Claim::Fresh
            }
            Entry::Occupied(mut o) => {
                let entry = o.get_mut();
                match entry.state {
                    EntryState::Committed => {
                        if now - entry.stamped_at > self.retention {
                            // Past the dedup window; treat as a new event
                            entry.state = EntryState::Claimed;
                            entry.stamped_at = now;
                            Claim::Fresh
                        } else {
                            Claim::Duplicate
                        }
                    }
                    EntryState::Claimed => {
                        if now - entry.stamped_at > self.claim_ttl {
                            // Stale claim from a delivery that never finished
                            entry.stamped_at = now;
                            Claim::Fresh
                        } else {
                            Claim::InFlight
                        }
                    }
                }
            }
        }
    }

    /// Mark a claimed message as durably applied. Called only after the
    /// downstream persistence succeeded.
    pub fn commit(&self, edge_device_id: &str, message_id: &str, now: DateTime<Utc>) {
        let key = (edge_device_id.to_string(), message_id.to_string());
        if let Some(mut entry) = self.entries.get_mut(&key) {
            entry.state = EntryState::Committed;
            entry.stamped_at = now;
        }
    }

    /// Drop an uncommitted claim so transport redelivery can retry.
    pub fn release(&self, edge_device_id: &str, message_id: &str) {
        let key = (edge_device_id.to_string(), message_id.to_string());
        self.entries
            .remove_if(&key, |_, entry| entry.state == EntryState::Claimed);
    }

    /// Evict entries older than their window. Runs under the same shard
    /// locks as claim, so it never races a concurrent check.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| match entry.state {
            EntryState::Committed => now - entry.stamped_at <= self.retention,
            EntryState::Claimed => now - entry.stamped_at <= self.claim_ttl,
        });
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            tracing::debug!(evicted = evicted, remaining = self.entries.len(), "Dedup sweep");
        }
        evicted
    }

    /// Number of tracked entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
