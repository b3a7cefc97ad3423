//! BlacklistMatcher - Plate Normalization and Matching
//!
//! ## Responsibilities
//!
//! - Normalize detected plate strings (case, separators, OCR confusables)
//! - Evaluate detections against a blacklist snapshot
//!
//! Matching is a pure function of (payload, snapshot). The snapshot is
//! supplied by the caller through `BlacklistSource`; staleness is the
//! caller's concern. The blacklist itself is owned by an external
//! administrative store; `InMemoryBlacklist` holds the local snapshot.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::envelope::DetectionPayload;

/// One blacklist entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub plate_pattern: String,
    pub reason: String,
    pub active: bool,
}

/// A positive blacklist match
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlacklistMatch {
    pub matched_pattern: String,
    pub reason: String,
    pub normalized_plate: String,
}

/// Snapshot provider for the current blacklist
#[async_trait]
pub trait BlacklistSource: Send + Sync {
    async fn current_snapshot(&self) -> Vec<BlacklistEntry>;
}

/// Normalize a plate string for comparison: uppercase, strip separators
/// and whitespace, fold common OCR-confusable characters onto digits.
pub fn normalize_plate(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '.' && *c != '_')
        .map(|c| c.to_ascii_uppercase())
        .map(|c| match c {
            'O' => '0',
            'I' | 'L' => '1',
            'S' => '5',
            'B' => '8',
            'Z' => '2',
            'Q' => '0',
            other => other,
        })
        .collect()
}

/// Evaluate a detection against a blacklist snapshot.
///
/// Returns the first active entry whose normalized pattern equals the
/// normalized detected plate. Inactive entries never match.
pub fn evaluate(payload: &DetectionPayload, snapshot: &[BlacklistEntry]) -> Option<BlacklistMatch> {
    let normalized = normalize_plate(&payload.plate);
    snapshot
        .iter()
        .filter(|entry| entry.active)
        .find(|entry| normalize_plate(&entry.plate_pattern) == normalized)
        .map(|entry| BlacklistMatch {
            matched_pattern: entry.plate_pattern.clone(),
            reason: entry.reason.clone(),
            normalized_plate: normalized.clone(),
        })
}

/// In-memory blacklist snapshot, replaceable via the admin API
pub struct InMemoryBlacklist {
    entries: RwLock<Vec<BlacklistEntry>>,
}

impl InMemoryBlacklist {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Replace the whole snapshot
    pub async fn replace(&self, entries: Vec<BlacklistEntry>) {
        let count = entries.len();
        *self.entries.write().await = entries;
        tracing::info!(entries = count, "Blacklist snapshot replaced");
    }

    pub async fn list(&self) -> Vec<BlacklistEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl BlacklistSource for InMemoryBlacklist {
    async fn current_snapshot(&self) -> Vec<BlacklistEntry> {
        self.entries.read().await.clone()
    }
}

impl Default for InMemoryBlacklist {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(plate: &str) -> DetectionPayload {
        DetectionPayload {
            plate: plate.to_string(),
            confidence: 0.9,
            image_ref: None,
        }
    }

    fn entry(pattern: &str, active: bool) -> BlacklistEntry {
        BlacklistEntry {
            plate_pattern: pattern.to_string(),
            reason: "stolen vehicle".to_string(),
            active,
        }
    }

    #[test]
    fn test_normalize_strips_separators_and_case() {
        assert_eq!(normalize_plate("ab-123"), "A8123");
        assert_eq!(normalize_plate(" xy z.99 "), "XY299");
    }

    #[test]
    fn test_normalize_ocr_confusables() {
        assert_eq!(normalize_plate("O0I1L"), "00111");
        assert_eq!(normalize_plate("SQZB"), "5028");
    }

    #[test]
    fn test_match_normalized_plate() {
        let snapshot = vec![entry("AB123", true)];
        // "ab-123" normalizes to A8123 (B folds to 8), and so does the
        // pattern, so these meet in normalized space
        let hit = evaluate(&detection("ab-123"), &snapshot).unwrap();
        assert_eq!(hit.matched_pattern, "AB123");
        assert_eq!(hit.reason, "stolen vehicle");
    }

    #[test]
    fn test_inactive_entry_never_matches() {
        let snapshot = vec![entry("AB123", false)];
        assert!(evaluate(&detection("AB123"), &snapshot).is_none());
    }

    #[test]
    fn test_no_match() {
        let snapshot = vec![entry("AB123", true)];
        assert!(evaluate(&detection("XYZ999"), &snapshot).is_none());
    }

    #[test]
    fn test_first_active_match_wins() {
        let snapshot = vec![
            entry("XYZ999", false),
            entry("xyz-999", true),
        ];
        let hit = evaluate(&detection("XYZ999"), &snapshot).unwrap();
        assert_eq!(hit.matched_pattern, "xyz-999");
    }

    #[tokio::test]
    async fn test_in_memory_snapshot_replace() {
        let blacklist = InMemoryBlacklist::new();
        assert!(blacklist.current_snapshot().await.is_empty());
        blacklist.replace(vec![entry("AB123", true)]).await;
        assert_eq!(blacklist.current_snapshot().await.len(), 1);
    }
}
