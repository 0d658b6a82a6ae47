//! Per-agent processed-id ledger.
//!
//! The ledger is the at-most-once guarantee: an extension checks it before
//! submitting a message to its runtime and persists the id after a successful
//! submit, so duplicates are absorbed across process restarts. Each agent's
//! ledger has exactly one writer (that agent's extension).
//!
//! The whole file is rewritten on each accept. That is fine up to a few
//! thousand ids; the trim bounds below keep it there.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::clock::{epoch_millis, epoch_now};
use crate::config::BusConfig;
use crate::ids::millis_prefix;
use crate::store::{self, StoreError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    updated_at: f64,
    #[serde(default)]
    ids: Vec<String>,
}

/// Durable monotone set of message ids already submitted for one agent.
///
/// Ids only leave through age/count pruning; a pruned id is old enough that
/// its envelope lineage is long gone.
#[derive(Debug)]
pub struct ProcessedLedger {
    path: PathBuf,
    ids: BTreeSet<String>,
    max_ids: usize,
    max_age_millis: u64,
}

impl ProcessedLedger {
    /// Load the ledger for `agent_id`, once per process lifetime.
    ///
    /// A missing file is an empty ledger. A corrupt file is also treated as
    /// empty (with a warning): the receipts already written keep the
    /// dispatcher from re-delivering old envelopes, and refusing to start
    /// would wedge the inbox entirely.
    pub fn load(cfg: &BusConfig, agent_id: &str) -> Self {
        let path = cfg.processed_ledger_file(agent_id);
        let ids = match store::read_json::<LedgerFile>(&path) {
            Ok(file) => file.ids.into_iter().collect(),
            Err(e) if e.is_not_found() => BTreeSet::new(),
            Err(e) => {
                tracing::warn!("resetting unreadable processed ledger {}: {e}", path.display());
                BTreeSet::new()
            }
        };
        Self {
            path,
            ids,
            max_ids: cfg.ledger_max_ids,
            max_age_millis: cfg.ledger_max_age.as_millis() as u64,
        }
    }

    /// Whether `id` was already submitted.
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id.trim())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Record `id` as submitted and persist the whole ledger atomically.
    ///
    /// Idempotent: re-inserting a known id still persists, so a previously
    /// failed persist converges on the duplicate path of the next pump.
    pub fn insert_and_persist(&mut self, id: &str) -> Result<(), StoreError> {
        self.ids.insert(id.trim().to_string());
        self.trim();
        let file = LedgerFile {
            updated_at: epoch_now(),
            ids: self.ids.iter().cloned().collect(),
        };
        store::write_json_atomic(&self.path, &file)
    }

    /// Apply the retention bounds: newest `max_ids` by id order, and ids with
    /// a millisecond prefix older than `max_age_millis` are dropped.
    ///
    /// Sortable ids embed their creation time, so "newest" and lexical order
    /// agree; foreign ids (no prefix) are only subject to the count bound.
    fn trim(&mut self) {
        let now = epoch_millis();
        let cutoff = now.saturating_sub(self.max_age_millis);
        self.ids.retain(|id| match millis_prefix(id) {
            Some(millis) => millis >= cutoff,
            None => true,
        });

        while self.ids.len() > self.max_ids {
            let oldest = self.ids.iter().next().cloned();
            match oldest {
                Some(id) => {
                    self.ids.remove(&id);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_cfg(dir: &TempDir) -> BusConfig {
        BusConfig::with_state_dir(dir.path().to_path_buf(), dir.path().join("messages"))
    }

    #[test]
    fn insert_then_contains() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let mut ledger = ProcessedLedger::load(&cfg, "carol");

        assert!(!ledger.contains("E5"));
        ledger.insert_and_persist("E5").unwrap();
        assert!(ledger.contains("E5"));
    }

    #[test]
    fn survives_restart() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        {
            let mut ledger = ProcessedLedger::load(&cfg, "carol");
            ledger.insert_and_persist("E5").unwrap();
        }
        let ledger = ProcessedLedger::load(&cfg, "carol");
        assert!(ledger.contains("E5"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn reinsert_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let mut ledger = ProcessedLedger::load(&cfg, "carol");
        ledger.insert_and_persist("E5").unwrap();
        ledger.insert_and_persist("E5").unwrap();
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn file_format_is_sorted_ids() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let mut ledger = ProcessedLedger::load(&cfg, "carol");
        ledger.insert_and_persist("b").unwrap();
        ledger.insert_and_persist("a").unwrap();

        let raw = std::fs::read_to_string(cfg.processed_ledger_file("carol")).unwrap();
        let file: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(file["ids"], serde_json::json!(["a", "b"]));
        assert!(file["updated_at"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn corrupt_ledger_resets_empty() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let path = cfg.processed_ledger_file("carol");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{oops").unwrap();

        let ledger = ProcessedLedger::load(&cfg, "carol");
        assert!(ledger.is_empty());
    }

    #[test]
    fn count_bound_drops_oldest() {
        let dir = TempDir::new().unwrap();
        let mut cfg = test_cfg(&dir);
        cfg.ledger_max_ids = 3;
        let mut ledger = ProcessedLedger::load(&cfg, "carol");

        for i in 0..5 {
            ledger.insert_and_persist(&format!("{:013}-x", 1_000 + i)).unwrap();
        }
        assert_eq!(ledger.len(), 3);
        assert!(!ledger.contains("0000000001000-x"));
        assert!(ledger.contains("0000000001004-x"));
    }

    #[test]
    fn age_bound_drops_prefixed_ids_only() {
        let dir = TempDir::new().unwrap();
        let mut cfg = test_cfg(&dir);
        cfg.ledger_max_age = std::time::Duration::from_secs(3600);
        let mut ledger = ProcessedLedger::load(&cfg, "carol");

        // One ancient prefixed id, one foreign id, one current id.
        ledger.insert_and_persist("0000000000001-ancient").unwrap();
        ledger.insert_and_persist("E5").unwrap();
        let fresh = crate::ids::sortable_id();
        ledger.insert_and_persist(&fresh).unwrap();

        assert!(!ledger.contains("0000000000001-ancient"));
        assert!(ledger.contains("E5"));
        assert!(ledger.contains(&fresh));
    }
}
