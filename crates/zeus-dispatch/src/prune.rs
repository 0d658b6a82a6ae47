//! Age-based pruning of delivery records.
//!
//! Receipts and dispatcher dedup markers are only needed while their
//! envelope lineage can still retry; after the TTL they are noise. Pruning
//! runs from the sweep, best-effort — a file that cannot be examined is
//! skipped, never an error.

use std::path::Path;
use std::time::SystemTime;

use zeus_core::BusConfig;
use zeus_core::store;

/// Remove receipts and receipt-seen markers older than `cfg.receipt_ttl`.
///
/// Age is judged by file mtime: both record kinds are written once and never
/// touched again. Returns the number of files removed.
pub fn prune_delivery_records(cfg: &BusConfig, now: SystemTime) -> usize {
    let ttl = cfg.receipt_ttl;
    let mut removed = 0;
    for root in [cfg.receipts_root(), cfg.receipts_seen_root()] {
        removed += prune_tree(&root, now, ttl);
    }
    if removed > 0 {
        tracing::debug!("pruned {removed} expired delivery record(s)");
    }
    removed
}

fn prune_tree(root: &Path, now: SystemTime, ttl: std::time::Duration) -> usize {
    let Ok(agents) = std::fs::read_dir(root) else {
        return 0;
    };

    let mut removed = 0;
    for agent_dir in agents.filter_map(|e| e.ok()) {
        let Ok(entries) = std::fs::read_dir(agent_dir.path()) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let expired = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .map(|age| age > ttl)
                .unwrap_or(false);
            if expired && store::unlink(&path).is_ok() {
                removed += 1;
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_cfg(dir: &TempDir) -> BusConfig {
        BusConfig::with_state_dir(dir.path().to_path_buf(), dir.path().join("messages"))
    }

    #[test]
    fn old_records_go_fresh_records_stay() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);

        let receipt = cfg.receipt_file("bob", "E1");
        std::fs::create_dir_all(receipt.parent().unwrap()).unwrap();
        std::fs::write(&receipt, b"{}").unwrap();

        let marker = cfg.receipt_seen_marker("bob", "E1");
        std::fs::create_dir_all(marker.parent().unwrap()).unwrap();
        std::fs::write(&marker, b"").unwrap();

        // "Now" well before the files' mtime: nothing is expired.
        assert_eq!(prune_delivery_records(&cfg, SystemTime::UNIX_EPOCH), 0);
        assert!(receipt.exists());

        // "Now" far in the future: both records age out.
        let later = SystemTime::now() + cfg.receipt_ttl + Duration::from_secs(60);
        assert_eq!(prune_delivery_records(&cfg, later), 2);
        assert!(!receipt.exists());
        assert!(!marker.exists());
    }

    #[test]
    fn missing_roots_are_quiet() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        assert_eq!(prune_delivery_records(&cfg, SystemTime::now()), 0);
    }
}
