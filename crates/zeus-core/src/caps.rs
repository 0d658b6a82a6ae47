//! Capability registry: publish and query per-agent liveness.
//!
//! Extensions write their heartbeat every few seconds; the dispatcher gates
//! delivery on the heartbeat being fresh. Queries never fail — an unreadable
//! or undecodable capability file is simply "not fresh".

use crate::clock::epoch_now;
use crate::config::BusConfig;
use crate::schema::{CapabilityHeartbeat, EpochStamp};
use crate::store::{self, StoreError};

/// Outcome of a freshness query.
///
/// The blocked reason is operator-facing text, surfaced verbatim through the
/// dispatcher's notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityHealth {
    Fresh,
    Blocked(String),
}

impl CapabilityHealth {
    pub fn is_fresh(&self) -> bool {
        matches!(self, CapabilityHealth::Fresh)
    }
}

/// Atomically publish `heartbeat` for its agent, stamping `updated_at`.
pub fn publish_heartbeat(
    cfg: &BusConfig,
    mut heartbeat: CapabilityHeartbeat,
) -> Result<(), StoreError> {
    heartbeat.updated_at = Some(EpochStamp::Seconds(epoch_now()));
    let path = cfg.capability_file(&heartbeat.agent_id);
    store::write_json_atomic(&path, &heartbeat)
}

/// Query whether `agent_id` is fresh enough to deliver to.
///
/// Fresh requires: the capability file exists and decodes, `queue_bus` is not
/// disabled, and `now - updated_at` is within `cfg.max_heartbeat_age`. A
/// future-dated heartbeat counts as fresh; clocks on one host can disagree by
/// a write's latency and that must not block delivery.
pub fn capability_health(cfg: &BusConfig, agent_id: &str, now: f64) -> CapabilityHealth {
    let path = cfg.capability_file(agent_id);
    let heartbeat: CapabilityHeartbeat = match store::read_json(&path) {
        Ok(hb) => hb,
        Err(e) if e.is_not_found() => {
            return CapabilityHealth::Blocked(format!(
                "missing capability heartbeat for {agent_id}"
            ));
        }
        Err(_) => {
            return CapabilityHealth::Blocked(format!(
                "unreadable capability heartbeat for {agent_id}"
            ));
        }
    };

    if !heartbeat.supports.queue_bus {
        return CapabilityHealth::Blocked(format!("capability disabled queue_bus for {agent_id}"));
    }

    let Some(updated_at) = heartbeat.updated_at.as_ref().and_then(EpochStamp::as_epoch) else {
        return CapabilityHealth::Blocked(format!(
            "capability heartbeat missing updated_at for {agent_id}"
        ));
    };

    let age = now - updated_at;
    if age < 0.0 {
        return CapabilityHealth::Fresh;
    }

    let max_age = cfg.max_heartbeat_age.as_secs_f64();
    if age > max_age {
        return CapabilityHealth::Blocked(format!(
            "stale capability heartbeat for {agent_id} ({age:.1}s > {max_age:.1}s)"
        ));
    }

    CapabilityHealth::Fresh
}

/// Convenience wrapper over [`capability_health`].
pub fn is_fresh(cfg: &BusConfig, agent_id: &str, now: f64) -> bool {
    capability_health(cfg, agent_id, now).is_fresh()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AgentRole;
    use tempfile::TempDir;

    fn test_cfg(dir: &TempDir) -> BusConfig {
        BusConfig::with_state_dir(dir.path().to_path_buf(), dir.path().join("messages"))
    }

    fn heartbeat(agent_id: &str) -> CapabilityHeartbeat {
        CapabilityHeartbeat {
            agent_id: agent_id.to_string(),
            role: AgentRole::Hoplite,
            session_id: "sess-1".into(),
            session_path: "/tmp/sess-1.json".into(),
            cwd: "/work".into(),
            updated_at: None,
            supports: Default::default(),
            extension: Default::default(),
        }
    }

    #[test]
    fn published_heartbeat_is_fresh() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        publish_heartbeat(&cfg, heartbeat("bob")).unwrap();
        assert!(is_fresh(&cfg, "bob", epoch_now()));
    }

    #[test]
    fn missing_heartbeat_blocks() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let health = capability_health(&cfg, "ghost", epoch_now());
        assert_eq!(
            health,
            CapabilityHealth::Blocked("missing capability heartbeat for ghost".into())
        );
    }

    #[test]
    fn stale_heartbeat_blocks() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        publish_heartbeat(&cfg, heartbeat("bob")).unwrap();

        let later = epoch_now() + cfg.max_heartbeat_age.as_secs_f64() + 1.0;
        assert!(!is_fresh(&cfg, "bob", later));
    }

    #[test]
    fn future_heartbeat_is_fresh() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        publish_heartbeat(&cfg, heartbeat("bob")).unwrap();

        assert!(is_fresh(&cfg, "bob", epoch_now() - 3600.0));
    }

    #[test]
    fn disabled_queue_bus_blocks() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let mut hb = heartbeat("bob");
        hb.supports.queue_bus = false;
        publish_heartbeat(&cfg, hb).unwrap();

        assert!(!is_fresh(&cfg, "bob", epoch_now()));
    }

    #[test]
    fn garbage_capability_file_blocks_without_error() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let path = cfg.capability_file("bob");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"][").unwrap();

        assert!(!is_fresh(&cfg, "bob", epoch_now()));
    }

    #[test]
    fn iso_updated_at_is_accepted() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let path = cfg.capability_file("bob");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            br#"{"agent_id":"bob","updated_at":"2026-01-02T03:04:05Z"}"#,
        )
        .unwrap();

        // Fresh relative to a clock just after the stamp.
        let stamp = EpochStamp::Text("2026-01-02T03:04:05Z".into())
            .as_epoch()
            .unwrap();
        assert!(is_fresh(&cfg, "bob", stamp + 1.0));
        assert!(!is_fresh(&cfg, "bob", stamp + 3600.0));
    }
}
