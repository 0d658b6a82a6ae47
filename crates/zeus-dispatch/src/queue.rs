//! Durable outbound envelope queue.
//!
//! Layout under `STATE_DIR/zeus-message-queue/`:
//!
//! - `new/`      pending envelopes
//! - `inflight/` envelopes claimed by a drain pass
//!
//! An envelope lives in exactly one of the two directories; the transition
//! is an atomic rename, so two dispatcher processes can share the tree and
//! merely race on claims. Removal happens only after every resolved
//! recipient has a receipt (or is permanently blocked).

use std::path::PathBuf;

use zeus_core::clock::epoch_now;
use zeus_core::schema::{AgentRole, DeliverAs, Envelope, TargetExpr};
use zeus_core::store::{self, StoreError};
use zeus_core::{BusConfig, ids};

/// Inputs to [`enqueue`], supplied by the CLI or a dashboard action.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub source_agent_id: String,
    pub source_name: String,
    pub source_role: AgentRole,
    pub target: String,
    pub message: String,
    pub deliver_as: DeliverAs,
}

/// Errors surfaced to the sender at enqueue time.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("message is empty")]
    EmptyMessage,
    #[error("sender has no agent id")]
    MissingSender,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persist a new envelope into `new/` and return its id.
///
/// Never blocks on recipients and never contacts them; a dispatcher that
/// starts later will drain whatever is queued. The target expression is
/// parsed here only to reject garbage early — resolution happens at
/// dispatch time.
pub fn enqueue(cfg: &BusConfig, request: &EnqueueRequest) -> Result<String, EnqueueError> {
    if ids::sanitize_agent_id(&request.source_agent_id).is_empty() {
        return Err(EnqueueError::MissingSender);
    }
    if request.message.trim().is_empty() {
        return Err(EnqueueError::EmptyMessage);
    }
    TargetExpr::parse(&request.target).map_err(EnqueueError::InvalidTarget)?;

    let envelope = Envelope::new(
        &request.source_agent_id,
        &request.source_name,
        request.source_role,
        &request.target,
        &request.message,
        request.deliver_as,
    );

    let path = cfg.queue_new_dir().join(envelope.file_name());
    store::write_json_atomic(&path, &envelope)?;
    Ok(envelope.id)
}

/// File names currently pending in `new/`, in creation order.
pub fn list_new(cfg: &BusConfig) -> Result<Vec<String>, StoreError> {
    store::list_sorted(&cfg.queue_new_dir(), ".json")
}

/// File names currently claimed in `inflight/`, in creation order.
pub fn list_inflight(cfg: &BusConfig) -> Result<Vec<String>, StoreError> {
    store::list_sorted(&cfg.queue_inflight_dir(), ".json")
}

/// Claim a pending envelope for one dispatch pass.
///
/// Returns the inflight path, or `None` when another claimant won.
pub fn claim(cfg: &BusConfig, file_name: &str) -> Result<Option<PathBuf>, StoreError> {
    let src = cfg.queue_new_dir().join(file_name);
    let dst = cfg.queue_inflight_dir().join(file_name);
    Ok(store::claim_move(&src, &dst)?.then_some(dst))
}

/// Remove a fully-delivered (or poison) envelope from `inflight/`.
pub fn ack(cfg: &BusConfig, file_name: &str) -> Result<(), StoreError> {
    store::unlink(&cfg.queue_inflight_dir().join(file_name))
}

/// Send a claimed envelope back to `new/` with updated retry state.
///
/// The rewrite happens while the file is still in `inflight/`, then the move
/// publishes it; a crash between the two leaves the envelope inflight for
/// lease reclaim, never lost.
pub fn requeue(
    cfg: &BusConfig,
    file_name: &str,
    envelope: &mut Envelope,
    delay_seconds: f64,
) -> Result<(), StoreError> {
    let now = epoch_now();
    envelope.attempts += 1;
    envelope.updated_at = now;
    envelope.next_attempt_at = now + delay_seconds.max(0.0);

    let inflight = cfg.queue_inflight_dir().join(file_name);
    store::write_json_atomic(&inflight, envelope)?;
    store::claim_move(&inflight, &cfg.queue_new_dir().join(file_name))?;
    Ok(())
}

/// Rewrite a claimed envelope in place (resolution cache updates).
pub fn rewrite_inflight(
    cfg: &BusConfig,
    file_name: &str,
    envelope: &Envelope,
) -> Result<(), StoreError> {
    store::write_json_atomic(&cfg.queue_inflight_dir().join(file_name), envelope)
}

/// Read a claimed envelope.
pub fn read_inflight(cfg: &BusConfig, file_name: &str) -> Result<Envelope, StoreError> {
    store::read_json(&cfg.queue_inflight_dir().join(file_name))
}

/// Read a pending envelope.
pub fn read_new(cfg: &BusConfig, file_name: &str) -> Result<Envelope, StoreError> {
    store::read_json(&cfg.queue_new_dir().join(file_name))
}

/// Whether the envelope (by queue file name) is still present in either
/// queue directory. Used by `--wait-delivery`.
pub fn is_pending(cfg: &BusConfig, file_name: &str) -> bool {
    cfg.queue_new_dir().join(file_name).exists()
        || cfg.queue_inflight_dir().join(file_name).exists()
}

/// Move inflight envelopes whose lease expired back to `new/`.
///
/// Handles a dispatcher that died mid-pass. With `lease_seconds <= 0` every
/// inflight envelope is reclaimed (startup recovery). Undecodable inflight
/// files are deleted as poison; the count returned is reclaimed envelopes.
pub fn reclaim_stale_inflight(
    cfg: &BusConfig,
    lease_seconds: f64,
    now: f64,
) -> Result<usize, StoreError> {
    let mut reclaimed = 0;

    for name in list_inflight(cfg)? {
        let inflight = cfg.queue_inflight_dir().join(&name);
        let mut envelope: Envelope = match store::read_json(&inflight) {
            Ok(env) => env,
            Err(e) if e.is_corrupt() => {
                tracing::warn!("deleting poison inflight envelope {name}: {e}");
                store::unlink(&inflight)?;
                continue;
            }
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        };

        if lease_seconds > 0.0 && (now - envelope.updated_at) < lease_seconds {
            continue;
        }

        envelope.updated_at = now;
        envelope.next_attempt_at = 0.0;
        store::write_json_atomic(&inflight, &envelope)?;
        if store::claim_move(&inflight, &cfg.queue_new_dir().join(&name))? {
            reclaimed += 1;
        }
    }

    Ok(reclaimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_cfg(dir: &TempDir) -> BusConfig {
        BusConfig::with_state_dir(dir.path().to_path_buf(), dir.path().join("messages"))
    }

    fn request(target: &str) -> EnqueueRequest {
        EnqueueRequest {
            source_agent_id: "alpha".into(),
            source_name: "Alpha".into(),
            source_role: AgentRole::Polemarch,
            target: target.into(),
            message: "hello".into(),
            deliver_as: DeliverAs::FollowUp,
        }
    }

    #[test]
    fn enqueue_lands_in_new() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);

        let id = enqueue(&cfg, &request("name:bob")).unwrap();
        let names = list_new(&cfg).unwrap();
        assert_eq!(names, vec![format!("{id}.json")]);

        let envelope = read_new(&cfg, &names[0]).unwrap();
        assert_eq!(envelope.id, id);
        assert_eq!(envelope.target, "name:bob");
        assert_eq!(envelope.attempts, 0);
    }

    #[test]
    fn enqueue_rejects_bad_input() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);

        let mut r = request("name:bob");
        r.message = "  ".into();
        assert!(matches!(enqueue(&cfg, &r), Err(EnqueueError::EmptyMessage)));

        let mut r = request("agent:");
        r.message = "hi".into();
        assert!(matches!(enqueue(&cfg, &r), Err(EnqueueError::InvalidTarget(_))));

        let mut r = request("name:bob");
        r.source_agent_id = "??".into();
        assert!(matches!(enqueue(&cfg, &r), Err(EnqueueError::MissingSender)));
    }

    #[test]
    fn claim_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let id = enqueue(&cfg, &request("name:bob")).unwrap();
        let name = format!("{id}.json");

        assert!(claim(&cfg, &name).unwrap().is_some());
        assert!(claim(&cfg, &name).unwrap().is_none());
        assert_eq!(list_inflight(&cfg).unwrap(), vec![name]);
        assert!(list_new(&cfg).unwrap().is_empty());
    }

    #[test]
    fn requeue_updates_retry_state() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let id = enqueue(&cfg, &request("name:bob")).unwrap();
        let name = format!("{id}.json");
        claim(&cfg, &name).unwrap();

        let mut envelope = read_inflight(&cfg, &name).unwrap();
        requeue(&cfg, &name, &mut envelope, 4.0).unwrap();

        let back = read_new(&cfg, &name).unwrap();
        assert_eq!(back.attempts, 1);
        assert!(back.next_attempt_at > epoch_now() + 2.0);
        assert!(list_inflight(&cfg).unwrap().is_empty());
    }

    #[test]
    fn startup_recovery_reclaims_everything() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let id = enqueue(&cfg, &request("name:bob")).unwrap();
        let name = format!("{id}.json");
        claim(&cfg, &name).unwrap();

        let reclaimed = reclaim_stale_inflight(&cfg, 0.0, epoch_now()).unwrap();
        assert_eq!(reclaimed, 1);
        assert_eq!(list_new(&cfg).unwrap(), vec![name]);

        let back = read_new(&cfg, &format!("{id}.json")).unwrap();
        assert_eq!(back.next_attempt_at, 0.0);
    }

    #[test]
    fn fresh_lease_is_left_inflight() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let id = enqueue(&cfg, &request("name:bob")).unwrap();
        claim(&cfg, &format!("{id}.json")).unwrap();

        let reclaimed = reclaim_stale_inflight(&cfg, 120.0, epoch_now()).unwrap();
        assert_eq!(reclaimed, 0);
        assert_eq!(list_inflight(&cfg).unwrap().len(), 1);
    }

    #[test]
    fn poison_inflight_is_deleted() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let path = cfg.queue_inflight_dir().join("0000000000001-bad.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"}{").unwrap();

        reclaim_stale_inflight(&cfg, 0.0, epoch_now()).unwrap();
        assert!(!path.exists());
    }
}
