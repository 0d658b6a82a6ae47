//! Per-envelope dispatch: fan-out, completion check, retry decision.
//!
//! `dispatch_once` runs under an exclusive claim (the envelope file sits in
//! `inflight/`). For each resolved recipient it walks the completion ladder:
//! dispatcher dedup marker → accepted receipt → capability gate → idempotent
//! inbox write. The envelope is removed only when every recipient is
//! complete; otherwise it goes back to `new/` with backoff.

use std::sync::Arc;
use std::time::Duration;

use zeus_core::BusConfig;
use zeus_core::caps::{self, CapabilityHealth};
use zeus_core::clock::epoch_now;
use zeus_core::schema::{Envelope, InboxItem, Receipt, ResolvedRecipient};
use zeus_core::store::{self, StoreError};

use crate::queue;
use crate::registry::{AgentRegistry, Notifier, NotifyLevel};
use crate::resolve::{ResolveError, resolve_recipients};
use crate::retry::{NotifyThrottle, backoff_delay};

/// Outcome of one dispatch pass over a claimed envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Envelope removed: delivered to all recipients, or poison.
    Complete,
    /// Envelope requeued with the given delay.
    Retry { delay: Duration },
}

/// Dispatcher state shared across drain passes.
///
/// Exactly one `dispatch_once` runs at a time within a process; inter-process
/// safety comes from the claim rename, so a stale second dispatcher merely
/// loses races.
pub struct Dispatcher {
    cfg: BusConfig,
    registry: Arc<dyn AgentRegistry>,
    notifier: Arc<dyn Notifier>,
    throttle: NotifyThrottle,
}

impl Dispatcher {
    pub fn new(cfg: BusConfig, registry: Arc<dyn AgentRegistry>, notifier: Arc<dyn Notifier>) -> Self {
        let throttle = NotifyThrottle::new(cfg.notify_throttle);
        Self {
            cfg,
            registry,
            notifier,
            throttle,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.cfg
    }

    /// Dispatch one claimed envelope. Transient I/O errors bubble up to the
    /// drain loop, which leaves the envelope inflight for lease reclaim.
    pub fn dispatch_once(&mut self, file_name: &str) -> Result<Decision, StoreError> {
        let mut envelope = match queue::read_inflight(&self.cfg, file_name) {
            Ok(envelope) => envelope,
            Err(e) if e.is_corrupt() => {
                self.notifier.notify(
                    NotifyLevel::Error,
                    &format!("dropping undecodable envelope {file_name}"),
                );
                queue::ack(&self.cfg, file_name)?;
                return Ok(Decision::Complete);
            }
            // Raced with another dispatcher; nothing left to do.
            Err(e) if e.is_not_found() => return Ok(Decision::Complete),
            Err(e) => return Err(e),
        };

        if let Err(reason) = envelope.validate() {
            self.notifier.notify(
                NotifyLevel::Error,
                &format!("dropping poison envelope {}: {reason}", envelope.id),
            );
            queue::ack(&self.cfg, file_name)?;
            self.throttle.forget(&envelope.id);
            return Ok(Decision::Complete);
        }

        let now = epoch_now();
        let recipients = match self.cached_or_resolved(&mut envelope, file_name, now)? {
            Ok(recipients) => recipients,
            Err(resolve_err) => {
                // Structurally blocked: nothing will change until the fleet
                // does. Force-visible on first occurrence, throttled after.
                if self.throttle.should_emit(&envelope.id, resolve_err.kind()) {
                    self.notifier.notify(
                        NotifyLevel::Error,
                        &format!("delivery blocked for {}: {resolve_err}", envelope.id),
                    );
                }
                return self.requeue(file_name, &mut envelope);
            }
        };

        let mut first_block: Option<String> = None;
        for recipient in &recipients {
            match self.recipient_status(&envelope, recipient)? {
                RecipientStatus::Complete => {}
                RecipientStatus::Pending(reason) => {
                    if first_block.is_none() {
                        first_block = Some(reason);
                    }
                }
            }
        }

        match first_block {
            None => {
                queue::ack(&self.cfg, file_name)?;
                self.throttle.forget(&envelope.id);
                tracing::debug!("envelope {} delivered to {} recipient(s)", envelope.id, recipients.len());
                Ok(Decision::Complete)
            }
            Some(reason) => {
                if envelope.attempts + 1 >= self.cfg.attempts_notify
                    && self.throttle.should_emit(&envelope.id, "blocked")
                {
                    self.notifier.notify(
                        NotifyLevel::Warning,
                        &format!(
                            "envelope {} still undelivered after {} attempts: {reason}",
                            envelope.id,
                            envelope.attempts + 1
                        ),
                    );
                }
                self.requeue(file_name, &mut envelope)
            }
        }
    }

    /// Completion ladder for one recipient.
    fn recipient_status(
        &self,
        envelope: &Envelope,
        recipient: &ResolvedRecipient,
    ) -> Result<RecipientStatus, StoreError> {
        let marker = self
            .cfg
            .receipt_seen_marker(&recipient.agent_id, &envelope.id);
        if marker.exists() {
            return Ok(RecipientStatus::Complete);
        }

        match store::read_json::<Receipt>(&self.cfg.receipt_file(&recipient.agent_id, &envelope.id))
        {
            Ok(receipt) if receipt.acknowledges(&envelope.id) => {
                // Remember completion so the receipt itself can be aged out.
                if let Some(parent) = marker.parent() {
                    store::ensure_dir(parent)?;
                }
                std::fs::write(&marker, b"").map_err(|e| StoreError::Io {
                    path: marker.clone(),
                    source: e,
                })?;
                return Ok(RecipientStatus::Complete);
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() || e.is_corrupt() => {}
            Err(e) => return Err(e),
        }

        match caps::capability_health(&self.cfg, &recipient.agent_id, epoch_now()) {
            CapabilityHealth::Blocked(reason) => Ok(RecipientStatus::Pending(reason)),
            CapabilityHealth::Fresh => {
                self.ensure_inbox_item(envelope, &recipient.agent_id)?;
                Ok(RecipientStatus::Pending(format!(
                    "awaiting receipt from {}",
                    recipient.agent_id
                )))
            }
        }
    }

    /// Write the per-recipient inbox item unless one already exists in
    /// `new/` or `processing/`. `(envelope_id, recipient_id)` is the
    /// idempotency key, so re-dispatch after a partial fan-out is a no-op
    /// for recipients already materialised.
    fn ensure_inbox_item(&self, envelope: &Envelope, agent_id: &str) -> Result<(), StoreError> {
        let name = format!("{}.json", envelope.id);
        let new_path = self.cfg.inbox_new_dir(agent_id).join(&name);
        if new_path.exists() || self.cfg.inbox_processing_dir(agent_id).join(&name).exists() {
            return Ok(());
        }
        store::write_json_atomic(&new_path, &InboxItem::from_envelope(envelope))
    }

    fn cached_or_resolved(
        &mut self,
        envelope: &mut Envelope,
        file_name: &str,
        now: f64,
    ) -> Result<Result<Vec<ResolvedRecipient>, ResolveError>, StoreError> {
        let cache_fresh = envelope.queued_age(now) <= self.cfg.reresolve_after.as_secs_f64();
        if let Some(cached) = &envelope.recipients_resolved
            && cache_fresh
        {
            return Ok(Ok(cached.clone()));
        }

        match resolve_recipients(envelope, self.registry.as_ref()) {
            Ok(recipients) => {
                if envelope.recipients_resolved.as_ref() != Some(&recipients) {
                    envelope.recipients_resolved = Some(recipients.clone());
                    queue::rewrite_inflight(&self.cfg, file_name, envelope)?;
                }
                Ok(Ok(recipients))
            }
            Err(e) => {
                // A previously-good cache beats a transient resolution gap:
                // recipients already materialised must still be receipt-gated.
                if let Some(cached) = &envelope.recipients_resolved {
                    return Ok(Ok(cached.clone()));
                }
                Ok(Err(e))
            }
        }
    }

    fn requeue(&mut self, file_name: &str, envelope: &mut Envelope) -> Result<Decision, StoreError> {
        let delay = backoff_delay(envelope.attempts, self.cfg.retry_base, self.cfg.retry_cap);
        queue::requeue(&self.cfg, file_name, envelope, delay.as_secs_f64())?;
        Ok(Decision::Retry { delay })
    }
}

enum RecipientStatus {
    Complete,
    Pending(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{EnqueueRequest, enqueue};
    use crate::registry::{AgentInfo, RecordingNotifier, StaticRegistry};
    use tempfile::TempDir;
    use zeus_core::schema::{AgentRole, DeliverAs};

    fn test_cfg(dir: &TempDir) -> BusConfig {
        BusConfig::with_state_dir(dir.path().to_path_buf(), dir.path().join("messages"))
    }

    fn fleet() -> Arc<StaticRegistry> {
        Arc::new(StaticRegistry::new(vec![
            AgentInfo {
                agent_id: "bob".into(),
                name: "Bob".into(),
                role: AgentRole::Hoplite,
                parent_id: None,
                phalanx_id: Some("X".into()),
            },
            AgentInfo {
                agent_id: "carol".into(),
                name: "Carol".into(),
                role: AgentRole::Hoplite,
                parent_id: None,
                phalanx_id: Some("X".into()),
            },
        ]))
    }

    fn fresh_heartbeat(cfg: &BusConfig, agent_id: &str) {
        zeus_core::caps::publish_heartbeat(
            cfg,
            zeus_core::schema::CapabilityHeartbeat {
                agent_id: agent_id.into(),
                role: AgentRole::Hoplite,
                session_id: "s".into(),
                session_path: String::new(),
                cwd: String::new(),
                updated_at: None,
                supports: Default::default(),
                extension: Default::default(),
            },
        )
        .unwrap();
    }

    fn claimed(cfg: &BusConfig, target: &str) -> String {
        let id = enqueue(
            cfg,
            &EnqueueRequest {
                source_agent_id: "alpha".into(),
                source_name: "Alpha".into(),
                source_role: AgentRole::Polemarch,
                target: target.into(),
                message: "hello".into(),
                deliver_as: DeliverAs::FollowUp,
            },
        )
        .unwrap();
        let name = format!("{id}.json");
        queue::claim(cfg, &name).unwrap().unwrap();
        name
    }

    fn dispatcher(cfg: &BusConfig, notifier: Arc<RecordingNotifier>) -> Dispatcher {
        Dispatcher::new(cfg.clone(), fleet(), notifier)
    }

    #[test]
    fn fresh_recipient_gets_inbox_item_and_retry() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        fresh_heartbeat(&cfg, "bob");
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = dispatcher(&cfg, notifier);

        let name = claimed(&cfg, "name:bob");
        let decision = dispatcher.dispatch_once(&name).unwrap();
        assert!(matches!(decision, Decision::Retry { .. }));

        let id = name.trim_end_matches(".json");
        assert!(cfg.inbox_new_dir("bob").join(&name).exists());
        // Envelope went back to new/ with resolution cached.
        let envelope = queue::read_new(&cfg, &name).unwrap();
        assert_eq!(envelope.attempts, 1);
        let cached = envelope.recipients_resolved.unwrap();
        assert_eq!(cached[0].agent_id, "bob");
        assert_eq!(cached[0].name, "Bob");
        assert_eq!(id, envelope.id);
    }

    #[test]
    fn stale_capability_blocks_inbox_write() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = dispatcher(&cfg, notifier);

        // No heartbeat for bob at all.
        let name = claimed(&cfg, "agent:bob");
        let decision = dispatcher.dispatch_once(&name).unwrap();
        assert!(matches!(decision, Decision::Retry { .. }));
        assert!(!cfg.inbox_new_dir("bob").join(&name).exists());
    }

    #[test]
    fn receipt_completes_and_writes_marker() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = dispatcher(&cfg, notifier);

        let name = claimed(&cfg, "agent:bob");
        let id = name.trim_end_matches(".json").to_string();
        store::write_json_atomic(
            &cfg.receipt_file("bob", &id),
            &Receipt::accepted("bob", &id, "s", ""),
        )
        .unwrap();

        let decision = dispatcher.dispatch_once(&name).unwrap();
        assert_eq!(decision, Decision::Complete);
        assert!(cfg.receipt_seen_marker("bob", &id).exists());
        assert!(!cfg.queue_inflight_dir().join(&name).exists());
        assert!(!cfg.queue_new_dir().join(&name).exists());
    }

    #[test]
    fn marker_alone_completes_after_receipt_pruned() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = dispatcher(&cfg, notifier);

        let name = claimed(&cfg, "agent:bob");
        let id = name.trim_end_matches(".json").to_string();
        let marker = cfg.receipt_seen_marker("bob", &id);
        std::fs::create_dir_all(marker.parent().unwrap()).unwrap();
        std::fs::write(&marker, b"").unwrap();

        let decision = dispatcher.dispatch_once(&name).unwrap();
        assert_eq!(decision, Decision::Complete);
    }

    #[test]
    fn unknown_recipient_notifies_force_visible_once() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = Dispatcher::new(cfg.clone(), fleet(), Arc::clone(&notifier) as Arc<dyn Notifier>);

        let name = claimed(&cfg, "agent:ghost");
        let decision = dispatcher.dispatch_once(&name).unwrap();
        assert!(matches!(decision, Decision::Retry { .. }));

        {
            let events = notifier.events.lock().unwrap();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].0, NotifyLevel::Error);
            assert!(events[0].1.contains("ghost"));
        }

        // Second pass within the throttle window stays quiet.
        queue::claim(&cfg, &name).unwrap().unwrap();
        dispatcher.dispatch_once(&name).unwrap();
        assert_eq!(notifier.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn poison_envelope_is_deleted_with_notification() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = Dispatcher::new(cfg.clone(), fleet(), Arc::clone(&notifier) as Arc<dyn Notifier>);

        let name = "0000000000001-e6.json";
        let path = cfg.queue_inflight_dir().join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, br#"{"id":"E6"}"#).unwrap();

        let decision = dispatcher.dispatch_once(name).unwrap();
        assert_eq!(decision, Decision::Complete);
        assert!(!path.exists());
        assert_eq!(notifier.events.lock().unwrap().len(), 1);
        // No inbox write happened for anyone.
        assert!(!cfg.inbox_new_dir("bob").join(name).exists());
    }

    #[test]
    fn phalanx_fan_out_writes_both_inboxes() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        fresh_heartbeat(&cfg, "bob");
        fresh_heartbeat(&cfg, "carol");
        let notifier = Arc::new(RecordingNotifier::default());

        let registry = Arc::new(StaticRegistry::new(vec![
            AgentInfo {
                agent_id: "alpha".into(),
                name: "Alpha".into(),
                role: AgentRole::Polemarch,
                parent_id: None,
                phalanx_id: Some("X".into()),
            },
            AgentInfo {
                agent_id: "bob".into(),
                name: "Bob".into(),
                role: AgentRole::Hoplite,
                parent_id: Some("alpha".into()),
                phalanx_id: Some("X".into()),
            },
            AgentInfo {
                agent_id: "carol".into(),
                name: "Carol".into(),
                role: AgentRole::Hoplite,
                parent_id: Some("alpha".into()),
                phalanx_id: Some("X".into()),
            },
        ]));
        let mut dispatcher = Dispatcher::new(cfg.clone(), registry, notifier);

        let name = claimed(&cfg, "phalanx");
        dispatcher.dispatch_once(&name).unwrap();

        assert!(cfg.inbox_new_dir("bob").join(&name).exists());
        assert!(cfg.inbox_new_dir("carol").join(&name).exists());
        // Sender is excluded from its own fan-out.
        assert!(!cfg.inbox_new_dir("alpha").join(&name).exists());
    }

    #[test]
    fn inbox_write_is_idempotent_across_passes() {
        let dir = TempDir::new().unwrap();
        let cfg = test_cfg(&dir);
        fresh_heartbeat(&cfg, "bob");
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = dispatcher(&cfg, notifier);

        let name = claimed(&cfg, "agent:bob");
        dispatcher.dispatch_once(&name).unwrap();
        let item_path = cfg.inbox_new_dir("bob").join(&name);
        let first = std::fs::metadata(&item_path).unwrap().modified().unwrap();

        queue::claim(&cfg, &name).unwrap().unwrap();
        dispatcher.dispatch_once(&name).unwrap();
        let second = std::fs::metadata(&item_path).unwrap().modified().unwrap();
        assert_eq!(first, second, "inbox item must not be rewritten");
    }
}
