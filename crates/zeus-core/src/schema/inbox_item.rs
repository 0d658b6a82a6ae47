//! Per-recipient inbox item: the materialised copy of an envelope waiting
//! for extension consumption.

use serde::{Deserialize, Serialize};

use super::envelope::{AgentRole, DeliverAs, Envelope};
use crate::clock::epoch_now;

/// One message in `zeus-agent-bus/inbox/<agent>/{new,processing}/<id>.json`.
///
/// The id mirrors the envelope id; `(envelope_id, recipient_id)` is the
/// idempotency key for the whole system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxItem {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub deliver_as: DeliverAs,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub source_agent_id: String,
    #[serde(default)]
    pub source_role: AgentRole,
    pub created_at: f64,
}

impl InboxItem {
    /// Materialise the per-recipient copy of an envelope.
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            id: envelope.id.clone(),
            message: envelope.message.clone(),
            deliver_as: envelope.deliver_as,
            source_name: envelope.source_name.clone(),
            source_agent_id: envelope.source_agent_id.clone(),
            source_role: envelope.source_role,
            created_at: epoch_now(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.id)
    }

    /// Poison check: an item that fails here is deleted, never retried.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.id.trim().is_empty() {
            return Err("missing id");
        }
        if self.message.trim().is_empty() {
            return Err("empty message");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirrors_envelope_fields() {
        let env = Envelope::new(
            "alpha",
            "Alpha",
            AgentRole::Polemarch,
            "name:bob",
            "review the diff",
            DeliverAs::Steer,
        );
        let item = InboxItem::from_envelope(&env);
        assert_eq!(item.id, env.id);
        assert_eq!(item.message, env.message);
        assert_eq!(item.deliver_as, DeliverAs::Steer);
        assert_eq!(item.source_agent_id, "alpha");
        item.validate().unwrap();
    }

    #[test]
    fn missing_message_is_poison() {
        let json = r#"{"id":"E6","message":"","created_at":1.0}"#;
        let item: InboxItem = serde_json::from_str(json).unwrap();
        assert!(item.validate().is_err());
    }
}
