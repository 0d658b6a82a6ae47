//! Outbound envelope: one durable send request.

use serde::{Deserialize, Serialize};

use crate::clock::epoch_now;
use crate::ids::sortable_id;

/// Role an agent plays in the fleet.
///
/// Unknown role strings decode to the default rather than poisoning the
/// record; the role is routing metadata, not a correctness input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum AgentRole {
    #[default]
    Hippeus,
    Polemarch,
    Hoplite,
}

impl From<String> for AgentRole {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "polemarch" => AgentRole::Polemarch,
            "hoplite" => AgentRole::Hoplite,
            _ => AgentRole::Hippeus,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentRole::Hippeus => "hippeus",
            AgentRole::Polemarch => "polemarch",
            AgentRole::Hoplite => "hoplite",
        };
        f.write_str(s)
    }
}

/// Recipient-side delivery hint: interrupt the current turn or queue after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeliverAs {
    #[serde(rename = "steer")]
    Steer,
    #[default]
    #[serde(rename = "followUp")]
    FollowUp,
}

/// A concrete recipient cached on the envelope after first resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRecipient {
    pub agent_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: AgentRole,
}

/// Persisted outbound message envelope.
///
/// Lives in `zeus-message-queue/{new,inflight}/<id>.json`; the id is stable
/// for the envelope's whole lineage (retries keep it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(default)]
    pub source_agent_id: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub source_role: AgentRole,
    /// The sender's address expression, resolved by the dispatcher.
    pub target: String,
    pub message: String,
    #[serde(default)]
    pub deliver_as: DeliverAs,
    pub created_at: f64,
    pub updated_at: f64,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub next_attempt_at: f64,
    /// Resolved recipients, cached durably on first successful resolution so
    /// retries are stable against registry drift.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipients_resolved: Option<Vec<ResolvedRecipient>>,
}

impl Envelope {
    /// Build a fresh envelope for `Enqueue` with a creation-ordered id.
    pub fn new(
        source_agent_id: &str,
        source_name: &str,
        source_role: AgentRole,
        target: &str,
        message: &str,
        deliver_as: DeliverAs,
    ) -> Self {
        let now = epoch_now();
        Self {
            id: sortable_id(),
            source_agent_id: source_agent_id.trim().to_string(),
            source_name: source_name.trim().to_string(),
            source_role,
            target: target.trim().to_string(),
            message: message.to_string(),
            deliver_as,
            created_at: now,
            updated_at: now,
            attempts: 0,
            next_attempt_at: 0.0,
            recipients_resolved: None,
        }
    }

    /// Queue filename for this envelope.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.id)
    }

    /// Check the fields decoding alone cannot enforce.
    ///
    /// A failing envelope is poison: it is deleted, never retried.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.id.trim().is_empty() {
            return Err("missing id");
        }
        if self.message.trim().is_empty() {
            return Err("empty message");
        }
        if self.target.trim().is_empty() {
            return Err("missing target");
        }
        Ok(())
    }

    /// Seconds this envelope has been queued, relative to `now`.
    pub fn queued_age(&self, now: f64) -> f64 {
        (now - self.created_at).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_envelope_is_valid_and_sortable() {
        let a = Envelope::new("alpha", "Alpha", AgentRole::Polemarch, "phalanx", "go", DeliverAs::Steer);
        let b = Envelope::new("alpha", "Alpha", AgentRole::Polemarch, "phalanx", "go", DeliverAs::Steer);
        a.validate().unwrap();
        assert!(a.id < b.id, "ids must sort in creation order");
        assert_eq!(a.file_name(), format!("{}.json", a.id));
    }

    #[test]
    fn deliver_as_wire_format() {
        let json = serde_json::to_string(&DeliverAs::FollowUp).unwrap();
        assert_eq!(json, "\"followUp\"");
        let json = serde_json::to_string(&DeliverAs::Steer).unwrap();
        assert_eq!(json, "\"steer\"");
    }

    #[test]
    fn role_decodes_forgivingly() {
        let role: AgentRole = serde_json::from_str("\"POLEMARCH\"").unwrap();
        assert_eq!(role, AgentRole::Polemarch);
        let role: AgentRole = serde_json::from_str("\"mystery\"").unwrap();
        assert_eq!(role, AgentRole::Hippeus);
    }

    #[test]
    fn validate_rejects_blank_message() {
        let mut env = Envelope::new("a", "A", AgentRole::Hippeus, "name:bob", "x", DeliverAs::FollowUp);
        env.message = "   \n ".into();
        assert_eq!(env.validate(), Err("empty message"));
    }

    #[test]
    fn decode_ignores_unknown_fields_and_defaults_retry_state() {
        let json = r#"{
            "id": "0000000000001-abc",
            "target": "agent:bob",
            "message": "hi",
            "created_at": 1.0,
            "updated_at": 1.0,
            "some_future_field": {"x": 1}
        }"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(env.attempts, 0);
        assert_eq!(env.deliver_as, DeliverAs::FollowUp);
        assert!(env.recipients_resolved.is_none());
    }
}
