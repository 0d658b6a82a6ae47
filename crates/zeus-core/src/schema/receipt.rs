//! Accepted receipt: the extension's durable acknowledgement that a message
//! id was handed to the local agent runtime.

use serde::{Deserialize, Serialize};

use crate::clock::epoch_now;

pub const RECEIPT_STATUS_ACCEPTED: &str = "accepted";

/// One receipt at `zeus-agent-bus/receipts/<agent>/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    #[serde(default)]
    pub status: String,
    pub accepted_at: f64,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub session_path: String,
}

impl Receipt {
    pub fn accepted(agent_id: &str, message_id: &str, session_id: &str, session_path: &str) -> Self {
        Self {
            id: message_id.trim().to_string(),
            status: RECEIPT_STATUS_ACCEPTED.to_string(),
            accepted_at: epoch_now(),
            agent_id: agent_id.trim().to_string(),
            session_id: session_id.to_string(),
            session_path: session_path.to_string(),
        }
    }

    /// Whether this receipt acknowledges `message_id`.
    ///
    /// Tolerant of older writers: an empty status counts as accepted and an
    /// empty id is not held against the file it was read from.
    pub fn acknowledges(&self, message_id: &str) -> bool {
        let status = self.status.trim().to_ascii_lowercase();
        if !status.is_empty() && status != RECEIPT_STATUS_ACCEPTED {
            return false;
        }
        let id = self.id.trim();
        id.is_empty() || id == message_id.trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_receipt_acknowledges_its_id() {
        let receipt = Receipt::accepted("bob", "E1", "sess-1", "/tmp/sess-1.json");
        assert!(receipt.acknowledges("E1"));
        assert!(!receipt.acknowledges("E2"));
    }

    #[test]
    fn empty_status_counts_as_accepted() {
        let receipt: Receipt =
            serde_json::from_str(r#"{"id":"E1","accepted_at":1.0}"#).unwrap();
        assert!(receipt.acknowledges("E1"));
    }

    #[test]
    fn rejected_status_does_not_acknowledge() {
        let receipt: Receipt =
            serde_json::from_str(r#"{"id":"E1","status":"rejected","accepted_at":1.0}"#).unwrap();
        assert!(!receipt.acknowledges("E1"));
    }
}
