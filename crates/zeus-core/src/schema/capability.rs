//! Capability heartbeat: per-agent liveness record published by extensions.

use serde::{Deserialize, Serialize};

use super::envelope::AgentRole;

/// `updated_at` as written by current and older extensions.
///
/// Current writers emit fractional epoch seconds; older ones emitted ISO-8601
/// text (optionally `Z`-suffixed). Both decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EpochStamp {
    Seconds(f64),
    Text(String),
}

impl EpochStamp {
    /// Interpret as epoch seconds, if possible.
    pub fn as_epoch(&self) -> Option<f64> {
        match self {
            EpochStamp::Seconds(s) => Some(*s),
            EpochStamp::Text(raw) => {
                let clean = raw.trim();
                if clean.is_empty() {
                    return None;
                }
                if let Ok(secs) = clean.parse::<f64>() {
                    return Some(secs);
                }
                chrono::DateTime::parse_from_rfc3339(&clean.replace('Z', "+00:00"))
                    .ok()
                    .map(|dt| dt.timestamp_millis() as f64 / 1000.0)
            }
        }
    }
}

/// Bus features the publishing extension supports.
///
/// `queue_bus` defaults to enabled; only an explicit `false` opts an agent
/// out of bus delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supports {
    #[serde(default = "default_true")]
    pub queue_bus: bool,
    #[serde(default = "default_true")]
    pub receipt_v1: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Supports {
    fn default() -> Self {
        Self {
            queue_bus: true,
            receipt_v1: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtensionInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// One heartbeat at `zeus-agent-bus/caps/<agent>.json`.
///
/// No tombstone is written on exit; staleness is detected purely by age.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityHeartbeat {
    pub agent_id: String,
    #[serde(default)]
    pub role: AgentRole,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub session_path: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub updated_at: Option<EpochStamp>,
    #[serde(default)]
    pub supports: Supports,
    #[serde(default)]
    pub extension: ExtensionInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_stamp_parses_number_and_text() {
        assert_eq!(EpochStamp::Seconds(12.5).as_epoch(), Some(12.5));
        assert_eq!(EpochStamp::Text("12.5".into()).as_epoch(), Some(12.5));
        let iso = EpochStamp::Text("2026-01-02T03:04:05Z".into());
        let secs = iso.as_epoch().unwrap();
        assert!(secs > 1_767_000_000.0);
        assert_eq!(EpochStamp::Text("  ".into()).as_epoch(), None);
        assert_eq!(EpochStamp::Text("not a time".into()).as_epoch(), None);
    }

    #[test]
    fn supports_defaults_to_enabled() {
        let hb: CapabilityHeartbeat =
            serde_json::from_str(r#"{"agent_id":"bob","updated_at":1.0}"#).unwrap();
        assert!(hb.supports.queue_bus);
        assert!(hb.supports.receipt_v1);
    }

    #[test]
    fn explicit_opt_out_decodes() {
        let hb: CapabilityHeartbeat = serde_json::from_str(
            r#"{"agent_id":"bob","updated_at":1.0,"supports":{"queue_bus":false}}"#,
        )
        .unwrap();
        assert!(!hb.supports.queue_bus);
        assert!(hb.supports.receipt_v1);
    }
}
