//! Trait seams to the embedding process: agent discovery and operator
//! notifications.
//!
//! Discovery and identity assignment live outside the bus. The dispatcher
//! only needs the four lookups below; the dashboard supplies a live
//! implementation, `zeus-dispatchd` uses [`FileRegistry`], and tests use
//! [`StaticRegistry`].

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use zeus_core::schema::AgentRole;

/// One known agent as reported by the discovery layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Deterministic id; empty means the agent is not bus-addressable.
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: AgentRole,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub phalanx_id: Option<String>,
}

/// Read-only view of the agent fleet.
pub trait AgentRegistry: Send + Sync {
    /// Exact lookup by deterministic id.
    fn lookup_by_id(&self, agent_id: &str) -> Option<AgentInfo>;

    /// Case-insensitive exact match on display name; may return several.
    fn lookup_by_name(&self, name: &str) -> Vec<AgentInfo>;

    /// All members of a phalanx, sender included.
    fn list_phalanx(&self, phalanx_id: &str) -> Vec<AgentInfo>;

    /// Parent id of an agent, if one was assigned at launch.
    fn parent_of(&self, agent_id: &str) -> Option<String>;
}

/// Severity of an operator notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Warning,
    /// Force-visible: structural problems that will not fix themselves.
    Error,
}

/// Outbound operator notifications (delivery blocked, poison, ...).
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotifyLevel, text: &str);
}

// ── Shipped implementations ──────────────────────────────────────────────

/// Fixed in-memory registry. Used in tests and by embedders whose fleet is
/// known up front.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    agents: Vec<AgentInfo>,
}

impl StaticRegistry {
    pub fn new(agents: Vec<AgentInfo>) -> Self {
        Self { agents }
    }
}

impl AgentRegistry for StaticRegistry {
    fn lookup_by_id(&self, agent_id: &str) -> Option<AgentInfo> {
        let clean = agent_id.trim();
        self.agents
            .iter()
            .find(|a| !a.agent_id.is_empty() && a.agent_id == clean)
            .cloned()
    }

    fn lookup_by_name(&self, name: &str) -> Vec<AgentInfo> {
        let clean = name.trim();
        self.agents
            .iter()
            .filter(|a| a.name.trim().eq_ignore_ascii_case(clean))
            .cloned()
            .collect()
    }

    fn list_phalanx(&self, phalanx_id: &str) -> Vec<AgentInfo> {
        let clean = phalanx_id.trim();
        self.agents
            .iter()
            .filter(|a| a.phalanx_id.as_deref().map(str::trim) == Some(clean))
            .cloned()
            .collect()
    }

    fn parent_of(&self, agent_id: &str) -> Option<String> {
        let clean = agent_id.trim();
        self.agents
            .iter()
            .find(|a| a.agent_id == clean)
            .and_then(|a| a.parent_id.clone())
            .filter(|p| !p.trim().is_empty())
    }
}

/// Registry backed by a JSON file the discovery layer keeps current
/// (`STATE_DIR/zeus-agents.json`, an array of [`AgentInfo`]).
///
/// Reloaded on every lookup: the file is tiny and the dispatcher must see
/// fleet changes between retries without a restart.
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> Vec<AgentInfo> {
        match zeus_core::store::read_json::<Vec<AgentInfo>>(&self.path) {
            Ok(agents) => agents,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => {
                tracing::warn!("unreadable agent registry {}: {e}", self.path.display());
                Vec::new()
            }
        }
    }
}

impl AgentRegistry for FileRegistry {
    fn lookup_by_id(&self, agent_id: &str) -> Option<AgentInfo> {
        StaticRegistry::new(self.load()).lookup_by_id(agent_id)
    }

    fn lookup_by_name(&self, name: &str) -> Vec<AgentInfo> {
        StaticRegistry::new(self.load()).lookup_by_name(name)
    }

    fn list_phalanx(&self, phalanx_id: &str) -> Vec<AgentInfo> {
        StaticRegistry::new(self.load()).list_phalanx(phalanx_id)
    }

    fn parent_of(&self, agent_id: &str) -> Option<String> {
        self.load()
            .iter()
            .find(|a| a.agent_id == agent_id.trim())
            .and_then(|a| a.parent_id.clone())
            .filter(|p| !p.trim().is_empty())
    }
}

/// Desktop notifier shelling out to `notify-send`.
///
/// Best-effort: a missing binary or a slow notification daemon must never
/// stall the drain loop. The child is spawned without waiting; a detached
/// reaper thread kills it if it outlives [`NOTIFY_SEND_TIMEOUT`] (a hung
/// D-Bus session otherwise leaves the process around forever).
#[derive(Debug, Default)]
pub struct DesktopNotifier;

/// How long a `notify-send` child may run before it is killed.
const NOTIFY_SEND_TIMEOUT: Duration = Duration::from_secs(5);

impl Notifier for DesktopNotifier {
    fn notify(&self, level: NotifyLevel, text: &str) {
        let urgency = match level {
            NotifyLevel::Info => "low",
            NotifyLevel::Warning => "normal",
            NotifyLevel::Error => "critical",
        };
        let spawned = Command::new("notify-send")
            .arg(format!("--urgency={urgency}"))
            .arg("--app-name=zeus")
            .arg("zeus message bus")
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let Ok(mut child) = spawned else {
            return;
        };
        std::thread::spawn(move || {
            let deadline = Instant::now() + NOTIFY_SEND_TIMEOUT;
            loop {
                match child.try_wait() {
                    Ok(Some(_)) | Err(_) => return,
                    Ok(None) if Instant::now() >= deadline => {
                        let _ = child.kill();
                        let _ = child.wait();
                        return;
                    }
                    Ok(None) => std::thread::sleep(Duration::from_millis(50)),
                }
            }
        });
    }
}

/// Notifier that records everything it is told. Test support.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<(NotifyLevel, String)>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NotifyLevel, text: &str) {
        self.events
            .lock()
            .expect("notifier poisoned")
            .push((level, text.to_string()));
    }
}
