//! State-directory resolution and bus layout.
//!
//! All persistent state lives under one `STATE_DIR`, resolved in order from
//! `ZEUS_STATE_DIR`, the optional `config.toml` `[storage]` table, `ZEUS_HOME`
//! (default `~/.zeus`), and finally `/tmp/zeus`. A candidate that cannot be
//! created and written to falls through to the next; if nothing is writable
//! the process must not start, so resolution fails instead of degrading.
//!
//! Two roots hang off `STATE_DIR`:
//!
//! ```text
//! zeus-message-queue/        dispatcher-owned envelope queue
//!   new/  inflight/  receipts-seen/<agent>/
//! zeus-agent-bus/            shared bus between dispatcher and extensions
//!   inbox/<agent>/{new,processing}/  receipts/<agent>/  caps/  processed/
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::ids::sanitize_agent_id;

/// `[storage]` table of the optional user `config.toml`.
#[derive(Debug, Default, Deserialize)]
struct StorageConfig {
    state_dir: Option<String>,
    message_tmp_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UserConfig {
    #[serde(default)]
    storage: StorageConfig,
}

/// Resolved bus configuration: directory layout plus scheduling tunables.
///
/// Tunables carry the production defaults; tests shrink them to keep
/// integration runs fast.
#[derive(Debug, Clone)]
pub struct BusConfig {
    state_dir: PathBuf,
    message_tmp_dir: PathBuf,

    /// A capability heartbeat older than this blocks delivery.
    pub max_heartbeat_age: Duration,
    /// Extensions re-publish their heartbeat at this cadence.
    pub heartbeat_interval: Duration,
    /// Drain-loop periodic sweep fallback.
    pub sweep_interval: Duration,
    /// Coalescing window for watcher wakes and pump scheduling.
    pub debounce: Duration,
    /// Inflight envelopes untouched for longer than this are reclaimed.
    pub inflight_lease: Duration,
    /// Retry backoff base; delay is `min(base * 2^k, cap)` ± 20% jitter.
    pub retry_base: Duration,
    /// Retry backoff cap.
    pub retry_cap: Duration,
    /// Operator notification after this many delivery attempts.
    pub attempts_notify: u32,
    /// Minimum spacing of repeat notifications per envelope per reason.
    pub notify_throttle: Duration,
    /// Cached recipient resolution is re-run once an envelope has been
    /// queued longer than this.
    pub reresolve_after: Duration,
    /// Receipts and dispatcher dedup markers older than this are pruned.
    pub receipt_ttl: Duration,
    /// Processed-ledger count bound.
    pub ledger_max_ids: usize,
    /// Processed-ledger age bound, applied to ids with a millisecond prefix.
    pub ledger_max_age: Duration,
}

impl BusConfig {
    /// Resolve configuration from the environment and optional `config.toml`.
    ///
    /// # Errors
    ///
    /// Fails when no candidate state directory can be created and written to.
    pub fn resolve() -> Result<Self> {
        let zeus_home = resolve_zeus_home();
        let storage = load_storage_config(&zeus_home);

        let state_candidates: Vec<PathBuf> = [
            env_path("ZEUS_STATE_DIR"),
            storage.state_dir.as_deref().map(expand_tilde),
            Some(zeus_home.clone()),
            Some(PathBuf::from("/tmp/zeus")),
        ]
        .into_iter()
        .flatten()
        .collect();

        let state_dir = first_writable(&state_candidates)
            .context("no writable state directory (tried ZEUS_STATE_DIR, ZEUS_HOME, /tmp/zeus)")?;

        let message_tmp_dir = env_path("ZEUS_MESSAGE_TMP_DIR")
            .or_else(|| storage.message_tmp_dir.as_deref().map(expand_tilde))
            .unwrap_or_else(|| state_dir.join("messages"));
        crate::store::ensure_dir(&message_tmp_dir)
            .with_context(|| format!("cannot create message tmp dir {}", message_tmp_dir.display()))?;

        Ok(Self::with_state_dir(state_dir, message_tmp_dir))
    }

    /// Build a config rooted at an explicit state directory.
    ///
    /// Used by tests and by embedders that manage their own layout; no
    /// environment is consulted.
    pub fn with_state_dir(state_dir: PathBuf, message_tmp_dir: PathBuf) -> Self {
        Self {
            state_dir,
            message_tmp_dir,
            max_heartbeat_age: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(2),
            debounce: Duration::from_millis(50),
            inflight_lease: Duration::from_secs(120),
            retry_base: Duration::from_secs(2),
            retry_cap: Duration::from_secs(60),
            attempts_notify: 3,
            notify_throttle: Duration::from_secs(60),
            reresolve_after: Duration::from_secs(60),
            receipt_ttl: Duration::from_secs(24 * 3600),
            ledger_max_ids: 10_000,
            ledger_max_age: Duration::from_secs(30 * 24 * 3600),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn message_tmp_dir(&self) -> &Path {
        &self.message_tmp_dir
    }

    // ── Envelope queue layout ────────────────────────────────────────────

    pub fn queue_root(&self) -> PathBuf {
        self.state_dir.join("zeus-message-queue")
    }

    pub fn queue_new_dir(&self) -> PathBuf {
        self.queue_root().join("new")
    }

    pub fn queue_inflight_dir(&self) -> PathBuf {
        self.queue_root().join("inflight")
    }

    /// Dispatcher-side dedup marker for an observed receipt.
    pub fn receipt_seen_marker(&self, agent_id: &str, message_id: &str) -> PathBuf {
        self.queue_root()
            .join("receipts-seen")
            .join(sanitize_agent_id(agent_id))
            .join(message_id.trim())
    }

    pub fn receipts_seen_root(&self) -> PathBuf {
        self.queue_root().join("receipts-seen")
    }

    // ── Agent bus layout ─────────────────────────────────────────────────

    pub fn bus_root(&self) -> PathBuf {
        self.state_dir.join("zeus-agent-bus")
    }

    pub fn inbox_new_dir(&self, agent_id: &str) -> PathBuf {
        self.bus_root()
            .join("inbox")
            .join(sanitize_agent_id(agent_id))
            .join("new")
    }

    pub fn inbox_processing_dir(&self, agent_id: &str) -> PathBuf {
        self.bus_root()
            .join("inbox")
            .join(sanitize_agent_id(agent_id))
            .join("processing")
    }

    pub fn receipts_root(&self) -> PathBuf {
        self.bus_root().join("receipts")
    }

    pub fn receipts_dir(&self, agent_id: &str) -> PathBuf {
        self.receipts_root().join(sanitize_agent_id(agent_id))
    }

    pub fn receipt_file(&self, agent_id: &str, message_id: &str) -> PathBuf {
        self.receipts_dir(agent_id)
            .join(format!("{}.json", message_id.trim()))
    }

    pub fn caps_dir(&self) -> PathBuf {
        self.bus_root().join("caps")
    }

    pub fn capability_file(&self, agent_id: &str) -> PathBuf {
        self.caps_dir()
            .join(format!("{}.json", sanitize_agent_id(agent_id)))
    }

    pub fn processed_ledger_file(&self, agent_id: &str) -> PathBuf {
        self.bus_root()
            .join("processed")
            .join(format!("{}.json", sanitize_agent_id(agent_id)))
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    let raw = std::env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(expand_tilde(trimmed))
}

fn expand_tilde(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(trimmed)
}

fn resolve_zeus_home() -> PathBuf {
    if let Some(path) = env_path("ZEUS_HOME") {
        return path;
    }
    dirs::home_dir()
        .map(|home| home.join(".zeus"))
        .unwrap_or_else(|| PathBuf::from("/tmp/zeus"))
}

fn load_storage_config(zeus_home: &Path) -> StorageConfig {
    let candidates = [
        zeus_home.join("config.toml"),
        dirs::config_dir()
            .map(|dir| dir.join("zeus/config.toml"))
            .unwrap_or_default(),
    ];

    for path in candidates {
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        match toml::from_str::<UserConfig>(&raw) {
            Ok(parsed) => return parsed.storage,
            Err(e) => {
                tracing::warn!("ignoring unparseable config at {}: {e}", path.display());
            }
        }
    }
    StorageConfig::default()
}

/// Return the first candidate that can be created and written to.
fn first_writable(candidates: &[PathBuf]) -> Result<PathBuf> {
    for candidate in candidates {
        if std::fs::create_dir_all(candidate).is_err() {
            continue;
        }
        let probe = candidate.join(format!(".zeus-probe-{}", std::process::id()));
        match std::fs::write(&probe, b"") {
            Ok(()) => {
                let _ = std::fs::remove_file(&probe);
                return Ok(candidate.clone());
            }
            Err(_) => continue,
        }
    }
    bail!("all state directory candidates are unwritable")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        unsafe {
            std::env::remove_var("ZEUS_STATE_DIR");
            std::env::remove_var("ZEUS_HOME");
            std::env::remove_var("ZEUS_MESSAGE_TMP_DIR");
        }
    }

    #[test]
    #[serial]
    fn state_dir_env_takes_precedence() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("state");
        let home = dir.path().join("home");
        unsafe {
            std::env::set_var("ZEUS_STATE_DIR", &state);
            std::env::set_var("ZEUS_HOME", &home);
        }

        let cfg = BusConfig::resolve().unwrap();
        assert_eq!(cfg.state_dir(), state.as_path());

        clear_env();
    }

    #[test]
    #[serial]
    fn falls_back_to_zeus_home() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("zeus-home");
        unsafe { std::env::set_var("ZEUS_HOME", &home) };

        let cfg = BusConfig::resolve().unwrap();
        assert_eq!(cfg.state_dir(), home.as_path());
        assert_eq!(cfg.message_tmp_dir(), home.join("messages").as_path());

        clear_env();
    }

    #[test]
    #[serial]
    fn storage_table_overrides_home() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("zeus-home");
        let custom = dir.path().join("custom-state");
        std::fs::create_dir_all(&home).unwrap();
        std::fs::write(
            home.join("config.toml"),
            format!("[storage]\nstate_dir = \"{}\"\n", custom.display()),
        )
        .unwrap();
        unsafe { std::env::set_var("ZEUS_HOME", &home) };

        let cfg = BusConfig::resolve().unwrap();
        assert_eq!(cfg.state_dir(), custom.as_path());

        clear_env();
    }

    #[test]
    fn layout_sanitises_agent_ids() {
        let dir = TempDir::new().unwrap();
        let cfg = BusConfig::with_state_dir(dir.path().to_path_buf(), dir.path().join("messages"));

        let inbox = cfg.inbox_new_dir("../evil");
        assert!(inbox.starts_with(cfg.bus_root().join("inbox").join("evil")));

        let cap = cfg.capability_file("bob!@#");
        assert_eq!(cap.file_name().unwrap().to_str().unwrap(), "bob.json");
    }
}
