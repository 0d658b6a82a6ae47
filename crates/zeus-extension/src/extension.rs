//! Extension entry point: lifecycle event handling and wiring.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zeus_core::BusConfig;
use zeus_core::ids::sanitize_agent_id;
use zeus_core::schema::AgentRole;
use zeus_core::store;

use crate::events::LifecycleEvent;
use crate::heartbeat;
use crate::pump::InboxPump;
use crate::runtime::AgentRuntime;

/// One bus extension instance per live agent process.
///
/// Construction does no I/O; everything starts lazily from the first
/// lifecycle event, which must arrive on a tokio runtime.
pub struct BusExtension {
    cfg: BusConfig,
    agent_id: String,
    role: AgentRole,
    runtime: Arc<dyn AgentRuntime>,
    pump: Arc<InboxPump>,
    background_started: AtomicBool,
    cancel: CancellationToken,
}

impl BusExtension {
    pub fn new(
        cfg: BusConfig,
        agent_id: &str,
        role: AgentRole,
        runtime: Arc<dyn AgentRuntime>,
    ) -> Arc<Self> {
        let agent_id = sanitize_agent_id(agent_id);
        let pump = Arc::new(InboxPump::new(cfg.clone(), &agent_id, Arc::clone(&runtime)));
        Arc::new(Self {
            cfg,
            agent_id,
            role,
            runtime,
            pump,
            background_started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    /// Build from the process environment.
    ///
    /// Returns `None` when `ZEUS_AGENT_ID` is unset or blank: an agent
    /// without a deterministic id does not participate in the bus.
    pub fn from_env(runtime: Arc<dyn AgentRuntime>) -> anyhow::Result<Option<Arc<Self>>> {
        let agent_id = sanitize_agent_id(&std::env::var("ZEUS_AGENT_ID").unwrap_or_default());
        if agent_id.is_empty() {
            info!("ZEUS_AGENT_ID not set; bus extension disabled");
            return Ok(None);
        }
        let role = AgentRole::from(std::env::var("ZEUS_ROLE").unwrap_or_default());
        let cfg = BusConfig::resolve()?;
        Ok(Some(Self::new(cfg, &agent_id, role, runtime)))
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn pump(&self) -> &Arc<InboxPump> {
        &self.pump
    }

    /// React to a runtime lifecycle event: re-publish the heartbeat, make
    /// sure the watcher and periodic tasks exist, and schedule a pump.
    ///
    /// Every step is best-effort; the `turn_end` cadence guarantees progress
    /// even if the watcher never installs.
    pub fn on_event(&self, event: LifecycleEvent) {
        debug!("lifecycle event {event:?} for {}", self.agent_id);

        if let Err(e) =
            heartbeat::publish_once(&self.cfg, &self.agent_id, self.role, self.runtime.as_ref())
        {
            warn!("heartbeat publish failed: {e}");
        }

        self.ensure_background_tasks();
        Arc::clone(&self.pump).schedule();
    }

    /// Stop the watcher and heartbeat tasks. Pending pump runs finish on
    /// their own; nothing here loses inbox state.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn ensure_background_tasks(&self) {
        if self.background_started.swap(true, Ordering::SeqCst) {
            return;
        }

        heartbeat::spawn_periodic(
            self.cfg.clone(),
            self.agent_id.clone(),
            self.role,
            Arc::clone(&self.runtime),
            self.cancel.clone(),
        );

        let cfg = self.cfg.clone();
        let agent_id = self.agent_id.clone();
        let pump = Arc::clone(&self.pump);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = watch_inbox(cfg, agent_id, pump, cancel).await {
                warn!("inbox watcher unavailable, relying on turn_end pumps: {e}");
            }
        });
    }
}

/// Watch `inbox/<agent>/` and schedule a pump on every change.
///
/// The watcher is a latency optimization only; lifecycle events keep pumping
/// when it cannot be installed.
async fn watch_inbox(
    cfg: BusConfig,
    agent_id: String,
    pump: Arc<InboxPump>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let new_dir = cfg.inbox_new_dir(&agent_id);
    let inbox_root = new_dir
        .parent()
        .expect("inbox layout always has a parent")
        .to_path_buf();
    store::ensure_dir(&new_dir)?;
    store::ensure_dir(&cfg.inbox_processing_dir(&agent_id))?;

    let (tx, rx) = channel();
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if res.is_ok() {
                let _ = tx.send(());
            }
        })?;
    watcher.watch(&inbox_root, RecursiveMode::Recursive)?;
    info!("watching inbox at {}", inbox_root.display());

    let (wake_tx, mut wake_rx) = tokio::sync::mpsc::channel::<()>(16);
    let bridge_cancel = cancel.clone();
    tokio::task::spawn_blocking(move || {
        let _watcher = watcher;
        loop {
            if bridge_cancel.is_cancelled() {
                break;
            }
            match rx.recv_timeout(std::time::Duration::from_millis(100)) {
                Ok(()) => {
                    if wake_tx.blocking_send(()).is_err() {
                        break;
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            wake = wake_rx.recv() => match wake {
                Some(()) => Arc::clone(&pump).schedule(),
                None => break,
            },
        }
    }
    Ok(())
}
