//! Capability heartbeat publication.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use zeus_core::caps;
use zeus_core::schema::{AgentRole, CapabilityHeartbeat, ExtensionInfo, Supports};
use zeus_core::store::StoreError;
use zeus_core::BusConfig;

use crate::runtime::AgentRuntime;

/// Publish one heartbeat for this agent, stamped now.
pub fn publish_once(
    cfg: &BusConfig,
    agent_id: &str,
    role: AgentRole,
    runtime: &dyn AgentRuntime,
) -> Result<(), StoreError> {
    caps::publish_heartbeat(
        cfg,
        CapabilityHeartbeat {
            agent_id: agent_id.to_string(),
            role,
            session_id: runtime.session_id(),
            session_path: runtime.session_path(),
            cwd: runtime.cwd(),
            updated_at: None,
            supports: Supports::default(),
            extension: ExtensionInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        },
    )
}

/// Background task re-publishing the heartbeat at the configured interval
/// until cancelled. Failures are logged and retried on the next tick; a
/// missed beat only costs delivery latency, not correctness.
pub fn spawn_periodic(
    cfg: BusConfig,
    agent_id: String,
    role: AgentRole,
    runtime: Arc<dyn AgentRuntime>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = cfg.heartbeat_interval.max(Duration::from_millis(100));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = publish_once(&cfg, &agent_id, role, runtime.as_ref()) {
                        warn!("heartbeat publish failed: {e}");
                    }
                }
            }
        }
    })
}
