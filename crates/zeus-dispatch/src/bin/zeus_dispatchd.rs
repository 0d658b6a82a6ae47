//! Standalone dispatcher daemon.
//!
//! Drains the envelope queue against the agent registry file the discovery
//! layer maintains (`STATE_DIR/zeus-agents.json`). The dashboard embeds the
//! same [`zeus_dispatch::DrainLoop`] with its live registry instead.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use zeus_core::BusConfig;
use zeus_dispatch::drain::shutdown_token;
use zeus_dispatch::{DesktopNotifier, Dispatcher, DrainLoop, FileRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    zeus_core::logging::init();

    let cfg = BusConfig::resolve().context("failed to resolve state directory")?;
    info!("state dir: {}", cfg.state_dir().display());

    let registry = Arc::new(FileRegistry::new(cfg.state_dir().join("zeus-agents.json")));
    let notifier = Arc::new(DesktopNotifier);
    let dispatcher = Dispatcher::new(cfg, registry, notifier);

    let cancel = shutdown_token();
    DrainLoop::new(dispatcher).run(cancel).await
}
