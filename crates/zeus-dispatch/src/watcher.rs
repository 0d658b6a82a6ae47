//! Filesystem wake source for the drain loop.
//!
//! Watches the queue `new/` directory (new envelopes) and the receipts root
//! (completion signals) and forwards a unit wake for every relevant change.
//! Purely a latency optimization: if the watcher cannot be installed the
//! drain loop still makes progress on its sweep timer.

use std::path::PathBuf;
use std::sync::mpsc::channel;

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watch `roots` and send a wake on any create/modify/remove beneath them.
///
/// Blocks (async) until cancelled. Returns an error only when the watcher
/// cannot be created at all; callers log it and fall back to sweeping.
pub async fn watch_roots(
    roots: Vec<PathBuf>,
    wake_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
) -> Result<()> {
    let (tx, rx) = channel();

    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => {
                warn!("filesystem watcher error: {e}");
            }
        })
        .context("failed to create filesystem watcher")?;

    for root in &roots {
        // Roots may not exist yet on a fresh state dir.
        std::fs::create_dir_all(root).ok();
        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", root.display()))?;
        info!("watching {} for queue activity", root.display());
    }

    let cancel_clone = cancel.clone();
    tokio::task::spawn_blocking(move || {
        // Keep the watcher alive for the lifetime of the bridge thread.
        let _watcher = watcher;
        loop {
            if cancel_clone.is_cancelled() {
                break;
            }
            match rx.recv_timeout(std::time::Duration::from_millis(100)) {
                Ok(event) => {
                    debug!("queue filesystem event: {:?}", event.kind);
                    if wake_tx.blocking_send(()).is_err() {
                        break;
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    })
    .await
    .context("watcher bridge task panicked")?;

    Ok(())
}
