//! Long-running dispatcher drain loop.
//!
//! One task per dispatcher process alternates IDLE and SWEEP. Wake sources:
//! a filesystem watcher on the queue `new/` directory and the receipts root,
//! and a periodic sweep timer that guarantees progress when the watcher is
//! unavailable. Overlapping wakes coalesce through a short debounce; there is
//! never more than one sweep (and one `dispatch_once`) in flight.
//!
//! Transient I/O errors never escape: each is logged and the affected
//! envelope is left where it is for a later pass. Shutdown is cooperative —
//! the loop finishes the envelope in hand, then stops.

use std::time::Instant;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zeus_core::BusConfig;
use zeus_core::clock::epoch_now;
use zeus_core::store;

use crate::dispatch::Dispatcher;
use crate::prune::prune_delivery_records;
use crate::queue;
use crate::watcher::watch_roots;

/// How often the sweep also prunes aged receipts and markers.
const PRUNE_EVERY: std::time::Duration = std::time::Duration::from_secs(60);

/// The dispatcher's drain task.
pub struct DrainLoop {
    dispatcher: Dispatcher,
    use_watcher: bool,
    last_prune: Option<Instant>,
}

impl DrainLoop {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            use_watcher: true,
            last_prune: None,
        }
    }

    /// Disable the filesystem watcher and rely on the sweep timer alone.
    ///
    /// The loop must behave identically, just with more latency; tests
    /// exercise this path directly.
    pub fn without_watcher(mut self) -> Self {
        self.use_watcher = false;
        self
    }

    /// Run until `cancel` fires. Performs startup recovery first: every
    /// inflight envelope from a prior dispatcher is reclaimed regardless of
    /// lease age, then a normal sweep runs.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let cfg = self.dispatcher.config().clone();
        store::ensure_dir(&cfg.queue_new_dir())?;
        store::ensure_dir(&cfg.queue_inflight_dir())?;

        match queue::reclaim_stale_inflight(&cfg, 0.0, epoch_now()) {
            Ok(0) => {}
            Ok(n) => info!("startup recovery reclaimed {n} inflight envelope(s)"),
            Err(e) => warn!("startup recovery failed: {e}"),
        }
        self.sweep(&cfg, &cancel);

        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(64);
        let watcher_task = if self.use_watcher {
            let roots = vec![cfg.queue_new_dir(), cfg.receipts_root()];
            let watcher_cancel = cancel.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = watch_roots(roots, wake_tx, watcher_cancel).await {
                    warn!("queue watcher unavailable, sweeping on timer only: {e}");
                }
            }))
        } else {
            drop(wake_tx);
            None
        };

        info!("drain loop running over {}", cfg.queue_root().display());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(cfg.sweep_interval) => {
                    self.sweep(&cfg, &cancel);
                }
                Some(()) = wake_rx.recv() => {
                    // Coalesce the burst of events one mutation produces.
                    tokio::time::sleep(cfg.debounce).await;
                    while wake_rx.try_recv().is_ok() {}
                    self.sweep(&cfg, &cancel);
                }
            }
        }

        if let Some(task) = watcher_task {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), task).await;
        }
        info!("drain loop stopped");
        Ok(())
    }

    /// One full pass: reclaim expired leases, then claim and dispatch every
    /// due envelope in filename order.
    fn sweep(&mut self, cfg: &BusConfig, cancel: &CancellationToken) {
        let now = epoch_now();

        if let Err(e) = queue::reclaim_stale_inflight(cfg, cfg.inflight_lease.as_secs_f64(), now) {
            warn!("inflight reclaim failed: {e}");
        }

        if self.last_prune.is_none_or(|at| at.elapsed() >= PRUNE_EVERY) {
            prune_delivery_records(cfg, std::time::SystemTime::now());
            self.last_prune = Some(Instant::now());
        }

        let names = match queue::list_new(cfg) {
            Ok(names) => names,
            Err(e) => {
                warn!("cannot list queue: {e}");
                return;
            }
        };

        for name in names {
            // Cooperative shutdown between envelopes, never mid-envelope.
            if cancel.is_cancelled() {
                return;
            }

            match queue::read_new(cfg, &name) {
                Ok(envelope) if envelope.next_attempt_at > now => continue,
                Ok(_) => {}
                // Claim it anyway: dispatch_once owns poison handling.
                Err(e) if e.is_corrupt() => {}
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    warn!("cannot read envelope {name}: {e}");
                    continue;
                }
            }

            match queue::claim(cfg, &name) {
                Ok(Some(_)) => {}
                Ok(None) => continue,
                Err(e) => {
                    warn!("cannot claim envelope {name}: {e}");
                    continue;
                }
            }

            match self.dispatcher.dispatch_once(&name) {
                Ok(decision) => debug!("dispatched {name}: {decision:?}"),
                Err(e) => {
                    // Leave the envelope inflight; the lease reclaims it.
                    warn!("dispatch of {name} failed, leaving for reclaim: {e}");
                }
            }
        }
    }
}

/// Convenience used by binaries: wire ctrl-c to a cancellation token.
pub fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            trigger.cancel();
        }
    });
    cancel
}
