//! Blocking wait for envelope removal (`--wait-delivery`).
//!
//! Uses OS-level file watching on the queue directories with a polling
//! fallback; delivery is signalled by the envelope file disappearing from
//! both `new/` and `inflight/`.

use std::sync::mpsc::{RecvTimeoutError, channel};
use std::time::{Duration, Instant};

use anyhow::Result;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use zeus_core::BusConfig;
use zeus_dispatch::queue;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Block until the envelope leaves the queue or `deadline` passes.
///
/// Returns `true` on delivery, `false` on timeout.
pub fn wait_for_removal(cfg: &BusConfig, file_name: &str, deadline: Instant) -> Result<bool> {
    if !queue::is_pending(cfg, file_name) {
        return Ok(true);
    }

    match watch_wait(cfg, file_name, deadline) {
        Ok(done) => Ok(done),
        Err(e) => {
            eprintln!("zeus-msg: file watching unavailable ({e}), polling instead");
            Ok(poll_wait(cfg, file_name, deadline))
        }
    }
}

fn watch_wait(cfg: &BusConfig, file_name: &str, deadline: Instant) -> Result<bool> {
    let (tx, rx) = channel();
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if res.is_ok() {
                let _ = tx.send(());
            }
        })?;

    for dir in [cfg.queue_new_dir(), cfg.queue_inflight_dir()] {
        std::fs::create_dir_all(&dir).ok();
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    }

    loop {
        if !queue::is_pending(cfg, file_name) {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        // Wake on queue activity, but poll at least every POLL_INTERVAL in
        // case an event was dropped.
        let wait = (deadline - now).min(POLL_INTERVAL);
        match rx.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(poll_wait(cfg, file_name, deadline)),
        }
    }
}

fn poll_wait(cfg: &BusConfig, file_name: &str, deadline: Instant) -> bool {
    loop {
        if !queue::is_pending(cfg, file_name) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL.min(Duration::from_millis(100)));
    }
}
