//! Inbox pump: claim, submit, acknowledge.
//!
//! The pump is cooperative single-flight within a process. Scheduling while
//! a pump is running coalesces to exactly one re-run after it finishes; the
//! state machine is three states behind one mutex, no callback chains.
//!
//! Per item, the on-disk ordering is fixed: processed-ledger write, then
//! receipt write, then processing-file delete. A crash at any point between
//! them is converged by the next pump through the duplicate path (ledger
//! hit → re-emit receipt → delete) without a second submission.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use zeus_core::schema::{InboxItem, Receipt};
use zeus_core::store;
use zeus_core::{BusConfig, ProcessedLedger};

use crate::runtime::AgentRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpState {
    Idle,
    Running,
    RunningWithPending,
}

/// Single-flight inbox pump for one agent.
pub struct InboxPump {
    cfg: BusConfig,
    agent_id: String,
    runtime: Arc<dyn AgentRuntime>,
    state: Mutex<PumpState>,
    /// Loaded lazily once per process; the in-memory set is authoritative
    /// between persists.
    ledger: tokio::sync::Mutex<Option<ProcessedLedger>>,
}

impl InboxPump {
    pub fn new(cfg: BusConfig, agent_id: &str, runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            cfg,
            agent_id: agent_id.to_string(),
            runtime,
            state: Mutex::new(PumpState::Idle),
            ledger: tokio::sync::Mutex::new(None),
        }
    }

    /// Request a pump run, debounced and coalesced.
    ///
    /// Must be called from within a tokio runtime. Safe to call from every
    /// lifecycle event and every watcher wake; overlapping requests fold
    /// into one re-run.
    pub fn schedule(self: Arc<Self>) {
        {
            let mut state = self.state.lock().expect("pump state poisoned");
            match *state {
                PumpState::Idle => *state = PumpState::Running,
                PumpState::Running => {
                    *state = PumpState::RunningWithPending;
                    return;
                }
                PumpState::RunningWithPending => return,
            }
        }

        let pump = self;
        tokio::spawn(async move {
            tokio::time::sleep(pump.cfg.debounce).await;
            loop {
                pump.run_once().await;

                let mut state = pump.state.lock().expect("pump state poisoned");
                match *state {
                    PumpState::RunningWithPending => *state = PumpState::Running,
                    _ => {
                        *state = PumpState::Idle;
                        break;
                    }
                }
            }
        });
    }

    /// One full pump pass: recover stuck claims, then drain new arrivals.
    ///
    /// Exposed for tests and for hosts that drive the pump synchronously;
    /// production code goes through [`InboxPump::schedule`].
    pub async fn run_once(&self) {
        let processing_dir = self.cfg.inbox_processing_dir(&self.agent_id);
        let new_dir = self.cfg.inbox_new_dir(&self.agent_id);

        // Recover claims a prior pump died holding.
        match store::list_sorted(&processing_dir, ".json") {
            Ok(names) => {
                for name in names {
                    self.process_claimed(&name).await;
                }
            }
            Err(e) => warn!("cannot list processing dir: {e}"),
        }

        // Drain new arrivals, oldest first.
        let names = match store::list_sorted(&new_dir, ".json") {
            Ok(names) => names,
            Err(e) => {
                warn!("cannot list inbox: {e}");
                return;
            }
        };
        for name in names {
            let claimed = store::claim_move(&new_dir.join(&name), &processing_dir.join(&name));
            match claimed {
                Ok(true) => self.process_claimed(&name).await,
                Ok(false) => {}
                Err(e) => warn!("cannot claim inbox item {name}: {e}"),
            }
        }
    }

    /// Process one item sitting in `processing/` under its original filename.
    async fn process_claimed(&self, name: &str) {
        let path = self.cfg.inbox_processing_dir(&self.agent_id).join(name);

        let item: InboxItem = match store::read_json(&path) {
            Ok(item) => item,
            Err(e) if e.is_corrupt() => {
                warn!("deleting poison inbox item {name}: {e}");
                let _ = store::unlink(&path);
                return;
            }
            Err(e) if e.is_not_found() => return,
            Err(e) => {
                warn!("cannot read inbox item {name}, will retry: {e}");
                return;
            }
        };
        if let Err(reason) = item.validate() {
            warn!("deleting poison inbox item {name}: {reason}");
            let _ = store::unlink(&path);
            return;
        }

        let mut ledger_slot = self.ledger.lock().await;
        let ledger =
            ledger_slot.get_or_insert_with(|| ProcessedLedger::load(&self.cfg, &self.agent_id));

        if ledger.contains(&item.id) {
            // Duplicate path: converge a crash between ledger write and
            // processing-file delete. Persist again in case the original
            // persist never landed, re-emit the receipt, drop the file.
            if let Err(e) = ledger.insert_and_persist(&item.id) {
                warn!("ledger persist failed for {}: {e}", item.id);
                return;
            }
            if !self.ensure_receipt(&item.id) {
                return;
            }
            let _ = store::unlink(&path);
            debug!("dropped duplicate inbox item {}", item.id);
            return;
        }

        match self
            .runtime
            .send_user_message(&item.message, item.deliver_as)
            .await
        {
            Ok(()) => {}
            Err(e) => {
                // Back to `new/` under the original filename for retry.
                warn!("submit failed for {}, requeueing: {e}", item.id);
                let new_path = self.cfg.inbox_new_dir(&self.agent_id).join(name);
                if let Err(move_err) = store::claim_move(&path, &new_path) {
                    warn!("cannot requeue inbox item {name}: {move_err}");
                }
                return;
            }
        }

        // Submitted. Ledger first, receipt second, delete last.
        if let Err(e) = ledger.insert_and_persist(&item.id) {
            warn!("ledger persist failed for {}: {e}", item.id);
            return;
        }
        if !self.ensure_receipt(&item.id) {
            return;
        }
        let _ = store::unlink(&path);
        debug!("accepted inbox item {} for {}", item.id, self.agent_id);
    }

    /// Write the accepted receipt unless it already exists. Returns whether a
    /// valid receipt is now on disk.
    fn ensure_receipt(&self, message_id: &str) -> bool {
        let path = self.cfg.receipt_file(&self.agent_id, message_id);
        if path.exists() {
            return true;
        }
        let receipt = Receipt::accepted(
            &self.agent_id,
            message_id,
            &self.runtime.session_id(),
            &self.runtime.session_path(),
        );
        match store::write_json_atomic(&path, &receipt) {
            Ok(()) => true,
            Err(e) => {
                warn!("receipt write failed for {message_id}: {e}");
                false
            }
        }
    }
}
