//! Core library for the Zeus inter-agent message bus.
//!
//! Everything the dispatcher, the in-agent extension, and the `zeus-msg` CLI
//! share lives here: state-directory resolution, the atomic file store that
//! every on-disk mutation goes through, the wire schema for envelopes, inbox
//! items, receipts and capability heartbeats, and the per-agent processed
//! ledger that guarantees at-most-once submission.
//!
//! Nothing in this crate spawns tasks or owns long-running state; it is the
//! passive layer the `zeus-dispatch` and `zeus-extension` crates build on.

pub mod caps;
pub mod clock;
pub mod config;
pub mod ids;
pub mod ledger;
pub mod logging;
pub mod schema;
pub mod store;

pub use config::BusConfig;
pub use ledger::ProcessedLedger;
pub use schema::{
    AgentRole, CapabilityHeartbeat, DeliverAs, Envelope, InboxItem, Receipt, ResolvedRecipient,
    TargetExpr,
};
pub use store::StoreError;
