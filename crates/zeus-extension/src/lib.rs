//! In-agent extension side of the Zeus message bus.
//!
//! One [`BusExtension`] instance lives inside each agent process. It reacts
//! to runtime lifecycle events by re-publishing its capability heartbeat,
//! keeping a watcher on its inbox, and scheduling the inbox pump that claims
//! items, submits them to the local runtime, and writes accepted receipts.
//!
//! The at-most-once contract: the processed ledger is consulted before every
//! submit and persisted after every successful one, and the on-disk ordering
//! is always ledger → receipt → processing-file delete, so any crash point
//! converges without a duplicate submission.

pub mod events;
mod extension;
pub mod heartbeat;
pub mod pump;
pub mod runtime;

pub use events::LifecycleEvent;
pub use extension::BusExtension;
pub use pump::InboxPump;
pub use runtime::AgentRuntime;
