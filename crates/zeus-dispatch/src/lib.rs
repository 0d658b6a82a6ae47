//! Dispatcher side of the Zeus message bus.
//!
//! Owns the durable envelope queue (`zeus-message-queue/{new,inflight}`),
//! recipient resolution against the embedding process's agent registry,
//! per-recipient fan-out into agent inboxes, the receipt-gated completion
//! check, and the long-running drain loop that advances all of it.
//!
//! The crate exposes two seams to the embedding process: [`AgentRegistry`]
//! (who exists and how names map to ids) and [`Notifier`] (operator-visible
//! delivery problems). Everything else is filesystem state shared with the
//! `zeus-extension` crate.

pub mod dispatch;
pub mod drain;
pub mod prune;
pub mod queue;
pub mod registry;
pub mod resolve;
pub mod retry;
pub mod watcher;

pub use dispatch::{Decision, Dispatcher};
pub use drain::DrainLoop;
pub use queue::{EnqueueRequest, enqueue};
pub use registry::{
    AgentInfo, AgentRegistry, DesktopNotifier, FileRegistry, Notifier, NotifyLevel, StaticRegistry,
};
pub use resolve::{ResolveError, resolve_recipients};
