//! Runtime lifecycle events the extension subscribes to.

/// Events delivered by the host runtime. Every one of them triggers the same
/// reaction: heartbeat, ensure watcher, schedule pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    SessionStart,
    SessionSwitch,
    SessionFork,
    SessionTree,
    /// Fires after every model turn; doubles as the slow pump fallback when
    /// the filesystem watcher cannot be installed.
    TurnEnd,
}
