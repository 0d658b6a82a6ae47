//! Seam to the host agent runtime.
//!
//! The host process (the coding-agent harness the extension is loaded into)
//! provides message injection and session accessors; everything else the
//! extension does is filesystem work against the shared bus.

use async_trait::async_trait;
use zeus_core::schema::DeliverAs;

/// The host runtime as the extension sees it.
///
/// `send_user_message` hands a payload to the model conversation. Any error
/// it returns means "not injected" — the caller must leave the item eligible
/// for retry and must not write a receipt.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn send_user_message(&self, text: &str, deliver_as: DeliverAs) -> anyhow::Result<()>;

    fn session_id(&self) -> String;
    fn session_path(&self) -> String;
    fn cwd(&self) -> String;
}
