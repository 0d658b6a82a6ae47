//! On-disk wire schema for the bus.
//!
//! Every record is UTF-8 JSON written through [`crate::store`]. Readers
//! tolerate unknown fields (forward compatibility); missing required fields
//! fail decoding and are handled as poison by the consumer.

mod capability;
mod envelope;
mod inbox_item;
mod receipt;
mod target;

pub use capability::{CapabilityHeartbeat, EpochStamp, ExtensionInfo, Supports};
pub use envelope::{AgentRole, DeliverAs, Envelope, ResolvedRecipient};
pub use inbox_item::InboxItem;
pub use receipt::{RECEIPT_STATUS_ACCEPTED, Receipt};
pub use target::TargetExpr;
