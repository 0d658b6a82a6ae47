//! Atomic file store: the primitive layer every bus component mutates disk
//! through.

mod atomic;
mod error;

pub use atomic::{claim_move, ensure_dir, list_sorted, read_json, unlink, write_json_atomic};
pub use error::StoreError;
