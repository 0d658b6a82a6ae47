//! Agent-id canonicalisation and sortable message ids.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock::epoch_millis;

/// Strip an agent id down to `[A-Za-z0-9_-]`.
///
/// Ids arrive from the environment and from display-name resolution; anything
/// outside the safe set would otherwise leak into filesystem paths. An id
/// that sanitises to the empty string is not addressable.
pub fn sanitize_agent_id(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_')
        .collect()
}

static LAST_MILLIS: AtomicU64 = AtomicU64::new(0);

/// Generate a message id that sorts lexically in creation order.
///
/// Layout is `{millis:013}-{uuid}`. The millisecond prefix is forced strictly
/// monotonic within the process so two ids minted in the same tick still sort
/// in issue order; the uuid suffix keeps ids from different processes
/// distinct.
pub fn sortable_id() -> String {
    let now = epoch_millis();
    let mut prev = LAST_MILLIS.load(Ordering::SeqCst);
    let millis = loop {
        let next = now.max(prev + 1);
        match LAST_MILLIS.compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => break next,
            Err(actual) => prev = actual,
        }
    };

    format!("{:013}-{}", millis, uuid::Uuid::new_v4().simple())
}

/// Extract the millisecond prefix from a sortable id.
///
/// Returns `None` for ids minted outside this scheme; callers treat those as
/// ageless and bound them by count only.
pub fn millis_prefix(id: &str) -> Option<u64> {
    let (prefix, _) = id.split_once('-')?;
    if prefix.len() != 13 || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok()
}
