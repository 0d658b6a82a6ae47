//! Payload file policy.
//!
//! `--file` payloads are only read from under the configured message tmp
//! directory. Senders are other agents passing file paths through their own
//! tool calls; confining the readable tree keeps a confused or compromised
//! sender from exfiltrating arbitrary files through the bus.

use std::path::Path;

use anyhow::{Context, Result, bail};

/// Read `path` as UTF-8, requiring it to resolve beneath `allowed_root`.
pub fn read_payload_under(path: &Path, allowed_root: &Path) -> Result<String> {
    let root = allowed_root
        .canonicalize()
        .with_context(|| format!("message tmp dir {} is unavailable", allowed_root.display()))?;
    let resolved = path
        .canonicalize()
        .with_context(|| format!("cannot resolve payload path {}", path.display()))?;

    if !resolved.starts_with(&root) {
        bail!(
            "payload path {} is outside the allowed message dir {}",
            resolved.display(),
            root.display()
        );
    }
    if !resolved.is_file() {
        bail!("payload path {} is not a file", resolved.display());
    }

    std::fs::read_to_string(&resolved)
        .with_context(|| format!("cannot read payload {}", resolved.display()))
}
