//! Recipient resolution: target expression → concrete agent ids.
//!
//! Resolution is deterministic against a snapshot of the registry. The
//! resolved list is cached durably on the envelope so retries do not drift
//! when agents appear or disappear mid-flight; the cache is re-derived once
//! an envelope has been queued past the re-resolve window.

use thiserror::Error;
use zeus_core::ids::sanitize_agent_id;
use zeus_core::schema::{Envelope, ResolvedRecipient, TargetExpr};

use crate::registry::{AgentInfo, AgentRegistry};

/// Structural resolution failures. These block delivery until the fleet
/// changes, so they are surfaced force-visibly on first occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("unknown recipient {0}")]
    UnknownRecipient(String),
    #[error("ambiguous recipient name {0:?} (matches: {1})")]
    AmbiguousRecipient(String, String),
    #[error("cannot resolve polemarch: sender has no parent")]
    MissingParent,
    #[error("cannot resolve phalanx: {0}")]
    MissingPhalanx(String),
    #[error("invalid target expression: {0}")]
    InvalidTarget(String),
}

impl ResolveError {
    /// Stable key for notification throttling.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::UnknownRecipient(_) => "UnknownRecipient",
            ResolveError::AmbiguousRecipient(..) => "AmbiguousRecipient",
            ResolveError::MissingParent => "MissingParent",
            ResolveError::MissingPhalanx(_) => "MissingPhalanx",
            ResolveError::InvalidTarget(_) => "InvalidTarget",
        }
    }
}

fn recipient_from(info: AgentInfo) -> Result<ResolvedRecipient, ResolveError> {
    let agent_id = sanitize_agent_id(&info.agent_id);
    if agent_id.is_empty() {
        // Reachable but not addressable: delivery would need the legacy
        // keystroke transport, which the bus refuses.
        return Err(ResolveError::UnknownRecipient(format!(
            "{} has no deterministic agent id",
            if info.name.is_empty() { "agent" } else { info.name.as_str() }
        )));
    }
    Ok(ResolvedRecipient {
        agent_id,
        name: info.name,
        role: info.role,
    })
}

/// Resolve an envelope's target expression to concrete recipients.
///
/// Rules (see also the address grammar in [`TargetExpr`]):
/// - `agent:<id>` / `hoplite:<id>`: direct id lookup.
/// - `name:<display>` / bare display: case-insensitive exact match, which
///   must be unique.
/// - `polemarch`: the sender's parent.
/// - `phalanx`: every member of the sender's phalanx except the sender.
pub fn resolve_recipients(
    envelope: &Envelope,
    registry: &dyn AgentRegistry,
) -> Result<Vec<ResolvedRecipient>, ResolveError> {
    let expr = TargetExpr::parse(&envelope.target).map_err(ResolveError::InvalidTarget)?;

    match expr {
        TargetExpr::Agent(id) | TargetExpr::Hoplite(id) => {
            let info = registry
                .lookup_by_id(&id)
                .ok_or_else(|| ResolveError::UnknownRecipient(id.clone()))?;
            Ok(vec![recipient_from(info)?])
        }

        TargetExpr::Name(name) => {
            let matches = registry.lookup_by_name(&name);
            match matches.len() {
                0 => Err(ResolveError::UnknownRecipient(name)),
                1 => Ok(vec![recipient_from(matches.into_iter().next().unwrap())?]),
                _ => {
                    let mut ids: Vec<String> = matches
                        .iter()
                        .map(|a| {
                            let id = a.agent_id.trim();
                            if id.is_empty() { "<missing>".to_string() } else { id.to_string() }
                        })
                        .collect();
                    ids.sort();
                    ids.dedup();
                    Err(ResolveError::AmbiguousRecipient(name, ids.join(", ")))
                }
            }
        }

        TargetExpr::Polemarch => {
            let parent = registry
                .parent_of(&envelope.source_agent_id)
                .ok_or(ResolveError::MissingParent)?;
            let info = registry
                .lookup_by_id(&parent)
                .ok_or_else(|| ResolveError::UnknownRecipient(parent.clone()))?;
            Ok(vec![recipient_from(info)?])
        }

        TargetExpr::Phalanx => {
            let sender = registry.lookup_by_id(&envelope.source_agent_id);
            let phalanx_id = sender
                .as_ref()
                .and_then(|a| a.phalanx_id.as_deref())
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    ResolveError::MissingPhalanx("sender has no phalanx id".to_string())
                })?;

            let mut recipients = Vec::new();
            for info in registry.list_phalanx(phalanx_id) {
                if info.agent_id.trim() == envelope.source_agent_id.trim() {
                    continue;
                }
                recipients.push(recipient_from(info)?);
            }
            recipients.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

            if recipients.is_empty() {
                return Err(ResolveError::MissingPhalanx(format!(
                    "phalanx {phalanx_id} has no other members"
                )));
            }
            Ok(recipients)
        }
    }
}
