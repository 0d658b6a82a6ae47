//! Address-expression parsing.
//!
//! The sender writes a target expression onto the envelope; the dispatcher
//! resolves it against the live registry. Parsing is shared so the CLI can
//! reject malformed expressions before enqueueing.

use std::fmt;

/// A parsed target expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetExpr {
    /// The sender's parent agent (`polemarch`).
    Polemarch,
    /// Every member of the sender's phalanx, excluding the sender.
    Phalanx,
    /// A hoplite by deterministic id (`hoplite:<id>`).
    Hoplite(String),
    /// Any agent by deterministic id (`agent:<id>`).
    Agent(String),
    /// An agent by display name (`name:<display>` or a bare display name),
    /// matched case-insensitively and required to be unique.
    Name(String),
}

impl TargetExpr {
    /// Parse a target expression. Empty expressions and empty suffixes after
    /// a prefix are rejected.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let clean = raw.trim();
        if clean.is_empty() {
            return Err("empty target".to_string());
        }

        if clean.eq_ignore_ascii_case("polemarch") {
            return Ok(TargetExpr::Polemarch);
        }
        if clean.eq_ignore_ascii_case("phalanx") {
            return Ok(TargetExpr::Phalanx);
        }

        for (prefix, build) in [
            ("hoplite:", TargetExpr::Hoplite as fn(String) -> TargetExpr),
            ("agent:", TargetExpr::Agent as fn(String) -> TargetExpr),
            ("name:", TargetExpr::Name as fn(String) -> TargetExpr),
        ] {
            if let Some(rest) = clean.strip_prefix(prefix) {
                let rest = rest.trim();
                if rest.is_empty() {
                    return Err(format!("missing value after {prefix}"));
                }
                return Ok(build(rest.to_string()));
            }
        }

        Ok(TargetExpr::Name(clean.to_string()))
    }
}

impl fmt::Display for TargetExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetExpr::Polemarch => write!(f, "polemarch"),
            TargetExpr::Phalanx => write!(f, "phalanx"),
            TargetExpr::Hoplite(id) => write!(f, "hoplite:{id}"),
            TargetExpr::Agent(id) => write!(f, "agent:{id}"),
            TargetExpr::Name(name) => write!(f, "name:{name}"),
        }
    }
}
