use serde::Serialize;
use thiserror::Error;

/// Problems met while marking or instrumenting. None of them stops a pass.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A dominance or CFG fact needed for placement is missing; that occurrence was skipped.
    #[error("structural gap at {site}: {reason}")]
    StructuralGap { site: String, reason: String },

    #[error("no points-to targets for {pointer} at {site}")]
    OracleMiss { site: String, pointer: String },

    #[error("usage error: {message}")]
    UsageError { message: String },
}

impl Diagnostic {
    pub fn gap(site: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Diagnostic::StructuralGap {
            site: site.to_string(),
            reason: reason.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Diagnostic::UsageError {
            message: message.into(),
        }
    }

    pub fn is_structural_gap(&self) -> bool {
        matches!(self, Diagnostic::StructuralGap { .. })
    }
}
