//! Expected-outcome errors for node mutations.
//!
//! `AlreadyHas` and `Lacks` are routine control-flow outcomes for command
//! layers, not failures: nothing in this crate is fatal. Unresolvable group
//! references and malformed weight nodes are swallowed during resolution
//! rather than surfaced here.

use thiserror::Error;

/// Errors returned by node set/unset operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NodeOpError {
    /// The holder already has a node almost-equal to the one being set.
    #[error("holder already has an equivalent node")]
    AlreadyHas,

    /// The holder has no node matching the one being unset.
    #[error("holder lacks a matching node")]
    Lacks,
}

impl NodeOpError {
    /// Get a static error code string for logging/metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyHas => "already_has",
            Self::Lacks => "lacks",
        }
    }
}

/// Result type for node mutations.
pub type NodeOpResult<T = ()> = Result<T, NodeOpError>;
