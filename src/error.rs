use std::time::Duration;

use thiserror::Error;

use crate::source::SourceKind;

/// Failure of a single backing source. Only the gateway decides whether
/// this is fatal.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("api error: {0}")]
    Api(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Error)]
pub enum ExplorerError {
    #[error("malformed {entity} record: missing {field}")]
    MalformedRecord {
        entity: &'static str,
        field: &'static str,
    },

    #[error("{kind} source unavailable: {cause}")]
    SourceUnavailable {
        kind: SourceKind,
        #[source]
        cause: SourceError,
    },

    #[error("expansion of {0} is already in flight")]
    ExpansionInFlight(String),

    #[error("node {0} is not part of the current graph")]
    UnknownNode(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl ExplorerError {
    pub fn malformed(entity: &'static str, field: &'static str) -> Self {
        Self::MalformedRecord { entity, field }
    }

    pub fn unavailable(kind: SourceKind, cause: SourceError) -> Self {
        Self::SourceUnavailable { kind, cause }
    }

    /// Whether the presentation layer should offer a retry.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::SourceUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, ExplorerError>;
