pub mod etherscan;
pub mod graph_db;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

pub use etherscan::EtherscanSource;
pub use graph_db::GraphDbSource;

/// A single untyped row as a source delivered it, columns keyed by name.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Cypher-queried graph database; edges arrive aggregated per address pair.
    GraphDb,
    /// Etherscan-family REST explorer; one row per transaction.
    Explorer,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GraphDb => f.write_str("graph-db"),
            Self::Explorer => f.write_str("explorer"),
        }
    }
}

/// Raw access to one backing data source. Implementations do I/O only;
/// shaping the rows is the normalizer's job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalyticsSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Aggregate row for `address`, `None` when the source has never seen it.
    async fn address_info(&self, address: &str) -> Result<Option<RawRecord>, SourceError>;

    async fn transactions(&self, address: &str) -> Result<Vec<RawRecord>, SourceError>;

    /// Edge rows touching `address`.
    async fn neighborhood(&self, address: &str) -> Result<Vec<RawRecord>, SourceError>;
}
