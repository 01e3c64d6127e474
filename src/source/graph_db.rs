use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;
use neo4rs::{query, ConfigBuilder, Graph, Query};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::GraphDbConfig;
use crate::error::SourceError;

use super::{AnalyticsSource, RawRecord, SourceKind};

/// Transfers are `(:Address)-[:TRANSACTION]->(:Address)` relationships
/// carrying the transaction fields. Big integers are returned as strings.
const ADDRESS_INFO: &str = "
MATCH (a:Address {addressId: $address})
OPTIONAL MATCH (a)-[s:TRANSACTION]->(:Address)
WITH a, collect(s) AS sent
OPTIONAL MATCH (:Address)-[r:TRANSACTION]->(a)
WITH a, sent, collect(r) AS received
RETURN a.addressId AS addressId,
       a.type AS type,
       toString(a.balance) AS balance,
       size(sent) AS sentTransactions,
       size(received) AS receivedTransactions,
       [t IN sent | toString(t.value)] AS sentValues,
       [t IN received | toString(t.value)] AS receivedValues,
       [t IN sent + received | toString(t.timestamp)] AS timestamps
";

const ADDRESS_INFO_COLUMNS: &[&str] = &[
    "addressId",
    "type",
    "balance",
    "sentTransactions",
    "receivedTransactions",
    "sentValues",
    "receivedValues",
    "timestamps",
];

const TRANSACTIONS: &str = "
MATCH (from:Address)-[t:TRANSACTION]->(to:Address)
WHERE from.addressId = $address OR to.addressId = $address
RETURN t.hash AS hash,
       from.addressId AS fromAddress,
       to.addressId AS toAddress,
       toString(t.value) AS value,
       toString(t.gas) AS gas,
       toString(t.gasUsed) AS gasUsed,
       toString(t.gasPrice) AS gasPrice,
       t.blockNumber AS blockNumber,
       toString(t.timestamp) AS timestamp
ORDER BY t.timestamp DESC
LIMIT $limit
";

const TRANSACTION_COLUMNS: &[&str] = &[
    "hash",
    "fromAddress",
    "toAddress",
    "value",
    "gas",
    "gasUsed",
    "gasPrice",
    "blockNumber",
    "timestamp",
];

/// One row per counterparty and direction, already aggregated, with the
/// display attributes of both endpoints.
const NEIGHBORHOOD: &str = "
MATCH (from:Address)-[t:TRANSACTION]->(to:Address)
WHERE from.addressId = $address OR to.addressId = $address
RETURN from.addressId AS source,
       to.addressId AS target,
       from.type AS sourceType,
       toString(from.balance) AS sourceBalance,
       COUNT { (from)-[:TRANSACTION]-(:Address) } AS sourceTransactions,
       to.type AS targetType,
       toString(to.balance) AS targetBalance,
       COUNT { (to)-[:TRANSACTION]-(:Address) } AS targetTransactions,
       sum(toFloat(t.value)) AS value,
       count(t) AS transactions,
       toString(min(t.timestamp)) AS firstTransaction,
       toString(max(t.timestamp)) AS lastTransaction
LIMIT $limit
";

const NEIGHBORHOOD_COLUMNS: &[&str] = &[
    "source",
    "target",
    "sourceType",
    "sourceBalance",
    "sourceTransactions",
    "targetType",
    "targetBalance",
    "targetTransactions",
    "value",
    "transactions",
    "firstTransaction",
    "lastTransaction",
];

struct Pool {
    graph: Graph,
    opened_at: Instant,
}

/// Cypher-queried graph database behind a bounded connection pool.
///
/// The pool is reopened once it outlives `max_connection_lifetime`; every
/// query, session acquisition included, is bounded by `connection_timeout`.
pub struct GraphDbSource {
    config: GraphDbConfig,
    pool: RwLock<Pool>,
}

impl GraphDbSource {
    pub async fn connect(config: &GraphDbConfig) -> anyhow::Result<Self> {
        let graph = tokio::time::timeout(config.connection_timeout(), open(config))
            .await
            .map_err(|_| anyhow!("Timed out connecting to graph database at {}", config.uri))??;

        info!("Connected to graph database at {}", config.uri);
        Ok(Self {
            config: config.clone(),
            pool: RwLock::new(Pool {
                graph,
                opened_at: Instant::now(),
            }),
        })
    }

    async fn graph(&self) -> Result<Graph, SourceError> {
        let lifetime = self.config.max_connection_lifetime();
        {
            let pool = self.pool.read().await;
            if pool.opened_at.elapsed() < lifetime {
                return Ok(pool.graph.clone());
            }
        }

        let mut pool = self.pool.write().await;
        // another caller may have recycled it while we waited
        if pool.opened_at.elapsed() >= lifetime {
            debug!("Recycling graph database pool after {:?}", lifetime);
            pool.graph = open(&self.config)
                .await
                .map_err(|e| SourceError::Transport(e.to_string()))?;
            pool.opened_at = Instant::now();
        }
        Ok(pool.graph.clone())
    }

    async fn fetch(&self, q: Query, columns: &[&str]) -> Result<Vec<RawRecord>, SourceError> {
        let timeout: Duration = self.config.connection_timeout();
        tokio::time::timeout(timeout, self.run(q, columns))
            .await
            .map_err(|_| SourceError::Timeout(timeout))?
    }

    async fn run(&self, q: Query, columns: &[&str]) -> Result<Vec<RawRecord>, SourceError> {
        let graph = self.graph().await?;
        let mut stream = graph
            .execute(q)
            .await
            .map_err(|e| SourceError::Transport(format!("Graph query failed: {}", e)))?;

        let mut records = Vec::new();
        while let Some(row) = stream
            .next()
            .await
            .map_err(|e| SourceError::Transport(format!("Graph stream failed: {}", e)))?
        {
            let mut record = RawRecord::new();
            for column in columns {
                match row.get::<Value>(column) {
                    Ok(value) => {
                        record.insert((*column).to_string(), value);
                    }
                    Err(e) => debug!("Column {} unreadable: {}", column, e),
                }
            }
            records.push(record);
        }
        Ok(records)
    }

    fn query(&self, cypher: &str, address: &str) -> Query {
        query(cypher)
            .param("address", address.to_string())
            .param("limit", self.config.row_limit)
    }
}

async fn open(config: &GraphDbConfig) -> anyhow::Result<Graph> {
    let mut builder = ConfigBuilder::default()
        .uri(config.uri.as_str())
        .user(config.user.as_str())
        .password(config.password.as_str())
        .fetch_size(config.fetch_size)
        .max_connections(config.pool_size);
    if let Some(database) = &config.database {
        builder = builder.db(database.as_str());
    }

    let neo_config = builder
        .build()
        .map_err(|e| anyhow!("Invalid graph database configuration: {}", e))?;
    Graph::connect(neo_config)
        .await
        .map_err(|e| anyhow!("Failed to connect to graph database: {}", e))
}

#[async_trait]
impl AnalyticsSource for GraphDbSource {
    fn kind(&self) -> SourceKind {
        SourceKind::GraphDb
    }

    async fn address_info(&self, address: &str) -> Result<Option<RawRecord>, SourceError> {
        let rows = self
            .fetch(self.query(ADDRESS_INFO, address), ADDRESS_INFO_COLUMNS)
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn transactions(&self, address: &str) -> Result<Vec<RawRecord>, SourceError> {
        self.fetch(self.query(TRANSACTIONS, address), TRANSACTION_COLUMNS)
            .await
    }

    async fn neighborhood(&self, address: &str) -> Result<Vec<RawRecord>, SourceError> {
        self.fetch(self.query(NEIGHBORHOOD, address), NEIGHBORHOOD_COLUMNS)
            .await
    }
}
