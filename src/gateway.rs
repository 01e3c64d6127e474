//! One entry point over both data sources.
//!
//! Every operation asks the graph database first. A primary failure, or an
//! empty answer for operations configured to treat empty as "not found",
//! sends the same request to the explorer, whose answer is final. The
//! returned [`Fetched`] records which source produced the data.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::GatewayConfig;
use crate::error::{ExplorerError, Result, SourceError};
use crate::graph::{assemble, GraphData, NeighborhoodProvider};
use crate::model::{AddressInfo, BalanceSample, GasSample, Transaction};
use crate::normalize::{
    self, normalize_address_info, normalize_all, normalize_edge, normalize_transaction,
};
use crate::source::AnalyticsSource;
use crate::utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchOrigin {
    Primary,
    Secondary,
    /// Primary data supplemented with the secondary's.
    Merged,
}

#[derive(Debug, Clone, Serialize)]
pub struct Fetched<T> {
    pub data: T,
    pub origin: FetchOrigin,
}

impl<T> Fetched<T> {
    fn new(data: T, origin: FetchOrigin) -> Self {
        Self { data, origin }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    AddressInfo,
    Transactions,
    Neighborhood,
    BalanceHistory,
    GasHistory,
}

/// Results that can come back structurally valid but empty.
pub trait Emptiness {
    fn is_empty_result(&self) -> bool;
}

impl<T> Emptiness for Vec<T> {
    fn is_empty_result(&self) -> bool {
        self.is_empty()
    }
}

impl<T> Emptiness for Option<T> {
    fn is_empty_result(&self) -> bool {
        self.is_none()
    }
}

impl Emptiness for GraphData {
    fn is_empty_result(&self) -> bool {
        self.is_empty()
    }
}

pub struct Gateway {
    primary: Option<Arc<dyn AnalyticsSource>>,
    secondary: Arc<dyn AnalyticsSource>,
    config: GatewayConfig,
}

impl Gateway {
    /// `primary` is `None` when the graph database is not configured or
    /// could not be reached at startup.
    pub fn new(
        primary: Option<Arc<dyn AnalyticsSource>>,
        secondary: Arc<dyn AnalyticsSource>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn primary(&self) -> Option<&Arc<dyn AnalyticsSource>> {
        if self.config.use_secondary_only {
            return None;
        }
        self.primary.as_ref()
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn get_address_info(&self, address: &str) -> Result<Fetched<Option<AddressInfo>>> {
        let address = utils::normalize_address(address)?;
        self.with_fallback(Operation::AddressInfo, |source| {
            let address = address.clone();
            async move {
                let raw = source.address_info(&address).await?;
                Ok::<_, SourceError>(raw.and_then(|raw| {
                    match normalize_address_info(&raw, source.kind()) {
                        Ok(info) => Some(info),
                        Err(e) => {
                            debug!("Discarding {} address row: {}", source.kind(), e);
                            None
                        }
                    }
                }))
            }
        })
        .await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn get_transactions_for_address(
        &self,
        address: &str,
    ) -> Result<Fetched<Vec<Transaction>>> {
        let address = utils::normalize_address(address)?;
        self.with_fallback(Operation::Transactions, |source| {
            let address = address.clone();
            async move {
                let rows = source.transactions(&address).await?;
                Ok::<_, SourceError>(normalize_all(&rows, source.kind(), normalize_transaction))
            }
        })
        .await
    }

    /// Neighborhood graph of `address`. An empty primary graph is merged with
    /// the secondary's rather than replaced by it; with `supplement_graph`
    /// a non-empty one is too.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_graph_neighborhood(&self, address: &str) -> Result<Fetched<GraphData>> {
        let address = utils::normalize_address(address)?;
        let fetch = |source: Arc<dyn AnalyticsSource>| {
            let address = address.clone();
            async move {
                let rows = source.neighborhood(&address).await?;
                let edges = normalize_all(&rows, source.kind(), normalize_edge);
                Ok::<_, SourceError>(assemble(&address, edges))
            }
        };

        let Some(primary) = self.primary() else {
            return self.secondary_only(fetch).await;
        };

        let mut graph = match fetch(primary.clone()).await {
            Ok(graph) if !graph.is_empty() && !self.config.supplement_graph => {
                return Ok(Fetched::new(graph, FetchOrigin::Primary));
            }
            Ok(graph) => graph,
            Err(e) => {
                warn!("Primary neighborhood lookup for {} failed: {}", address, e);
                return self.secondary_only(fetch).await;
            }
        };

        if graph.is_empty() {
            if !self.config.empty_is_miss(Operation::Neighborhood) {
                return Ok(Fetched::new(graph, FetchOrigin::Primary));
            }
            let secondary = self.secondary_attempt(fetch).await?;
            graph.merge(secondary);
            return Ok(Fetched::new(graph, FetchOrigin::Secondary));
        }

        // supplementing is best effort; the primary graph stands on its own
        match fetch(self.secondary.clone()).await {
            Ok(secondary) => {
                let stats = graph.merge(secondary);
                debug!(
                    "Supplemented {} with +{} nodes, +{} links",
                    address, stats.nodes_added, stats.links_added
                );
                Ok(Fetched::new(graph, FetchOrigin::Merged))
            }
            Err(e) => {
                warn!("Secondary supplement for {} failed: {}", address, e);
                Ok(Fetched::new(graph, FetchOrigin::Primary))
            }
        }
    }

    /// End-of-day balances, anchored on the balance the same source reports.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_balance_history(&self, address: &str) -> Result<Fetched<Vec<BalanceSample>>> {
        let address = utils::normalize_address(address)?;
        self.with_fallback(Operation::BalanceHistory, |source| {
            let address = address.clone();
            async move {
                let rows = source.transactions(&address).await?;
                let transactions = normalize_all(&rows, source.kind(), normalize_transaction);
                let anchor = match source.address_info(&address).await {
                    Ok(Some(raw)) => normalize_address_info(&raw, source.kind())
                        .ok()
                        .map(|info| info.balance),
                    Ok(None) => None,
                    Err(e) => {
                        debug!("No balance anchor from {}: {}", source.kind(), e);
                        None
                    }
                };
                Ok::<_, SourceError>(normalize::balance_history(&address, &transactions, anchor))
            }
        })
        .await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn get_gas_history(&self, address: &str) -> Result<Fetched<Vec<GasSample>>> {
        let address = utils::normalize_address(address)?;
        self.with_fallback(Operation::GasHistory, |source| {
            let address = address.clone();
            async move {
                let rows = source.transactions(&address).await?;
                let transactions = normalize_all(&rows, source.kind(), normalize_transaction);
                Ok::<_, SourceError>(normalize::gas_history(&address, &transactions))
            }
        })
        .await
    }

    async fn with_fallback<T, F, Fut>(&self, operation: Operation, fetch: F) -> Result<Fetched<T>>
    where
        T: Emptiness,
        F: Fn(Arc<dyn AnalyticsSource>) -> Fut,
        Fut: Future<Output = std::result::Result<T, SourceError>>,
    {
        if let Some(primary) = self.primary() {
            match fetch(primary.clone()).await {
                Ok(data) if data.is_empty_result() && self.config.empty_is_miss(operation) => {
                    debug!("Primary returned nothing for {:?}, falling back", operation);
                }
                Ok(data) => return Ok(Fetched::new(data, FetchOrigin::Primary)),
                Err(e) => {
                    warn!("Primary {:?} failed, falling back: {}", operation, e);
                }
            }
        }

        self.secondary_only(fetch).await
    }

    async fn secondary_only<T, F, Fut>(&self, fetch: F) -> Result<Fetched<T>>
    where
        F: Fn(Arc<dyn AnalyticsSource>) -> Fut,
        Fut: Future<Output = std::result::Result<T, SourceError>>,
    {
        let data = self.secondary_attempt(fetch).await?;
        Ok(Fetched::new(data, FetchOrigin::Secondary))
    }

    async fn secondary_attempt<T, F, Fut>(&self, fetch: F) -> Result<T>
    where
        F: Fn(Arc<dyn AnalyticsSource>) -> Fut,
        Fut: Future<Output = std::result::Result<T, SourceError>>,
    {
        fetch(self.secondary.clone()).await.map_err(|e| {
            info!("Secondary source failed: {}", e);
            ExplorerError::unavailable(self.secondary.kind(), e)
        })
    }
}

#[async_trait]
impl NeighborhoodProvider for Gateway {
    async fn neighborhood(&self, address: &str) -> Result<GraphData> {
        self.get_graph_neighborhood(address).await.map(|fetched| fetched.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MockAnalyticsSource, RawRecord, SourceKind};
    use mockall::Sequence;
    use serde_json::json;

    const ADDR: &str = "0x00000000000000000000000000000000000000aa";
    const PEER: &str = "0x00000000000000000000000000000000000000bb";

    fn record(value: serde_json::Value) -> RawRecord {
        value.as_object().cloned().unwrap()
    }

    fn explorer_tx(hash: &str, from: &str, to: &str) -> RawRecord {
        record(json!({
            "hash": hash,
            "from": from,
            "to": to,
            "value": "1000",
            "gas": "21000",
            "gasUsed": "21000",
            "gasPrice": "1",
            "blockNumber": "1",
            "timeStamp": "1700000000"
        }))
    }

    fn source(kind: SourceKind) -> MockAnalyticsSource {
        let mut mock = MockAnalyticsSource::new();
        mock.expect_kind().return_const(kind);
        mock
    }

    fn gateway(primary: MockAnalyticsSource, secondary: MockAnalyticsSource) -> Gateway {
        Gateway::new(
            Some(Arc::new(primary)),
            Arc::new(secondary),
            GatewayConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_empty_primary_falls_back_in_order() {
        let mut seq = Sequence::new();
        let mut primary = source(SourceKind::GraphDb);
        let mut secondary = source(SourceKind::Explorer);

        primary
            .expect_transactions()
            .withf(|address| address == ADDR)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![]));
        secondary
            .expect_transactions()
            .withf(|address| address == ADDR)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(vec![
                    explorer_tx("0x1", ADDR, PEER),
                    explorer_tx("0x2", PEER, ADDR),
                    explorer_tx("0x3", ADDR, PEER),
                ])
            });

        let fetched = gateway(primary, secondary)
            .get_transactions_for_address(ADDR)
            .await
            .unwrap();

        assert_eq!(fetched.origin, FetchOrigin::Secondary);
        let hashes: Vec<_> = fetched.data.iter().map(|tx| tx.hash.as_str()).collect();
        assert_eq!(hashes, vec!["0x1", "0x2", "0x3"]);
    }

    #[tokio::test]
    async fn test_primary_hit_skips_secondary() {
        let mut primary = source(SourceKind::GraphDb);
        let mut secondary = source(SourceKind::Explorer);
        primary.expect_address_info().times(1).returning(|_| {
            Ok(Some(record(json!({
                "addressId": ADDR,
                "sentTransactions": 2,
                "receivedTransactions": 3,
                "totalTransactions": 10
            }))))
        });
        secondary.expect_address_info().never();

        let fetched = gateway(primary, secondary).get_address_info(ADDR).await.unwrap();
        assert_eq!(fetched.origin, FetchOrigin::Primary);
        assert_eq!(fetched.data.unwrap().total_transactions, 5);
    }

    #[tokio::test]
    async fn test_primary_error_falls_back_and_secondary_miss_is_not_found() {
        let mut primary = source(SourceKind::GraphDb);
        let mut secondary = source(SourceKind::Explorer);
        primary
            .expect_address_info()
            .returning(|_| Err(SourceError::Transport("connection refused".into())));
        secondary.expect_address_info().times(1).returning(|_| Ok(None));

        let fetched = gateway(primary, secondary).get_address_info(ADDR).await.unwrap();
        assert_eq!(fetched.origin, FetchOrigin::Secondary);
        assert!(fetched.data.is_none());
    }

    #[tokio::test]
    async fn test_secondary_error_is_source_unavailable() {
        let mut primary = source(SourceKind::GraphDb);
        let mut secondary = source(SourceKind::Explorer);
        primary.expect_transactions().returning(|_| Ok(vec![]));
        secondary
            .expect_transactions()
            .returning(|_| Err(SourceError::Api("Max rate limit reached".into())));

        let err = gateway(primary, secondary)
            .get_transactions_for_address(ADDR)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExplorerError::SourceUnavailable { kind: SourceKind::Explorer, .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_history_is_a_valid_primary_answer() {
        let mut primary = source(SourceKind::GraphDb);
        let mut secondary = source(SourceKind::Explorer);
        primary.expect_transactions().times(1).returning(|_| Ok(vec![]));
        primary.expect_address_info().returning(|_| Ok(None));
        secondary.expect_transactions().never();

        let fetched = gateway(primary, secondary).get_balance_history(ADDR).await.unwrap();
        assert_eq!(fetched.origin, FetchOrigin::Primary);
        assert!(fetched.data.is_empty());
    }

    #[tokio::test]
    async fn test_secondary_only_mode_skips_primary() {
        let mut primary = source(SourceKind::GraphDb);
        let mut secondary = source(SourceKind::Explorer);
        primary.expect_transactions().never();
        secondary
            .expect_transactions()
            .times(1)
            .returning(|_| Ok(vec![explorer_tx("0x1", ADDR, PEER)]));

        let config = GatewayConfig {
            use_secondary_only: true,
            ..GatewayConfig::default()
        };
        let gateway = Gateway::new(Some(Arc::new(primary)), Arc::new(secondary), config);

        let fetched = gateway.get_gas_history(ADDR).await.unwrap();
        assert_eq!(fetched.origin, FetchOrigin::Secondary);
        assert_eq!(fetched.data.len(), 1);
        assert_eq!(fetched.data[0].gas_used.to_string(), "21000");
    }

    #[tokio::test]
    async fn test_empty_primary_graph_is_supplemented() {
        let mut primary = source(SourceKind::GraphDb);
        let mut secondary = source(SourceKind::Explorer);
        primary.expect_neighborhood().returning(|_| Ok(vec![]));
        secondary
            .expect_neighborhood()
            .returning(|_| Ok(vec![explorer_tx("0x1", ADDR, PEER), explorer_tx("0x2", PEER, ADDR)]));

        let fetched = gateway(primary, secondary).get_graph_neighborhood(ADDR).await.unwrap();

        assert_eq!(fetched.origin, FetchOrigin::Secondary);
        assert_eq!(fetched.data.node_count(), 2);
        assert_eq!(fetched.data.link_count(), 2);
        assert!(fetched.data.node(ADDR).unwrap().is_searched);
    }

    #[tokio::test]
    async fn test_primary_timeout_falls_back_for_neighborhood() {
        let mut seq = Sequence::new();
        let mut primary = source(SourceKind::GraphDb);
        let mut secondary = source(SourceKind::Explorer);
        primary
            .expect_neighborhood()
            .withf(|address| address == ADDR)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(SourceError::Timeout(std::time::Duration::from_millis(5_000))));
        secondary
            .expect_neighborhood()
            .withf(|address| address == ADDR)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![explorer_tx("0x1", ADDR, PEER)]));

        let fetched = gateway(primary, secondary).get_graph_neighborhood(ADDR).await.unwrap();

        assert_eq!(fetched.origin, FetchOrigin::Secondary);
        assert_eq!(fetched.data.link_count(), 1);
        assert_eq!(fetched.data.links()[0].hash.as_deref(), Some("0x1"));
        assert!(fetched.data.node(ADDR).unwrap().is_searched);
    }

    #[tokio::test]
    async fn test_primary_timeout_then_secondary_failure_is_unavailable() {
        let mut primary = source(SourceKind::GraphDb);
        let mut secondary = source(SourceKind::Explorer);
        primary
            .expect_neighborhood()
            .returning(|_| Err(SourceError::Timeout(std::time::Duration::from_millis(5_000))));
        secondary
            .expect_neighborhood()
            .times(1)
            .returning(|_| Err(SourceError::Transport("connection reset".into())));

        let err = gateway(primary, secondary)
            .get_graph_neighborhood(ADDR)
            .await
            .unwrap_err();
        assert!(err.is_retriable());
        assert!(matches!(
            err,
            ExplorerError::SourceUnavailable { kind: SourceKind::Explorer, .. }
        ));
    }

    #[tokio::test]
    async fn test_secondary_only_neighborhood_skips_primary() {
        let mut primary = source(SourceKind::GraphDb);
        let mut secondary = source(SourceKind::Explorer);
        primary.expect_neighborhood().never();
        secondary
            .expect_neighborhood()
            .times(1)
            .returning(|_| Ok(vec![explorer_tx("0x1", PEER, ADDR)]));

        let config = GatewayConfig {
            use_secondary_only: true,
            ..GatewayConfig::default()
        };
        let gateway = Gateway::new(Some(Arc::new(primary)), Arc::new(secondary), config);
        let fetched = gateway.get_graph_neighborhood(ADDR).await.unwrap();

        assert_eq!(fetched.origin, FetchOrigin::Secondary);
        assert_eq!(fetched.data.node_count(), 2);
        assert_eq!(fetched.data.links()[0].direction, crate::model::Direction::In);
    }

    #[tokio::test]
    async fn test_supplement_graph_unions_both_sources() {
        let mut primary = source(SourceKind::GraphDb);
        let mut secondary = source(SourceKind::Explorer);
        primary.expect_neighborhood().returning(|_| {
            Ok(vec![
                record(json!({"source": ADDR, "target": PEER, "value": 10.0, "transactions": 1})),
                record(json!({"source": ADDR, "target": PEER, "value": 5.0, "transactions": 1})),
            ])
        });
        secondary
            .expect_neighborhood()
            .returning(|_| Ok(vec![explorer_tx("0x9", "0x00000000000000000000000000000000000000cc", ADDR)]));

        let config = GatewayConfig {
            supplement_graph: true,
            ..GatewayConfig::default()
        };
        let gateway = Gateway::new(Some(Arc::new(primary)), Arc::new(secondary), config);
        let fetched = gateway.get_graph_neighborhood(ADDR).await.unwrap();

        assert_eq!(fetched.origin, FetchOrigin::Merged);
        assert_eq!(fetched.data.node_count(), 3);
        assert_eq!(fetched.data.link_count(), 2);
        let aggregated = fetched.data.links().iter().find(|l| l.hash.is_none()).unwrap();
        assert_eq!(aggregated.value, 15.0);
        assert_eq!(aggregated.transactions, 2);
    }

    #[tokio::test]
    async fn test_invalid_address_never_reaches_sources() {
        let mut primary = source(SourceKind::GraphDb);
        let mut secondary = source(SourceKind::Explorer);
        primary.expect_transactions().never();
        secondary.expect_transactions().never();

        let err = gateway(primary, secondary)
            .get_transactions_for_address("not-an-address")
            .await
            .unwrap_err();
        assert!(matches!(err, ExplorerError::InvalidAddress(_)));
    }
}
