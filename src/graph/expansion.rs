//! Interactive growth of the visualized graph.
//!
//! The controller owns the graph the user has built up so far. Each node is
//! `unexpanded`, `expanding` (its neighborhood fetch is in flight) or
//! `expanded`. Expansions run one at a time: `expand` waits for the running
//! one, `try_expand` refuses instead. A focus change replaces the whole graph
//! and bumps a generation counter, once when it starts and again when its
//! graph lands; any fetch started under an older generation is discarded
//! when it resolves. Node ids are lower-case; arguments are lower-cased on
//! the way in.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{ExplorerError, Result};
use crate::graph::{GraphData, MergeStats};

/// Where the controller gets neighborhoods from. The gateway is the
/// production implementation.
#[async_trait]
pub trait NeighborhoodProvider: Send + Sync {
    async fn neighborhood(&self, address: &str) -> Result<GraphData>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandOutcome {
    /// The neighborhood was fetched and merged.
    Merged(MergeStats),
    /// The node had already been expanded; nothing was fetched.
    AlreadyExpanded,
    /// The same node is being expanded right now.
    InFlight,
    /// The focus changed while this request was waiting or fetching.
    Stale,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    pub focal: Option<String>,
    pub graph: GraphData,
    pub expanded: Vec<String>,
    pub pending: Option<String>,
}

#[derive(Debug, Default)]
struct KnownGraph {
    focal: Option<String>,
    graph: GraphData,
    expanded: HashSet<String>,
    pending: Option<String>,
    // the node whose fetch holds the lane, stale or not
    in_flight: Option<String>,
    generation: u64,
}

pub struct ExpansionController<P> {
    provider: Arc<P>,
    state: Mutex<KnownGraph>,
    // held for the whole fetch-and-merge of one expansion
    lane: Mutex<()>,
}

impl<P: NeighborhoodProvider> ExpansionController<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            state: Mutex::new(KnownGraph::default()),
            lane: Mutex::new(()),
        }
    }

    /// Re-centers on `address`, replacing the graph with its fresh
    /// neighborhood. Any expansion still in flight is invalidated right away.
    /// If the fetch fails the previous graph stays in place.
    pub async fn focus(&self, address: &str) -> Result<GraphSnapshot> {
        let address = node_id(address);
        let address = address.as_str();
        let generation = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.pending = None;
            state.generation
        };

        let fetched = self.provider.neighborhood(address).await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!("Discarding focus on {}: superseded by a newer focus", address);
            return Ok(snapshot(&state));
        }
        let graph = fetched?;

        info!(
            "Focused graph on {} ({} nodes, {} links)",
            address,
            graph.node_count(),
            graph.link_count()
        );
        // expansions admitted against the old graph must not land in this one
        state.generation += 1;
        state.pending = None;
        state.focal = Some(address.to_string());
        state.graph = graph;
        // the focal neighborhood is what was just fetched
        state.expanded = HashSet::from([address.to_string()]);
        Ok(snapshot(&state))
    }

    /// Merges the neighborhood of `node` into the graph, waiting for any
    /// other expansion to finish first.
    pub async fn expand(&self, node: &str) -> Result<ExpandOutcome> {
        let node = node_id(node);
        let node = node.as_str();
        let generation = match self.admit(node).await? {
            Admission::Proceed(generation) => generation,
            Admission::Done(outcome) => return Ok(outcome),
        };
        let lane = self.lane.lock().await;
        self.run_expansion(node, generation, lane).await
    }

    /// Like [`expand`](Self::expand) but refuses with
    /// [`ExplorerError::ExpansionInFlight`] instead of waiting.
    pub async fn try_expand(&self, node: &str) -> Result<ExpandOutcome> {
        let node = node_id(node);
        let node = node.as_str();
        let generation = match self.admit(node).await? {
            Admission::Proceed(generation) => generation,
            Admission::Done(outcome) => return Ok(outcome),
        };
        let lane = match self.lane.try_lock() {
            Ok(lane) => lane,
            Err(_) => {
                let state = self.state.lock().await;
                let busy = state
                    .in_flight
                    .clone()
                    .or_else(|| state.pending.clone())
                    .unwrap_or_default();
                return Err(ExplorerError::ExpansionInFlight(busy));
            }
        };
        self.run_expansion(node, generation, lane).await
    }

    pub async fn snapshot(&self) -> GraphSnapshot {
        snapshot(&*self.state.lock().await)
    }

    pub async fn focal(&self) -> Option<String> {
        self.state.lock().await.focal.clone()
    }

    pub async fn pending(&self) -> Option<String> {
        self.state.lock().await.pending.clone()
    }

    pub async fn is_expanded(&self, node: &str) -> bool {
        self.state.lock().await.expanded.contains(&node_id(node))
    }

    async fn admit(&self, node: &str) -> Result<Admission> {
        let state = self.state.lock().await;
        if state.expanded.contains(node) {
            return Ok(Admission::Done(ExpandOutcome::AlreadyExpanded));
        }
        if state.pending.as_deref() == Some(node) {
            return Ok(Admission::Done(ExpandOutcome::InFlight));
        }
        if !state.graph.contains_node(node) {
            return Err(ExplorerError::UnknownNode(node.to_string()));
        }
        Ok(Admission::Proceed(state.generation))
    }

    async fn run_expansion(
        &self,
        node: &str,
        generation: u64,
        _lane: MutexGuard<'_, ()>,
    ) -> Result<ExpandOutcome> {
        {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                return Ok(ExpandOutcome::Stale);
            }
            // a queued duplicate finds the work already done
            if state.expanded.contains(node) {
                return Ok(ExpandOutcome::AlreadyExpanded);
            }
            state.pending = Some(node.to_string());
            state.in_flight = Some(node.to_string());
        }

        let fetched = self.provider.neighborhood(node).await;

        let mut state = self.state.lock().await;
        state.in_flight = None;
        if state.generation != generation {
            debug!("Discarding expansion of {}: focus changed while in flight", node);
            return Ok(ExpandOutcome::Stale);
        }
        state.pending = None;

        let neighborhood = fetched.map_err(|e| {
            warn!("Expansion of {} failed: {}", node, e);
            e
        })?;
        let stats = state.graph.merge(neighborhood);
        state.expanded.insert(node.to_string());

        debug!(
            "Expanded {}: +{} nodes, +{} links",
            node, stats.nodes_added, stats.links_added
        );
        Ok(ExpandOutcome::Merged(stats))
    }
}

fn node_id(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

enum Admission {
    Proceed(u64),
    Done(ExpandOutcome),
}

fn snapshot(state: &KnownGraph) -> GraphSnapshot {
    let mut expanded: Vec<String> = state.expanded.iter().cloned().collect();
    expanded.sort();
    GraphSnapshot {
        focal: state.focal.clone(),
        graph: state.graph.clone(),
        expanded,
        pending: state.pending.clone(),
    }
}
