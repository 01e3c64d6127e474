pub mod assembler;
pub mod expansion;

use std::collections::HashMap;

use serde::Serialize;

use crate::model::{GraphLink, GraphNode, LinkKey, NodeDetails};

pub use assembler::assemble;
pub use expansion::{ExpandOutcome, ExpansionController, GraphSnapshot, NeighborhoodProvider};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub nodes_added: usize,
    pub links_added: usize,
}

/// Node/link set with at most one node per id and one link per [`LinkKey`].
///
/// Insertion order is kept so that renderers see a stable layout seed.
/// Every link endpoint is present as a node.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphData {
    nodes: Vec<GraphNode>,
    links: Vec<GraphLink>,
    #[serde(skip)]
    node_indices: HashMap<String, usize>,
    #[serde(skip)]
    link_indices: HashMap<LinkKey, usize>,
}

impl GraphData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn links(&self) -> &[GraphLink] {
        &self.links
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.node_indices.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn link(&self, key: &LinkKey) -> Option<&GraphLink> {
        self.link_indices.get(key).map(|&idx| &self.links[idx])
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node_indices.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// A graph without edges carries no neighborhood information.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Inserts `node` unless its id is taken. Returns whether it was added.
    pub fn add_node(&mut self, node: GraphNode) -> bool {
        if self.node_indices.contains_key(&node.id) {
            return false;
        }
        self.node_indices.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        true
    }

    /// Fills the attributes node `id` is missing. Returns false for an
    /// unknown id.
    pub fn annotate(&mut self, id: &str, details: NodeDetails) -> bool {
        match self.node_indices.get(id) {
            Some(&idx) => {
                self.nodes[idx].fill(details);
                true
            }
            None => false,
        }
    }

    /// Inserts `link` unless its key is taken, adding missing endpoints.
    pub fn add_link(&mut self, link: GraphLink) -> bool {
        let key = link.key();
        if self.link_indices.contains_key(&key) {
            return false;
        }
        self.add_node(GraphNode::new(link.source.clone()));
        self.add_node(GraphNode::new(link.target.clone()));
        self.link_indices.insert(key, self.links.len());
        self.links.push(link);
        true
    }

    /// Folds `link` into an existing one with the same pair key by summing
    /// value and count and widening the time range. Hash-keyed links name a
    /// single transaction, so a repeat of one is the same transfer and is
    /// dropped.
    pub fn aggregate_link(&mut self, link: GraphLink) {
        let key = link.key();
        let Some(&idx) = self.link_indices.get(&key) else {
            self.add_link(link);
            return;
        };
        if matches!(key, LinkKey::Hash(_)) {
            return;
        }

        let existing = &mut self.links[idx];
        existing.value += link.value;
        existing.transactions += link.transactions;
        existing.first_transaction =
            earliest(existing.first_transaction.take(), link.first_transaction);
        existing.last_transaction = latest(existing.last_transaction.take(), link.last_transaction);
    }

    /// Union by node id and link key. Existing entries always win, though
    /// an existing node picks up attributes it was missing. The receiving
    /// graph keeps its own focus: incoming nodes never arrive marked as
    /// searched.
    pub fn merge(&mut self, other: GraphData) -> MergeStats {
        let mut stats = MergeStats::default();
        for mut node in other.nodes {
            node.is_searched = false;
            let details = node.details();
            let id = node.id.clone();
            if self.add_node(node) {
                stats.nodes_added += 1;
            } else {
                self.annotate(&id, details);
            }
        }
        for link in other.links {
            if self.add_link(link) {
                stats.links_added += 1;
            }
        }
        stats
    }
}

// Timestamps are normalized ISO-8601 UTC, so string order is time order.
fn earliest(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn latest(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
