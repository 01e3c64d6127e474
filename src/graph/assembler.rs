use crate::model::{Direction, EdgeRecord, GraphLink, GraphNode};

use super::GraphData;

/// Builds the graph around `focal` from edge rows touching it.
///
/// Rows that share a link key collapse into one link: rows without a hash are
/// summed per `(source, target)` pair, rows with a hash are the same transfer
/// seen twice and are kept once. The focal node is always present and is the
/// only node marked as searched. Endpoint attributes carried by the rows
/// are attached to their nodes.
pub fn assemble<I>(focal: &str, edges: I) -> GraphData
where
    I: IntoIterator<Item = EdgeRecord>,
{
    let mut graph = GraphData::new();
    graph.add_node(GraphNode::searched(focal));

    for edge in edges {
        let direction = if edge.source == focal {
            Direction::Out
        } else {
            Direction::In
        };

        let (source, target) = (edge.source.clone(), edge.target.clone());
        graph.aggregate_link(GraphLink {
            source: edge.source,
            target: edge.target,
            value: edge.value,
            transactions: edge.transactions,
            direction,
            first_transaction: edge.first_transaction,
            last_transaction: edge.last_transaction,
            hash: edge.hash,
            transaction: edge.transaction,
        });
        graph.annotate(&source, edge.source_details);
        graph.annotate(&target, edge.target_details);
    }

    graph
}
