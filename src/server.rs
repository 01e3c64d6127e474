use anyhow::Result;
use rmcp::{
    model::{ServerCapabilities, ServerInfo},
    tool,
    transport::stdio,
    ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use crate::{
    error::ExplorerError,
    gateway::Gateway,
    graph::{ExpandOutcome, ExpansionController},
    utils,
};

/// MCP stdio front end over the gateway and the expansion controller.
#[derive(Clone)]
pub struct ExplorerMcpServer {
    gateway: Arc<Gateway>,
    explorer: Arc<ExpansionController<Gateway>>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct AddressRequest {
    /// 0x-prefixed account address
    address: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct ExpandRequest {
    /// Id of a node already in the graph
    node: String,
    /// Fail instead of waiting when another expansion is running
    #[serde(default)]
    no_wait: bool,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct EmptyRequest {}

fn render<T: Serialize>(value: &T, what: &str) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| format!("Failed to serialize {}", what))
}

fn failure(action: &str, e: &ExplorerError) -> String {
    error!("Failed to {}: {}", action, e);
    format!("Error: {}", utils::interpret_error(e))
}

impl ExplorerMcpServer {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let explorer = Arc::new(ExpansionController::new(gateway.clone()));
        Self { gateway, explorer }
    }

    pub async fn run(&self) -> Result<()> {
        info!("Starting Studio Explorer MCP Server");

        let service = self.clone().serve(stdio()).await?;

        info!("Studio Explorer MCP Server started successfully");
        let _ = service.waiting().await;
        Ok(())
    }

    async fn focus(&self, address: &str) -> std::result::Result<String, ExplorerError> {
        let address = utils::normalize_address(address)?;
        let snapshot = self.explorer.focus(&address).await?;
        Ok(render(&snapshot, "graph"))
    }

    async fn expand(&self, request: &ExpandRequest) -> std::result::Result<String, ExplorerError> {
        let node = utils::normalize_address(&request.node)?;
        let outcome = if request.no_wait {
            self.explorer.try_expand(&node).await?
        } else {
            self.explorer.expand(&node).await?
        };

        let status = match outcome {
            ExpandOutcome::Merged(stats) => json!({
                "status": "merged",
                "nodesAdded": stats.nodes_added,
                "linksAdded": stats.links_added,
            }),
            ExpandOutcome::AlreadyExpanded => json!({ "status": "already_expanded" }),
            ExpandOutcome::InFlight => json!({ "status": "in_flight" }),
            ExpandOutcome::Stale => json!({ "status": "stale" }),
        };
        let snapshot = self.explorer.snapshot().await;
        Ok(render(&json!({ "expansion": status, "state": snapshot }), "graph"))
    }
}

#[tool(tool_box)]
impl ExplorerMcpServer {
    #[tool(description = "Get balance, transaction counts and first/last activity of an address")]
    async fn get_address_info(&self, #[tool(aggr)] request: AddressRequest) -> String {
        match self.gateway.get_address_info(&request.address).await {
            Ok(fetched) if fetched.data.is_none() => {
                format!("No activity found for {}", request.address)
            }
            Ok(fetched) => render(&fetched, "address info"),
            Err(e) => failure("get address info", &e),
        }
    }

    #[tool(description = "List transactions sent or received by an address")]
    async fn get_transactions(&self, #[tool(aggr)] request: AddressRequest) -> String {
        match self.gateway.get_transactions_for_address(&request.address).await {
            Ok(fetched) => render(&fetched, "transactions"),
            Err(e) => failure("get transactions", &e),
        }
    }

    #[tool(description = "Get the transaction graph around an address (nodes and aggregated links)")]
    async fn get_graph_neighborhood(&self, #[tool(aggr)] request: AddressRequest) -> String {
        match self.gateway.get_graph_neighborhood(&request.address).await {
            Ok(fetched) => render(&fetched, "graph"),
            Err(e) => failure("get graph neighborhood", &e),
        }
    }

    #[tool(description = "Get the end-of-day balance of an address over time")]
    async fn get_balance_history(&self, #[tool(aggr)] request: AddressRequest) -> String {
        match self.gateway.get_balance_history(&request.address).await {
            Ok(fetched) => render(&fetched, "balance history"),
            Err(e) => failure("get balance history", &e),
        }
    }

    #[tool(description = "Get daily gas usage and fees paid by an address")]
    async fn get_gas_history(&self, #[tool(aggr)] request: AddressRequest) -> String {
        match self.gateway.get_gas_history(&request.address).await {
            Ok(fetched) => render(&fetched, "gas history"),
            Err(e) => failure("get gas history", &e),
        }
    }

    #[tool(description = "Start a new exploration centered on an address, replacing the current graph")]
    async fn focus_graph(&self, #[tool(aggr)] request: AddressRequest) -> String {
        self.focus(&request.address)
            .await
            .unwrap_or_else(|e| failure("focus graph", &e))
    }

    #[tool(description = "Expand a node of the current graph by merging in its own neighborhood")]
    async fn expand_node(&self, #[tool(aggr)] request: ExpandRequest) -> String {
        self.expand(&request)
            .await
            .unwrap_or_else(|e| failure("expand node", &e))
    }

    #[tool(description = "Show the current exploration graph, expanded nodes and any pending expansion")]
    async fn graph_state(&self, #[tool(aggr)] _request: EmptyRequest) -> String {
        render(&self.explorer.snapshot().await, "graph")
    }
}

#[tool(tool_box)]
impl ServerHandler for ExplorerMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some("MCP server for exploring on-chain address activity. Reads a transaction graph database with an Etherscan fallback. Supports address summaries, transaction lists, balance and gas history, and an interactive graph that grows node by node.".into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
