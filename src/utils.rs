use alloy::primitives::Address;
use anyhow::anyhow;
use std::str::FromStr;

use crate::error::{ExplorerError, Result};

/// Validates an Ethereum address and returns its lower-case spelling, which
/// is the node id used throughout the graph.
pub fn normalize_address(address: &str) -> Result<String> {
    let address = address.trim();

    if address.is_empty() {
        return Err(ExplorerError::InvalidAddress(
            "Address cannot be empty".to_string(),
        ));
    }

    if !address.starts_with("0x") && !address.starts_with("0X") {
        return Err(ExplorerError::InvalidAddress(format!(
            "'{}'. Ethereum addresses must start with '0x'",
            address
        )));
    }

    if address.len() != 42 {
        return Err(ExplorerError::InvalidAddress(format!(
            "'{}'. Ethereum addresses must be exactly 42 characters (0x + 40 hex characters)",
            address
        )));
    }

    // Check if all characters after 0x are valid hex
    if !address[2..].chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ExplorerError::InvalidAddress(format!(
            "'{}'. Contains non-hexadecimal characters",
            address
        )));
    }

    let parsed = Address::from_str(address)
        .map_err(|e| ExplorerError::InvalidAddress(format!("'{}': {}", address, e)))?;
    Ok(format!("0x{:x}", parsed))
}

/// Validates an explorer network name
pub fn validate_network(network: &str, available_networks: &[&str]) -> anyhow::Result<()> {
    if network.is_empty() {
        return Err(anyhow!("Network name cannot be empty"));
    }

    if !available_networks.contains(&network) {
        return Err(anyhow!(
            "Unknown network: '{}'. Available networks: {}",
            network,
            available_networks.join(", ")
        ));
    }

    Ok(())
}

/// Creates user-friendly messages for failures the presentation layer shows
pub fn interpret_error(error: &ExplorerError) -> String {
    let raw = error.to_string();
    match error {
        ExplorerError::SourceUnavailable { .. } => interpret_source_error(&raw),
        ExplorerError::InvalidAddress(_) => raw,
        ExplorerError::UnknownNode(node) => format!(
            "{} is not part of the current graph. Search for it or expand a neighbor first.",
            node
        ),
        ExplorerError::ExpansionInFlight(node) if node.is_empty() => {
            "Another expansion is still loading. Try again in a moment.".to_string()
        }
        ExplorerError::ExpansionInFlight(node) => {
            format!("Still loading the neighborhood of {}. Try again in a moment.", node)
        }
        ExplorerError::MalformedRecord { .. } => raw,
    }
}

fn interpret_source_error(error: &str) -> String {
    let lower = error.to_lowercase();
    if lower.contains("rate limit") || lower.contains("429") {
        "Rate limit error: Too many requests to the explorer API. Try again in a few moments or provide your own ETHERSCAN_API_KEY.".to_string()
    } else if lower.contains("invalid api key") || lower.contains("403") {
        "API authentication error: Invalid explorer API key. Check your ETHERSCAN_API_KEY environment variable.".to_string()
    } else if lower.contains("timed out") || lower.contains("timeout") {
        "Timeout error: The data sources did not answer in time. Try again in a few moments."
            .to_string()
    } else if lower.contains("connection") || lower.contains("network") {
        "Network error: Cannot reach the data sources. Check your connection and try again."
            .to_string()
    } else {
        format!("Data source error: {}. Try again.", error)
    }
}
