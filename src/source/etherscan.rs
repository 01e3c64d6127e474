use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::ExplorerConfig;
use crate::error::SourceError;
use crate::model::Amount;

use super::{AnalyticsSource, RawRecord, SourceKind};

/// Etherscan-family block explorer REST client.
///
/// Rows are returned the way the explorer spells them (`from`, `to`,
/// `timeStamp`, decimal strings); the normalizer owns the mapping.
#[derive(Debug, Clone)]
pub struct EtherscanSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    max_transactions: usize,
}

impl EtherscanSource {
    pub fn new(config: &ExplorerConfig) -> anyhow::Result<Self> {
        let base_url = config.api_base_url()?;
        let timeout = config.request_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build explorer HTTP client: {}", e))?;

        info!("Explorer source using {}", base_url);
        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            timeout,
            max_transactions: config.max_transactions,
        })
    }

    async fn get(&self, params: &[(&str, String)]) -> Result<Value, SourceError> {
        let url = format!("{}/api", self.base_url);
        let mut request = self.client.get(&url).query(params);

        // Add API key if available
        if let Some(api_key) = &self.api_key {
            request = request.query(&[("apikey", api_key)]);
        }

        let response = request.send().await.map_err(|e| self.transport(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Transport(format!(
                "Explorer answered HTTP {}",
                status.as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Decode(format!("Failed to parse explorer response: {}", e)))
    }

    /// Calls an `account`/`contract` action and unwraps `result`, treating
    /// "No transactions found" as an empty list.
    async fn call(&self, params: &[(&str, String)]) -> Result<Value, SourceError> {
        let response = self.get(params).await?;

        // Check if the response is successful
        if response["status"] != "1" {
            let message = response["message"].as_str().unwrap_or("Unknown error");
            if message.starts_with("No transactions found") {
                return Ok(json!([]));
            }
            let detail = response["result"].as_str().unwrap_or(message);
            return Err(SourceError::Api(format!("Etherscan API error: {}", detail)));
        }

        Ok(response["result"].clone())
    }

    async fn txlist(&self, address: &str) -> Result<Vec<RawRecord>, SourceError> {
        let result = self
            .call(&[
                ("module", "account".to_string()),
                ("action", "txlist".to_string()),
                ("address", address.to_string()),
                ("startblock", "0".to_string()),
                ("endblock", "99999999".to_string()),
                ("page", "1".to_string()),
                ("offset", self.max_transactions.to_string()),
                ("sort", "desc".to_string()),
            ])
            .await?;

        let rows = result
            .as_array()
            .ok_or_else(|| SourceError::Decode("txlist result is not a list".to_string()))?;
        Ok(rows.iter().filter_map(|row| row.as_object().cloned()).collect())
    }

    async fn balance(&self, address: &str) -> Result<Amount, SourceError> {
        let result = self
            .call(&[
                ("module", "account".to_string()),
                ("action", "balance".to_string()),
                ("address", address.to_string()),
                ("tag", "latest".to_string()),
            ])
            .await?;

        result
            .as_str()
            .and_then(Amount::parse)
            .ok_or_else(|| SourceError::Decode(format!("Unexpected balance result: {}", result)))
    }

    /// The proxy module answers in JSON-RPC shape, without `status`.
    async fn is_contract(&self, address: &str) -> Result<bool, SourceError> {
        let response = self
            .get(&[
                ("module", "proxy".to_string()),
                ("action", "eth_getCode".to_string()),
                ("address", address.to_string()),
                ("tag", "latest".to_string()),
            ])
            .await?;

        match response["result"].as_str() {
            Some(code) if code.starts_with("0x") => Ok(code.len() > 2),
            _ => {
                let detail = response["error"]["message"]
                    .as_str()
                    .or_else(|| response["result"].as_str())
                    .unwrap_or("Unknown error");
                Err(SourceError::Api(format!("Etherscan API error: {}", detail)))
            }
        }
    }

    fn transport(&self, error: reqwest::Error) -> SourceError {
        if error.is_timeout() {
            SourceError::Timeout(self.timeout)
        } else {
            SourceError::Transport(format!("Failed to fetch from Etherscan: {}", error))
        }
    }
}

/// Folds a transaction list into the per-address totals the normalizer reads.
fn summarize(address: &str, balance: Amount, is_contract: bool, txs: &[RawRecord]) -> RawRecord {
    let mut sent = 0u64;
    let mut received = 0u64;
    let mut total_sent = Amount::ZERO;
    let mut total_received = Amount::ZERO;
    let mut timestamps = Vec::with_capacity(txs.len());

    for tx in txs {
        let value = tx
            .get("value")
            .and_then(Value::as_str)
            .and_then(Amount::parse)
            .unwrap_or_default();
        let party = |column: &str| {
            tx.get(column)
                .and_then(Value::as_str)
                .is_some_and(|a| a.eq_ignore_ascii_case(address))
        };

        if party("from") {
            sent += 1;
            total_sent = total_sent.saturating_add(value);
        }
        if party("to") {
            received += 1;
            total_received = total_received.saturating_add(value);
        }
        if let Some(at) = tx.get("timeStamp") {
            timestamps.push(at.clone());
        }
    }

    let record = json!({
        "address": address,
        "isContract": is_contract,
        "balance": balance.to_string(),
        "sentCount": sent,
        "receivedCount": received,
        "totalSentValue": total_sent.to_string(),
        "totalReceivedValue": total_received.to_string(),
        "timestamps": timestamps,
    });
    match record {
        Value::Object(map) => map,
        _ => RawRecord::new(),
    }
}

#[async_trait]
impl AnalyticsSource for EtherscanSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Explorer
    }

    async fn address_info(&self, address: &str) -> Result<Option<RawRecord>, SourceError> {
        let (balance, txs, is_contract) = tokio::try_join!(
            self.balance(address),
            self.txlist(address),
            self.is_contract(address),
        )?;

        if txs.is_empty() && balance.is_zero() && !is_contract {
            debug!("Explorer has no trace of {}", address);
            return Ok(None);
        }

        Ok(Some(summarize(address, balance, is_contract, &txs)))
    }

    async fn transactions(&self, address: &str) -> Result<Vec<RawRecord>, SourceError> {
        self.txlist(address).await
    }

    /// Every transaction is one edge; the assembler keys them by hash.
    async fn neighborhood(&self, address: &str) -> Result<Vec<RawRecord>, SourceError> {
        self.txlist(address).await
    }
}
