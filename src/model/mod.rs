pub mod amount;

use serde::{Deserialize, Serialize};

pub use amount::Amount;

/// A single on-chain value transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub from_address: String,
    pub to_address: String,
    pub value: Amount,
    pub gas: Amount,
    pub gas_used: Amount,
    pub gas_price: Amount,
    pub block_number: u64,
    /// ISO-8601, UTC. `None` when the source gave nothing parseable.
    pub timestamp: Option<String>,
}

impl Transaction {
    /// Gas actually paid for by the sender.
    pub fn fee(&self) -> Amount {
        self.gas_used.saturating_mul(self.gas_price)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    Eoa,
    Contract,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInfo {
    pub address_id: String,
    #[serde(rename = "type")]
    pub kind: AddressKind,
    pub balance: Amount,
    pub total_sent_value: Amount,
    pub total_received_value: Amount,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
    pub total_transactions: u64,
    pub sent_transactions: u64,
    pub received_transactions: u64,
}

/// End-of-day balance for one UTC calendar day with activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSample {
    pub date: String,
    pub balance: Amount,
    pub inflow: Amount,
    pub outflow: Amount,
    pub transactions: u64,
}

/// Gas spent by an address on one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasSample {
    pub date: String,
    pub transactions: u64,
    pub gas_used: Amount,
    pub total_fee: Amount,
    pub average_gas_price: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub is_searched: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<AddressKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_transactions: Option<u64>,
}

impl GraphNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_searched: false,
            kind: None,
            balance: None,
            total_transactions: None,
        }
    }

    pub fn searched(id: impl Into<String>) -> Self {
        Self {
            is_searched: true,
            ..Self::new(id)
        }
    }

    pub fn with_details(mut self, details: NodeDetails) -> Self {
        self.fill(details);
        self
    }

    /// Sets the display attributes this node is still missing.
    pub fn fill(&mut self, details: NodeDetails) {
        self.kind = self.kind.or(details.kind);
        self.balance = self.balance.or(details.balance);
        self.total_transactions = self.total_transactions.or(details.total_transactions);
    }

    pub fn details(&self) -> NodeDetails {
        NodeDetails {
            kind: self.kind,
            balance: self.balance,
            total_transactions: self.total_transactions,
        }
    }
}

/// Display attributes of an edge endpoint, when the source knows them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeDetails {
    pub kind: Option<AddressKind>,
    pub balance: Option<Amount>,
    pub total_transactions: Option<u64>,
}

/// Identity of a link during merges: the transaction hash when the link
/// stands for exactly one transaction, the ordered endpoint pair otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LinkKey {
    Hash(String),
    Pair(String, String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphLink {
    pub source: String,
    pub target: String,
    pub value: f64,
    pub transactions: u64,
    pub direction: Direction,
    pub first_transaction: Option<String>,
    pub last_transaction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Transaction>,
}

impl GraphLink {
    pub fn key(&self) -> LinkKey {
        match &self.hash {
            Some(hash) => LinkKey::Hash(hash.clone()),
            None => LinkKey::Pair(self.source.clone(), self.target.clone()),
        }
    }
}

/// One normalized edge row, before it is attached to a focal address.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    pub source: String,
    pub target: String,
    pub value: f64,
    pub transactions: u64,
    pub first_transaction: Option<String>,
    pub last_transaction: Option<String>,
    pub hash: Option<String>,
    pub transaction: Option<Transaction>,
    pub source_details: NodeDetails,
    pub target_details: NodeDetails,
}
