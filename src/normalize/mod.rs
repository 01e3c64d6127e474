//! Pure mapping from source rows to canonical entities.
//!
//! Every entry point is tagged with the [`SourceKind`] the row came from,
//! because the two sources disagree on column names and numeric encodings:
//! the graph database hands out native integers, `{low, high}` integer
//! pairs or floats, the explorer hands out decimal strings.

pub mod history;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::debug;

use crate::error::{ExplorerError, Result};
use crate::model::{AddressInfo, AddressKind, Amount, EdgeRecord, NodeDetails, Transaction};
use crate::source::{RawRecord, SourceKind};

pub use history::{balance_history, gas_history};

struct TransactionColumns {
    from: &'static str,
    to: &'static str,
    timestamp: &'static str,
}

const fn transaction_columns(kind: SourceKind) -> TransactionColumns {
    match kind {
        SourceKind::GraphDb => TransactionColumns {
            from: "fromAddress",
            to: "toAddress",
            timestamp: "timestamp",
        },
        SourceKind::Explorer => TransactionColumns {
            from: "from",
            to: "to",
            timestamp: "timeStamp",
        },
    }
}

pub fn normalize_transaction(raw: &RawRecord, kind: SourceKind) -> Result<Transaction> {
    let columns = transaction_columns(kind);

    let hash = text(raw, "hash").ok_or_else(|| ExplorerError::malformed("transaction", "hash"))?;

    Ok(Transaction {
        hash,
        from_address: address(raw, columns.from),
        to_address: address(raw, columns.to),
        value: amount(raw, "value"),
        gas: amount(raw, "gas"),
        gas_used: amount(raw, "gasUsed"),
        gas_price: amount(raw, "gasPrice"),
        block_number: raw.get("blockNumber").and_then(coerce_u64).unwrap_or(0),
        timestamp: raw.get(columns.timestamp).and_then(coerce_timestamp),
    })
}

/// The total transaction count is always recomputed from the sent and
/// received counts; neither source's own total is trusted.
pub fn normalize_address_info(raw: &RawRecord, kind: SourceKind) -> Result<AddressInfo> {
    let address_column = match kind {
        SourceKind::GraphDb => "addressId",
        SourceKind::Explorer => "address",
    };
    let address_id = text(raw, address_column)
        .map(|a| a.to_lowercase())
        .ok_or_else(|| ExplorerError::malformed("address", "addressId"))?;

    let (sent, received) = match kind {
        SourceKind::GraphDb => (
            count(raw, "sentTransactions", "sentValues"),
            count(raw, "receivedTransactions", "receivedValues"),
        ),
        SourceKind::Explorer => (
            count(raw, "sentCount", "sentValues"),
            count(raw, "receivedCount", "receivedValues"),
        ),
    };

    let kind_value = match kind {
        SourceKind::GraphDb => raw.get("type").and_then(Value::as_str).map(parse_address_kind),
        SourceKind::Explorer => raw.get("isContract").and_then(Value::as_bool).map(|c| {
            if c {
                AddressKind::Contract
            } else {
                AddressKind::Eoa
            }
        }),
    };

    let mut seen: Vec<String> = raw
        .get("timestamps")
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(coerce_timestamp).collect())
        .unwrap_or_default();
    seen.sort();

    Ok(AddressInfo {
        address_id,
        kind: kind_value.unwrap_or(AddressKind::Eoa),
        balance: amount(raw, "balance"),
        total_sent_value: total_value(raw, "totalSentValue", "sentValues"),
        total_received_value: total_value(raw, "totalReceivedValue", "receivedValues"),
        first_seen: raw
            .get("firstSeen")
            .and_then(coerce_timestamp)
            .or_else(|| seen.first().cloned()),
        last_seen: raw
            .get("lastSeen")
            .and_then(coerce_timestamp)
            .or_else(|| seen.last().cloned()),
        total_transactions: sent + received,
        sent_transactions: sent,
        received_transactions: received,
    })
}

/// Graph-database rows are already aggregated per `(source, target)`;
/// explorer rows are single transactions and keep their hash.
pub fn normalize_edge(raw: &RawRecord, kind: SourceKind) -> Result<EdgeRecord> {
    match kind {
        SourceKind::GraphDb => {
            let source =
                text(raw, "source").ok_or_else(|| ExplorerError::malformed("edge", "source"))?;
            let target =
                text(raw, "target").ok_or_else(|| ExplorerError::malformed("edge", "target"))?;

            Ok(EdgeRecord {
                source: source.to_lowercase(),
                target: target.to_lowercase(),
                value: raw.get("value").and_then(coerce_f64).unwrap_or(0.0),
                transactions: raw.get("transactions").and_then(coerce_u64).unwrap_or(1),
                first_transaction: raw.get("firstTransaction").and_then(coerce_timestamp),
                last_transaction: raw.get("lastTransaction").and_then(coerce_timestamp),
                hash: None,
                transaction: None,
                source_details: endpoint_details(raw, "source"),
                target_details: endpoint_details(raw, "target"),
            })
        }
        SourceKind::Explorer => {
            let tx = normalize_transaction(raw, kind)?;
            if tx.from_address.is_empty() || tx.to_address.is_empty() {
                // contract creations have no counterparty to draw
                return Err(ExplorerError::malformed("edge", "to"));
            }

            Ok(EdgeRecord {
                source: tx.from_address.clone(),
                target: tx.to_address.clone(),
                value: tx.value.as_f64(),
                transactions: 1,
                first_transaction: tx.timestamp.clone(),
                last_transaction: tx.timestamp.clone(),
                hash: Some(tx.hash.clone()),
                transaction: Some(tx),
                source_details: NodeDetails::default(),
                target_details: NodeDetails::default(),
            })
        }
    }
}

/// `sourceType`, `sourceBalance`, `sourceTransactions` and their `target`
/// counterparts, all optional.
fn endpoint_details(raw: &RawRecord, prefix: &str) -> NodeDetails {
    let column = |name: &str| raw.get(&format!("{}{}", prefix, name));
    NodeDetails {
        kind: column("Type").and_then(Value::as_str).map(parse_address_kind),
        balance: column("Balance").and_then(coerce_amount),
        total_transactions: column("Transactions").and_then(coerce_u64),
    }
}

/// Normalizes every row, skipping the ones that cannot be.
pub fn normalize_all<T>(
    records: &[RawRecord],
    kind: SourceKind,
    normalize: fn(&RawRecord, SourceKind) -> Result<T>,
) -> Vec<T> {
    records
        .iter()
        .filter_map(|raw| match normalize(raw, kind) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Skipping {} record: {}", kind, e);
                None
            }
        })
        .collect()
}

fn parse_address_kind(value: &str) -> AddressKind {
    if value.to_ascii_lowercase().contains("contract") {
        AddressKind::Contract
    } else {
        AddressKind::Eoa
    }
}

fn text(raw: &RawRecord, column: &str) -> Option<String> {
    raw.get(column)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn address(raw: &RawRecord, column: &str) -> String {
    text(raw, column).map(|a| a.to_lowercase()).unwrap_or_default()
}

fn amount(raw: &RawRecord, column: &str) -> Amount {
    raw.get(column).and_then(coerce_amount).unwrap_or_default()
}

fn count(raw: &RawRecord, column: &str, values_column: &str) -> u64 {
    raw.get(column).and_then(coerce_u64).unwrap_or_else(|| {
        raw.get(values_column)
            .and_then(Value::as_array)
            .map(|values| values.len() as u64)
            .unwrap_or(0)
    })
}

fn total_value(raw: &RawRecord, column: &str, values_column: &str) -> Amount {
    if let Some(total) = raw.get(column).and_then(coerce_amount) {
        return total;
    }
    raw.get(values_column)
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(coerce_amount).sum())
        .unwrap_or_default()
}

/// Neo4j integers leak out of JavaScript-era exports as `{low, high}`
/// pairs of signed 32-bit halves.
fn integer_pair(value: &Value) -> Option<i64> {
    let object = value.as_object()?;
    let low = object.get("low")?.as_i64()?;
    let high = object.get("high")?.as_i64()?;
    Some((high << 32) | i64::from(low as u32))
}

/// Coerces any numeric-like encoding into an exact unsigned integer.
pub fn coerce_amount(value: &Value) -> Option<Amount> {
    match value {
        Value::String(s) => Amount::parse(s),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(Amount::from(u))
            } else if let Some(f) = n.as_f64() {
                // integral floats below 2^128 only; anything else is noise
                (f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f < 3.4e38)
                    .then(|| Amount::from(f as u128))
            } else {
                None
            }
        }
        Value::Object(_) => integer_pair(value)
            .and_then(|i| u64::try_from(i).ok())
            .map(Amount::from),
        _ => None,
    }
}

pub fn coerce_u64(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::Object(_) => integer_pair(value).and_then(|i| u64::try_from(i).ok()),
        _ => None,
    }
}

pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        Value::Object(_) => integer_pair(value).map(|i| i as f64),
        _ => None,
    }
}

/// Epoch seconds, epoch millis (either as numbers or digit strings) or an
/// ISO-8601 string, rendered as ISO-8601 UTC with millisecond precision.
/// Ten digits or fewer are read as seconds.
pub fn coerce_timestamp(value: &Value) -> Option<String> {
    let millis = match value {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if s.bytes().all(|b| b.is_ascii_digit()) {
                epoch_to_millis(s.parse().ok()?, s.len())
            } else {
                return parse_iso(s);
            }
        }
        Value::Number(n) => {
            let epoch = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            epoch_to_millis(epoch, epoch.unsigned_abs().to_string().len())
        }
        Value::Object(_) => {
            let epoch = integer_pair(value)?;
            epoch_to_millis(epoch, epoch.unsigned_abs().to_string().len())
        }
        _ => return None,
    };

    DateTime::<Utc>::from_timestamp_millis(millis).map(format_timestamp)
}

fn epoch_to_millis(epoch: i64, digits: usize) -> i64 {
    if digits <= 10 {
        epoch.saturating_mul(1000)
    } else {
        epoch
    }
}

fn parse_iso(value: &str) -> Option<String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(format_timestamp(parsed.with_timezone(&Utc)));
    }
    // zone-less timestamps are taken as UTC
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| format_timestamp(naive.and_utc()))
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_explorer_transaction() {
        let raw = record(json!({
            "hash": "0xAbC1",
            "from": "0xAAAA",
            "to": "0xBBBB",
            "value": "123456789012345678901234567890",
            "gas": "21000",
            "gasUsed": "21000",
            "gasPrice": "30000000000",
            "blockNumber": "17000000",
            "timeStamp": "1700000000"
        }));

        let tx = normalize_transaction(&raw, SourceKind::Explorer).unwrap();
        assert_eq!(tx.hash, "0xAbC1");
        assert_eq!(tx.from_address, "0xaaaa");
        assert_eq!(tx.to_address, "0xbbbb");
        assert_eq!(tx.value.to_string(), "123456789012345678901234567890");
        assert_eq!(tx.block_number, 17_000_000);
        assert_eq!(tx.timestamp.as_deref(), Some("2023-11-14T22:13:20.000Z"));

        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["value"], json!("123456789012345678901234567890"));
        assert_eq!(json["gasPrice"], json!("30000000000"));
    }

    #[test]
    fn test_graph_db_transaction_with_integer_pairs() {
        let raw = record(json!({
            "hash": "0x01",
            "fromAddress": "0xaaaa",
            "toAddress": "0xbbbb",
            "value": {"low": -1, "high": 0},
            "gas": 21000,
            "gasUsed": 21000.0,
            "gasPrice": "1000",
            "blockNumber": {"low": 5, "high": 1},
            "timestamp": 1_700_000_000_123i64
        }));

        let tx = normalize_transaction(&raw, SourceKind::GraphDb).unwrap();
        assert_eq!(tx.value, Amount::from(u32::MAX as u64));
        assert_eq!(tx.gas_used, Amount::from(21000u64));
        assert_eq!(tx.block_number, (1u64 << 32) + 5);
        assert_eq!(tx.timestamp.as_deref(), Some("2023-11-14T22:13:20.123Z"));
    }

    #[test]
    fn test_missing_hash_is_malformed() {
        let raw = record(json!({"from": "0xaaaa", "to": "0xbbbb", "value": "1", "hash": ""}));
        let err = normalize_transaction(&raw, SourceKind::Explorer).unwrap_err();
        assert!(matches!(err, ExplorerError::MalformedRecord { field: "hash", .. }));
    }

    #[test]
    fn test_timestamp_forms_agree() {
        let expected = Some("2021-01-01T00:00:00.000Z".to_string());
        assert_eq!(coerce_timestamp(&json!(1609459200)), expected);
        assert_eq!(coerce_timestamp(&json!("1609459200")), expected);
        assert_eq!(coerce_timestamp(&json!(1609459200000i64)), expected);
        assert_eq!(coerce_timestamp(&json!("2021-01-01T01:00:00+01:00")), expected);
        assert_eq!(coerce_timestamp(&json!("2021-01-01T00:00:00")), expected);
        assert_eq!(coerce_timestamp(&json!("yesterday")), None);
        assert_eq!(coerce_timestamp(&Value::Null), None);
    }

    #[test]
    fn test_address_info_recomputes_total() {
        let graph_row = record(json!({
            "addressId": "0xAAAA",
            "type": "Contract",
            "balance": "1000",
            "sentTransactions": {"low": 3, "high": 0},
            "receivedTransactions": 4,
            "totalTransactions": 99,
            "sentValues": ["1", "2", "3"],
            "receivedValues": ["10", "20", "30", "40"],
            "timestamps": [1609459200, "1609545600"]
        }));
        let info = normalize_address_info(&graph_row, SourceKind::GraphDb).unwrap();
        assert_eq!(info.address_id, "0xaaaa");
        assert_eq!(info.kind, AddressKind::Contract);
        assert_eq!(info.total_transactions, 7);
        assert_eq!(info.total_sent_value, Amount::from(6u64));
        assert_eq!(info.total_received_value, Amount::from(100u64));
        assert_eq!(info.first_seen.as_deref(), Some("2021-01-01T00:00:00.000Z"));
        assert_eq!(info.last_seen.as_deref(), Some("2021-01-02T00:00:00.000Z"));

        let explorer_row = record(json!({
            "address": "0xbbbb",
            "isContract": false,
            "balance": "5",
            "sentCount": "2",
            "receivedCount": "1",
            "totalSentValue": "7",
            "totalReceivedValue": "9"
        }));
        let info = normalize_address_info(&explorer_row, SourceKind::Explorer).unwrap();
        assert_eq!(info.kind, AddressKind::Eoa);
        assert_eq!(
            info.total_transactions,
            info.sent_transactions + info.received_transactions
        );
        assert_eq!(info.total_transactions, 3);
    }

    #[test]
    fn test_address_info_requires_id() {
        let raw = record(json!({"balance": "5"}));
        assert!(normalize_address_info(&raw, SourceKind::GraphDb).is_err());
    }

    #[test]
    fn test_edges_per_source() {
        let aggregated = record(json!({
            "source": "0xA",
            "target": "0xB",
            "value": 15.0,
            "transactions": {"low": 2, "high": 0},
            "firstTransaction": "1609459200",
            "lastTransaction": 1609545600
        }));
        let edge = normalize_edge(&aggregated, SourceKind::GraphDb).unwrap();
        assert_eq!(edge.source, "0xa");
        assert_eq!(edge.transactions, 2);
        assert_eq!(edge.value, 15.0);
        assert!(edge.hash.is_none());
        assert_eq!(edge.source_details, NodeDetails::default());

        let detailed = record(json!({
            "source": "0xa",
            "target": "0xb",
            "value": 1.0,
            "targetType": "Contract",
            "targetBalance": "1000000000000000000000",
            "targetTransactions": {"low": 9, "high": 0}
        }));
        let edge = normalize_edge(&detailed, SourceKind::GraphDb).unwrap();
        assert_eq!(edge.target_details.kind, Some(AddressKind::Contract));
        assert_eq!(
            edge.target_details.balance.map(|b| b.to_string()).as_deref(),
            Some("1000000000000000000000")
        );
        assert_eq!(edge.target_details.total_transactions, Some(9));

        let creation = record(json!({"hash": "0x02", "from": "0xa", "to": "", "value": "0"}));
        assert!(normalize_edge(&creation, SourceKind::Explorer).is_err());
    }

    #[test]
    fn test_normalize_all_skips_malformed() {
        let rows = vec![
            record(json!({"hash": "0x01", "from": "0xa", "to": "0xb"})),
            record(json!({"from": "0xa", "to": "0xb"})),
        ];
        let txs = normalize_all(&rows, SourceKind::Explorer, normalize_transaction);
        assert_eq!(txs.len(), 1);
    }
}
