use std::collections::BTreeMap;

use crate::model::{Amount, BalanceSample, GasSample, Transaction};

#[derive(Default)]
struct DayFlow {
    inflow: Amount,
    outflow: Amount,
    transactions: u64,
}

/// UTC calendar day of a normalized timestamp.
fn day_of(tx: &Transaction) -> Option<String> {
    tx.timestamp.as_ref().and_then(|ts| ts.get(..10)).map(str::to_string)
}

/// End-of-day balances of `address`, one sample per day with activity.
///
/// With a known current balance the series is anchored at the end and walked
/// backwards, so truncated transaction lists still end on the right value.
/// Without one it is accumulated forward from zero.
pub fn balance_history(
    address: &str,
    transactions: &[Transaction],
    current_balance: Option<Amount>,
) -> Vec<BalanceSample> {
    let mut days: BTreeMap<String, DayFlow> = BTreeMap::new();

    for tx in transactions {
        let Some(day) = day_of(tx) else { continue };
        let flow = days.entry(day).or_default();
        flow.transactions += 1;
        if tx.to_address == address {
            flow.inflow = flow.inflow.saturating_add(tx.value);
        }
        if tx.from_address == address {
            flow.outflow = flow.outflow.saturating_add(tx.value).saturating_add(tx.fee());
        }
    }

    let mut samples: Vec<BalanceSample> = days
        .into_iter()
        .map(|(date, flow)| BalanceSample {
            date,
            balance: Amount::ZERO,
            inflow: flow.inflow,
            outflow: flow.outflow,
            transactions: flow.transactions,
        })
        .collect();

    match current_balance {
        Some(anchor) => {
            let mut balance = anchor;
            for sample in samples.iter_mut().rev() {
                sample.balance = balance;
                balance = balance.saturating_add(sample.outflow).saturating_sub(sample.inflow);
            }
        }
        None => {
            let mut balance = Amount::ZERO;
            for sample in samples.iter_mut() {
                balance = balance.saturating_add(sample.inflow).saturating_sub(sample.outflow);
                sample.balance = balance;
            }
        }
    }

    samples
}

/// Daily gas spend over the transactions `address` sent.
pub fn gas_history(address: &str, transactions: &[Transaction]) -> Vec<GasSample> {
    let mut days: BTreeMap<String, (u64, Amount, Amount, Amount)> = BTreeMap::new();

    for tx in transactions.iter().filter(|tx| tx.from_address == address) {
        let Some(day) = day_of(tx) else { continue };
        let (count, gas_used, fee, price_sum) = days.entry(day).or_default();
        *count += 1;
        *gas_used = gas_used.saturating_add(tx.gas_used);
        *fee = fee.saturating_add(tx.fee());
        *price_sum = price_sum.saturating_add(tx.gas_price);
    }

    days.into_iter()
        .map(|(date, (transactions, gas_used, total_fee, price_sum))| GasSample {
            date,
            transactions,
            gas_used,
            total_fee,
            average_gas_price: price_sum.div_floor(transactions),
        })
        .collect()
}
