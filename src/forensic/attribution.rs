//! Who paid whom within one transaction
//!
//! UTXO transactions have no explicit sender/receiver pairs, so flows are
//! attributed by input share: every sender is credited with the fraction of
//! each output matching its share of the native asset spent.

use crate::normalize::Transaction;
use std::collections::BTreeMap;

/// Address used by the normalizer when a box has no address
const UNKNOWN: &str = "unknown";

/// Value attributed from one address to another in one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Contribution {
    pub from: String,
    pub to: String,
    /// Smallest-unit amount per asset, zero entries removed
    pub amounts: BTreeMap<String, u128>,
}

/// Flows touching `address` in `tx`.
///
/// If `address` spends, each other recipient gets an edge from it. If it
/// only receives, each other sender gets an edge to it.
pub(crate) fn attribute(tx: &Transaction, address: &str) -> Vec<Contribution> {
    let total_in = tx.native_in();
    let counterparty = |other: &&str| *other != address && *other != UNKNOWN;

    if tx.spends_from(address) {
        let senders = tx.senders().len() as u128;
        let share = tx.native_in_from(address);
        tx.recipients()
            .into_iter()
            .filter(counterparty)
            .filter_map(|to| {
                let amounts = scale(tx, to, share, total_in, senders);
                contribution(address, to, amounts)
            })
            .collect()
    } else if tx.pays_to(address) {
        let senders = tx.senders();
        let parties = senders.len() as u128;
        senders
            .into_iter()
            .filter(counterparty)
            .filter_map(|from| {
                let share = tx.native_in_from(from);
                let amounts = scale(tx, address, share, total_in, parties);
                contribution(from, address, amounts)
            })
            .collect()
    } else {
        Vec::new()
    }
}

fn scale(tx: &Transaction, to: &str, share: u128, total: u128, parties: u128) -> BTreeMap<String, u128> {
    tx.received_by(to)
        .into_iter()
        .map(|(asset, amount)| (asset, pro_rate(amount.raw, share, total, parties)))
        .filter(|(_, raw)| *raw > 0)
        .collect()
}

fn contribution(from: &str, to: &str, amounts: BTreeMap<String, u128>) -> Option<Contribution> {
    if amounts.is_empty() {
        return None;
    }
    Some(Contribution {
        from: from.to_string(),
        to: to.to_string(),
        amounts,
    })
}

/// `amount * share / total`, split evenly when the inputs carry no native value
pub(crate) fn pro_rate(amount: u128, share: u128, total: u128, parties: u128) -> u128 {
    if total == 0 {
        return amount / parties.max(1);
    }
    if share >= total {
        return amount;
    }
    amount
        .checked_mul(share)
        .map(|p| p / total)
        .unwrap_or_else(|| (amount / total).saturating_mul(share))
}
