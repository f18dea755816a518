//! Per-address value flow

use super::records::Transaction;
use super::AssetAmount;
use crate::assets::AssetRegistry;
use serde::Serialize;
use std::collections::BTreeMap;

/// Outputs to `address` minus inputs from `address`, per asset.
///
/// Assets with zero net movement are omitted.
pub fn net_flow(tx: &Transaction, address: &str) -> BTreeMap<String, i128> {
    let mut net: BTreeMap<String, i128> = BTreeMap::new();
    for t in tx.outputs.iter().filter(|t| t.address == address) {
        let entry = net.entry(t.amount.asset_id.clone()).or_default();
        *entry = entry.saturating_add(to_i128(t.amount.raw));
    }
    for t in tx.inputs.iter().filter(|t| t.address == address) {
        let entry = net.entry(t.amount.asset_id.clone()).or_default();
        *entry = entry.saturating_sub(to_i128(t.amount.raw));
    }
    net.retain(|_, v| *v != 0);
    net
}

fn to_i128(raw: u128) -> i128 {
    i128::try_from(raw).unwrap_or(i128::MAX)
}

/// Incoming and outgoing totals for one asset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlowTotals {
    pub incoming: u128,
    pub outgoing: u128,
}

impl FlowTotals {
    pub fn net(&self) -> i128 {
        to_i128(self.incoming).saturating_sub(to_i128(self.outgoing))
    }
}

/// Aggregated flows of one address over a set of transactions.
///
/// Each transaction contributes its net movement, so change returned to the
/// sender is not counted as incoming.
#[derive(Debug, Clone, Serialize)]
pub struct WalletFlows {
    pub address: String,
    pub assets: BTreeMap<String, FlowTotals>,
    pub transactions: usize,
    /// Transactions in which the address spent
    pub sent: usize,
    /// Transactions in which the address only received
    pub received: usize,
}

impl WalletFlows {
    pub fn from_transactions(address: &str, transactions: &[Transaction]) -> Self {
        let mut flows = Self {
            address: address.to_string(),
            assets: BTreeMap::new(),
            transactions: 0,
            sent: 0,
            received: 0,
        };
        for tx in transactions {
            flows.add(tx);
        }
        flows
    }

    fn add(&mut self, tx: &Transaction) {
        let spends = tx.spends_from(&self.address);
        if !spends && !tx.pays_to(&self.address) {
            return;
        }
        self.transactions += 1;
        if spends {
            self.sent += 1;
        } else {
            self.received += 1;
        }

        for (asset, delta) in net_flow(tx, &self.address) {
            let totals = self.assets.entry(asset).or_default();
            if delta > 0 {
                totals.incoming = totals.incoming.saturating_add(delta.unsigned_abs());
            } else {
                totals.outgoing = totals.outgoing.saturating_add(delta.unsigned_abs());
            }
        }
    }

    /// Totals as display amounts: `(asset, incoming, outgoing)`
    pub fn amounts(&self, registry: &AssetRegistry) -> Vec<(AssetAmount, AssetAmount)> {
        self.assets
            .iter()
            .map(|(asset, totals)| {
                (
                    registry.amount(asset, totals.incoming),
                    registry.amount(asset, totals.outgoing),
                )
            })
            .collect()
    }

    /// Counterparties ranked by the number of transactions shared with them
    pub fn top_counterparties(transactions: &[Transaction], address: &str, limit: usize) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for tx in transactions {
            let mut parties: Vec<&str> = if tx.spends_from(address) {
                tx.recipients()
            } else if tx.pays_to(address) {
                tx.senders()
            } else {
                continue;
            };
            parties.retain(|p| *p != address);
            for party in parties {
                *counts.entry(party).or_default() += 1;
            }
        }
        let mut ranked: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(party, n)| (party.to_string(), n))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }
}
