//! Asset registry
//!
//! Holds display metadata (name, decimals) for the assets seen while serving
//! a request. The native asset is always known; token metadata is learned
//! from the payloads the blockchain client returns. Nothing is guessed: an
//! asset whose decimals never appeared in a payload stays in raw units.

use crate::normalize::AssetAmount;
use std::collections::HashMap;

/// Identifier of the native asset in normalized records
pub const NATIVE_ASSET_ID: &str = "nanoErgs";
/// Display symbol of the native asset
pub const NATIVE_SYMBOL: &str = "ERG";
/// nanoErgs per ERG
pub const NATIVE_DECIMALS: u32 = 9;

/// Largest scale exact decimal rendering supports
pub const MAX_DECIMALS: u32 = 28;

/// Asset metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    /// Display name or ticker
    pub name: Option<String>,
    /// Number of decimals, if the chain reported it
    pub decimals: Option<u32>,
}

/// Per-request asset metadata
#[derive(Debug, Clone)]
pub struct AssetRegistry {
    assets: HashMap<String, AssetInfo>,
}

impl AssetRegistry {
    /// Registry that knows only the native asset
    pub fn new() -> Self {
        let mut assets = HashMap::new();
        assets.insert(
            NATIVE_ASSET_ID.to_string(),
            AssetInfo {
                name: Some(NATIVE_SYMBOL.to_string()),
                decimals: Some(NATIVE_DECIMALS),
            },
        );
        Self { assets }
    }

    /// Record metadata seen in a payload.
    ///
    /// Known fields are never overwritten by missing ones. Decimals beyond
    /// [`MAX_DECIMALS`] are ignored so the asset renders in raw units.
    pub fn learn(&mut self, asset_id: &str, name: Option<&str>, decimals: Option<u32>) {
        if asset_id == NATIVE_ASSET_ID {
            return;
        }
        let decimals = match decimals {
            Some(d) if d > MAX_DECIMALS => {
                tracing::debug!(asset_id, decimals = d, "Ignoring out-of-range decimals");
                None
            }
            other => other,
        };
        let name = name.map(str::trim).filter(|n| !n.is_empty());

        let entry = self
            .assets
            .entry(asset_id.to_string())
            .or_insert(AssetInfo {
                name: None,
                decimals: None,
            });
        if entry.name.is_none() {
            entry.name = name.map(String::from);
        }
        if entry.decimals.is_none() {
            entry.decimals = decimals;
        }
    }

    pub fn get(&self, asset_id: &str) -> Option<&AssetInfo> {
        self.assets.get(asset_id)
    }

    pub fn decimals(&self, asset_id: &str) -> Option<u32> {
        self.assets.get(asset_id).and_then(|a| a.decimals)
    }

    /// Display label: the asset name when known, otherwise a shortened id
    pub fn symbol(&self, asset_id: &str) -> String {
        self.assets
            .get(asset_id)
            .and_then(|a| a.name.clone())
            .unwrap_or_else(|| short_id(asset_id))
    }

    /// Build an amount carrying whatever metadata is known
    pub fn amount(&self, asset_id: &str, raw: u128) -> AssetAmount {
        let info = self.assets.get(asset_id);
        AssetAmount {
            asset_id: asset_id.to_string(),
            symbol: info.and_then(|a| a.name.clone()),
            raw,
            decimals: info.and_then(|a| a.decimals),
        }
    }

    /// Native asset amount
    pub fn native(&self, raw: u128) -> AssetAmount {
        self.amount(NATIVE_ASSET_ID, raw)
    }
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn short_id(asset_id: &str) -> String {
    if asset_id.len() <= 12 || !asset_id.is_ascii() {
        return asset_id.to_string();
    }
    format!("{}…{}", &asset_id[..6], &asset_id[asset_id.len() - 4..])
}
