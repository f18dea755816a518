//! Asset amounts with exact decimal presentation

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An amount in an asset's smallest unit.
///
/// `decimals` is `None` when the chain never reported it; such amounts are
/// rendered raw and labelled as such.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub asset_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Smallest-unit quantity
    #[serde(with = "raw_string")]
    pub raw: u128,
    pub decimals: Option<u32>,
}

impl AssetAmount {
    pub fn new(asset_id: impl Into<String>, raw: u128, decimals: Option<u32>) -> Self {
        Self {
            asset_id: asset_id.into(),
            symbol: None,
            raw,
            decimals,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// `raw / 10^decimals`, exact. `None` when decimals are unknown or the
    /// value does not fit a 96-bit decimal mantissa.
    pub fn to_decimal(&self) -> Option<Decimal> {
        let decimals = self.decimals?;
        let raw = i128::try_from(self.raw).ok()?;
        Decimal::try_from_i128_with_scale(raw, decimals).ok()
    }

    /// Inverse of [`AssetAmount::to_decimal`]: `None` if `value` is negative
    /// or carries more fractional digits than `decimals`.
    pub fn from_decimal(
        asset_id: impl Into<String>,
        value: Decimal,
        decimals: u32,
    ) -> Option<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return None;
        }
        let mut scaled = value;
        scaled.rescale(decimals);
        if scaled != value || scaled.scale() != decimals {
            return None;
        }
        let raw = u128::try_from(scaled.mantissa()).ok()?;
        Some(Self::new(asset_id, raw, Some(decimals)))
    }

    /// Whether this amount is presented in raw units
    pub fn is_raw(&self) -> bool {
        self.to_decimal().is_none()
    }

    fn label(&self) -> &str {
        self.symbol.as_deref().unwrap_or(&self.asset_id)
    }
}

impl fmt::Display for AssetAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_decimal() {
            Some(value) => write!(f, "{} {}", value.normalize(), self.label()),
            None => write!(f, "{} {} (raw units)", self.raw, self.label()),
        }
    }
}

/// u128 does not survive every JSON consumer, so raw amounts travel as strings.
mod raw_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
