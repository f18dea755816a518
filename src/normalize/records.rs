//! Canonical address and transaction records
//!
//! Explorer and node payloads disagree on field names and nesting; every
//! accepted variant is folded into the same records here. Missing optional
//! fields become zero or empty. Only a structurally invalid required field
//! produces [`Error::Malformed`].

use super::AssetAmount;
use crate::assets::{AssetRegistry, NATIVE_ASSET_ID};
use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Address state at query time
#[derive(Debug, Clone, Serialize)]
pub struct AddressSnapshot {
    pub address: String,
    /// Balance per asset id
    pub balances: BTreeMap<String, AssetAmount>,
    pub tx_count: u64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl AddressSnapshot {
    pub fn native_balance(&self) -> Option<&AssetAmount> {
        self.balances.get(NATIVE_ASSET_ID)
    }

    /// Balances other than the native asset
    pub fn tokens(&self) -> impl Iterator<Item = &AssetAmount> {
        self.balances
            .values()
            .filter(|a| a.asset_id != NATIVE_ASSET_ID)
    }

    /// Re-apply metadata learned after this snapshot was parsed
    pub fn resolve(&mut self, registry: &AssetRegistry) {
        for amount in self.balances.values_mut() {
            *amount = registry.amount(&amount.asset_id, amount.raw);
        }
    }
}

/// One side of a transaction: an address moving an amount of one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transfer {
    pub address: String,
    pub amount: AssetAmount,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: String,
    pub block_id: Option<String>,
    pub height: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub inputs: Vec<Transfer>,
    pub outputs: Vec<Transfer>,
    /// Native asset fee
    pub fee: AssetAmount,
}

impl Transaction {
    /// Native asset spent by all inputs
    pub fn native_in(&self) -> u128 {
        sum_asset(&self.inputs, NATIVE_ASSET_ID)
    }

    /// Native asset created by all outputs
    pub fn native_out(&self) -> u128 {
        sum_asset(&self.outputs, NATIVE_ASSET_ID)
    }

    /// Native asset spent by `address`
    pub fn native_in_from(&self, address: &str) -> u128 {
        self.inputs
            .iter()
            .filter(|t| t.address == address && t.amount.asset_id == NATIVE_ASSET_ID)
            .fold(0u128, |acc, t| acc.saturating_add(t.amount.raw))
    }

    /// Distinct input addresses in first-seen order
    pub fn senders(&self) -> Vec<&str> {
        distinct(&self.inputs)
    }

    /// Distinct output addresses in first-seen order
    pub fn recipients(&self) -> Vec<&str> {
        distinct(&self.outputs)
    }

    pub fn spends_from(&self, address: &str) -> bool {
        self.inputs.iter().any(|t| t.address == address)
    }

    pub fn pays_to(&self, address: &str) -> bool {
        self.outputs.iter().any(|t| t.address == address)
    }

    /// Re-apply metadata learned after this transaction was parsed.
    ///
    /// A token may carry decimals on one box and not on another; amounts
    /// parsed before the decimals appeared would otherwise stay raw.
    pub fn resolve(&mut self, registry: &AssetRegistry) {
        for transfer in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            transfer.amount = registry.amount(&transfer.amount.asset_id, transfer.amount.raw);
        }
        self.fee = registry.native(self.fee.raw);
    }

    /// Outputs to `address`, summed per asset
    pub fn received_by(&self, address: &str) -> BTreeMap<String, AssetAmount> {
        let mut totals: BTreeMap<String, AssetAmount> = BTreeMap::new();
        for transfer in self.outputs.iter().filter(|t| t.address == address) {
            totals
                .entry(transfer.amount.asset_id.clone())
                .and_modify(|a| a.raw = a.raw.saturating_add(transfer.amount.raw))
                .or_insert_with(|| transfer.amount.clone());
        }
        totals
    }
}

/// One page of an address's history
#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    pub items: Vec<Transaction>,
    /// Transactions the address has in total, across all pages
    pub total: u64,
}

fn sum_asset(transfers: &[Transfer], asset_id: &str) -> u128 {
    transfers
        .iter()
        .filter(|t| t.amount.asset_id == asset_id)
        .fold(0u128, |acc, t| acc.saturating_add(t.amount.raw))
}

fn distinct(transfers: &[Transfer]) -> Vec<&str> {
    let mut seen: Vec<&str> = Vec::new();
    for t in transfers {
        if !seen.contains(&t.address.as_str()) {
            seen.push(&t.address);
        }
    }
    seen
}

/// Normalize an address/balance payload.
pub fn normalize_address(value: &Value, registry: &mut AssetRegistry) -> Result<AddressSnapshot> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::Malformed("address payload is not an object".to_string()))?;
    let address = str_field(obj, &["address", "id"])
        .ok_or_else(|| Error::Malformed("address payload has no address".to_string()))?
        .to_string();

    let mut balances = BTreeMap::new();
    match obj.get("balance") {
        Some(Value::Object(balance)) => read_balance(balance, registry, &mut balances)?,
        Some(other @ (Value::Number(_) | Value::String(_))) => {
            let raw = amount_value(other, "balance")?;
            balances.insert(NATIVE_ASSET_ID.to_string(), registry.native(raw));
        }
        Some(Value::Null) | None => read_balance(obj, registry, &mut balances)?,
        Some(_) => return Err(Error::Malformed("balance has unexpected type".to_string())),
    }
    balances
        .entry(NATIVE_ASSET_ID.to_string())
        .or_insert_with(|| registry.native(0));

    let tx_count = ["transactionsCount", "txsCount", "total", "transactions"]
        .iter()
        .find_map(|key| match obj.get(*key) {
            Some(Value::Object(inner)) => inner.get("confirmed").and_then(as_u64),
            Some(v) => as_u64(v),
            None => None,
        })
        .unwrap_or(0);

    let mut snapshot = AddressSnapshot {
        address,
        balances,
        tx_count,
        first_seen: ["firstSeen", "first_seen", "firstTransactionTime"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(parse_timestamp)),
        last_seen: ["lastSeen", "last_seen", "lastTransactionTime"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(parse_timestamp)),
    };
    snapshot.resolve(registry);
    Ok(snapshot)
}

/// Balance object variants: `{confirmed: {...}}`, `{nanoErgs, tokens}`,
/// `{value, assets}`.
fn read_balance(
    obj: &Map<String, Value>,
    registry: &mut AssetRegistry,
    balances: &mut BTreeMap<String, AssetAmount>,
) -> Result<()> {
    if let Some(Value::Object(confirmed)) = obj.get("confirmed") {
        return read_balance(confirmed, registry, balances);
    }

    if let Some(v) = obj.get("nanoErgs").or_else(|| obj.get("value")) {
        let raw = amount_value(v, "nanoErgs")?;
        balances.insert(NATIVE_ASSET_ID.to_string(), registry.native(raw));
    }

    for key in ["tokens", "assets"] {
        if let Some(tokens) = obj.get(key) {
            let tokens = tokens
                .as_array()
                .ok_or_else(|| Error::Malformed(format!("{} is not an array", key)))?;
            for token in tokens {
                let amount = read_token(token, registry)?;
                balances
                    .entry(amount.asset_id.clone())
                    .and_modify(|a| a.raw = a.raw.saturating_add(amount.raw))
                    .or_insert(amount);
            }
        }
    }
    Ok(())
}

fn read_token(token: &Value, registry: &mut AssetRegistry) -> Result<AssetAmount> {
    let obj = token
        .as_object()
        .ok_or_else(|| Error::Malformed("asset entry is not an object".to_string()))?;
    let id = str_field(obj, &["tokenId", "id"])
        .ok_or_else(|| Error::Malformed("asset entry has no tokenId".to_string()))?;
    let raw = match obj.get("amount") {
        Some(v) => amount_value(v, "amount")?,
        None => 0,
    };
    let decimals = obj
        .get("decimals")
        .and_then(|d| d.as_u64())
        .and_then(|d| u32::try_from(d).ok());
    registry.learn(id, str_field(obj, &["name"]), decimals);
    Ok(registry.amount(id, raw))
}

/// Learn a token's name and decimals from its metadata payload.
///
/// Explorer (`tokens/{id}`) and node (`blockchain/token/byId/{id}`) answer
/// with the same `{id, name, decimals, ...}` shape.
pub fn normalize_token_info(
    token_id: &str,
    value: &Value,
    registry: &mut AssetRegistry,
) -> Result<()> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::Malformed(format!("token {}: payload is not an object", token_id)))?;
    if let Some(id) = str_field(obj, &["id", "tokenId"]) {
        if id != token_id {
            return Err(Error::Malformed(format!(
                "token {}: payload describes {}",
                token_id, id
            )));
        }
    }
    let decimals = obj
        .get("decimals")
        .and_then(as_u64)
        .and_then(|d| u32::try_from(d).ok());
    registry.learn(token_id, str_field(obj, &["name"]), decimals);
    Ok(())
}

/// Normalize a single transaction payload.
pub fn normalize_transaction(value: &Value, registry: &mut AssetRegistry) -> Result<Transaction> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::Malformed("transaction payload is not an object".to_string()))?;
    let id = str_field(obj, &["id", "txId"])
        .ok_or_else(|| Error::Malformed("transaction has no id".to_string()))?
        .to_string();

    let inputs = read_boxes(obj, "inputs", registry, &id)?;
    let outputs = read_boxes(obj, "outputs", registry, &id)?;

    let mut tx = Transaction {
        block_id: str_field(obj, &["blockId", "headerId"]).map(String::from),
        height: ["inclusionHeight", "height", "blockHeight"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(as_u64)),
        timestamp: obj.get("timestamp").and_then(parse_timestamp),
        fee: registry.native(0),
        id,
        inputs,
        outputs,
    };

    let spent = tx.native_in();
    let created = tx.native_out();
    match obj.get("fee") {
        Some(fee) if !fee.is_null() => {
            let fee = amount_value(fee, "fee")?;
            if !tx.inputs.is_empty() && spent < created.saturating_add(fee) {
                return Err(Error::Malformed(format!(
                    "transaction {}: inputs {} < outputs {} + fee {}",
                    tx.id, spent, created, fee
                )));
            }
            tx.fee = registry.native(fee);
        }
        _ => {
            if !tx.inputs.is_empty() && spent < created {
                return Err(Error::Malformed(format!(
                    "transaction {}: inputs {} < outputs {}",
                    tx.id, spent, created
                )));
            }
            tx.fee = registry.native(spent.saturating_sub(created));
        }
    }
    tx.resolve(registry);
    Ok(tx)
}

fn read_boxes(
    obj: &Map<String, Value>,
    key: &str,
    registry: &mut AssetRegistry,
    tx_id: &str,
) -> Result<Vec<Transfer>> {
    let boxes = match obj.get(key) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(boxes)) => boxes,
        Some(_) => {
            return Err(Error::Malformed(format!(
                "transaction {}: {} is not an array",
                tx_id, key
            )))
        }
    };

    let mut transfers = Vec::with_capacity(boxes.len());
    for b in boxes {
        let b = b.as_object().ok_or_else(|| {
            Error::Malformed(format!("transaction {}: {} entry is not an object", tx_id, key))
        })?;
        let address = str_field(b, &["address", "ergoTree"])
            .unwrap_or("unknown")
            .to_string();
        let raw = match b.get("value") {
            Some(v) => amount_value(v, "value")?,
            None => 0,
        };
        transfers.push(Transfer {
            address: address.clone(),
            amount: registry.native(raw),
        });
        if let Some(assets) = b.get("assets") {
            let assets = assets.as_array().ok_or_else(|| {
                Error::Malformed(format!("transaction {}: assets is not an array", tx_id))
            })?;
            for asset in assets {
                transfers.push(Transfer {
                    address: address.clone(),
                    amount: read_token(asset, registry)?,
                });
            }
        }
    }
    Ok(transfers)
}

/// Normalize a page of transactions.
///
/// Accepts `{items, total}`, `{transactions, total}` or a bare array.
pub fn normalize_transaction_page(
    value: &Value,
    registry: &mut AssetRegistry,
) -> Result<TransactionPage> {
    let (items, total) = match value {
        Value::Array(items) => (items, None),
        Value::Object(obj) => {
            let items = obj
                .get("items")
                .or_else(|| obj.get("transactions"))
                .and_then(|v| v.as_array())
                .ok_or_else(|| Error::Malformed("transaction page has no items array".to_string()))?;
            (items, obj.get("total").and_then(as_u64))
        }
        _ => {
            return Err(Error::Malformed(
                "transaction page is not an object".to_string(),
            ))
        }
    };

    let items = items
        .iter()
        .map(|item| normalize_transaction(item, registry))
        .collect::<Result<Vec<_>>>()?;
    let total = total.unwrap_or(items.len() as u64).max(items.len() as u64);
    Ok(TransactionPage { items, total })
}

fn str_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Non-negative integer amount, as a JSON number or decimal string
fn amount_value(value: &Value, field: &str) -> Result<u128> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().map(u128::from).or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u128)
        }),
        Value::String(s) => s.trim().parse::<u128>().ok(),
        Value::Null => Some(0),
        _ => None,
    };
    parsed.ok_or_else(|| Error::Malformed(format!("{} is not a non-negative integer: {}", field, value)))
}

/// Millisecond or second epoch numbers, numeric strings, or RFC 3339
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let epoch = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(n) => Some(n),
            Err(_) => {
                return DateTime::parse_from_rfc3339(s.trim())
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }
        },
        _ => None,
    }?;
    if epoch.abs() >= 100_000_000_000 {
        Utc.timestamp_millis_opt(epoch).single()
    } else {
        Utc.timestamp_opt(epoch, 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ADDR_A: &str = "9fRAWhdxEsTcdb8PhGNrZfwqa65zfkuYHAMmkQLcic1gdLSV5vA";
    const ADDR_B: &str = "9hY16vzHmmfyVBwKeFGHvb2bMFsG94A1u7To1QWtUokACyFVENQ";
    const TOKEN: &str = "03faf2cb329f2e90d6d23b58d91bbb6c046aa143261cc21f52fbe2824bfcbf04";

    fn tx_json() -> Value {
        json!({
            "id": "b5f2",
            "blockId": "0a1b",
            "inclusionHeight": 1_200_000,
            "timestamp": 1_700_000_000_000i64,
            "inputs": [
                {"address": ADDR_A, "value": 5_000_000_000u64,
                 "assets": [{"tokenId": TOKEN, "amount": 250, "decimals": 2, "name": "SigUSD"}]}
            ],
            "outputs": [
                {"address": ADDR_B, "value": 2_000_000_000u64,
                 "assets": [{"tokenId": TOKEN, "amount": 250}]},
                {"address": ADDR_A, "value": "2998900000", "assets": []}
            ]
        })
    }

    #[test]
    fn test_transaction_fields_and_derived_fee() {
        let mut registry = AssetRegistry::new();
        let tx = normalize_transaction(&tx_json(), &mut registry).unwrap();
        assert_eq!(tx.id, "b5f2");
        assert_eq!(tx.height, Some(1_200_000));
        assert_eq!(tx.timestamp.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(tx.inputs.len(), 2);
        assert_eq!(tx.outputs.len(), 3);
        assert_eq!(tx.fee.raw, 1_100_000);
        assert_eq!(tx.senders(), vec![ADDR_A]);
        assert_eq!(tx.recipients(), vec![ADDR_B, ADDR_A]);

        let received = tx.received_by(ADDR_B);
        assert_eq!(received[TOKEN].to_string(), "2.5 SigUSD");
    }

    #[test]
    fn test_explicit_fee_violating_invariant_is_malformed() {
        let mut payload = tx_json();
        payload["fee"] = json!(5_000_000_000u64);
        let err = normalize_transaction(&payload, &mut AssetRegistry::new()).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));

        payload["fee"] = json!(1_100_000);
        let tx = normalize_transaction(&payload, &mut AssetRegistry::new()).unwrap();
        assert_eq!(tx.fee.raw, 1_100_000);
    }

    #[test]
    fn test_derived_fee_rejects_outputs_above_inputs() {
        let payload = json!({
            "id": "c0ff",
            "inputs": [{"address": ADDR_A, "value": 5}],
            "outputs": [{"address": ADDR_B, "value": 10}]
        });
        let err = normalize_transaction(&payload, &mut AssetRegistry::new()).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));

        // Coinbase-style transactions without inputs carry no fee
        let payload = json!({"id": "c0ff", "outputs": [{"address": ADDR_B, "value": 10}]});
        let tx = normalize_transaction(&payload, &mut AssetRegistry::new()).unwrap();
        assert_eq!(tx.fee.raw, 0);
    }

    #[test]
    fn test_decimals_seen_on_a_later_box_apply_to_earlier_ones() {
        let payload = json!({
            "id": "d00d",
            "inputs": [{"address": ADDR_A, "value": 1_000_000,
                        "assets": [{"tokenId": "tok", "amount": 250}]}],
            "outputs": [{"address": ADDR_B, "value": 1_000_000,
                         "assets": [{"tokenId": "tok", "amount": 250, "decimals": 2, "name": "SigUSD"}]}]
        });
        let tx = normalize_transaction(&payload, &mut AssetRegistry::new()).unwrap();
        let spent = tx.inputs.iter().find(|t| t.amount.asset_id == "tok").unwrap();
        assert_eq!(spent.amount.to_string(), "2.5 SigUSD");
    }

    #[test]
    fn test_token_info_payload_teaches_registry() {
        let mut registry = AssetRegistry::new();
        let info = json!({"id": TOKEN, "boxId": "b0", "emissionAmount": 1_000_000,
                          "name": "SigUSD", "description": "", "decimals": 2});
        normalize_token_info(TOKEN, &info, &mut registry).unwrap();
        assert_eq!(registry.decimals(TOKEN), Some(2));
        assert_eq!(registry.symbol(TOKEN), "SigUSD");

        let other = json!({"id": "ffee", "decimals": 4});
        assert!(matches!(
            normalize_token_info(TOKEN, &other, &mut AssetRegistry::new()),
            Err(Error::Malformed(_))
        ));
        assert!(normalize_token_info(TOKEN, &json!("SigUSD"), &mut registry).is_err());
    }

    #[test]
    fn test_missing_required_fields() {
        let mut registry = AssetRegistry::new();
        assert!(matches!(
            normalize_transaction(&json!({"inputs": []}), &mut registry),
            Err(Error::Malformed(_))
        ));
        assert!(matches!(
            normalize_transaction(&json!({"id": "x", "inputs": "nope"}), &mut registry),
            Err(Error::Malformed(_))
        ));
        assert!(matches!(
            normalize_transaction(&json!({"id": "x", "outputs": [{"value": -5}]}), &mut registry),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn test_optional_fields_default() {
        let tx = normalize_transaction(&json!({"id": "x"}), &mut AssetRegistry::new()).unwrap();
        assert!(tx.inputs.is_empty());
        assert!(tx.outputs.is_empty());
        assert_eq!(tx.fee.raw, 0);
        assert!(tx.timestamp.is_none());
    }

    #[test]
    fn test_address_balance_shapes() {
        let mut registry = AssetRegistry::new();
        let nested = json!({
            "address": ADDR_A,
            "balance": {
                "confirmed": {
                    "nanoErgs": 1_500_000_000u64,
                    "tokens": [{"tokenId": TOKEN, "amount": 1000, "decimals": 2, "name": "SigUSD"}]
                }
            },
            "transactionsCount": 12
        });
        let snapshot = normalize_address(&nested, &mut registry).unwrap();
        assert_eq!(snapshot.native_balance().unwrap().to_string(), "1.5 ERG");
        assert_eq!(snapshot.tokens().count(), 1);
        assert_eq!(snapshot.tx_count, 12);

        let flat = json!({"address": ADDR_B, "balance": 42, "transactions": {"confirmed": 3}});
        let snapshot = normalize_address(&flat, &mut registry).unwrap();
        assert_eq!(snapshot.native_balance().unwrap().raw, 42);
        assert_eq!(snapshot.tx_count, 3);

        let empty = json!({"address": ADDR_B});
        let snapshot = normalize_address(&empty, &mut registry).unwrap();
        assert_eq!(snapshot.native_balance().unwrap().raw, 0);
        assert_eq!(snapshot.tx_count, 0);

        assert!(normalize_address(&json!({"balance": 1}), &mut registry).is_err());
    }

    #[test]
    fn test_unknown_token_stays_raw() {
        let mut registry = AssetRegistry::new();
        let payload = json!({
            "address": ADDR_A,
            "assets": [{"tokenId": "ffee", "amount": "123456"}]
        });
        let snapshot = normalize_address(&payload, &mut registry).unwrap();
        let token = &snapshot.balances["ffee"];
        assert!(token.is_raw());
        assert_eq!(token.to_string(), "123456 ffee (raw units)");
    }

    #[test]
    fn test_page_shapes() {
        let mut registry = AssetRegistry::new();
        let page = normalize_transaction_page(
            &json!({"items": [tx_json()], "total": 40}),
            &mut registry,
        )
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total, 40);

        let bare = normalize_transaction_page(&json!([tx_json(), tx_json()]), &mut registry).unwrap();
        assert_eq!(bare.total, 2);

        assert!(matches!(
            normalize_transaction_page(&json!({"total": 3}), &mut registry),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn test_timestamp_formats() {
        let ms = parse_timestamp(&json!(1_700_000_000_000i64)).unwrap();
        let secs = parse_timestamp(&json!(1_700_000_000)).unwrap();
        let text = parse_timestamp(&json!("2023-11-14T22:13:20Z")).unwrap();
        assert_eq!(ms, secs);
        assert_eq!(secs, text);
        assert!(parse_timestamp(&json!(true)).is_none());
    }
}
