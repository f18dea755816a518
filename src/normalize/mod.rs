//! Normalization of raw chain payloads
//!
//! Pure functions from explorer/node JSON into canonical records. Nothing
//! here touches the network.

mod amount;
mod flow;
mod records;

pub use amount::AssetAmount;
pub use flow::{net_flow, FlowTotals, WalletFlows};
pub use records::{
    normalize_address, normalize_token_info, normalize_transaction, normalize_transaction_page,
    AddressSnapshot, Transaction, TransactionPage, Transfer,
};

use crate::{Error, Result};

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Check that `address` looks like a base58 chain address.
pub fn validate_address(address: &str) -> Result<()> {
    let len = address.len();
    if !(30..=120).contains(&len) {
        return Err(Error::InvalidArgument(format!(
            "address must be 30-120 characters, got {}",
            len
        )));
    }
    if let Some(bad) = address.chars().find(|c| !BASE58_ALPHABET.contains(*c)) {
        return Err(Error::InvalidArgument(format!(
            "address contains non-base58 character {:?}",
            bad
        )));
    }
    Ok(())
}

/// Check that `id` is a 64-character hex transaction id.
pub fn validate_tx_id(id: &str) -> Result<()> {
    if id.len() != 64 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidArgument(format!(
            "transaction id must be 64 hex characters: {}",
            id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address() {
        assert!(validate_address("9fRAWhdxEsTcdb8PhGNrZfwqa65zfkuYHAMmkQLcic1gdLSV5vA").is_ok());
        assert!(validate_address("short").is_err());
        assert!(validate_address("0OIl0OIl0OIl0OIl0OIl0OIl0OIl0OIl0OIl").is_err());
    }

    #[test]
    fn test_validate_tx_id() {
        let id = "b5f2a4e1c3d7f9a0b5f2a4e1c3d7f9a0b5f2a4e1c3d7f9a0b5f2a4e1c3d7f9a0";
        assert!(validate_tx_id(id).is_ok());
        assert!(validate_tx_id(&id[..63]).is_err());
        assert!(validate_tx_id(&id.replace('a', "z")).is_err());
    }
}
