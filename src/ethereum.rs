//! Ethereum address handling and deterministic development accounts.

use crate::utils::validate_and_strip_hex;
use anyhow::{Context, Result};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use sha3::{Digest, Sha3_256};

/// Expected length of an Ethereum address in hex characters (excluding 0x prefix)
pub const ADDRESS_HEX_LENGTH: usize = 40;

/// Number of funded accounts a fresh local chain starts with.
pub const DEV_ACCOUNT_COUNT: usize = 20;

/// Starting balance of every development account, in ether.
pub const DEV_ACCOUNT_BALANCE_ETH: u64 = 10_000;

/// Validates and normalizes an Ethereum address to lowercase hex without `0x`.
///
/// # Examples
///
/// ```
/// use anon_nft_exchange::ethereum::normalize_address;
///
/// let normalized = normalize_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44e").unwrap();
/// assert_eq!(normalized, "742d35cc6634c0532925a3b844bc454e4438f44e");
/// ```
pub fn normalize_address(address: &str) -> Result<String> {
    validate_and_strip_hex(address, ADDRESS_HEX_LENGTH).map(|s| s.to_lowercase())
}

/// Parses an address, accepting any casing and an optional `0x` prefix.
///
/// The zero address is rejected: it never names an account or contract.
pub fn parse_address(address: &str) -> Result<Address> {
    let normalized = normalize_address(address)
        .with_context(|| format!("Invalid Ethereum address '{}'", address.trim()))?;
    let parsed: Address = normalized
        .parse()
        .with_context(|| format!("Failed to decode address '{normalized}'"))?;
    if parsed.is_zero() {
        return Err(anyhow::anyhow!("The zero address is not a valid target"));
    }
    Ok(parsed)
}

/// Parses a token id written in decimal or `0x`-prefixed hex.
pub fn parse_token_id(input: &str) -> Result<U256> {
    let trimmed = input.trim();
    if let Some(hex_digits) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        U256::from_str_radix(hex_digits, 16)
            .with_context(|| format!("Invalid hex token id '{trimmed}'"))
    } else {
        U256::from_dec_str(trimmed).with_context(|| format!("Invalid token id '{trimmed}'"))
    }
}

/// Derives the `index`-th development wallet.
///
/// Keys come from `SHA3-256("dev_account_{index:020}")`, so every fresh
/// chain sees the same accounts in the same order. In the astronomically
/// unlikely case the digest is not a valid secp256k1 scalar the seed is
/// rehashed.
pub fn dev_wallet(index: usize) -> LocalWallet {
    let mut seed: [u8; 32] = Sha3_256::digest(format!("dev_account_{index:020}").as_bytes()).into();
    loop {
        if let Ok(wallet) = LocalWallet::from_bytes(&seed) {
            return wallet;
        }
        seed = Sha3_256::digest(seed).into();
    }
}

/// Address of the `index`-th development account.
pub fn dev_address(index: usize) -> Address {
    dev_wallet(index).address()
}

/// Formats an amount of wei as ether with up to 18 decimals.
pub fn format_ether(amount: U256) -> String {
    ethers::utils::format_ether(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address_valid() {
        let result = normalize_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44e");
        assert_eq!(result.unwrap(), "742d35cc6634c0532925a3b844bc454e4438f44e");
    }

    #[test]
    fn test_normalize_address_invalid_length() {
        assert!(normalize_address("0x742d35Cc6634C0532925a3b844Bc454e4438").is_err());
    }

    #[test]
    fn test_parse_address_roundtrip() {
        let address = parse_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44e").unwrap();
        assert_eq!(
            format!("{address:?}"),
            "0x742d35cc6634c0532925a3b844bc454e4438f44e"
        );
    }

    #[test]
    fn test_parse_address_rejects_zero() {
        assert!(parse_address("0x0000000000000000000000000000000000000000").is_err());
    }

    #[test]
    fn test_parse_token_id() {
        assert_eq!(parse_token_id("7").unwrap(), U256::from(7));
        assert_eq!(parse_token_id("0x10").unwrap(), U256::from(16));
        assert!(parse_token_id("seven").is_err());
    }

    #[test]
    fn test_dev_accounts_are_deterministic_and_distinct() {
        assert_eq!(dev_address(0), dev_address(0));
        let unique: std::collections::HashSet<_> =
            (0..DEV_ACCOUNT_COUNT).map(dev_address).collect();
        assert_eq!(unique.len(), DEV_ACCOUNT_COUNT);
    }
}
