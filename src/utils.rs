//! Hex parsing and field helpers shared by identities, groups and proofs.

use anyhow::Result;
use halo2_gadgets::poseidon::primitives::{
    self as poseidon, ConstantLength, P128Pow5T3 as PoseidonSpec,
};
use pasta_curves::group::ff::PrimeField;
use pasta_curves::pallas;

fn is_valid_hex_string(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

fn strip_hex_prefix(input: &str) -> &str {
    input
        .trim()
        .strip_prefix("0x")
        .or_else(|| input.trim().strip_prefix("0X"))
        .unwrap_or_else(|| input.trim())
}

/// Validates and strips hex prefix from a string.
///
/// # Errors
/// Returns an error if the stripped string does not have `expected_len`
/// characters or contains non-hex characters.
///
/// # Examples
///
/// ```
/// use anon_nft_exchange::utils::validate_and_strip_hex;
///
/// let result = validate_and_strip_hex("0x1234abcd", 8).unwrap();
/// assert_eq!(result, "1234abcd");
/// ```
pub fn validate_and_strip_hex(input: &str, expected_len: usize) -> Result<String> {
    let stripped = strip_hex_prefix(input);

    if stripped.len() != expected_len {
        return Err(anyhow::anyhow!(
            "Invalid hex string: must be {} characters (got {})",
            expected_len,
            stripped.len()
        ));
    }

    if !is_valid_hex_string(stripped) {
        return Err(anyhow::anyhow!(
            "Invalid hex string: contains non-hex characters"
        ));
    }

    Ok(stripped.to_string())
}

/// Decodes a 32-byte value written as 64 hex characters, with or without `0x`.
pub fn decode_hex32(input: &str) -> Result<[u8; 32]> {
    let stripped = validate_and_strip_hex(input, 64)?;
    let mut out = [0u8; 32];
    hex::decode_to_slice(stripped, &mut out)
        .map_err(|e| anyhow::anyhow!("Invalid hex string: {e}"))?;
    Ok(out)
}

const BASE_U64: u64 = 256;

/// Converts 32 arbitrary bytes to a Pallas base field element.
///
/// Interprets the input as a big-endian base-256 number reduced modulo the
/// field order, so every input maps to some element. Not the inverse of
/// [`field_to_bytes`]; use [`field_from_bytes`] for canonical encodings.
#[inline]
#[must_use]
pub fn bytes_to_field(bytes: &[u8; 32]) -> pallas::Base {
    let mut value = pallas::Base::zero();
    let base = pallas::Base::from(BASE_U64);

    for &byte in bytes.iter() {
        value = value * base + pallas::Base::from(byte as u64);
    }

    value
}

/// Canonical little-endian encoding of a field element.
#[inline]
#[must_use]
pub fn field_to_bytes(field: pallas::Base) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    let repr = field.to_repr();
    bytes.copy_from_slice(repr.as_ref());
    bytes
}

/// Parses a canonical encoding produced by [`field_to_bytes`].
///
/// Returns `None` when the bytes encode a value outside the field.
#[must_use]
pub fn field_from_bytes(bytes: &[u8; 32]) -> Option<pallas::Base> {
    Option::from(pallas::Base::from_repr(*bytes))
}

/// Poseidon hash of two field elements using the `P128Pow5T3` specification.
///
/// The same permutation is enforced in-circuit by the membership circuit.
///
/// # Example
///
/// ```
/// use anon_nft_exchange::utils::poseidon_hash;
/// use pasta_curves::pallas;
///
/// let hash = poseidon_hash(pallas::Base::from(1), pallas::Base::from(2));
/// assert_ne!(hash, pallas::Base::zero());
/// ```
#[inline]
#[must_use]
pub fn poseidon_hash(left: pallas::Base, right: pallas::Base) -> pallas::Base {
    let inputs = [left, right];
    poseidon::Hash::<_, PoseidonSpec, ConstantLength<2>, 3, 2>::init().hash(inputs)
}

/// Poseidon hash of a single field element.
#[inline]
#[must_use]
pub fn poseidon_hash1(input: pallas::Base) -> pallas::Base {
    poseidon::Hash::<_, PoseidonSpec, ConstantLength<1>, 3, 2>::init().hash([input])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_and_strip_hex_valid() {
        let result = validate_and_strip_hex("0x1234abcd", 8);
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "1234abcd");
    }

    #[test]
    fn test_validate_and_strip_hex_uppercase_prefix() {
        let result = validate_and_strip_hex("0X1234ABCD", 8);
        assert_eq!(result.unwrap(), "1234ABCD");
    }

    #[test]
    fn test_validate_and_strip_hex_with_whitespace() {
        let result = validate_and_strip_hex("  0x1234abcd  ", 8);
        assert_eq!(result.unwrap(), "1234abcd");
    }

    #[test]
    fn test_validate_and_strip_hex_wrong_length() {
        let result = validate_and_strip_hex("0x1234abcd", 10);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("must be 10 characters"));
    }

    #[test]
    fn test_validate_and_strip_hex_invalid_characters() {
        let result = validate_and_strip_hex("0x1234xyzw", 8);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("non-hex characters"));
    }

    #[test]
    fn test_decode_hex32() {
        let encoded = format!("0x{}", "ab".repeat(32));
        assert_eq!(decode_hex32(&encoded).unwrap(), [0xabu8; 32]);
        assert!(decode_hex32("0xabcd").is_err());
    }

    #[test]
    fn test_field_bytes_canonical_encoding() {
        let value = pallas::Base::from(123_456_789u64);
        let bytes = field_to_bytes(value);
        assert_eq!(field_from_bytes(&bytes), Some(value));
        assert_eq!(field_from_bytes(&[0xffu8; 32]), None);
    }

    #[test]
    fn test_bytes_to_field_distinct_inputs() {
        assert_ne!(bytes_to_field(&[1u8; 32]), bytes_to_field(&[2u8; 32]));
        assert_eq!(bytes_to_field(&[0u8; 32]), pallas::Base::zero());
    }

    #[test]
    fn test_poseidon_arity_differs() {
        let x = pallas::Base::from(7);
        assert_ne!(poseidon_hash1(x), poseidon_hash(x, pallas::Base::zero()));
    }
}
