//! Private identities and their public commitments.
//!
//! An identity is a pair of random field elements. Its commitment is
//! `Poseidon1(Poseidon2(nullifier, trapdoor))`; only the commitment ever
//! leaves the user's machine. The exported string form is what the user has
//! to keep: losing it means losing the ability to claim.

use crate::utils::{decode_hex32, field_from_bytes, field_to_bytes, poseidon_hash, poseidon_hash1};
use anyhow::{Context, Result};
use pasta_curves::group::ff::Field;
use pasta_curves::pallas;
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Public identity commitment, stored as the canonical field encoding.
///
/// The all-zero value means "unset" in deposit records.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Commitment([u8; 32]);

impl Commitment {
    pub const ZERO: Commitment = Commitment([0u8; 32]);

    #[must_use]
    pub fn from_field(value: pallas::Base) -> Self {
        Self(field_to_bytes(value))
    }

    /// Field element behind the commitment, `None` for non-canonical bytes.
    #[must_use]
    pub fn to_field(&self) -> Option<pallas::Base> {
        field_from_bytes(&self.0)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({self})")
    }
}

impl FromStr for Commitment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = decode_hex32(s).context("Invalid identity commitment")?;
        if field_from_bytes(&bytes).is_none() {
            return Err(anyhow::anyhow!(
                "Identity commitment is not a canonical field element"
            ));
        }
        Ok(Self(bytes))
    }
}

impl Serialize for Commitment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Commitment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A private identity.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    trapdoor: pallas::Base,
    nullifier: pallas::Base,
}

impl Identity {
    /// Generates a fresh identity from the operating system RNG.
    #[must_use]
    pub fn new() -> Self {
        Self {
            trapdoor: pallas::Base::random(OsRng),
            nullifier: pallas::Base::random(OsRng),
        }
    }

    #[must_use]
    pub fn from_secrets(trapdoor: pallas::Base, nullifier: pallas::Base) -> Self {
        Self {
            trapdoor,
            nullifier,
        }
    }

    #[must_use]
    pub fn trapdoor(&self) -> pallas::Base {
        self.trapdoor
    }

    #[must_use]
    pub fn nullifier(&self) -> pallas::Base {
        self.nullifier
    }

    #[must_use]
    pub fn secret(&self) -> pallas::Base {
        poseidon_hash(self.nullifier, self.trapdoor)
    }

    #[must_use]
    pub fn commitment(&self) -> Commitment {
        Commitment::from_field(poseidon_hash1(self.secret()))
    }

    /// Exports the identity as `<trapdoor hex>:<nullifier hex>`.
    #[must_use]
    pub fn export(&self) -> String {
        format!(
            "{}:{}",
            hex::encode(field_to_bytes(self.trapdoor)),
            hex::encode(field_to_bytes(self.nullifier))
        )
    }

    /// Parses the string produced by [`Identity::export`].
    pub fn import(exported: &str) -> Result<Self> {
        let (trapdoor, nullifier) = exported
            .trim()
            .split_once(':')
            .context("Identity must have the form <trapdoor>:<nullifier>")?;
        let trapdoor = field_from_bytes(&decode_hex32(trapdoor).context("Invalid trapdoor")?)
            .context("Trapdoor is not a canonical field element")?;
        let nullifier = field_from_bytes(&decode_hex32(nullifier).context("Invalid nullifier")?)
            .context("Nullifier is not a canonical field element")?;
        Ok(Self::from_secrets(trapdoor, nullifier))
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

// Secrets stay out of logs.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("commitment", &self.commitment())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commitment_is_deterministic() {
        let identity = Identity::from_secrets(pallas::Base::from(1), pallas::Base::from(2));
        let same = Identity::from_secrets(pallas::Base::from(1), pallas::Base::from(2));
        assert_eq!(identity.commitment(), same.commitment());
        assert!(!identity.commitment().is_zero());
    }

    #[test]
    fn test_fresh_identities_differ() {
        assert_ne!(Identity::new().commitment(), Identity::new().commitment());
    }

    #[test]
    fn test_export_import() {
        let identity = Identity::new();
        let restored = Identity::import(&identity.export()).unwrap();
        assert_eq!(identity, restored);
    }

    #[test]
    fn test_import_rejects_garbage() {
        assert!(Identity::import("not-an-identity").is_err());
        assert!(Identity::import("abcd:ef").is_err());
    }

    #[test]
    fn test_commitment_string_form() {
        let commitment = Identity::new().commitment();
        let parsed: Commitment = commitment.to_string().parse().unwrap();
        assert_eq!(parsed, commitment);

        let json = serde_json::to_string(&commitment).unwrap();
        let decoded: Commitment = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, commitment);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let identity = Identity::from_secrets(pallas::Base::from(11), pallas::Base::from(22));
        let rendered = format!("{identity:?}");
        assert!(rendered.contains("commitment"));
        assert!(!rendered.contains("trapdoor"));
    }
}
