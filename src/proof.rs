//! Membership proofs as submitted to the exchange.
//!
//! A [`FullProof`] carries the public inputs next to the serialized halo2
//! proof. It is what the front end hands to `buy_and_claim_nft`, `claim_eth`
//! and `withdraw_eth`, and what the CLI writes to and reads from disk.

use crate::circuit::{MembershipCircuit, MembershipKeys, PublicInputs};
use crate::error::MembershipError;
use crate::group::Group;
use crate::identity::Identity;
use crate::utils::{decode_hex32, field_from_bytes, field_to_bytes, poseidon_hash};
use crate::GROUP_DEPTH;
use anyhow::{Context, Result};
use halo2_proofs::circuit::Value;
use log::{debug, info};
use pasta_curves::pallas;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A membership proof plus the public values it commits to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullProof {
    /// Root of the group at proving time. Only the current root verifies.
    #[serde(with = "field_hex")]
    pub merkle_tree_root: pallas::Base,
    /// `H(identity_nullifier, external_nullifier)`, recorded on use.
    #[serde(with = "field_hex")]
    pub nullifier_hash: pallas::Base,
    #[serde(with = "field_hex")]
    pub external_nullifier: pallas::Base,
    #[serde(with = "field_hex")]
    pub signal: pallas::Base,
    /// Serialized halo2 proof bytes.
    #[serde(with = "hex")]
    pub proof: Vec<u8>,
}

impl FullProof {
    #[must_use]
    pub fn public_inputs(&self) -> PublicInputs {
        [
            self.merkle_tree_root,
            self.nullifier_hash,
            self.external_nullifier,
            self.signal,
        ]
    }

    /// Structural checks done before any cryptographic verification.
    ///
    /// # Errors
    /// Returns an error if the proof bytes are empty or exceed `max_proof_size`.
    pub fn validate(&self, max_proof_size: usize) -> Result<()> {
        debug!("Validating proof of {} bytes", self.proof.len());

        if self.proof.is_empty() {
            return Err(anyhow::anyhow!(
                "ZK proof cannot be empty. The proof data is missing."
            ));
        }
        if self.proof.len() > max_proof_size {
            return Err(anyhow::anyhow!(
                "ZK proof is {} bytes, larger than the allowed {} bytes",
                self.proof.len(),
                max_proof_size
            ));
        }
        Ok(())
    }

    /// Verifies the proof against its own public inputs.
    pub fn verify(&self) -> Result<bool, MembershipError> {
        let keys = MembershipKeys::shared()?;
        Ok(keys.verify(&self.proof, &self.public_inputs()))
    }

    /// Reads a proof file, refusing files larger than `max_file_size` bytes.
    pub fn load(path: &Path, max_file_size: u64) -> Result<Self> {
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Failed to read proof file metadata: {}", path.display()))?;
        if metadata.len() > max_file_size {
            return Err(anyhow::anyhow!(
                "Proof file too large: {} bytes (max: {} bytes)",
                metadata.len(),
                max_file_size
            ));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read proof file: {}", path.display()))?;
        let proof: FullProof = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse proof file: {}", path.display()))?;
        Ok(proof)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize proof")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write proof file: {}", path.display()))?;
        Ok(())
    }
}

/// Nullifier hash of `identity` for proofs against `external_nullifier`.
#[must_use]
pub fn nullifier_hash(identity: &Identity, external_nullifier: pallas::Base) -> pallas::Base {
    poseidon_hash(identity.nullifier(), external_nullifier)
}

/// Proves that `identity` is a member of `group`.
///
/// # Arguments
///
/// * `identity` - The prover's private identity
/// * `group` - A snapshot of the group, typically mirrored from the registry
/// * `external_nullifier` - Scope of the nullifier; the exchange uses the group id
/// * `signal` - Value the proof is bound to
///
/// # Errors
///
/// Fails if the identity's commitment is not in the group, if the group is
/// not of the depth the circuit supports, or if proving fails.
pub fn generate_proof(
    identity: &Identity,
    group: &Group,
    external_nullifier: pallas::Base,
    signal: pallas::Base,
) -> Result<FullProof, MembershipError> {
    if group.depth() != GROUP_DEPTH {
        return Err(MembershipError::UnsupportedDepth(group.depth()));
    }
    let index = group
        .index_of(&identity.commitment())
        .ok_or(MembershipError::NotAMember(group.id()))?;
    let merkle_proof = group
        .generate_proof(index)
        .ok_or(MembershipError::NotAMember(group.id()))?;
    let siblings: [pallas::Base; GROUP_DEPTH] = merkle_proof
        .siblings
        .as_slice()
        .try_into()
        .map_err(|_| MembershipError::UnsupportedDepth(merkle_proof.siblings.len()))?;
    let leaf_index = u32::try_from(index).map_err(|_| MembershipError::TreeFull(group.id()))?;

    let nullifier_hash = nullifier_hash(identity, external_nullifier);
    let circuit = MembershipCircuit {
        identity_nullifier: Value::known(identity.nullifier()),
        identity_trapdoor: Value::known(identity.trapdoor()),
        leaf_index: Value::known(leaf_index),
        siblings: Value::known(siblings),
        external_nullifier: Value::known(external_nullifier),
        signal: Value::known(signal),
    };

    let public_inputs = [merkle_proof.root, nullifier_hash, external_nullifier, signal];
    let keys = MembershipKeys::shared()?;
    info!(
        "Generating membership proof for group {} ({} members)",
        group.id(),
        group.len()
    );
    let proof = keys.prove(circuit, &public_inputs)?;
    debug!("Proof size: {} bytes", proof.len());

    Ok(FullProof {
        merkle_tree_root: merkle_proof.root,
        nullifier_hash,
        external_nullifier,
        signal,
        proof,
    })
}

/// Serde adapter writing field elements as 64 hex characters.
pub mod field_hex {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &pallas::Base, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(field_to_bytes(*value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<pallas::Base, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = decode_hex32(&s).map_err(serde::de::Error::custom)?;
        field_from_bytes(&bytes)
            .ok_or_else(|| serde::de::Error::custom("value is not a canonical field element"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_proof() -> FullProof {
        FullProof {
            merkle_tree_root: pallas::Base::from(1),
            nullifier_hash: pallas::Base::from(2),
            external_nullifier: pallas::Base::from(3),
            signal: pallas::Base::from(4),
            proof: vec![0xaa; 64],
        }
    }

    #[test]
    fn test_validate_rejects_empty_and_oversized() {
        let mut proof = sample_proof();
        assert!(proof.validate(1024).is_ok());
        assert!(proof.validate(32).is_err());
        proof.proof.clear();
        assert!(proof
            .validate(1024)
            .unwrap_err()
            .to_string()
            .contains("cannot be empty"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("proof.json");
        let proof = sample_proof();
        proof.save(&path).unwrap();

        let loaded = FullProof::load(&path, 1024 * 1024).unwrap();
        assert_eq!(loaded, proof);
        assert!(FullProof::load(&path, 16).is_err());
    }

    #[test]
    fn test_rejects_non_canonical_field() {
        let json = serde_json::to_value(sample_proof()).unwrap();
        let mut tampered = json.clone();
        tampered["signal"] = serde_json::Value::String("ff".repeat(32));
        assert!(serde_json::from_value::<FullProof>(tampered).is_err());
        assert!(serde_json::from_value::<FullProof>(json).is_ok());
    }

    #[test]
    fn test_generate_proof_requires_membership() {
        let group = Group::new(7, GROUP_DEPTH).unwrap();
        let err = generate_proof(
            &Identity::new(),
            &group,
            pallas::Base::from(7),
            pallas::Base::one(),
        )
        .unwrap_err();
        assert_eq!(err, MembershipError::NotAMember(7));
    }

    #[test]
    fn test_generate_proof_requires_full_depth() {
        let identity = Identity::new();
        let mut group = Group::new(7, 4).unwrap();
        group.add_member(identity.commitment()).unwrap();
        let err = generate_proof(&identity, &group, pallas::Base::from(7), pallas::Base::one())
            .unwrap_err();
        assert_eq!(err, MembershipError::UnsupportedDepth(4));
    }
}
