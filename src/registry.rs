//! The membership verifier contract.
//!
//! Holds groups keyed by id, each administered by the account that created
//! it, and the set of nullifier hashes already consumed per group. A proof
//! is accepted only against a group's *current* root.

use crate::circuit::MembershipKeys;
use crate::error::MembershipError;
use crate::group::{Group, GroupId};
use crate::identity::Commitment;
use crate::utils::field_to_bytes;
use ethers::types::Address;
use log::debug;
use pasta_curves::pallas;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Group operations the exchange relies on.
///
/// The registry is the production implementation; tests substitute an
/// implementation that skips the proving system.
pub trait GroupMembership {
    /// Creates an empty group administered by `admin`.
    fn create_group(
        &mut self,
        admin: Address,
        group_id: GroupId,
        depth: usize,
    ) -> Result<(), MembershipError>;

    /// Appends `commitment` to the group and returns the new root.
    /// Only the group admin may call this.
    fn add_member(
        &mut self,
        caller: Address,
        group_id: GroupId,
        commitment: Commitment,
    ) -> Result<pallas::Base, MembershipError>;

    /// Whether `commitment` was ever added to the group.
    fn is_member(&self, group_id: GroupId, commitment: &Commitment) -> bool;

    /// Verifies a membership proof and consumes its nullifier hash.
    fn verify_proof(
        &mut self,
        group_id: GroupId,
        merkle_tree_root: pallas::Base,
        signal: pallas::Base,
        nullifier_hash: pallas::Base,
        external_nullifier: pallas::Base,
        proof: &[u8],
    ) -> Result<(), MembershipError>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct GroupEntry {
    admin: Address,
    group: Group,
    /// Consumed nullifier hashes, lowercase hex.
    nullifiers: BTreeSet<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MembershipRegistry {
    groups: BTreeMap<GroupId, GroupEntry>,
}

impl MembershipRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn group(&self, group_id: GroupId) -> Option<&Group> {
        self.groups.get(&group_id).map(|entry| &entry.group)
    }

    #[must_use]
    pub fn group_admin(&self, group_id: GroupId) -> Option<Address> {
        self.groups.get(&group_id).map(|entry| entry.admin)
    }

    #[must_use]
    pub fn is_nullifier_used(&self, group_id: GroupId, nullifier_hash: pallas::Base) -> bool {
        self.groups
            .get(&group_id)
            .is_some_and(|entry| entry.nullifiers.contains(&nullifier_key(nullifier_hash)))
    }

    fn entry_mut(&mut self, group_id: GroupId) -> Result<&mut GroupEntry, MembershipError> {
        self.groups
            .get_mut(&group_id)
            .ok_or(MembershipError::GroupMissing(group_id))
    }
}

fn nullifier_key(nullifier_hash: pallas::Base) -> String {
    hex::encode(field_to_bytes(nullifier_hash))
}

impl GroupMembership for MembershipRegistry {
    fn create_group(
        &mut self,
        admin: Address,
        group_id: GroupId,
        depth: usize,
    ) -> Result<(), MembershipError> {
        if self.groups.contains_key(&group_id) {
            return Err(MembershipError::GroupExists(group_id));
        }
        let group = Group::new(group_id, depth)?;
        debug!("Created group {group_id} (depth {depth}) for admin {admin:?}");
        self.groups.insert(
            group_id,
            GroupEntry {
                admin,
                group,
                nullifiers: BTreeSet::new(),
            },
        );
        Ok(())
    }

    fn add_member(
        &mut self,
        caller: Address,
        group_id: GroupId,
        commitment: Commitment,
    ) -> Result<pallas::Base, MembershipError> {
        let entry = self.entry_mut(group_id)?;
        if entry.admin != caller {
            return Err(MembershipError::Unauthorized {
                group: group_id,
                caller,
            });
        }
        let root = entry.group.add_member(commitment)?;
        debug!(
            "Group {group_id} now has {} members",
            entry.group.len()
        );
        Ok(root)
    }

    fn is_member(&self, group_id: GroupId, commitment: &Commitment) -> bool {
        self.group(group_id)
            .is_some_and(|group| group.index_of(commitment).is_some())
    }

    fn verify_proof(
        &mut self,
        group_id: GroupId,
        merkle_tree_root: pallas::Base,
        signal: pallas::Base,
        nullifier_hash: pallas::Base,
        external_nullifier: pallas::Base,
        proof: &[u8],
    ) -> Result<(), MembershipError> {
        let entry = self.entry_mut(group_id)?;
        if merkle_tree_root != entry.group.root() {
            return Err(MembershipError::StaleRoot(group_id));
        }
        let key = nullifier_key(nullifier_hash);
        if entry.nullifiers.contains(&key) {
            return Err(MembershipError::NullifierReused(group_id));
        }

        let keys = MembershipKeys::shared()?;
        let public_inputs = [merkle_tree_root, nullifier_hash, external_nullifier, signal];
        if !keys.verify(proof, &public_inputs) {
            return Err(MembershipError::InvalidProof);
        }

        debug!("Accepted proof for group {group_id}, nullifier {key}");
        entry.nullifiers.insert(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::proof::generate_proof;
    use crate::GROUP_DEPTH;

    fn admin() -> Address {
        Address::from_low_u64_be(0xad)
    }

    #[test]
    fn test_create_group_twice_fails() {
        let mut registry = MembershipRegistry::new();
        registry.create_group(admin(), 1, GROUP_DEPTH).unwrap();
        assert_eq!(
            registry.create_group(admin(), 1, GROUP_DEPTH),
            Err(MembershipError::GroupExists(1))
        );
        assert_eq!(registry.group_admin(1), Some(admin()));
    }

    #[test]
    fn test_only_admin_adds_members() {
        let mut registry = MembershipRegistry::new();
        registry.create_group(admin(), 1, GROUP_DEPTH).unwrap();
        let stranger = Address::from_low_u64_be(0x55);

        let result = registry.add_member(stranger, 1, Identity::new().commitment());
        assert_eq!(
            result,
            Err(MembershipError::Unauthorized {
                group: 1,
                caller: stranger
            })
        );
        assert!(registry
            .add_member(admin(), 1, Identity::new().commitment())
            .is_ok());
        assert_eq!(registry.group(1).map(Group::len), Some(1));
    }

    #[test]
    fn test_is_member() {
        let mut registry = MembershipRegistry::new();
        registry.create_group(admin(), 1, GROUP_DEPTH).unwrap();
        let member = Identity::new().commitment();
        registry.add_member(admin(), 1, member).unwrap();

        assert!(registry.is_member(1, &member));
        assert!(!registry.is_member(1, &Identity::new().commitment()));
        assert!(!registry.is_member(2, &member));
    }

    #[test]
    fn test_missing_group() {
        let mut registry = MembershipRegistry::new();
        assert_eq!(
            registry.add_member(admin(), 9, Identity::new().commitment()),
            Err(MembershipError::GroupMissing(9))
        );
        assert_eq!(
            registry.verify_proof(
                9,
                pallas::Base::zero(),
                pallas::Base::zero(),
                pallas::Base::zero(),
                pallas::Base::zero(),
                &[]
            ),
            Err(MembershipError::GroupMissing(9))
        );
    }

    #[test]
    fn test_stale_root_rejected_before_proof_check() {
        let mut registry = MembershipRegistry::new();
        registry.create_group(admin(), 1, GROUP_DEPTH).unwrap();
        let old_root = registry.group(1).unwrap().root();
        registry
            .add_member(admin(), 1, Identity::new().commitment())
            .unwrap();

        let result = registry.verify_proof(
            1,
            old_root,
            pallas::Base::one(),
            pallas::Base::zero(),
            pallas::Base::one(),
            &[0u8; 8],
        );
        assert_eq!(result, Err(MembershipError::StaleRoot(1)));
    }

    #[test]
    fn test_verify_then_replay() {
        let mut registry = MembershipRegistry::new();
        registry.create_group(admin(), 3, GROUP_DEPTH).unwrap();
        let identity = Identity::new();
        registry
            .add_member(admin(), 3, Identity::new().commitment())
            .unwrap();
        registry
            .add_member(admin(), 3, identity.commitment())
            .unwrap();

        let external = pallas::Base::from(3);
        let signal = pallas::Base::from(1);
        let proof = generate_proof(&identity, registry.group(3).unwrap(), external, signal).unwrap();

        let verify = |registry: &mut MembershipRegistry, signal| {
            registry.verify_proof(
                3,
                proof.merkle_tree_root,
                signal,
                proof.nullifier_hash,
                proof.external_nullifier,
                &proof.proof,
            )
        };

        // A different signal breaks the binding.
        assert_eq!(
            verify(&mut registry, pallas::Base::from(2)),
            Err(MembershipError::InvalidProof)
        );
        assert!(!registry.is_nullifier_used(3, proof.nullifier_hash));

        assert_eq!(verify(&mut registry, signal), Ok(()));
        assert!(registry.is_nullifier_used(3, proof.nullifier_hash));
        assert_eq!(
            verify(&mut registry, signal),
            Err(MembershipError::NullifierReused(3))
        );
    }
}
