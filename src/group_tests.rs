#[cfg(test)]
mod tests {
    use crate::error::MembershipError;
    use crate::group::Group;
    use crate::identity::{Commitment, Identity};
    use crate::utils::poseidon_hash;
    use pasta_curves::pallas;

    fn members(count: usize) -> Vec<Commitment> {
        (0..count).map(|_| Identity::new().commitment()).collect()
    }

    fn filled(depth: usize, count: usize) -> Group {
        let mut group = Group::new(1, depth).unwrap();
        for member in members(count) {
            group.add_member(member).unwrap();
        }
        group
    }

    #[test]
    fn test_empty_group_root_is_zero_subtree() {
        let group = Group::new(1, 2).unwrap();
        let z0 = pallas::Base::zero();
        let z1 = poseidon_hash(z0, z0);
        assert_eq!(group.root(), poseidon_hash(z1, z1));
        assert!(group.is_empty());
    }

    #[test]
    fn test_root_matches_full_recomputation() {
        let group = filled(2, 3);
        let leaves: Vec<pallas::Base> = group
            .members()
            .iter()
            .map(|m| m.to_field().unwrap())
            .collect();
        let left = poseidon_hash(leaves[0], leaves[1]);
        let right = poseidon_hash(leaves[2], pallas::Base::zero());
        assert_eq!(group.root(), poseidon_hash(left, right));
    }

    #[test]
    fn test_add_member_advances_root() {
        let mut group = Group::new(7, 4).unwrap();
        let before = group.root();
        let after = group.add_member(Identity::new().commitment()).unwrap();
        assert_ne!(before, after);
        assert_eq!(after, group.root());
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn test_merkle_proof_verification() {
        let group = filled(4, 5);
        for index in 0..group.len() {
            let proof = group.generate_proof(index).unwrap();
            assert_eq!(proof.siblings.len(), 4);
            assert!(group.verify_proof(&proof));
        }
    }

    #[test]
    fn test_merkle_proof_with_invalid_index() {
        let group = filled(3, 2);
        assert!(group.generate_proof(2).is_none());
    }

    #[test]
    fn test_proof_goes_stale_after_new_member() {
        let mut group = filled(3, 2);
        let proof = group.generate_proof(0).unwrap();
        group.add_member(Identity::new().commitment()).unwrap();
        assert!(!group.verify_proof(&proof));
    }

    #[test]
    fn test_merkle_proof_with_tampered_leaf() {
        let group = filled(3, 4);
        let mut proof = group.generate_proof(1).unwrap();
        proof.leaf = pallas::Base::from(99);
        assert!(!group.verify_proof(&proof));
    }

    #[test]
    fn test_merkle_proof_with_tampered_siblings() {
        let group = filled(3, 4);
        let mut proof = group.generate_proof(2).unwrap();
        proof.siblings[0] = pallas::Base::from(5);
        assert!(!group.verify_proof(&proof));
    }

    #[test]
    fn test_group_rejects_zero_commitment() {
        let mut group = Group::new(1, 3).unwrap();
        assert_eq!(
            group.add_member(Commitment::ZERO),
            Err(MembershipError::InvalidCommitment)
        );
    }

    #[test]
    fn test_group_full() {
        let mut group = filled(1, 2);
        assert_eq!(
            group.add_member(Identity::new().commitment()),
            Err(MembershipError::TreeFull(1))
        );
    }

    #[test]
    fn test_unsupported_depth() {
        assert!(Group::new(1, 0).is_err());
        assert!(Group::new(1, crate::GROUP_DEPTH + 1).is_err());
    }

    #[test]
    fn test_group_serde_rebuilds_tree() {
        let group = filled(5, 6);
        let json = serde_json::to_string(&group).unwrap();
        let restored: Group = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.root(), group.root());
        assert_eq!(restored, group);
    }
}
