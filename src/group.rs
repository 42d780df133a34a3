//! Membership groups as fixed-depth incremental Poseidon Merkle trees.
//!
//! Leaves are identity commitments, empty slots hold zero. Groups are
//! append-only: the only way to leave a group is to deploy a new one.

use crate::error::MembershipError;
use crate::identity::Commitment;
use crate::utils::{field_to_bytes, poseidon_hash};
use crate::GROUP_DEPTH;
use pasta_curves::pallas;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric group identifier. Doubles as the external nullifier of proofs
/// made against the group.
pub type GroupId = u64;

/// A Merkle authentication path for one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf: pallas::Base,
    pub root: pallas::Base,
    pub siblings: Vec<pallas::Base>,
    pub index: usize,
}

impl MerkleProof {
    /// Recomputes the root from the leaf and siblings.
    #[must_use]
    pub fn compute_root(&self) -> pallas::Base {
        let mut current = self.leaf;
        let mut index = self.index;

        for sibling in &self.siblings {
            current = if index % 2 == 0 {
                poseidon_hash(current, *sibling)
            } else {
                poseidon_hash(*sibling, current)
            };
            index /= 2;
        }

        current
    }
}

impl fmt::Display for MerkleProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MerkleProof:\n  Leaf: {}\n  Root: {}\n  Index: {}\n  Siblings: {}",
            hex::encode(field_to_bytes(self.leaf)),
            hex::encode(field_to_bytes(self.root)),
            self.index,
            self.siblings.len()
        )
    }
}

/// Serialized form: the tree is rebuilt from the member list.
#[derive(Serialize, Deserialize)]
struct GroupRecord {
    id: GroupId,
    depth: usize,
    members: Vec<Commitment>,
}

/// An append-only group of identity commitments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GroupRecord", into = "GroupRecord")]
pub struct Group {
    id: GroupId,
    depth: usize,
    members: Vec<Commitment>,
    /// `layers[0]` holds the leaves, `layers[depth]` at most the root.
    layers: Vec<Vec<pallas::Base>>,
    /// `zeros[level]` is the root of an empty subtree of height `level`.
    zeros: Vec<pallas::Base>,
}

impl Group {
    /// Creates an empty group.
    ///
    /// # Errors
    /// Fails if `depth` is zero or deeper than the circuit supports.
    pub fn new(id: GroupId, depth: usize) -> Result<Self, MembershipError> {
        if depth == 0 || depth > GROUP_DEPTH {
            return Err(MembershipError::UnsupportedDepth(depth));
        }

        let mut zeros = Vec::with_capacity(depth + 1);
        zeros.push(pallas::Base::zero());
        for level in 0..depth {
            zeros.push(poseidon_hash(zeros[level], zeros[level]));
        }

        Ok(Self {
            id,
            depth,
            members: Vec::new(),
            layers: vec![Vec::new(); depth + 1],
            zeros,
        })
    }

    #[must_use]
    pub fn id(&self) -> GroupId {
        self.id
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn members(&self) -> &[Commitment] {
        &self.members
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        1usize << self.depth
    }

    /// Current root. An empty group has the all-zero-subtree root.
    #[must_use]
    pub fn root(&self) -> pallas::Base {
        self.layers[self.depth]
            .first()
            .copied()
            .unwrap_or(self.zeros[self.depth])
    }

    #[must_use]
    pub fn index_of(&self, commitment: &Commitment) -> Option<usize> {
        self.members.iter().position(|m| m == commitment)
    }

    /// Appends a member and returns the new root.
    ///
    /// # Errors
    /// Fails for a zero or non-canonical commitment, or when the tree is full.
    pub fn add_member(&mut self, commitment: Commitment) -> Result<pallas::Base, MembershipError> {
        if commitment.is_zero() {
            return Err(MembershipError::InvalidCommitment);
        }
        let leaf = commitment
            .to_field()
            .ok_or(MembershipError::InvalidCommitment)?;
        if self.members.len() >= self.capacity() {
            return Err(MembershipError::TreeFull(self.id));
        }

        let index = self.members.len();
        self.members.push(commitment);
        self.layers[0].push(leaf);

        let mut node_index = index;
        for level in 0..self.depth {
            let left_index = node_index & !1;
            let left = self.layers[level][left_index];
            let right = self.layers[level]
                .get(left_index + 1)
                .copied()
                .unwrap_or(self.zeros[level]);
            let parent = poseidon_hash(left, right);

            let parent_index = node_index / 2;
            let parents = &mut self.layers[level + 1];
            if parent_index < parents.len() {
                parents[parent_index] = parent;
            } else {
                parents.push(parent);
            }
            node_index = parent_index;
        }

        Ok(self.root())
    }

    /// Authentication path for the member at `leaf_index`.
    #[must_use]
    pub fn generate_proof(&self, leaf_index: usize) -> Option<MerkleProof> {
        if leaf_index >= self.members.len() {
            return None;
        }

        let mut siblings = Vec::with_capacity(self.depth);
        let mut index = leaf_index;
        for level in 0..self.depth {
            let sibling_index = index ^ 1;
            siblings.push(
                self.layers[level]
                    .get(sibling_index)
                    .copied()
                    .unwrap_or(self.zeros[level]),
            );
            index /= 2;
        }

        Some(MerkleProof {
            leaf: self.layers[0][leaf_index],
            root: self.root(),
            siblings,
            index: leaf_index,
        })
    }

    /// Verifies a Merkle proof against this group's current root.
    #[must_use]
    pub fn verify_proof(&self, proof: &MerkleProof) -> bool {
        proof.root == self.root()
            && proof.siblings.len() == self.depth
            && proof.compute_root() == self.root()
    }
}

impl TryFrom<GroupRecord> for Group {
    type Error = MembershipError;

    fn try_from(record: GroupRecord) -> Result<Self, Self::Error> {
        let mut group = Group::new(record.id, record.depth)?;
        for member in record.members {
            group.add_member(member)?;
        }
        Ok(group)
    }
}

impl From<Group> for GroupRecord {
    fn from(group: Group) -> Self {
        GroupRecord {
            id: group.id,
            depth: group.depth,
            members: group.members,
        }
    }
}
