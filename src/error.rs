//! Error types for the contract layer.
//!
//! Every variant maps to a transaction revert: the local chain discards all
//! state touched by the failing call. Binaries and orchestration code wrap
//! these in `anyhow` with context.

use crate::group::GroupId;
use ethers::types::{Address, U256};
use thiserror::Error;

/// Failures raised by the membership registry and its groups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MembershipError {
    #[error("group {0} already exists")]
    GroupExists(GroupId),

    #[error("group {0} does not exist")]
    GroupMissing(GroupId),

    #[error("caller {caller:?} is not the admin of group {group}")]
    Unauthorized { group: GroupId, caller: Address },

    #[error("group depth {0} is outside the supported range 1..={max}", max = crate::GROUP_DEPTH)]
    UnsupportedDepth(usize),

    #[error("group {0} is full")]
    TreeFull(GroupId),

    #[error("identity commitment is zero or not a canonical field element")]
    InvalidCommitment,

    #[error("merkle root does not match the current root of group {0}")]
    StaleRoot(GroupId),

    #[error("nullifier has already been used in group {0}")]
    NullifierReused(GroupId),

    #[error("identity is not a member of group {0}")]
    NotAMember(GroupId),

    #[error("membership proof is invalid")]
    InvalidProof,

    #[error("proving system error: {0}")]
    ProvingSystem(String),
}

impl From<halo2_proofs::plonk::Error> for MembershipError {
    fn from(e: halo2_proofs::plonk::Error) -> Self {
        Self::ProvingSystem(format!("{e:?}"))
    }
}

/// Reverts raised by the exchange and the test asset contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    // Preconditions.
    #[error("caller {caller:?} does not own token {token_id} of {asset:?}")]
    NotTokenOwner {
        asset: Address,
        token_id: U256,
        caller: Address,
    },

    #[error("exchange is not approved to transfer token {token_id} of {asset:?}")]
    NotApproved { asset: Address, token_id: U256 },

    #[error("token {token_id} of {asset:?} does not exist")]
    UnknownToken { asset: Address, token_id: U256 },

    #[error("no asset contract is deployed at {0:?}")]
    UnknownAsset(Address),

    #[error("token {token_id} of {asset:?} is already deposited")]
    NftDepositExists { asset: Address, token_id: U256 },

    #[error("token {token_id} of {asset:?} is not deposited")]
    NftDepositAbsent { asset: Address, token_id: U256 },

    #[error("{0:?} already has an ETH deposit")]
    EthDepositExists(Address),

    #[error("no ETH deposit is available for this operation")]
    EthDepositAbsent,

    #[error("deposit value must be non-zero")]
    ZeroValue,

    #[error("deposit value {actual} does not match the exchange denomination {expected}")]
    WrongDenomination { expected: U256, actual: U256 },

    #[error("identity commitment must be non-zero")]
    ZeroCommitment,

    #[error("identity commitment already backs a deposit on this side of the exchange")]
    CommitmentInUse,

    #[error("caller {caller:?} is not the seller of this deposit")]
    NotSeller { caller: Address },

    #[error("recipient must not be the zero address")]
    ZeroRecipient,

    // Transfers.
    #[error("insufficient balance: {available} available, {required} required")]
    InsufficientBalance { available: U256, required: U256 },

    // Proof and replay failures surface from the registry.
    #[error(transparent)]
    Membership(#[from] MembershipError),
}

impl ExchangeError {
    /// Coarse failure class, used by the CLI to describe reverts.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Membership(MembershipError::InvalidProof)
            | Self::Membership(MembershipError::StaleRoot(_))
            | Self::Membership(MembershipError::ProvingSystem(_)) => FailureKind::Proof,
            Self::Membership(MembershipError::NullifierReused(_)) => FailureKind::Replay,
            Self::InsufficientBalance { .. } => FailureKind::Transfer,
            _ => FailureKind::Precondition,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Precondition,
    Proof,
    Replay,
    Transfer,
}

impl FailureKind {
    /// What the user can do about a revert of this class.
    #[must_use]
    pub fn hint(self) -> &'static str {
        match self {
            Self::Precondition => "check the deposit state and the arguments, then retry",
            Self::Proof => "the group changed or the proof does not match this call; generate a new proof",
            Self::Replay => "this identity has already been used for this action",
            Self::Transfer => "the paying account cannot cover the amount",
        }
    }
}

/// Failures of the local chain itself.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("unknown account {0:?}")]
    UnknownAccount(Address),

    #[error("no {kind} contract is deployed at {address:?}")]
    UnknownContract { kind: &'static str, address: Address },

    #[error("{account:?} cannot pay {required}: balance is {available}")]
    InsufficientFunds {
        account: Address,
        available: U256,
        required: U256,
    },

    #[error("transaction reverted: {0}")]
    Reverted(#[from] ExchangeError),

    #[error("membership registry call failed: {0}")]
    Membership(#[from] MembershipError),

    #[error("failed to access network state: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode network state: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChainError {
    /// The contract-level revert behind this error, if any.
    #[must_use]
    pub fn revert_reason(&self) -> Option<&ExchangeError> {
        match self {
            Self::Reverted(e) => Some(e),
            _ => None,
        }
    }

    /// Failure class of the revert behind this error, if any.
    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.revert_reason().map(ExchangeError::kind)
    }
}
