//! The anonymous NFT exchange ledger.
//!
//! Sellers escrow NFTs and buyers escrow a fixed amount of ETH, each tagged
//! with an identity commitment. Two groups live in the membership registry:
//!
//! - the ETH-deposited group, joined by every buyer on deposit;
//! - the NFT-sold group, joined by a seller's commitment once their NFT is bought.
//!
//! A buyer proves membership of the ETH group to take any listed NFT; a
//! seller proves membership of the sold group to take one sold deposit's
//! ETH. ETH deposits are fungible: the oldest matching deposit is consumed.
//!
//! An identity commitment backs at most one live deposit on each side, since
//! its nullifier can be spent only once per group.
//!
//! Preconditions are checked before anything moves. Proof checks consume the
//! nullifier, so a call failing after that point relies on the host rolling
//! back the whole transaction.

use crate::error::ExchangeError;
use crate::group::GroupId;
use crate::identity::Commitment;
use crate::proof::FullProof;
use crate::registry::GroupMembership;
use crate::utils::{bytes_to_field, poseidon_hash};
use crate::GROUP_DEPTH;
use ethers::types::{Address, U256};
use log::{debug, info};
use pasta_curves::pallas;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::collections::{HashMap, VecDeque};

/// Signal tag of proofs that buy an NFT.
pub const BUY_NFT_SIGNAL: u64 = 1;
/// Signal tag of proofs that claim a sold deposit's ETH.
pub const CLAIM_ETH_SIGNAL: u64 = 2;
/// Signal tag of proofs that withdraw an unsold ETH deposit.
pub const WITHDRAW_ETH_SIGNAL: u64 = 3;

/// Group ids used by one exchange deployment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeGroups {
    pub nft_sold: GroupId,
    pub eth_deposited: GroupId,
}

impl ExchangeGroups {
    /// Sold group at `base`, ETH group at `base + 1`.
    #[must_use]
    pub fn from_base(base: GroupId) -> Option<Self> {
        Some(Self {
            nft_sold: base,
            eth_deposited: base.checked_add(1)?,
        })
    }
}

/// What a membership proof authorizes.
///
/// Each context fixes the group the proof must be made against, the
/// external nullifier, and the signal. Buying and withdrawing ETH share the
/// ETH group's external nullifier, so an identity can do one or the other
/// once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimContext {
    BuyNft,
    ClaimEth,
    WithdrawEth,
}

impl ClaimContext {
    #[must_use]
    pub fn group(self, groups: &ExchangeGroups) -> GroupId {
        match self {
            Self::BuyNft | Self::WithdrawEth => groups.eth_deposited,
            Self::ClaimEth => groups.nft_sold,
        }
    }

    #[must_use]
    pub fn external_nullifier(self, groups: &ExchangeGroups) -> pallas::Base {
        pallas::Base::from(self.group(groups))
    }

    #[must_use]
    pub fn signal_tag(self) -> u64 {
        match self {
            Self::BuyNft => BUY_NFT_SIGNAL,
            Self::ClaimEth => CLAIM_ETH_SIGNAL,
            Self::WithdrawEth => WITHDRAW_ETH_SIGNAL,
        }
    }

    /// Signal binding the proof to this context and to `recipient`, so a
    /// proof seen in flight cannot be redirected.
    #[must_use]
    pub fn signal(self, recipient: Address) -> pallas::Base {
        let mut padded = [0u8; 32];
        padded[12..].copy_from_slice(recipient.as_bytes());
        poseidon_hash(pallas::Base::from(self.signal_tag()), bytes_to_field(&padded))
    }
}

/// Caller and attached value of the current call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub caller: Address,
    pub value: U256,
}

impl CallContext {
    #[must_use]
    pub fn new(caller: Address) -> Self {
        Self {
            caller,
            value: U256::zero(),
        }
    }

    #[must_use]
    pub fn with_value(caller: Address, value: U256) -> Self {
        Self { caller, value }
    }
}

/// The rest of the network as seen from inside an exchange call.
pub trait ExchangeHost {
    fn membership(&mut self) -> &mut dyn GroupMembership;

    fn nft_owner(&self, asset: Address, token_id: U256) -> Result<Address, ExchangeError>;

    fn nft_is_approved(
        &self,
        asset: Address,
        operator: Address,
        token_id: U256,
    ) -> Result<bool, ExchangeError>;

    fn transfer_nft(
        &mut self,
        asset: Address,
        operator: Address,
        from: Address,
        to: Address,
        token_id: U256,
    ) -> Result<(), ExchangeError>;

    /// Pays `amount` out of the exchange's own balance.
    fn send_value(&mut self, to: Address, amount: U256) -> Result<(), ExchangeError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftDeposit {
    pub seller: Address,
    pub id_commitment: Commitment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EthDepositStatus {
    /// Waiting for a buyer to take an NFT with it.
    Deposited,
    /// Reserved by a purchase; waiting for a seller's claim.
    Sold,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthDeposit {
    pub id_commitment: Commitment,
    pub amount: U256,
    pub status: EthDepositStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeEvent {
    NftDeposited {
        asset: Address,
        token_id: U256,
        seller: Address,
        id_commitment: Commitment,
    },
    EthDeposited {
        depositor: Address,
        id_commitment: Commitment,
        amount: U256,
    },
    NftClaimed {
        asset: Address,
        token_id: U256,
        recipient: Address,
    },
    EthClaimed {
        recipient: Address,
        amount: U256,
    },
    NftWithdrawn {
        asset: Address,
        token_id: U256,
        seller: Address,
    },
    EthWithdrawn {
        recipient: Address,
        amount: U256,
    },
}

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnonNftEx {
    address: Address,
    verifier: Address,
    groups: ExchangeGroups,
    denomination: U256,
    #[serde_as(as = "Vec<(_, _)>")]
    nft_deposits: HashMap<(Address, U256), NftDeposit>,
    #[serde_as(as = "Vec<(_, _)>")]
    eth_deposits: HashMap<Address, EthDeposit>,
    /// Depositors whose ETH is still unsold, oldest first.
    available: VecDeque<Address>,
    /// Depositors whose ETH was reserved by a purchase, oldest first.
    sold: VecDeque<Address>,
}

impl AnonNftEx {
    /// Deploys the exchange and creates both of its groups, administered by
    /// the exchange itself.
    pub fn new(
        address: Address,
        verifier: Address,
        groups: ExchangeGroups,
        denomination: U256,
        membership: &mut dyn GroupMembership,
    ) -> Result<Self, ExchangeError> {
        if denomination.is_zero() {
            return Err(ExchangeError::ZeroValue);
        }
        membership.create_group(address, groups.nft_sold, GROUP_DEPTH)?;
        membership.create_group(address, groups.eth_deposited, GROUP_DEPTH)?;
        info!(
            "Exchange {address:?} created groups {} (sold) and {} (eth)",
            groups.nft_sold, groups.eth_deposited
        );

        Ok(Self {
            address,
            verifier,
            groups,
            denomination,
            nft_deposits: HashMap::new(),
            eth_deposits: HashMap::new(),
            available: VecDeque::new(),
            sold: VecDeque::new(),
        })
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn verifier(&self) -> Address {
        self.verifier
    }

    #[must_use]
    pub fn groups(&self) -> ExchangeGroups {
        self.groups
    }

    #[must_use]
    pub fn denomination(&self) -> U256 {
        self.denomination
    }

    #[must_use]
    pub fn nft_deposit(&self, asset: Address, token_id: U256) -> Option<&NftDeposit> {
        self.nft_deposits.get(&(asset, token_id))
    }

    #[must_use]
    pub fn eth_deposit(&self, depositor: Address) -> Option<&EthDeposit> {
        self.eth_deposits.get(&depositor)
    }

    /// All listed NFTs as `(asset, token_id, deposit)`, ordered by asset then id.
    #[must_use]
    pub fn listings(&self) -> Vec<(Address, U256, &NftDeposit)> {
        let mut listings: Vec<_> = self
            .nft_deposits
            .iter()
            .map(|((asset, token_id), deposit)| (*asset, *token_id, deposit))
            .collect();
        listings.sort_by_key(|(asset, token_id, _)| (*asset, *token_id));
        listings
    }

    /// Number of ETH deposits a buyer can still purchase with.
    #[must_use]
    pub fn available_eth_deposits(&self) -> usize {
        self.available.len()
    }

    /// Number of sold deposits waiting for a seller's claim.
    #[must_use]
    pub fn pending_claims(&self) -> usize {
        self.sold.len()
    }

    /// Escrows `token_id` of `asset` from the caller.
    ///
    /// The caller must own the token and have approved the exchange.
    pub fn deposit_nft(
        &mut self,
        call: &CallContext,
        host: &mut dyn ExchangeHost,
        asset: Address,
        token_id: U256,
        id_commitment: Commitment,
    ) -> Result<ExchangeEvent, ExchangeError> {
        if id_commitment.is_zero() {
            return Err(ExchangeError::ZeroCommitment);
        }
        if self.nft_deposits.contains_key(&(asset, token_id)) {
            return Err(ExchangeError::NftDepositExists { asset, token_id });
        }
        let listed = self
            .nft_deposits
            .values()
            .any(|deposit| deposit.id_commitment == id_commitment);
        if listed
            || host
                .membership()
                .is_member(self.groups.nft_sold, &id_commitment)
        {
            return Err(ExchangeError::CommitmentInUse);
        }
        if host.nft_owner(asset, token_id)? != call.caller {
            return Err(ExchangeError::NotTokenOwner {
                asset,
                token_id,
                caller: call.caller,
            });
        }
        if !host.nft_is_approved(asset, self.address, token_id)? {
            return Err(ExchangeError::NotApproved { asset, token_id });
        }

        host.transfer_nft(asset, self.address, call.caller, self.address, token_id)?;
        self.nft_deposits.insert(
            (asset, token_id),
            NftDeposit {
                seller: call.caller,
                id_commitment,
            },
        );
        debug!("NFT {token_id} of {asset:?} deposited by {:?}", call.caller);

        Ok(ExchangeEvent::NftDeposited {
            asset,
            token_id,
            seller: call.caller,
            id_commitment,
        })
    }

    /// Escrows the attached value and enrolls `id_commitment` in the ETH group.
    ///
    /// The attached value must equal the exchange denomination.
    pub fn deposit_eth(
        &mut self,
        call: &CallContext,
        host: &mut dyn ExchangeHost,
        id_commitment: Commitment,
    ) -> Result<ExchangeEvent, ExchangeError> {
        if call.value.is_zero() {
            return Err(ExchangeError::ZeroValue);
        }
        if call.value != self.denomination {
            return Err(ExchangeError::WrongDenomination {
                expected: self.denomination,
                actual: call.value,
            });
        }
        if id_commitment.is_zero() {
            return Err(ExchangeError::ZeroCommitment);
        }
        if self.eth_deposits.contains_key(&call.caller) {
            return Err(ExchangeError::EthDepositExists(call.caller));
        }
        if host
            .membership()
            .is_member(self.groups.eth_deposited, &id_commitment)
        {
            return Err(ExchangeError::CommitmentInUse);
        }

        host.membership()
            .add_member(self.address, self.groups.eth_deposited, id_commitment)?;
        self.eth_deposits.insert(
            call.caller,
            EthDeposit {
                id_commitment,
                amount: call.value,
                status: EthDepositStatus::Deposited,
            },
        );
        self.available.push_back(call.caller);
        debug!("ETH deposit of {} from {:?}", call.value, call.caller);

        Ok(ExchangeEvent::EthDeposited {
            depositor: call.caller,
            id_commitment,
            amount: call.value,
        })
    }

    /// Releases a listed NFT to `recipient` against a proof of ETH-group
    /// membership, and enrolls the seller in the sold group.
    pub fn buy_and_claim_nft(
        &mut self,
        host: &mut dyn ExchangeHost,
        asset: Address,
        token_id: U256,
        proof: &FullProof,
        recipient: Address,
    ) -> Result<ExchangeEvent, ExchangeError> {
        if recipient.is_zero() {
            return Err(ExchangeError::ZeroRecipient);
        }
        let deposit = self
            .nft_deposits
            .get(&(asset, token_id))
            .cloned()
            .ok_or(ExchangeError::NftDepositAbsent { asset, token_id })?;
        let reserved = *self.available.front().ok_or(ExchangeError::EthDepositAbsent)?;

        self.check_proof(host, ClaimContext::BuyNft, proof, recipient)?;
        host.membership()
            .add_member(self.address, self.groups.nft_sold, deposit.id_commitment)?;
        host.transfer_nft(asset, self.address, self.address, recipient, token_id)?;

        self.nft_deposits.remove(&(asset, token_id));
        self.available.pop_front();
        if let Some(eth) = self.eth_deposits.get_mut(&reserved) {
            eth.status = EthDepositStatus::Sold;
        }
        self.sold.push_back(reserved);
        info!("NFT {token_id} of {asset:?} sold");

        Ok(ExchangeEvent::NftClaimed {
            asset,
            token_id,
            recipient,
        })
    }

    /// Pays one sold deposit's ETH to `recipient` against a proof of
    /// sold-group membership.
    pub fn claim_eth(
        &mut self,
        host: &mut dyn ExchangeHost,
        recipient: Address,
        proof: &FullProof,
    ) -> Result<ExchangeEvent, ExchangeError> {
        if recipient.is_zero() {
            return Err(ExchangeError::ZeroRecipient);
        }
        let depositor = *self.sold.front().ok_or(ExchangeError::EthDepositAbsent)?;
        let amount = self
            .eth_deposits
            .get(&depositor)
            .map(|deposit| deposit.amount)
            .ok_or(ExchangeError::EthDepositAbsent)?;

        self.check_proof(host, ClaimContext::ClaimEth, proof, recipient)?;
        host.send_value(recipient, amount)?;

        self.sold.pop_front();
        self.eth_deposits.remove(&depositor);
        info!("ETH claim of {amount} paid");

        Ok(ExchangeEvent::EthClaimed { recipient, amount })
    }

    /// Returns an unsold NFT to its seller. Only the seller may withdraw.
    pub fn withdraw_nft(
        &mut self,
        call: &CallContext,
        host: &mut dyn ExchangeHost,
        asset: Address,
        token_id: U256,
    ) -> Result<ExchangeEvent, ExchangeError> {
        let deposit = self
            .nft_deposits
            .get(&(asset, token_id))
            .ok_or(ExchangeError::NftDepositAbsent { asset, token_id })?;
        if deposit.seller != call.caller {
            return Err(ExchangeError::NotSeller {
                caller: call.caller,
            });
        }

        host.transfer_nft(asset, self.address, self.address, call.caller, token_id)?;
        self.nft_deposits.remove(&(asset, token_id));
        debug!("NFT {token_id} of {asset:?} withdrawn");

        Ok(ExchangeEvent::NftWithdrawn {
            asset,
            token_id,
            seller: call.caller,
        })
    }

    /// Refunds an unsold ETH deposit to `recipient` against a proof of
    /// ETH-group membership.
    ///
    /// The proof consumes the same nullifier as a purchase would, so each
    /// depositor identity either buys or withdraws, never both. The caller's
    /// own unsold deposit is refunded if there is one, otherwise the oldest.
    pub fn withdraw_eth(
        &mut self,
        call: &CallContext,
        host: &mut dyn ExchangeHost,
        recipient: Address,
        proof: &FullProof,
    ) -> Result<ExchangeEvent, ExchangeError> {
        if recipient.is_zero() {
            return Err(ExchangeError::ZeroRecipient);
        }
        let depositor = if self.available.contains(&call.caller) {
            call.caller
        } else {
            *self.available.front().ok_or(ExchangeError::EthDepositAbsent)?
        };
        let amount = self
            .eth_deposits
            .get(&depositor)
            .map(|deposit| deposit.amount)
            .ok_or(ExchangeError::EthDepositAbsent)?;

        self.check_proof(host, ClaimContext::WithdrawEth, proof, recipient)?;
        host.send_value(recipient, amount)?;

        self.available.retain(|address| *address != depositor);
        self.eth_deposits.remove(&depositor);
        debug!("ETH deposit of {depositor:?} withdrawn");

        Ok(ExchangeEvent::EthWithdrawn { recipient, amount })
    }

    fn check_proof(
        &self,
        host: &mut dyn ExchangeHost,
        context: ClaimContext,
        proof: &FullProof,
        recipient: Address,
    ) -> Result<(), ExchangeError> {
        host.membership().verify_proof(
            context.group(&self.groups),
            proof.merkle_tree_root,
            context.signal(recipient),
            proof.nullifier_hash,
            context.external_nullifier(&self.groups),
            &proof.proof,
        )?;
        Ok(())
    }
}
