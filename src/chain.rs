//! In-process development network.
//!
//! Holds funded development accounts and the deployed contracts, assigns
//! contract addresses the way `CREATE` does, and executes every transaction
//! against a copy of the state that replaces the live state only when the
//! call succeeds. The whole network serializes to a JSON state file so the
//! deploy binary and the CLI can share it.

use crate::error::{ChainError, ExchangeError};
use crate::ethereum::{dev_address, DEV_ACCOUNT_BALANCE_ETH, DEV_ACCOUNT_COUNT};
use crate::exchange::{AnonNftEx, CallContext, ExchangeEvent, ExchangeGroups, ExchangeHost};
use crate::identity::Commitment;
use crate::nft::SimpleNft;
use crate::proof::FullProof;
use crate::registry::{GroupMembership, MembershipRegistry};
use ethers::types::{Address, U256};
use ethers::utils::get_contract_address;
use log::{debug, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Chain id reported by the development network.
pub const DEV_CHAIN_ID: u64 = 31337;

/// A network shared between clients and background watchers.
pub type SharedChain = Arc<RwLock<LocalChain>>;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: U256,
    pub nonce: u64,
}

/// Outcome of a committed transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt<T> {
    pub block_number: u64,
    pub from: Address,
    pub to: Address,
    pub output: T,
}

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalChain {
    chain_id: u64,
    block_number: u64,
    dev_accounts: Vec<Address>,
    #[serde_as(as = "Vec<(_, _)>")]
    accounts: HashMap<Address, Account>,
    #[serde_as(as = "Vec<(_, _)>")]
    registries: HashMap<Address, MembershipRegistry>,
    #[serde_as(as = "Vec<(_, _)>")]
    exchanges: HashMap<Address, AnonNftEx>,
    #[serde_as(as = "Vec<(_, _)>")]
    nfts: HashMap<Address, SimpleNft>,
    /// Named contract addresses recorded by the deploy step.
    deployments: BTreeMap<String, Address>,
}

impl Default for LocalChain {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalChain {
    /// A fresh network with the standard development accounts.
    #[must_use]
    pub fn new() -> Self {
        Self::with_dev_accounts(DEV_ACCOUNT_COUNT, DEV_ACCOUNT_BALANCE_ETH)
    }

    #[must_use]
    pub fn with_dev_accounts(count: usize, balance_eth: u64) -> Self {
        let balance = U256::from(balance_eth) * U256::exp10(18);
        let dev_accounts: Vec<Address> = (0..count).map(dev_address).collect();
        let accounts = dev_accounts
            .iter()
            .map(|address| (*address, Account { balance, nonce: 0 }))
            .collect();

        Self {
            chain_id: DEV_CHAIN_ID,
            block_number: 0,
            dev_accounts,
            accounts,
            registries: HashMap::new(),
            exchanges: HashMap::new(),
            nfts: HashMap::new(),
            deployments: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn into_shared(self) -> SharedChain {
        Arc::new(RwLock::new(self))
    }

    #[must_use]
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    #[must_use]
    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    #[must_use]
    pub fn dev_accounts(&self) -> &[Address] {
        &self.dev_accounts
    }

    #[must_use]
    pub fn balance(&self, address: Address) -> U256 {
        self.accounts
            .get(&address)
            .map(|account| account.balance)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn nonce(&self, address: Address) -> u64 {
        self.accounts
            .get(&address)
            .map(|account| account.nonce)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn registry(&self, address: Address) -> Option<&MembershipRegistry> {
        self.registries.get(&address)
    }

    #[must_use]
    pub fn exchange(&self, address: Address) -> Option<&AnonNftEx> {
        self.exchanges.get(&address)
    }

    #[must_use]
    pub fn nft(&self, address: Address) -> Option<&SimpleNft> {
        self.nfts.get(&address)
    }

    #[must_use]
    pub fn deployment(&self, name: &str) -> Option<Address> {
        self.deployments.get(name).copied()
    }

    pub fn record_deployment(&mut self, name: &str, address: Address) {
        self.deployments.insert(name.to_string(), address);
    }

    /// Moves `value` between two accounts.
    pub fn transfer(
        &mut self,
        from: Address,
        to: Address,
        value: U256,
    ) -> Result<Receipt<()>, ChainError> {
        self.execute(from, to, value, |_| Ok(()))
    }

    pub fn deploy_registry(&mut self, from: Address) -> Result<Address, ChainError> {
        let receipt = self.deploy_with(from, |state, address| {
            state.registries.insert(address, MembershipRegistry::new());
            Ok(())
        })?;
        info!("Membership registry deployed at {:?}", receipt.output);
        Ok(receipt.output)
    }

    pub fn deploy_exchange(
        &mut self,
        from: Address,
        verifier: Address,
        groups: ExchangeGroups,
        denomination: U256,
    ) -> Result<Address, ChainError> {
        let receipt = self.deploy_with(from, |state, address| {
            let registry = state
                .registries
                .get_mut(&verifier)
                .ok_or(ChainError::UnknownContract {
                    kind: "registry",
                    address: verifier,
                })?;
            let exchange = AnonNftEx::new(address, verifier, groups, denomination, registry)?;
            state.exchanges.insert(address, exchange);
            Ok(())
        })?;
        info!("Exchange deployed at {:?}", receipt.output);
        Ok(receipt.output)
    }

    pub fn deploy_nft(&mut self, from: Address) -> Result<Address, ChainError> {
        let receipt = self.deploy_with(from, |state, address| {
            state.nfts.insert(address, SimpleNft::new(address));
            Ok(())
        })?;
        info!("NFT contract deployed at {:?}", receipt.output);
        Ok(receipt.output)
    }

    pub fn mint_nft(
        &mut self,
        from: Address,
        nft: Address,
        to: Address,
    ) -> Result<Receipt<U256>, ChainError> {
        self.call_nft(from, nft, |contract| contract.mint_nft(to))
    }

    pub fn approve_nft(
        &mut self,
        from: Address,
        nft: Address,
        spender: Address,
        token_id: U256,
    ) -> Result<Receipt<()>, ChainError> {
        self.call_nft(from, nft, |contract| contract.approve(from, spender, token_id))
    }

    pub fn set_approval_for_all(
        &mut self,
        from: Address,
        nft: Address,
        operator: Address,
        approved: bool,
    ) -> Result<Receipt<()>, ChainError> {
        self.call_nft(from, nft, |contract| {
            contract.set_approval_for_all(from, operator, approved);
            Ok(())
        })
    }

    pub fn deposit_nft(
        &mut self,
        from: Address,
        exchange: Address,
        asset: Address,
        token_id: U256,
        id_commitment: Commitment,
    ) -> Result<Receipt<ExchangeEvent>, ChainError> {
        self.call_exchange(from, exchange, U256::zero(), |ex, call, host| {
            ex.deposit_nft(call, host, asset, token_id, id_commitment)
        })
    }

    pub fn deposit_eth(
        &mut self,
        from: Address,
        exchange: Address,
        value: U256,
        id_commitment: Commitment,
    ) -> Result<Receipt<ExchangeEvent>, ChainError> {
        self.call_exchange(from, exchange, value, |ex, call, host| {
            ex.deposit_eth(call, host, id_commitment)
        })
    }

    pub fn buy_and_claim_nft(
        &mut self,
        from: Address,
        exchange: Address,
        asset: Address,
        token_id: U256,
        proof: &FullProof,
        recipient: Address,
    ) -> Result<Receipt<ExchangeEvent>, ChainError> {
        self.call_exchange(from, exchange, U256::zero(), |ex, _, host| {
            ex.buy_and_claim_nft(host, asset, token_id, proof, recipient)
        })
    }

    pub fn claim_eth(
        &mut self,
        from: Address,
        exchange: Address,
        recipient: Address,
        proof: &FullProof,
    ) -> Result<Receipt<ExchangeEvent>, ChainError> {
        self.call_exchange(from, exchange, U256::zero(), |ex, _, host| {
            ex.claim_eth(host, recipient, proof)
        })
    }

    pub fn withdraw_nft(
        &mut self,
        from: Address,
        exchange: Address,
        asset: Address,
        token_id: U256,
    ) -> Result<Receipt<ExchangeEvent>, ChainError> {
        self.call_exchange(from, exchange, U256::zero(), |ex, call, host| {
            ex.withdraw_nft(call, host, asset, token_id)
        })
    }

    pub fn withdraw_eth(
        &mut self,
        from: Address,
        exchange: Address,
        recipient: Address,
        proof: &FullProof,
    ) -> Result<Receipt<ExchangeEvent>, ChainError> {
        self.call_exchange(from, exchange, U256::zero(), |ex, call, host| {
            ex.withdraw_eth(call, host, recipient, proof)
        })
    }

    pub fn load(path: &Path) -> Result<Self, ChainError> {
        let content = std::fs::read_to_string(path)?;
        let chain: LocalChain = serde_json::from_str(&content)?;
        debug!(
            "Loaded network state at block {} from {}",
            chain.block_number,
            path.display()
        );
        Ok(chain)
    }

    /// Loads the state file, or starts a fresh network if there is none.
    pub fn load_or_new(path: &Path) -> Result<Self, ChainError> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("No network state at {}, starting a fresh chain", path.display());
            Ok(Self::new())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ChainError> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Runs `op` on a copy of the state and commits the copy on success.
    fn execute<T>(
        &mut self,
        from: Address,
        to: Address,
        value: U256,
        op: impl FnOnce(&mut LocalChain) -> Result<T, ChainError>,
    ) -> Result<Receipt<T>, ChainError> {
        let mut next = self.clone();
        next.accounts
            .get_mut(&from)
            .ok_or(ChainError::UnknownAccount(from))?
            .nonce += 1;
        next.move_value(from, to, value)?;
        let output = op(&mut next)?;
        next.block_number += 1;

        let receipt = Receipt {
            block_number: next.block_number,
            from,
            to,
            output,
        };
        *self = next;
        Ok(receipt)
    }

    fn deploy_with(
        &mut self,
        from: Address,
        install: impl FnOnce(&mut LocalChain, Address) -> Result<(), ChainError>,
    ) -> Result<Receipt<Address>, ChainError> {
        let address = get_contract_address(from, self.nonce(from));
        self.execute(from, address, U256::zero(), |state| {
            state.accounts.entry(address).or_default();
            install(state, address)?;
            Ok(address)
        })
    }

    fn move_value(&mut self, from: Address, to: Address, value: U256) -> Result<(), ChainError> {
        if value.is_zero() {
            return Ok(());
        }
        let sender = self
            .accounts
            .get_mut(&from)
            .ok_or(ChainError::UnknownAccount(from))?;
        if sender.balance < value {
            return Err(ChainError::InsufficientFunds {
                account: from,
                available: sender.balance,
                required: value,
            });
        }
        sender.balance -= value;
        self.accounts.entry(to).or_default().balance += value;
        Ok(())
    }

    fn call_nft<T>(
        &mut self,
        from: Address,
        nft: Address,
        f: impl FnOnce(&mut SimpleNft) -> Result<T, ExchangeError>,
    ) -> Result<Receipt<T>, ChainError> {
        self.execute(from, nft, U256::zero(), |state| {
            let contract = state
                .nfts
                .get_mut(&nft)
                .ok_or(ChainError::UnknownContract {
                    kind: "nft",
                    address: nft,
                })?;
            Ok(f(contract)?)
        })
    }

    fn call_exchange<T>(
        &mut self,
        from: Address,
        exchange: Address,
        value: U256,
        f: impl FnOnce(&mut AnonNftEx, &CallContext, &mut dyn ExchangeHost) -> Result<T, ExchangeError>,
    ) -> Result<Receipt<T>, ChainError> {
        self.execute(from, exchange, value, |state| {
            let LocalChain {
                accounts,
                registries,
                exchanges,
                nfts,
                ..
            } = state;
            let ex = exchanges
                .get_mut(&exchange)
                .ok_or(ChainError::UnknownContract {
                    kind: "exchange",
                    address: exchange,
                })?;
            let verifier = ex.verifier();
            let registry = registries
                .get_mut(&verifier)
                .ok_or(ChainError::UnknownContract {
                    kind: "registry",
                    address: verifier,
                })?;

            let mut host = ChainHost {
                this: exchange,
                registry,
                nfts,
                accounts,
            };
            let call = CallContext::with_value(from, value);
            Ok(f(ex, &call, &mut host)?)
        })
    }
}

/// The network as seen by an executing exchange call.
struct ChainHost<'a> {
    this: Address,
    registry: &'a mut MembershipRegistry,
    nfts: &'a mut HashMap<Address, SimpleNft>,
    accounts: &'a mut HashMap<Address, Account>,
}

impl ChainHost<'_> {
    fn nft(&self, asset: Address) -> Result<&SimpleNft, ExchangeError> {
        self.nfts.get(&asset).ok_or(ExchangeError::UnknownAsset(asset))
    }
}

impl ExchangeHost for ChainHost<'_> {
    fn membership(&mut self) -> &mut dyn GroupMembership {
        &mut *self.registry
    }

    fn nft_owner(&self, asset: Address, token_id: U256) -> Result<Address, ExchangeError> {
        self.nft(asset)?.owner_of(token_id)
    }

    fn nft_is_approved(
        &self,
        asset: Address,
        operator: Address,
        token_id: U256,
    ) -> Result<bool, ExchangeError> {
        self.nft(asset)?.is_approved_or_owner(operator, token_id)
    }

    fn transfer_nft(
        &mut self,
        asset: Address,
        operator: Address,
        from: Address,
        to: Address,
        token_id: U256,
    ) -> Result<(), ExchangeError> {
        self.nfts
            .get_mut(&asset)
            .ok_or(ExchangeError::UnknownAsset(asset))?
            .transfer_from(operator, from, to, token_id)
    }

    fn send_value(&mut self, to: Address, amount: U256) -> Result<(), ExchangeError> {
        let account = self.accounts.entry(self.this).or_default();
        if account.balance < amount {
            return Err(ExchangeError::InsufficientBalance {
                available: account.balance,
                required: amount,
            });
        }
        account.balance -= amount;
        self.accounts.entry(to).or_default().balance += amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use tempfile::tempdir;

    fn ether(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    #[test]
    fn test_dev_accounts_are_funded() {
        let chain = LocalChain::new();
        assert_eq!(chain.dev_accounts().len(), DEV_ACCOUNT_COUNT);
        for account in chain.dev_accounts() {
            assert_eq!(chain.balance(*account), ether(DEV_ACCOUNT_BALANCE_ETH));
        }
        assert_eq!(chain.chain_id(), DEV_CHAIN_ID);
    }

    #[test]
    fn test_transfer_and_insufficient_funds() {
        let mut chain = LocalChain::with_dev_accounts(2, 1);
        let (a, b) = (chain.dev_accounts()[0], chain.dev_accounts()[1]);

        let receipt = chain.transfer(a, b, U256::exp10(17)).unwrap();
        assert_eq!(receipt.block_number, 1);
        assert_eq!(chain.balance(b), ether(1) + U256::exp10(17));
        assert_eq!(chain.nonce(a), 1);

        let err = chain.transfer(a, b, ether(5)).unwrap_err();
        assert!(matches!(err, ChainError::InsufficientFunds { .. }));
        assert_eq!(chain.nonce(a), 1);
        assert_eq!(chain.block_number(), 1);
    }

    #[test]
    fn test_unknown_sender() {
        let mut chain = LocalChain::with_dev_accounts(1, 1);
        let stranger = Address::from_low_u64_be(0x77);
        let receiver = chain.dev_accounts()[0];
        assert!(matches!(
            chain.transfer(stranger, receiver, U256::zero()),
            Err(ChainError::UnknownAccount(_))
        ));
    }

    #[test]
    fn test_deploy_addresses_follow_nonce() {
        let mut chain = LocalChain::new();
        let deployer = chain.dev_accounts()[0];
        let expected = get_contract_address(deployer, 0u64);
        let registry = chain.deploy_registry(deployer).unwrap();
        assert_eq!(registry, expected);

        let nft = chain.deploy_nft(deployer).unwrap();
        assert_eq!(nft, get_contract_address(deployer, 1u64));
        assert!(chain.registry(registry).is_some());
        assert!(chain.nft(nft).is_some());
    }

    #[test]
    fn test_exchange_deploy_needs_registry() {
        let mut chain = LocalChain::new();
        let deployer = chain.dev_accounts()[0];
        let groups = ExchangeGroups::from_base(42).unwrap();
        let missing = Address::from_low_u64_be(0x99);

        let err = chain
            .deploy_exchange(deployer, missing, groups, U256::exp10(17))
            .unwrap_err();
        assert!(matches!(err, ChainError::UnknownContract { kind: "registry", .. }));
        assert_eq!(chain.nonce(deployer), 0);
    }

    #[test]
    fn test_reverted_call_rolls_back() {
        let mut chain = LocalChain::new();
        let deployer = chain.dev_accounts()[0];
        let buyer = chain.dev_accounts()[1];
        let registry = chain.deploy_registry(deployer).unwrap();
        let exchange = chain
            .deploy_exchange(
                deployer,
                registry,
                ExchangeGroups::from_base(1).unwrap(),
                U256::exp10(17),
            )
            .unwrap();
        let before = chain.balance(buyer);

        let err = chain
            .deposit_eth(buyer, exchange, U256::exp10(16), Identity::new().commitment())
            .unwrap_err();
        assert!(matches!(
            err.revert_reason(),
            Some(ExchangeError::WrongDenomination { .. })
        ));
        assert_eq!(chain.balance(buyer), before);
        assert_eq!(chain.balance(exchange), U256::zero());
        assert_eq!(chain.nonce(buyer), 0);

        chain
            .deposit_eth(buyer, exchange, U256::exp10(17), Identity::new().commitment())
            .unwrap();
        assert_eq!(chain.balance(exchange), U256::exp10(17));
        assert_eq!(chain.exchange(exchange).unwrap().available_eth_deposits(), 1);
        assert_eq!(chain.registry(registry).unwrap().group(2).unwrap().len(), 1);
    }

    #[test]
    fn test_nft_listing_through_chain() {
        let mut chain = LocalChain::new();
        let deployer = chain.dev_accounts()[0];
        let seller = chain.dev_accounts()[1];
        let registry = chain.deploy_registry(deployer).unwrap();
        let exchange = chain
            .deploy_exchange(deployer, registry, ExchangeGroups::from_base(1).unwrap(), U256::exp10(17))
            .unwrap();
        let nft = chain.deploy_nft(deployer).unwrap();

        let token_id = chain.mint_nft(seller, nft, seller).unwrap().output;
        let commitment = Identity::new().commitment();
        assert!(chain
            .deposit_nft(seller, exchange, nft, token_id, commitment)
            .is_err());

        chain.approve_nft(seller, nft, exchange, token_id).unwrap();
        let receipt = chain
            .deposit_nft(seller, exchange, nft, token_id, commitment)
            .unwrap();
        assert!(matches!(receipt.output, ExchangeEvent::NftDeposited { .. }));
        assert_eq!(chain.nft(nft).unwrap().owner_of(token_id).unwrap(), exchange);

        chain.withdraw_nft(seller, exchange, nft, token_id).unwrap();
        assert_eq!(chain.nft(nft).unwrap().owner_of(token_id).unwrap(), seller);
    }

    #[test]
    fn test_state_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("network.json");

        let mut chain = LocalChain::new();
        let deployer = chain.dev_accounts()[0];
        let registry = chain.deploy_registry(deployer).unwrap();
        chain
            .deploy_exchange(deployer, registry, ExchangeGroups::from_base(42).unwrap(), U256::exp10(17))
            .unwrap();
        chain.record_deployment("registry", registry);
        chain.save(&path).unwrap();

        let loaded = LocalChain::load(&path).unwrap();
        assert_eq!(loaded.deployment("registry"), Some(registry));
        assert_eq!(loaded.nonce(deployer), 2);
        assert_eq!(
            loaded.registry(registry).unwrap().group(42).map(|g| g.root()),
            chain.registry(registry).unwrap().group(42).map(|g| g.root())
        );

        let fresh = LocalChain::load_or_new(&dir.path().join("missing.json")).unwrap();
        assert_eq!(fresh.block_number(), 0);
    }
}
