//! Minimal ERC-721 style asset contract used by tests and the demo front end.
//!
//! Token ids start at 1 and increase by one per mint. Anyone may mint.

use crate::error::ExchangeError;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::collections::{BTreeSet, HashMap};

pub const DEFAULT_NAME: &str = "SimpleNFT";
pub const DEFAULT_SYMBOL: &str = "SNFT";

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimpleNft {
    address: Address,
    name: String,
    symbol: String,
    total_minted: U256,
    #[serde_as(as = "Vec<(_, _)>")]
    owners: HashMap<U256, Address>,
    #[serde_as(as = "Vec<(_, _)>")]
    balances: HashMap<Address, U256>,
    #[serde_as(as = "Vec<(_, _)>")]
    token_approvals: HashMap<U256, Address>,
    /// (owner, operator) pairs.
    operator_approvals: BTreeSet<(Address, Address)>,
}

impl SimpleNft {
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self {
            address,
            name: DEFAULT_NAME.to_string(),
            symbol: DEFAULT_SYMBOL.to_string(),
            total_minted: U256::zero(),
            owners: HashMap::new(),
            balances: HashMap::new(),
            token_approvals: HashMap::new(),
            operator_approvals: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[must_use]
    pub fn total_minted(&self) -> U256 {
        self.total_minted
    }

    /// Mints the next token to `to` and returns its id.
    pub fn mint_nft(&mut self, to: Address) -> Result<U256, ExchangeError> {
        if to.is_zero() {
            return Err(ExchangeError::ZeroRecipient);
        }
        self.total_minted += U256::one();
        let token_id = self.total_minted;
        self.owners.insert(token_id, to);
        *self.balances.entry(to).or_default() += U256::one();
        Ok(token_id)
    }

    pub fn owner_of(&self, token_id: U256) -> Result<Address, ExchangeError> {
        self.owners
            .get(&token_id)
            .copied()
            .ok_or(ExchangeError::UnknownToken {
                asset: self.address,
                token_id,
            })
    }

    #[must_use]
    pub fn balance_of(&self, owner: Address) -> U256 {
        self.balances.get(&owner).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn get_approved(&self, token_id: U256) -> Option<Address> {
        self.token_approvals.get(&token_id).copied()
    }

    #[must_use]
    pub fn is_approved_for_all(&self, owner: Address, operator: Address) -> bool {
        self.operator_approvals.contains(&(owner, operator))
    }

    /// Whether `spender` may move `token_id`.
    pub fn is_approved_or_owner(&self, spender: Address, token_id: U256) -> Result<bool, ExchangeError> {
        let owner = self.owner_of(token_id)?;
        Ok(spender == owner
            || self.get_approved(token_id) == Some(spender)
            || self.is_approved_for_all(owner, spender))
    }

    pub fn approve(
        &mut self,
        caller: Address,
        spender: Address,
        token_id: U256,
    ) -> Result<(), ExchangeError> {
        let owner = self.owner_of(token_id)?;
        if caller != owner && !self.is_approved_for_all(owner, caller) {
            return Err(ExchangeError::NotTokenOwner {
                asset: self.address,
                token_id,
                caller,
            });
        }
        self.token_approvals.insert(token_id, spender);
        Ok(())
    }

    pub fn set_approval_for_all(&mut self, caller: Address, operator: Address, approved: bool) {
        if approved {
            self.operator_approvals.insert((caller, operator));
        } else {
            self.operator_approvals.remove(&(caller, operator));
        }
    }

    /// Moves `token_id` from `from` to `to` on behalf of `caller`.
    pub fn transfer_from(
        &mut self,
        caller: Address,
        from: Address,
        to: Address,
        token_id: U256,
    ) -> Result<(), ExchangeError> {
        let owner = self.owner_of(token_id)?;
        if owner != from {
            return Err(ExchangeError::NotTokenOwner {
                asset: self.address,
                token_id,
                caller: from,
            });
        }
        if !self.is_approved_or_owner(caller, token_id)? {
            return Err(ExchangeError::NotApproved {
                asset: self.address,
                token_id,
            });
        }
        if to.is_zero() {
            return Err(ExchangeError::ZeroRecipient);
        }

        self.token_approvals.remove(&token_id);
        if let Some(balance) = self.balances.get_mut(&from) {
            *balance = balance.saturating_sub(U256::one());
        }
        *self.balances.entry(to).or_default() += U256::one();
        self.owners.insert(token_id, to);
        Ok(())
    }

    /// Token ids held by `owner`, ascending.
    #[must_use]
    pub fn tokens_of(&self, owner: Address) -> Vec<U256> {
        let mut tokens: Vec<U256> = self
            .owners
            .iter()
            .filter(|(_, holder)| **holder == owner)
            .map(|(token_id, _)| *token_id)
            .collect();
        tokens.sort();
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn test_mint_assigns_sequential_ids() {
        let mut nft = SimpleNft::new(account(100));
        assert_eq!(nft.mint_nft(account(1)).unwrap(), U256::from(1));
        assert_eq!(nft.mint_nft(account(2)).unwrap(), U256::from(2));
        assert_eq!(nft.owner_of(U256::from(2)).unwrap(), account(2));
        assert_eq!(nft.balance_of(account(1)), U256::one());
        assert_eq!(nft.total_minted(), U256::from(2));
    }

    #[test]
    fn test_transfer_requires_approval() {
        let mut nft = SimpleNft::new(account(100));
        let token = nft.mint_nft(account(1)).unwrap();
        let operator = account(9);

        assert_eq!(
            nft.transfer_from(operator, account(1), operator, token),
            Err(ExchangeError::NotApproved {
                asset: account(100),
                token_id: token
            })
        );

        nft.approve(account(1), operator, token).unwrap();
        nft.transfer_from(operator, account(1), operator, token)
            .unwrap();
        assert_eq!(nft.owner_of(token).unwrap(), operator);
        assert_eq!(nft.get_approved(token), None);
        assert_eq!(nft.balance_of(account(1)), U256::zero());
    }

    #[test]
    fn test_operator_approval() {
        let mut nft = SimpleNft::new(account(100));
        let token = nft.mint_nft(account(1)).unwrap();
        nft.set_approval_for_all(account(1), account(7), true);
        assert!(nft.is_approved_or_owner(account(7), token).unwrap());
        nft.set_approval_for_all(account(1), account(7), false);
        assert!(!nft.is_approved_or_owner(account(7), token).unwrap());
    }

    #[test]
    fn test_only_owner_approves() {
        let mut nft = SimpleNft::new(account(100));
        let token = nft.mint_nft(account(1)).unwrap();
        assert!(matches!(
            nft.approve(account(2), account(2), token),
            Err(ExchangeError::NotTokenOwner { .. })
        ));
    }

    #[test]
    fn test_unknown_token() {
        let nft = SimpleNft::new(account(100));
        assert!(matches!(
            nft.owner_of(U256::from(5)),
            Err(ExchangeError::UnknownToken { .. })
        ));
    }

    #[test]
    fn test_tokens_of() {
        let mut nft = SimpleNft::new(account(100));
        nft.mint_nft(account(1)).unwrap();
        nft.mint_nft(account(2)).unwrap();
        nft.mint_nft(account(1)).unwrap();
        assert_eq!(nft.tokens_of(account(1)), vec![U256::from(1), U256::from(3)]);
    }
}
