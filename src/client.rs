//! Wallet-side orchestration: listing, buying, claiming and watching.
//!
//! A [`MarketClient`] acts for one wallet against a shared network. Proof
//! generation runs on a snapshot of the group taken under a short read lock,
//! so a slow proof never blocks other clients; if the group changes before
//! submission the registry rejects the stale root and the caller retries.

use crate::chain::SharedChain;
use crate::exchange::{ClaimContext, ExchangeEvent};
use crate::identity::Identity;
use crate::proof::{generate_proof, FullProof};
use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// An NFT the wallet holds or has listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NftInfo {
    pub contract_address: Address,
    pub token_id: U256,
    pub is_listed: bool,
}

#[derive(Clone)]
pub struct MarketClient {
    chain: SharedChain,
    wallet: Address,
    exchange: Address,
    nft: Address,
}

impl MarketClient {
    #[must_use]
    pub fn new(chain: SharedChain, wallet: Address, exchange: Address, nft: Address) -> Self {
        Self {
            chain,
            wallet,
            exchange,
            nft,
        }
    }

    /// Same contracts, different wallet.
    #[must_use]
    pub fn for_wallet(&self, wallet: Address) -> Self {
        Self {
            wallet,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn wallet(&self) -> Address {
        self.wallet
    }

    #[must_use]
    pub fn exchange(&self) -> Address {
        self.exchange
    }

    #[must_use]
    pub fn nft(&self) -> Address {
        self.nft
    }

    #[must_use]
    pub fn balance(&self) -> U256 {
        self.chain.read().balance(self.wallet)
    }

    /// Mints a new token to the wallet.
    pub fn mint(&self) -> Result<U256> {
        let receipt = self
            .chain
            .write()
            .mint_nft(self.wallet, self.nft, self.wallet)
            .context("Failed to mint NFT")?;
        info!("Minted NFT {} to {:?}", receipt.output, self.wallet);
        Ok(receipt.output)
    }

    /// Approves the exchange for `token_id`, then deposits it under the
    /// identity's commitment.
    pub fn list_nft(&self, token_id: U256, identity: &Identity) -> Result<ExchangeEvent> {
        let mut chain = self.chain.write();
        chain
            .approve_nft(self.wallet, self.nft, self.exchange, token_id)
            .with_context(|| format!("Failed to approve the exchange for token {token_id}"))?;
        let receipt = chain
            .deposit_nft(
                self.wallet,
                self.exchange,
                self.nft,
                token_id,
                identity.commitment(),
            )
            .with_context(|| format!("Failed to deposit token {token_id}"))?;
        info!("Listed NFT {token_id}");
        Ok(receipt.output)
    }

    /// Deposits one denomination of ETH under the identity's commitment.
    pub fn deposit_eth(&self, identity: &Identity) -> Result<ExchangeEvent> {
        let mut chain = self.chain.write();
        let denomination = chain
            .exchange(self.exchange)
            .with_context(|| format!("No exchange deployed at {:?}", self.exchange))?
            .denomination();
        let receipt = chain
            .deposit_eth(self.wallet, self.exchange, denomination, identity.commitment())
            .context("Failed to deposit ETH")?;
        info!("Deposited {} wei", denomination);
        Ok(receipt.output)
    }

    /// Proves membership of the group `context` requires, bound to `recipient`.
    pub fn prove(
        &self,
        identity: &Identity,
        context: ClaimContext,
        recipient: Address,
    ) -> Result<FullProof> {
        let (group, groups) = {
            let chain = self.chain.read();
            let exchange = chain
                .exchange(self.exchange)
                .with_context(|| format!("No exchange deployed at {:?}", self.exchange))?;
            let groups = exchange.groups();
            let group = chain
                .registry(exchange.verifier())
                .and_then(|registry| registry.group(context.group(&groups)))
                .cloned()
                .with_context(|| format!("Group {} is not available", context.group(&groups)))?;
            (group, groups)
        };
        debug!(
            "Proving membership of group {} ({} members)",
            group.id(),
            group.len()
        );

        generate_proof(
            identity,
            &group,
            context.external_nullifier(&groups),
            context.signal(recipient),
        )
        .context("Failed to generate membership proof")
    }

    /// Buys `token_id`, delivering it to `recipient`.
    pub fn buy_and_claim_nft(
        &self,
        identity: &Identity,
        token_id: U256,
        recipient: Address,
    ) -> Result<ExchangeEvent> {
        let proof = self.prove(identity, ClaimContext::BuyNft, recipient)?;
        self.submit_buy(token_id, &proof, recipient)
    }

    pub fn submit_buy(
        &self,
        token_id: U256,
        proof: &FullProof,
        recipient: Address,
    ) -> Result<ExchangeEvent> {
        let receipt = self
            .chain
            .write()
            .buy_and_claim_nft(
                self.wallet,
                self.exchange,
                self.nft,
                token_id,
                proof,
                recipient,
            )
            .with_context(|| format!("Failed to buy token {token_id}"))?;
        info!("Bought NFT {token_id} for {recipient:?}");
        Ok(receipt.output)
    }

    /// Claims the ETH of one sold deposit to `recipient`.
    pub fn claim_eth(&self, identity: &Identity, recipient: Address) -> Result<ExchangeEvent> {
        let proof = self.prove(identity, ClaimContext::ClaimEth, recipient)?;
        self.submit_claim(&proof, recipient)
    }

    pub fn submit_claim(&self, proof: &FullProof, recipient: Address) -> Result<ExchangeEvent> {
        let receipt = self
            .chain
            .write()
            .claim_eth(self.wallet, self.exchange, recipient, proof)
            .context("Failed to claim ETH")?;
        info!("Claimed ETH to {recipient:?}");
        Ok(receipt.output)
    }

    pub fn withdraw_nft(&self, token_id: U256) -> Result<ExchangeEvent> {
        let receipt = self
            .chain
            .write()
            .withdraw_nft(self.wallet, self.exchange, self.nft, token_id)
            .with_context(|| format!("Failed to withdraw token {token_id}"))?;
        info!("Withdrew NFT {token_id}");
        Ok(receipt.output)
    }

    /// Withdraws an unsold ETH deposit. Uses up the identity's right to buy.
    pub fn withdraw_eth(&self, identity: &Identity, recipient: Address) -> Result<ExchangeEvent> {
        let proof = self.prove(identity, ClaimContext::WithdrawEth, recipient)?;
        self.submit_withdraw_eth(&proof, recipient)
    }

    pub fn submit_withdraw_eth(
        &self,
        proof: &FullProof,
        recipient: Address,
    ) -> Result<ExchangeEvent> {
        let receipt = self
            .chain
            .write()
            .withdraw_eth(self.wallet, self.exchange, recipient, proof)
            .context("Failed to withdraw ETH")?;
        info!("Withdrew ETH deposit to {recipient:?}");
        Ok(receipt.output)
    }

    /// Tokens the wallet holds plus tokens it has listed, by token id.
    pub fn owned_nfts(&self) -> Result<Vec<NftInfo>> {
        let chain = self.chain.read();
        let nft = chain
            .nft(self.nft)
            .with_context(|| format!("No NFT contract deployed at {:?}", self.nft))?;

        let mut owned: Vec<NftInfo> = nft
            .tokens_of(self.wallet)
            .into_iter()
            .map(|token_id| NftInfo {
                contract_address: self.nft,
                token_id,
                is_listed: false,
            })
            .collect();

        if let Some(exchange) = chain.exchange(self.exchange) {
            owned.extend(
                exchange
                    .listings()
                    .into_iter()
                    .filter(|(asset, _, deposit)| *asset == self.nft && deposit.seller == self.wallet)
                    .map(|(asset, token_id, _)| NftInfo {
                        contract_address: asset,
                        token_id,
                        is_listed: true,
                    }),
            );
        }
        owned.sort_by_key(|info| info.token_id);
        Ok(owned)
    }
}

/// Background task that re-reads the wallet's NFTs on a fixed interval.
///
/// Must be spawned inside a tokio runtime. The task ends when the watcher is
/// stopped or dropped.
pub struct ListingWatcher {
    snapshots: watch::Receiver<Vec<NftInfo>>,
    cancel_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ListingWatcher {
    pub fn spawn(client: MarketClient, period: Duration) -> Self {
        let (snapshot_tx, snapshots) = watch::channel(Vec::new());
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match client.owned_nfts() {
                            Ok(nfts) => {
                                if snapshot_tx.send(nfts).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Failed to refresh NFTs: {e:#}"),
                        }
                    }
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Listing watcher for {:?} stopped", client.wallet());
        });

        Self {
            snapshots,
            cancel_tx,
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn latest(&self) -> Vec<NftInfo> {
        self.snapshots.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<NftInfo>> {
        self.snapshots.clone()
    }

    /// Waits for the next refresh and returns it.
    pub async fn changed(&mut self) -> Result<Vec<NftInfo>> {
        self.snapshots
            .changed()
            .await
            .context("Listing watcher stopped")?;
        Ok(self.snapshots.borrow_and_update().clone())
    }

    /// Stops the task and waits for it to finish.
    pub async fn stop(mut self) {
        let _ = self.cancel_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ListingWatcher {
    fn drop(&mut self) {
        let _ = self.cancel_tx.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::LocalChain;
    use crate::deploy::{deploy, DeployArgs};

    fn setup() -> (MarketClient, LocalChain) {
        let mut chain = LocalChain::new();
        let deployment = deploy(&mut chain, &DeployArgs::default(), U256::exp10(17)).unwrap();
        let wallet = chain.dev_accounts()[1];
        let shared = chain.clone().into_shared();
        (
            MarketClient::new(shared, wallet, deployment.exchange, deployment.nft),
            chain,
        )
    }

    #[test]
    fn test_mint_and_list() {
        let (client, _) = setup();
        let identity = Identity::new();
        let first = client.mint().unwrap();
        let second = client.mint().unwrap();

        client.list_nft(second, &identity).unwrap();
        let owned = client.owned_nfts().unwrap();
        assert_eq!(
            owned,
            vec![
                NftInfo {
                    contract_address: client.nft(),
                    token_id: first,
                    is_listed: false
                },
                NftInfo {
                    contract_address: client.nft(),
                    token_id: second,
                    is_listed: true
                },
            ]
        );

        client.withdraw_nft(second).unwrap();
        assert!(client.owned_nfts().unwrap().iter().all(|info| !info.is_listed));
    }

    #[test]
    fn test_other_wallets_see_only_their_tokens() {
        let (client, chain) = setup();
        client.mint().unwrap();
        let other = client.for_wallet(chain.dev_accounts()[2]);
        assert!(other.owned_nfts().unwrap().is_empty());
        assert!(other.list_nft(U256::one(), &Identity::new()).is_err());
    }

    #[test]
    fn test_deposit_eth_uses_denomination() {
        let (client, _) = setup();
        let before = client.balance();
        client.deposit_eth(&Identity::new()).unwrap();
        assert_eq!(before - client.balance(), U256::exp10(17));
        assert!(client.deposit_eth(&Identity::new()).is_err());
    }

    #[test]
    fn test_prove_fails_for_non_member() {
        let (client, _) = setup();
        let err = client
            .prove(&Identity::new(), ClaimContext::ClaimEth, client.wallet())
            .unwrap_err();
        assert!(err.to_string().contains("Failed to generate membership proof"));
    }

    #[tokio::test]
    async fn test_watcher_publishes_snapshots() {
        let (client, _) = setup();
        let mut watcher = ListingWatcher::spawn(client.clone(), Duration::from_millis(20));

        let initial = watcher.changed().await.unwrap();
        assert!(initial.is_empty());

        client.mint().unwrap();
        let refreshed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = watcher.changed().await.unwrap();
                if !snapshot.is_empty() {
                    return snapshot;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(refreshed.len(), 1);
        assert_eq!(watcher.latest(), refreshed);

        watcher.stop().await;
    }
}
