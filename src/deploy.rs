//! Deployment of the registry, the exchange and the test NFT contract.

use crate::chain::LocalChain;
use crate::exchange::ExchangeGroups;
use crate::group::GroupId;
use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use log::info;

/// Deployment-name keys recorded in the network state.
pub const REGISTRY_KEY: &str = "registry";
pub const EXCHANGE_KEY: &str = "exchange";
pub const NFT_KEY: &str = "nft";

/// Base group id used when none is given.
pub const DEFAULT_GROUP: &str = "42";

#[derive(Debug, Clone)]
pub struct DeployArgs {
    /// Reuse an existing registry instead of deploying one.
    pub verifier: Option<Address>,
    /// Base group id, as a decimal string.
    pub group: String,
    /// Log deployed addresses.
    pub logs: bool,
}

impl Default for DeployArgs {
    fn default() -> Self {
        Self {
            verifier: None,
            group: DEFAULT_GROUP.to_string(),
            logs: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deployment {
    pub deployer: Address,
    pub verifier: Address,
    pub exchange: Address,
    pub nft: Address,
    pub groups: ExchangeGroups,
}

/// Deploys the exchange stack from the first development account.
///
/// A registry is deployed only when `args.verifier` is `None`; a given
/// verifier must already exist on the network. The addresses are recorded
/// in the network state so later runs can find them.
///
/// # Errors
///
/// Fails if the group id is not a number, if the given verifier is not a
/// registry, if either exchange group already exists in the registry, or if
/// the network has no development accounts.
pub fn deploy(chain: &mut LocalChain, args: &DeployArgs, denomination: U256) -> Result<Deployment> {
    let base: GroupId = args
        .group
        .trim()
        .parse()
        .with_context(|| format!("Invalid group id '{}'", args.group))?;
    let groups = ExchangeGroups::from_base(base)
        .with_context(|| format!("Group id {base} leaves no room for the ETH group"))?;
    let deployer = *chain
        .dev_accounts()
        .first()
        .context("The network has no development accounts")?;

    let verifier = match args.verifier {
        Some(address) => {
            if chain.registry(address).is_none() {
                return Err(anyhow::anyhow!(
                    "No membership registry is deployed at {address:?}"
                ));
            }
            address
        }
        None => chain
            .deploy_registry(deployer)
            .context("Failed to deploy the membership registry")?,
    };
    if args.logs {
        info!("Semaphore verifier: {verifier:?}");
    }

    let exchange = chain
        .deploy_exchange(deployer, verifier, groups, denomination)
        .context("Failed to deploy the exchange")?;
    if args.logs {
        info!(
            "AnonNFTEx: {exchange:?} (groups {} and {})",
            groups.nft_sold, groups.eth_deposited
        );
    }

    let nft = chain
        .deploy_nft(deployer)
        .context("Failed to deploy the NFT contract")?;
    if args.logs {
        info!("SimpleNFT: {nft:?}");
    }

    chain.record_deployment(REGISTRY_KEY, verifier);
    chain.record_deployment(EXCHANGE_KEY, exchange);
    chain.record_deployment(NFT_KEY, nft);

    Ok(Deployment {
        deployer,
        verifier,
        exchange,
        nft,
        groups,
    })
}
