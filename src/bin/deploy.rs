use anon_nft_exchange::{
    config::Config,
    deploy::{deploy, DeployArgs},
    ethereum::parse_address,
    LocalChain,
};
use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use log::info;
use std::path::PathBuf;

/// Deploys the membership registry, the exchange and the test NFT contract
/// to the local network.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Existing membership registry to reuse
    #[arg(long)]
    verifier: Option<String>,

    /// Base group id; the ETH group uses the next id
    #[arg(long)]
    group: Option<String>,

    /// Log deployed addresses
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    logs: bool,

    /// Configuration file
    #[arg(short, long, default_value = "anon-nft.toml")]
    config: PathBuf,

    /// Network state file, overriding the configuration
    #[arg(short, long)]
    state_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::load_from_file_or_default(&args.config);
    let state_file = args
        .state_file
        .unwrap_or_else(|| config.network.state_file.clone());

    let verifier = args
        .verifier
        .as_deref()
        .map(parse_address)
        .transpose()
        .context("Invalid --verifier address")?;
    let deploy_args = DeployArgs {
        verifier,
        group: args.group.unwrap_or_else(|| config.exchange.group.clone()),
        logs: args.logs,
    };
    let denomination = config.exchange.denomination()?;

    info!("Loading network state from: {}", state_file.display());
    let mut chain = LocalChain::load_or_new(&state_file)
        .with_context(|| format!("Failed to load network state: {}", state_file.display()))?;

    let deployment = deploy(&mut chain, &deploy_args, denomination)?;

    chain
        .save(&state_file)
        .with_context(|| format!("Failed to save network state: {}", state_file.display()))?;

    println!("Deployer:          {:?}", deployment.deployer);
    println!("Semaphore verifier: {:?}", deployment.verifier);
    println!("AnonNFTEx:         {:?}", deployment.exchange);
    println!("SimpleNFT:         {:?}", deployment.nft);
    println!(
        "Groups:            {} (NFT sold), {} (ETH deposited)",
        deployment.groups.nft_sold, deployment.groups.eth_deposited
    );
    println!("\nExport for the front end:");
    println!("  export ANONNFTEX_CONTRACT_ADDRESS={:?}", deployment.exchange);
    println!("  export NFT_CONTRACT_ADDRESS={:?}", deployment.nft);

    Ok(())
}
