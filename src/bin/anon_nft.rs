use anon_nft_exchange::{
    config::{
        resolve_address, Config, DEFAULT_EXCHANGE_ADDRESS, DEFAULT_NFT_ADDRESS,
        EXCHANGE_CONTRACT_ENV, NFT_CONTRACT_ENV,
    },
    deploy::{EXCHANGE_KEY, NFT_KEY},
    ethereum::{format_ether, parse_address, parse_token_id},
    utils::field_to_bytes,
    ChainError, ClaimContext, FullProof, Identity, ListingWatcher, LocalChain, MarketClient,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ethers::types::Address;
use log::{error, info};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "anon-nft.toml")]
    config: PathBuf,

    /// Network state file, overriding the configuration
    #[arg(short, long)]
    state_file: Option<PathBuf>,

    /// Development account index or address acting as the wallet
    #[arg(short, long, default_value = "1")]
    account: String,

    /// Exchange contract address
    #[arg(long, env = EXCHANGE_CONTRACT_ENV)]
    exchange: Option<String>,

    /// NFT contract address
    #[arg(long, env = NFT_CONTRACT_ENV)]
    nft: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List development accounts and balances
    Accounts,
    /// Create a new identity. Keep the printed secret safe
    Identity,
    /// Mint a new NFT to the wallet
    Mint,
    /// Approve and deposit an NFT under an identity commitment
    List {
        token_id: String,
        #[arg(short, long)]
        identity: String,
    },
    /// Deposit one denomination of ETH under an identity commitment
    DepositEth {
        #[arg(short, long)]
        identity: String,
    },
    /// Generate a membership proof and write it to a file
    Prove {
        #[arg(value_enum)]
        context: ContextArg,
        #[arg(short, long)]
        identity: String,
        #[arg(short, long)]
        recipient: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Buy a listed NFT
    Buy {
        token_id: String,
        #[arg(short, long, required_unless_present = "proof")]
        identity: Option<String>,
        /// Submit a proof generated earlier instead of proving now
        #[arg(short, long)]
        proof: Option<PathBuf>,
        #[arg(short, long)]
        recipient: Option<String>,
    },
    /// Claim the ETH of a sold NFT
    ClaimEth {
        #[arg(short, long, required_unless_present = "proof")]
        identity: Option<String>,
        #[arg(short, long)]
        proof: Option<PathBuf>,
        #[arg(short, long)]
        recipient: Option<String>,
    },
    /// Take back an unsold NFT
    WithdrawNft { token_id: String },
    /// Take back an unsold ETH deposit
    WithdrawEth {
        #[arg(short, long, required_unless_present = "proof")]
        identity: Option<String>,
        #[arg(short, long)]
        proof: Option<PathBuf>,
        #[arg(short, long)]
        recipient: Option<String>,
    },
    /// Show the wallet's NFTs and the exchange state
    Status,
    /// Poll the wallet's NFTs at the configured interval
    Watch {
        /// Number of refreshes to print before exiting
        #[arg(long, default_value_t = 3)]
        ticks: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ContextArg {
    Buy,
    Claim,
    Withdraw,
}

impl From<ContextArg> for ClaimContext {
    fn from(arg: ContextArg) -> Self {
        match arg {
            ContextArg::Buy => ClaimContext::BuyNft,
            ContextArg::Claim => ClaimContext::ClaimEth,
            ContextArg::Withdraw => ClaimContext::WithdrawEth,
        }
    }
}

fn resolve_account(chain: &LocalChain, account: &str) -> Result<Address> {
    if let Ok(index) = account.trim().parse::<usize>() {
        return chain.dev_accounts().get(index).copied().with_context(|| {
            format!(
                "Account index {index} out of range (0..{})",
                chain.dev_accounts().len()
            )
        });
    }
    parse_address(account)
}

fn resolve_recipient(recipient: Option<&str>, wallet: Address) -> Result<Address> {
    recipient.map(parse_address).transpose().map(|r| r.unwrap_or(wallet))
}

fn load_identity(exported: &str) -> Result<Identity> {
    Identity::import(exported).context("Failed to load identity")
}

/// Loads a proof file, or proves now with the given identity.
fn obtain_proof(
    client: &MarketClient,
    config: &Config,
    identity: Option<&str>,
    proof_file: Option<&PathBuf>,
    context: ClaimContext,
    recipient: Address,
) -> Result<FullProof> {
    let proof = match (proof_file, identity) {
        (Some(path), _) => {
            info!("Loading proof from: {}", path.display());
            FullProof::load(path, config.proof.max_file_size)?
        }
        (None, Some(exported)) => {
            println!("Generating membership proof (this may take a while)...");
            client.prove(&load_identity(exported)?, context, recipient)?
        }
        (None, None) => {
            return Err(anyhow::anyhow!(
                "Either --identity or --proof is required"
            ))
        }
    };
    proof.validate(config.proof.max_zk_proof_size)?;
    Ok(proof)
}

/// Names the class of a contract revert so the user knows what to change.
fn report_revert(err: &anyhow::Error) {
    let Some(chain_err) = err.downcast_ref::<ChainError>() else {
        return;
    };
    if let Some(kind) = chain_err.failure_kind() {
        error!("Transaction reverted ({kind:?}): {}", kind.hint());
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let result = run(&args);
    if let Err(err) = &result {
        report_revert(err);
    }
    result
}

fn run(args: &Args) -> Result<()> {
    let config = Config::load_from_file_or_default(&args.config);
    let state_file = args
        .state_file
        .clone()
        .unwrap_or_else(|| config.network.state_file.clone());

    let chain = LocalChain::load_or_new(&state_file)
        .with_context(|| format!("Failed to load network state: {}", state_file.display()))?;

    let wallet = resolve_account(&chain, &args.account)?;
    let exchange_override = args
        .exchange
        .clone()
        .or_else(|| config.client.exchange_address.clone());
    let nft_override = args
        .nft
        .clone()
        .or_else(|| config.client.nft_address.clone());
    let exchange = resolve_address(
        exchange_override.as_deref(),
        chain.deployment(EXCHANGE_KEY),
        DEFAULT_EXCHANGE_ADDRESS,
    )
    .context("Invalid exchange address")?;
    let nft = resolve_address(
        nft_override.as_deref(),
        chain.deployment(NFT_KEY),
        DEFAULT_NFT_ADDRESS,
    )
    .context("Invalid NFT address")?;

    let shared = chain.into_shared();
    let client = MarketClient::new(shared.clone(), wallet, exchange, nft);
    let mut dirty = true;

    match &args.command {
        Command::Accounts => {
            dirty = false;
            let chain = shared.read();
            for (index, account) in chain.dev_accounts().iter().enumerate() {
                println!(
                    "{index:>2}  {account:?}  {} ETH",
                    format_ether(chain.balance(*account))
                );
            }
        }
        Command::Identity => {
            dirty = false;
            let identity = Identity::new();
            println!("Identity secret (keep it safe): {}", identity.export());
            println!("Identity commitment:            {}", identity.commitment());
        }
        Command::Mint => {
            let token_id = client.mint()?;
            println!("Minted token {token_id}");
        }
        Command::List { token_id, identity } => {
            let token_id = parse_token_id(token_id)?;
            client.list_nft(token_id, &load_identity(identity)?)?;
            println!("Listed token {token_id}");
        }
        Command::DepositEth { identity } => {
            client.deposit_eth(&load_identity(identity)?)?;
            println!("ETH deposited");
        }
        Command::Prove {
            context,
            identity,
            recipient,
            output,
        } => {
            dirty = false;
            let recipient = resolve_recipient(recipient.as_deref(), wallet)?;
            println!("Generating membership proof (this may take a while)...");
            let proof = client.prove(&load_identity(identity)?, (*context).into(), recipient)?;
            let output = output.clone().unwrap_or_else(|| config.proof.output_file.clone());
            proof.save(&output)?;
            println!("Proof written to: {}", output.display());
            println!(
                "Nullifier hash: 0x{}",
                hex::encode(field_to_bytes(proof.nullifier_hash))
            );
        }
        Command::Buy {
            token_id,
            identity,
            proof,
            recipient,
        } => {
            let token_id = parse_token_id(token_id)?;
            let recipient = resolve_recipient(recipient.as_deref(), wallet)?;
            let proof = obtain_proof(
                &client,
                &config,
                identity.as_deref(),
                proof.as_ref(),
                ClaimContext::BuyNft,
                recipient,
            )?;
            client.submit_buy(token_id, &proof, recipient)?;
            println!("Token {token_id} delivered to {recipient:?}");
        }
        Command::ClaimEth {
            identity,
            proof,
            recipient,
        } => {
            let recipient = resolve_recipient(recipient.as_deref(), wallet)?;
            let proof = obtain_proof(
                &client,
                &config,
                identity.as_deref(),
                proof.as_ref(),
                ClaimContext::ClaimEth,
                recipient,
            )?;
            client.submit_claim(&proof, recipient)?;
            println!("ETH claimed to {recipient:?}");
        }
        Command::WithdrawNft { token_id } => {
            let token_id = parse_token_id(token_id)?;
            client.withdraw_nft(token_id)?;
            println!("Token {token_id} returned");
        }
        Command::WithdrawEth {
            identity,
            proof,
            recipient,
        } => {
            let recipient = resolve_recipient(recipient.as_deref(), wallet)?;
            let proof = obtain_proof(
                &client,
                &config,
                identity.as_deref(),
                proof.as_ref(),
                ClaimContext::WithdrawEth,
                recipient,
            )?;
            client.submit_withdraw_eth(&proof, recipient)?;
            println!("ETH deposit refunded to {recipient:?}");
        }
        Command::Status => {
            dirty = false;
            println!("Wallet:   {wallet:?} ({} ETH)", format_ether(client.balance()));
            println!("Exchange: {exchange:?}");
            println!("NFT:      {nft:?}");
            if let Some(ex) = shared.read().exchange(exchange) {
                println!(
                    "Listings: {}, unsold ETH deposits: {}, pending claims: {}",
                    ex.listings().len(),
                    ex.available_eth_deposits(),
                    ex.pending_claims()
                );
            }
            for info in client.owned_nfts()? {
                let state = if info.is_listed { "listed" } else { "held" };
                println!("  token {:>4}  {state}", info.token_id);
            }
        }
        Command::Watch { ticks } => {
            dirty = false;
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(async {
                let mut watcher = ListingWatcher::spawn(client.clone(), config.client.poll_interval());
                for _ in 0..*ticks {
                    let snapshot = watcher.changed().await?;
                    println!("{}", serde_json::to_string(&snapshot)?);
                }
                watcher.stop().await;
                Ok::<_, anyhow::Error>(())
            })?;
        }
    }

    if dirty {
        shared
            .read()
            .save(&state_file)
            .with_context(|| format!("Failed to save network state: {}", state_file.display()))?;
    }

    Ok(())
}
