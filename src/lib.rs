//! Anonymous NFT Exchange
//!
//! A peer-to-peer marketplace where sellers escrow NFTs and buyers escrow a
//! fixed amount of ETH, each tagging the deposit with an identity
//! commitment. Claims are authorized by zero-knowledge proofs of group
//! membership, so no on-ledger record links a seller to a buyer.
//!
//! # Components
//!
//! - [`AnonNftEx`]: escrow ledger for NFT and ETH deposits
//! - [`MembershipRegistry`]: groups of commitments, proof verification and nullifiers
//! - [`MembershipCircuit`]: halo2 circuit behind every membership proof
//! - [`SimpleNft`]: minimal ERC-721 style asset used for testing and demos
//! - [`LocalChain`]: in-process network that executes calls atomically
//! - [`MarketClient`]: wallet-side orchestration of listing, buying and claiming
//!
//! # Example
//!
//! ```no_run
//! use anon_nft_exchange::{deploy::{deploy, DeployArgs}, LocalChain};
//! use ethers::utils::parse_ether;
//!
//! let mut chain = LocalChain::new();
//! let deployment = deploy(&mut chain, &DeployArgs::default(), parse_ether("0.1").unwrap()).unwrap();
//! println!("exchange at {:?}", deployment.exchange);
//! ```

pub mod chain;
pub mod circuit;
pub mod client;
pub mod config;
pub mod deploy;
pub mod error;
pub mod ethereum;
pub mod exchange;
pub mod group;
pub mod identity;
pub mod nft;
pub mod proof;
pub mod registry;
pub mod utils;

#[cfg(test)]
mod group_tests;

pub use chain::{LocalChain, Receipt};
pub use circuit::{MembershipCircuit, MembershipKeys};
pub use client::{ListingWatcher, MarketClient, NftInfo};
pub use error::{ChainError, ExchangeError, MembershipError};
pub use exchange::{AnonNftEx, ClaimContext, ExchangeEvent, ExchangeGroups};
pub use group::{Group, GroupId, MerkleProof};
pub use identity::{Commitment, Identity};
pub use nft::SimpleNft;
pub use proof::FullProof;
pub use registry::{GroupMembership, MembershipRegistry};
pub use utils::{bytes_to_field, field_to_bytes, poseidon_hash};

/// Circuit parameter for the halo2 proving system.
///
/// `k = 11` gives 2^11 = 2048 rows, enough for the 23 Poseidon permutations
/// and 20 path-swap rows of a depth-20 membership proof.
///
/// Changing `CIRCUIT_K` requires regenerating all proving and verifying keys.
/// Prover and verifier must use the same value, or verification will fail.
pub const CIRCUIT_K: u32 = 11;

/// Depth of every group's Merkle tree, fixed by the circuit.
///
/// A group holds up to 2^20 members.
pub const GROUP_DEPTH: usize = 20;
