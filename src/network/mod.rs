//! Multi-chain network access
//!
//! One [`ChainClient`] per supported network, all reached through the
//! [`NetworkRegistry`], which puts every call behind that network's circuit
//! breaker.
//!
//! # Architecture
//!
//! - [`ChainClient`] - uniform balance / fee / send / status operations
//! - [`EvmRpcClient`] - Ethereum-style chains over JSON-RPC
//! - [`SolanaRpcClient`] - Solana over JSON-RPC
//! - [`TransactionSigner`] - opaque signing capability ([`LocalSigner`] for development)
//! - [`NetworkRegistry`] - lookup by network id, breaker wrapping, health

use crate::types::{NetworkConfig, TokenConfig};
use crate::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod evm;
pub mod registry;
pub mod rpc;
pub mod signer;
pub mod solana;
pub mod units;

#[cfg(test)]
pub(crate) mod mock;

pub use evm::EvmRpcClient;
pub use registry::{NetworkHealth, NetworkRegistry};
pub use signer::{LocalSigner, RecoverableSignature, TransactionSigner};
pub use solana::SolanaRpcClient;

/// Kind of transaction a fee estimate is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    /// Native currency transfer
    Transfer,
    /// Fungible token transfer
    TokenTransfer,
    /// Contract interaction (e.g. a fee split)
    ContractCall,
}

impl TxKind {
    /// Gas limit used for EVM transactions of this kind
    pub fn evm_gas_limit(&self) -> u64 {
        match self {
            TxKind::Transfer => 21_000,
            TxKind::TokenTransfer => 65_000,
            TxKind::ContractCall => 100_000,
        }
    }
}

/// Fee quote in the network's native currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub network: String,
    pub kind: TxKind,
    /// Native currency the fee is paid in
    pub currency: String,
    /// Gas price in wei (EVM only)
    pub gas_price: Option<u128>,
    /// Gas limit (EVM only)
    pub gas_limit: Option<u64>,
    pub estimated_fee: Decimal,
}

/// On-chain state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    /// Unknown to the node
    NotFound,
    /// Seen but not yet mined
    Pending,
    /// Mined and succeeded
    Confirmed,
    /// Mined and reverted
    Failed,
}

/// What the chain says about a transaction
///
/// `from`, `to`, `amount` and `currency` describe the value transfer the
/// transaction performs: for a token transfer `to` is the token recipient,
/// not the contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub hash: String,
    pub network: String,
    pub state: TxState,
    pub block_number: Option<u64>,
    pub confirmations: u64,
    pub from: Option<String>,
    pub to: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
}

impl TransactionInfo {
    pub(crate) fn not_found(hash: &str, network: &str) -> Self {
        Self {
            hash: hash.to_string(),
            network: network.to_string(),
            state: TxState::NotFound,
            block_number: None,
            confirmations: 0,
            from: None,
            to: None,
            amount: None,
            currency: None,
        }
    }
}

/// Client for one blockchain network
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Static description of the network
    fn config(&self) -> &NetworkConfig;

    /// Balance of the native currency
    async fn native_balance(&self, address: &str) -> Result<Decimal>;

    /// Balance of a fungible token
    async fn token_balance(&self, token: &TokenConfig, address: &str) -> Result<Decimal>;

    /// Current fee quote for a transaction kind
    async fn estimate_fee(&self, kind: TxKind) -> Result<FeeEstimate>;

    /// Transfer native currency; returns the transaction hash
    async fn send_native(
        &self,
        signer: &dyn TransactionSigner,
        to: &str,
        amount: Decimal,
    ) -> Result<String>;

    /// Transfer a fungible token; returns the transaction hash
    async fn send_token(
        &self,
        signer: &dyn TransactionSigner,
        token: &TokenConfig,
        to: &str,
        amount: Decimal,
    ) -> Result<String>;

    /// Pay `payee` and `fee_wallet` in one call to a split contract
    ///
    /// Both legs commit or neither does. Returns the transaction hash.
    #[allow(clippy::too_many_arguments)]
    async fn split_token(
        &self,
        signer: &dyn TransactionSigner,
        token: &TokenConfig,
        split_contract: &str,
        payee: &str,
        net_amount: Decimal,
        fee_wallet: &str,
        fee_amount: Decimal,
    ) -> Result<String>;

    /// Look up a transaction
    async fn transaction(&self, hash: &str) -> Result<TransactionInfo>;
}
