//! Network configuration types

use super::constants::{currencies, networks};
use crate::{Result, X402Error};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Family of chain a network belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    /// EVM-style chain (gas price x gas limit fee market)
    Evm,
    /// Solana (deterministic per-signature fee)
    Solana,
}

/// Fungible token deployed on a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Currency code (e.g. "USDC")
    pub symbol: String,
    /// Contract address
    pub contract: String,
    /// Token decimals
    pub decimals: u32,
}

/// Resolved asset for a (currency, network) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Asset {
    /// The chain's native currency
    Native { symbol: String, decimals: u32 },
    /// A fungible token contract
    Token(TokenConfig),
}

impl Asset {
    /// Decimals of the on-chain unit
    pub fn decimals(&self) -> u32 {
        match self {
            Asset::Native { decimals, .. } => *decimals,
            Asset::Token(token) => token.decimals,
        }
    }

    /// Whether this is the chain's native asset
    pub fn is_native(&self) -> bool {
        matches!(self, Asset::Native { .. })
    }
}

/// Network configuration with chain-specific details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network identifier (e.g. "polygon")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Chain family
    pub kind: NetworkKind,
    /// EIP-155 chain ID (EVM only)
    pub chain_id: Option<u64>,
    /// Native currency code
    pub native_currency: String,
    /// Native currency decimals
    pub native_decimals: u32,
    /// Approximate block time
    pub block_time: Duration,
    /// Known token contracts
    pub tokens: Vec<TokenConfig>,
}

impl NetworkConfig {
    fn evm(
        id: &str,
        name: &str,
        chain_id: u64,
        native_currency: &str,
        block_time: Duration,
    ) -> Self {
        let tokens = [currencies::USDC, currencies::USDT]
            .into_iter()
            .filter_map(|symbol| {
                currencies::get_token_address(id, symbol).map(|contract| TokenConfig {
                    symbol: symbol.to_string(),
                    contract: contract.to_string(),
                    decimals: 6,
                })
            })
            .collect();

        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind: NetworkKind::Evm,
            chain_id: Some(chain_id),
            native_currency: native_currency.to_string(),
            native_decimals: 18,
            block_time,
            tokens,
        }
    }

    /// Ethereum mainnet configuration
    pub fn ethereum() -> Self {
        Self::evm(
            networks::ETHEREUM,
            "Ethereum Mainnet",
            1,
            currencies::ETH,
            Duration::from_secs(12),
        )
    }

    /// Polygon mainnet configuration
    pub fn polygon() -> Self {
        Self::evm(
            networks::POLYGON,
            "Polygon Mainnet",
            137,
            currencies::MATIC,
            Duration::from_secs(2),
        )
    }

    /// Arbitrum One configuration
    pub fn arbitrum() -> Self {
        Self::evm(
            networks::ARBITRUM,
            "Arbitrum One",
            42161,
            currencies::ETH,
            Duration::from_secs(1),
        )
    }

    /// Solana mainnet configuration
    pub fn solana() -> Self {
        Self {
            id: networks::SOLANA.to_string(),
            name: "Solana Mainnet".to_string(),
            kind: NetworkKind::Solana,
            chain_id: None,
            native_currency: currencies::SOL.to_string(),
            native_decimals: 9,
            block_time: Duration::from_millis(400),
            tokens: Vec::new(),
        }
    }

    /// Get network config by name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            networks::ETHEREUM => Some(Self::ethereum()),
            networks::POLYGON => Some(Self::polygon()),
            networks::ARBITRUM => Some(Self::arbitrum()),
            networks::SOLANA => Some(Self::solana()),
            _ => None,
        }
    }

    /// Whether the currency is the native asset or a known token here
    pub fn supports_currency(&self, currency: &str) -> bool {
        self.native_currency == currency || self.tokens.iter().any(|t| t.symbol == currency)
    }

    /// Resolve a currency code to its on-chain asset
    ///
    /// An unknown token is a configuration error, never a runtime fallback.
    pub fn asset(&self, currency: &str) -> Result<Asset> {
        if currency == self.native_currency {
            return Ok(Asset::Native {
                symbol: self.native_currency.clone(),
                decimals: self.native_decimals,
            });
        }

        self.tokens
            .iter()
            .find(|t| t.symbol == currency)
            .cloned()
            .map(Asset::Token)
            .ok_or_else(|| {
                X402Error::config(format!(
                    "No token contract configured for {} on {}",
                    currency, self.id
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_networks() {
        let polygon = NetworkConfig::polygon();
        assert_eq!(polygon.chain_id, Some(137));
        assert_eq!(polygon.native_currency, "MATIC");
        assert_eq!(polygon.block_time, Duration::from_secs(2));

        let solana = NetworkConfig::from_name("solana").unwrap();
        assert_eq!(solana.kind, NetworkKind::Solana);
        assert_eq!(solana.native_decimals, 9);

        assert!(NetworkConfig::from_name("base").is_none());
    }

    #[test]
    fn test_asset_resolution() {
        let polygon = NetworkConfig::polygon();

        let native = polygon.asset("MATIC").unwrap();
        assert!(native.is_native());
        assert_eq!(native.decimals(), 18);

        match polygon.asset("USDC").unwrap() {
            Asset::Token(token) => {
                assert_eq!(token.contract, "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174");
                assert_eq!(token.decimals, 6);
            }
            other => panic!("expected token asset, got {:?}", other),
        }

        let unknown = polygon.asset("DAI");
        assert!(matches!(unknown, Err(X402Error::Config(_))));
        assert!(NetworkConfig::solana().asset("USDC").is_err());
    }
}
