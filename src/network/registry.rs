//! Network lookup and breaker-wrapped chain operations

use super::{ChainClient, FeeEstimate, TransactionInfo, TransactionSigner, TxKind};
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::types::{Asset, NetworkConfig, NetworkKind, TokenConfig};
use crate::{Result, X402Error};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default per-call timeout for chain operations
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Breaker state of one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHealth {
    pub network: String,
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
}

impl NetworkHealth {
    /// Whether calls are currently admitted
    pub fn is_healthy(&self) -> bool {
        self.state == CircuitState::Closed
    }
}

/// Registry of chain clients keyed by network id
///
/// Every chain call goes through the breaker named after its network, so an
/// outage on one chain fails fast without touching the others.
#[derive(Clone)]
pub struct NetworkRegistry {
    clients: HashMap<String, Arc<dyn ChainClient>>,
    breaker: Arc<CircuitBreaker>,
    call_timeout: Duration,
}

impl std::fmt::Debug for NetworkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkRegistry")
            .field("networks", &self.networks())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self::new(Arc::new(CircuitBreaker::default()))
    }
}

impl NetworkRegistry {
    /// Create an empty registry sharing `breaker`
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            clients: HashMap::new(),
            breaker,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Set the per-call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Add a client, keyed by its network id
    pub fn with_client(mut self, client: Arc<dyn ChainClient>) -> Self {
        self.register(client);
        self
    }

    /// Add or replace a client
    pub fn register(&mut self, client: Arc<dyn ChainClient>) {
        let id = client.config().id.clone();
        tracing::debug!(network = %id, "network registered");
        self.clients.insert(id, client);
    }

    /// Client for `network`
    pub fn get(&self, network: &str) -> Result<&Arc<dyn ChainClient>> {
        self.clients
            .get(network)
            .ok_or_else(|| X402Error::validation(format!("Unsupported network: {}", network)))
    }

    /// Static config for `network`
    pub fn config(&self, network: &str) -> Result<&NetworkConfig> {
        self.get(network).map(|client| client.config())
    }

    /// Registered network ids, sorted
    pub fn networks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether `currency` can be paid on `network`
    pub fn supports(&self, network: &str, currency: &str) -> bool {
        self.config(network)
            .map(|config| config.supports_currency(currency))
            .unwrap_or(false)
    }

    /// Shared breaker
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Per-call timeout
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Balance of `currency` held by `address`
    pub async fn get_balance(&self, address: &str, currency: &str, network: &str) -> Result<Decimal> {
        let client = self.get(network)?;
        let asset = client.config().asset(currency)?;

        self.breaker
            .call(network, Some(self.call_timeout), async {
                match &asset {
                    Asset::Native { .. } => client.native_balance(address).await,
                    Asset::Token(token) => client.token_balance(token, address).await,
                }
            })
            .await
    }

    /// Fee quote in the network's native currency
    pub async fn estimate_fee(&self, network: &str, kind: TxKind) -> Result<FeeEstimate> {
        let client = self.get(network)?;
        self.breaker
            .call(network, Some(self.call_timeout), client.estimate_fee(kind))
            .await
    }

    /// Transfer `amount` of `currency` from the signer's account to `to`
    ///
    /// `from` must be the signer's address. The payer's balance is checked
    /// first; a shortfall is `InsufficientFunds` and nothing is submitted.
    pub async fn send_payment(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
        currency: &str,
        network: &str,
        signer: &dyn TransactionSigner,
    ) -> Result<String> {
        let client = self.get(network)?;
        let config = client.config();
        let asset = config.asset(currency)?;
        ensure_signer_owns(signer, config, from)?;

        let balance = self.get_balance(from, currency, network).await?;
        if balance < amount {
            return Err(X402Error::insufficient_funds(format!(
                "{} holds {} {} on {}, needs {}",
                from, balance, currency, network, amount
            )));
        }

        self.breaker
            .call(network, Some(self.call_timeout), async {
                match &asset {
                    Asset::Native { .. } => client.send_native(signer, to, amount).await,
                    Asset::Token(token) => client.send_token(signer, token, to, amount).await,
                }
            })
            .await
    }

    /// Pay `payee` and `fee_wallet` in one split-contract call
    #[allow(clippy::too_many_arguments)]
    pub async fn split_token_payment(
        &self,
        from: &str,
        network: &str,
        token: &TokenConfig,
        split_contract: &str,
        payee: &str,
        net_amount: Decimal,
        fee_wallet: &str,
        fee_amount: Decimal,
        signer: &dyn TransactionSigner,
    ) -> Result<String> {
        let client = self.get(network)?;
        ensure_signer_owns(signer, client.config(), from)?;

        let total = net_amount + fee_amount;
        let balance = self.get_balance(from, &token.symbol, network).await?;
        if balance < total {
            return Err(X402Error::insufficient_funds(format!(
                "{} holds {} {} on {}, needs {}",
                from, balance, token.symbol, network, total
            )));
        }

        self.breaker
            .call(
                network,
                Some(self.call_timeout),
                client.split_token(
                    signer,
                    token,
                    split_contract,
                    payee,
                    net_amount,
                    fee_wallet,
                    fee_amount,
                ),
            )
            .await
    }

    /// On-chain state of `tx_hash`, bounded by `timeout` (or the default)
    pub async fn get_transaction_status(
        &self,
        tx_hash: &str,
        network: &str,
        timeout: Option<Duration>,
    ) -> Result<TransactionInfo> {
        let client = self.get(network)?;
        self.breaker
            .call(
                network,
                Some(timeout.unwrap_or(self.call_timeout)),
                client.transaction(tx_hash),
            )
            .await
    }

    /// Breaker state of every registered network
    pub fn health(&self) -> Vec<NetworkHealth> {
        self.networks()
            .into_iter()
            .filter_map(|id| {
                let client = self.clients.get(&id)?;
                let record = self.breaker.snapshot(&id);
                Some(NetworkHealth {
                    name: client.config().name.clone(),
                    network: id,
                    state: record.state,
                    failure_count: record.failure_count,
                })
            })
            .collect()
    }
}

fn ensure_signer_owns(
    signer: &dyn TransactionSigner,
    config: &NetworkConfig,
    from: &str,
) -> Result<()> {
    let signer_address = signer.address(config.kind)?;
    // Hex addresses are case-insensitive; base58 keys are not
    let owns = match config.kind {
        NetworkKind::Evm => signer_address.eq_ignore_ascii_case(from),
        NetworkKind::Solana => signer_address == from,
    };
    if !owns {
        return Err(X402Error::validation(format!(
            "Signer controls {}, not {}",
            signer_address, from
        )));
    }
    Ok(())
}
