//! Environment-driven settings
//!
//! Every component has its own typed config with `Default` and `validate()`;
//! [`Settings`] fills them from environment variables so a deployment can be
//! configured without code. Unset variables keep the defaults.
//!
//! ```no_run
//! use std::sync::Arc;
//! use x402_settlement::circuit_breaker::CircuitBreaker;
//! use x402_settlement::config::Settings;
//!
//! # async fn example() -> x402_settlement::Result<()> {
//! let settings = Settings::from_env()?;
//! let breaker = Arc::new(CircuitBreaker::new(settings.circuit_breaker));
//! let registry = settings.network_registry(breaker)?;
//! let limiter = settings.rate_limiter().await?;
//! # Ok(())
//! # }
//! ```

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::fees::FeeConfig;
use crate::network::evm::EvmRpcClient;
use crate::network::solana::SolanaRpcClient;
use crate::network::NetworkRegistry;
use crate::rate_limit::{RateLimitAlgorithm, RateLimitConfig, RateLimiter};
use crate::types::{networks, FacilitatorConfig, NetworkConfig, NetworkKind};
use crate::webhook::WebhookConfig;
use crate::{Result, X402Error};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Where rate-limit windows are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitBackend {
    #[default]
    Memory,
    Redis,
}

impl FromStr for RateLimitBackend {
    type Err = X402Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(X402Error::config(format!(
                "Unknown rate limit backend: {}",
                other
            ))),
        }
    }
}

/// Per-network deployment values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSettings {
    pub rpc_url: Option<String>,
    pub fee_wallet: Option<String>,
    pub split_contract: Option<String>,
}

/// All component configs, as loaded from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub facilitator: FacilitatorConfig,
    pub fees: FeeConfig,
    /// `secret` is empty when `X402_WEBHOOK_SECRET` is unset
    pub webhook: WebhookConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub rate_limit_backend: RateLimitBackend,
    pub redis_url: Option<String>,
    /// Keyed by network id
    pub networks: BTreeMap<String, NetworkSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            facilitator: FacilitatorConfig::default(),
            fees: FeeConfig::default(),
            webhook: WebhookConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            rate_limit_backend: RateLimitBackend::Memory,
            redis_url: None,
            networks: BTreeMap::new(),
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|_| X402Error::config(format!("Invalid value for {}: {}", key, raw)))
            })
            .transpose()
    }

    fn secs(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_secs))
    }
}

impl Settings {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let mut settings = Settings::default();

        let facilitator = &mut settings.facilitator;
        if let Some(ttl) = env.secs("X402_PAYMENT_TTL_SECS")? {
            facilitator.payment_ttl = ttl;
        }
        if let Some(tolerance) = env.parse::<Decimal>("X402_AMOUNT_TOLERANCE")? {
            facilitator.amount_tolerance = tolerance;
        }
        if let Some(timeout) = env.secs("X402_VERIFICATION_TIMEOUT_SECS")? {
            facilitator.verification_timeout = timeout;
        }
        if let Some(min) = env.parse::<Decimal>("X402_MIN_AMOUNT")? {
            facilitator.min_amount = min;
        }
        if let Some(max) = env.parse::<Decimal>("X402_MAX_AMOUNT")? {
            facilitator.max_amount = max;
        }

        if let Some(percentage) = env.parse::<Decimal>("FEE_PERCENTAGE")? {
            settings.fees.fee_percentage = percentage;
        }
        if let Some(fixed) = env.parse::<Decimal>("FEE_FIXED")? {
            settings.fees.fee_fixed = fixed;
        }
        if let Some(currency) = env.get("FEE_FIXED_CURRENCY") {
            settings.fees.fee_fixed_currency = currency;
        }

        for network in networks::all_supported() {
            let prefix = network.to_uppercase();
            let values = NetworkSettings {
                rpc_url: env.get(&format!("{}_RPC_URL", prefix)),
                fee_wallet: env.get(&format!("{}_FEE_WALLET", prefix)),
                split_contract: env.get(&format!("{}_SPLIT_CONTRACT", prefix)),
            };
            if let Some(wallet) = &values.fee_wallet {
                settings.fees.fee_wallets.insert(network.to_string(), wallet.clone());
            }
            if let Some(contract) = &values.split_contract {
                settings
                    .fees
                    .split_contracts
                    .insert(network.to_string(), contract.clone());
            }
            if values != NetworkSettings::default() {
                settings.networks.insert(network.to_string(), values);
            }
        }

        if let Some(secret) = env.get("X402_WEBHOOK_SECRET") {
            settings.webhook.secret = secret;
        }
        if let Some(timeout) = env.secs("WEBHOOK_TIMEOUT_SECS")? {
            settings.webhook.timeout = timeout;
        }
        if let Some(attempts) = env.parse::<u32>("WEBHOOK_MAX_ATTEMPTS")? {
            settings.webhook.max_attempts = attempts;
        }

        if let Some(threshold) = env.parse::<u32>("CIRCUIT_FAILURE_THRESHOLD")? {
            settings.circuit_breaker.failure_threshold = threshold;
        }
        if let Some(timeout) = env.secs("CIRCUIT_RECOVERY_TIMEOUT_SECS")? {
            settings.circuit_breaker.recovery_timeout = timeout;
        }
        if let Some(threshold) = env.parse::<u32>("CIRCUIT_SUCCESS_THRESHOLD")? {
            settings.circuit_breaker.success_threshold = threshold;
        }

        if let Some(algorithm) = env.get("RATE_LIMIT_ALGORITHM") {
            settings.rate_limit.algorithm = RateLimitAlgorithm::from_str(&algorithm)?;
        }
        if let Some(backend) = env.get("RATE_LIMIT_BACKEND") {
            settings.rate_limit_backend = backend.parse()?;
        }
        settings.redis_url = env.get("REDIS_URL");

        settings.validate()?;
        Ok(settings)
    }

    /// Validate every component config
    ///
    /// The webhook secret is checked when webhooks are wired up, not here.
    pub fn validate(&self) -> Result<()> {
        self.facilitator.validate()?;
        self.fees.validate()?;
        self.circuit_breaker.validate()?;
        self.rate_limit.validate()?;
        if self.rate_limit_backend == RateLimitBackend::Redis && self.redis_url.is_none() {
            return Err(X402Error::config(
                "REDIS_URL is required for the redis rate limit backend",
            ));
        }
        Ok(())
    }

    /// RPC clients for every network with a configured RPC URL
    pub fn network_registry(&self, breaker: Arc<CircuitBreaker>) -> Result<NetworkRegistry> {
        let mut registry = NetworkRegistry::new(breaker);
        for (network, values) in &self.networks {
            let Some(url) = values.rpc_url.as_deref() else {
                continue;
            };
            let config = NetworkConfig::from_name(network)
                .ok_or_else(|| X402Error::config(format!("Unknown network: {}", network)))?;
            match config.kind {
                NetworkKind::Evm => registry.register(Arc::new(EvmRpcClient::new(config, url)?)),
                NetworkKind::Solana => {
                    registry.register(Arc::new(SolanaRpcClient::new(config, url)?))
                }
            }
            tracing::debug!(%network, rpc_url = %url, "registered chain client");
        }
        Ok(registry)
    }

    /// Rate limiter over the configured backend
    pub async fn rate_limiter(&self) -> Result<RateLimiter> {
        match self.rate_limit_backend {
            RateLimitBackend::Memory => Ok(RateLimiter::new(self.rate_limit.clone())),
            #[cfg(feature = "redis")]
            RateLimitBackend::Redis => {
                let url = self
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| X402Error::config("REDIS_URL is not set"))?;
                let store = crate::rate_limit::RedisRateLimitStore::new(url, None).await?;
                Ok(RateLimiter::with_store(
                    self.rate_limit.clone(),
                    Arc::new(store),
                    crate::clock::system(),
                ))
            }
            #[cfg(not(feature = "redis"))]
            RateLimitBackend::Redis => Err(X402Error::config(
                "Redis rate limiting requires the `redis` feature",
            )),
        }
    }
}
