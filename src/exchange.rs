//! Exchange rates for fixed-fee conversion
//!
//! Rates come from an ordered provider chain: the first provider returning a
//! positive rate wins. Results are cached for a minute and the whole chain
//! sits behind the `exchange_rates` circuit-breaker entry.

use crate::circuit_breaker::CircuitBreaker;
use crate::clock::{self, SharedClock};
use crate::types::constants::{currencies, EXCHANGE_RATES_DEPENDENCY};
use crate::{Result, X402Error};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// How long a fetched rate is served from cache
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of currency conversion rates
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Units of `to` per unit of `from`; `Ok(None)` when the pair is unknown
    async fn rate(&self, from: &str, to: &str) -> Result<Option<Decimal>>;
}

fn decimal_from_json(value: &Value) -> Option<Decimal> {
    let Value::Number(number) = value else {
        return None;
    };
    let raw = number.to_string();
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
}

async fn get_json(client: &reqwest::Client, url: &str, query: &[(&str, &str)]) -> Result<Value> {
    let response = client
        .get(url)
        .query(query)
        .timeout(PROVIDER_TIMEOUT)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(X402Error::chain(format!(
            "Rate API returned {}: {}",
            status, text
        )));
    }

    Ok(response.json().await?)
}

/// CoinGecko `simple/price` provider
#[derive(Debug, Clone)]
pub struct CoinGeckoProvider {
    client: reqwest::Client,
    base_url: String,
}

impl CoinGeckoProvider {
    pub fn new() -> Self {
        Self::with_url("https://api.coingecko.com/api/v3")
    }

    /// Use a different API base URL
    pub fn with_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn coin_id(currency: &str) -> Option<&'static str> {
        match currency.to_uppercase().as_str() {
            "USDC" => Some("usd-coin"),
            "USDT" => Some("tether"),
            "ETH" => Some("ethereum"),
            "BTC" => Some("bitcoin"),
            "MATIC" => Some("matic-network"),
            "SOL" => Some("solana"),
            _ => None,
        }
    }
}

impl Default for CoinGeckoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateProvider for CoinGeckoProvider {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn rate(&self, from: &str, to: &str) -> Result<Option<Decimal>> {
        let Some(coin_id) = Self::coin_id(from) else {
            return Ok(None);
        };
        let vs = to.to_lowercase();
        let url = format!("{}/simple/price", self.base_url);
        let data = get_json(
            &self.client,
            &url,
            &[("ids", coin_id), ("vs_currencies", vs.as_str())],
        )
        .await?;

        Ok(data
            .get(coin_id)
            .and_then(|quotes| quotes.get(&vs))
            .and_then(decimal_from_json))
    }
}

/// CryptoCompare `data/price` provider
#[derive(Debug, Clone)]
pub struct CryptoCompareProvider {
    client: reqwest::Client,
    base_url: String,
}

impl CryptoCompareProvider {
    pub fn new() -> Self {
        Self::with_url("https://min-api.cryptocompare.com")
    }

    pub fn with_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for CryptoCompareProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateProvider for CryptoCompareProvider {
    fn name(&self) -> &str {
        "cryptocompare"
    }

    async fn rate(&self, from: &str, to: &str) -> Result<Option<Decimal>> {
        let fsym = from.to_uppercase();
        let tsym = to.to_uppercase();
        let url = format!("{}/data/price", self.base_url);
        let data = get_json(
            &self.client,
            &url,
            &[("fsym", fsym.as_str()), ("tsyms", tsym.as_str())],
        )
        .await?;

        Ok(data.get(&tsym).and_then(decimal_from_json))
    }
}

/// Fixed rates, for tests and air-gapped deployments
#[derive(Debug, Clone, Default)]
pub struct StaticRateProvider {
    rates: HashMap<(String, String), Decimal>,
}

impl StaticRateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `from -> to` rate
    pub fn with_rate(mut self, from: &str, to: &str, rate: Decimal) -> Self {
        self.rates
            .insert((from.to_uppercase(), to.to_uppercase()), rate);
        self
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn rate(&self, from: &str, to: &str) -> Result<Option<Decimal>> {
        Ok(self
            .rates
            .get(&(from.to_uppercase(), to.to_uppercase()))
            .copied())
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedRate {
    rate: Decimal,
    fetched_at: DateTime<Utc>,
}

/// Cached, breaker-protected rate lookup over a provider chain
pub struct ExchangeRateService {
    providers: Vec<Arc<dyn RateProvider>>,
    cache: DashMap<(String, String), CachedRate>,
    cache_ttl: Duration,
    breaker: Arc<CircuitBreaker>,
    clock: SharedClock,
}

impl std::fmt::Debug for ExchangeRateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRateService")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl ExchangeRateService {
    /// Service with no providers; add them with [`with_provider`](Self::with_provider)
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            providers: Vec::new(),
            cache: DashMap::new(),
            cache_ttl: DEFAULT_CACHE_TTL,
            breaker,
            clock: clock::system(),
        }
    }

    /// CoinGecko first, CryptoCompare as fallback
    pub fn with_default_providers(breaker: Arc<CircuitBreaker>) -> Self {
        Self::new(breaker)
            .with_provider(Arc::new(CoinGeckoProvider::new()))
            .with_provider(Arc::new(CryptoCompareProvider::new()))
    }

    /// Append a provider to the chain
    pub fn with_provider(mut self, provider: Arc<dyn RateProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    fn cached(&self, key: &(String, String)) -> Option<Decimal> {
        let entry = self.cache.get(key)?;
        let age = (self.clock.now() - entry.fetched_at).to_std().ok()?;
        (age < self.cache_ttl).then_some(entry.rate)
    }

    /// Units of `to` per unit of `from`
    ///
    /// Identical currencies and USD-pegged pairs short-circuit to 1 without
    /// calling any provider.
    pub async fn get_rate(&self, from: &str, to: &str) -> Result<Decimal> {
        let from = from.to_uppercase();
        let to = to.to_uppercase();
        if from == to || (currencies::is_usd_pegged(&from) && currencies::is_usd_pegged(&to)) {
            return Ok(Decimal::ONE);
        }

        let key = (from.clone(), to.clone());
        if let Some(rate) = self.cached(&key) {
            return Ok(rate);
        }

        let rate = self
            .breaker
            .call(EXCHANGE_RATES_DEPENDENCY, None, self.query_providers(&from, &to))
            .await?;

        self.cache.insert(
            key,
            CachedRate {
                rate,
                fetched_at: self.clock.now(),
            },
        );
        Ok(rate)
    }

    /// Convert `amount` of `from` into `to`
    pub async fn convert(&self, amount: Decimal, from: &str, to: &str) -> Result<Decimal> {
        let rate = self.get_rate(from, to).await?;
        amount
            .checked_mul(rate)
            .ok_or_else(|| X402Error::validation(format!("Conversion of {} overflows", amount)))
    }

    async fn query_providers(&self, from: &str, to: &str) -> Result<Decimal> {
        for provider in &self.providers {
            match provider.rate(from, to).await {
                Ok(Some(rate)) if rate > Decimal::ZERO => {
                    tracing::info!(provider = provider.name(), from, to, %rate, "exchange rate fetched");
                    return Ok(rate);
                }
                Ok(_) => {
                    tracing::debug!(provider = provider.name(), from, to, "provider has no rate");
                }
                Err(e) => {
                    tracing::warn!(provider = provider.name(), from, to, error = %e, "rate provider failed");
                }
            }
        }

        Err(X402Error::chain(format!(
            "Could not get exchange rate for {}/{}",
            from, to
        )))
    }
}
