//! # x402 settlement core
//!
//! The facilitator side of the x402 micropayment protocol: it takes payment
//! requests from AI agents, verifies the payer's proof, settles on-chain while
//! splitting off the platform fee, and tells subscribers what happened.
//!
//! ## Features
//!
//! - **Payment lifecycle**: PENDING → VERIFIED → SETTLING → SETTLED, with
//!   cancellation, expiry and failure, guarded by optimistic versioning
//! - **Multi-chain**: Ethereum, Polygon, Arbitrum over EVM JSON-RPC and Solana
//!   over its own JSON-RPC, behind one [`network::ChainClient`] trait
//! - **Hybrid fees**: percentage plus fixed fee, collected by a split-contract
//!   call for tokens or two ordered transfers for native currency
//! - **Resilience**: a circuit breaker per network and per rate provider, and
//!   per-caller rate limiting (sliding window or token bucket)
//! - **Webhooks**: HMAC-signed deliveries with backoff retries and redrive
//! - **Pluggable storage**: in-memory by default, Redis behind the `redis`
//!   feature
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use x402_settlement::{
//!     circuit_breaker::CircuitBreaker,
//!     config::Settings,
//!     facilitator::X402Facilitator,
//!     fees::FeeCollector,
//!     network::LocalSigner,
//!     storage::InMemoryPaymentRepository,
//!     telemetry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     telemetry::init_tracing();
//!     let settings = Settings::from_env()?;
//!
//!     let breaker = Arc::new(CircuitBreaker::new(settings.circuit_breaker));
//!     let registry = Arc::new(settings.network_registry(breaker)?);
//!     let signer = LocalSigner::new().with_evm_key(&std::env::var("SETTLEMENT_KEY")?)?;
//!     let fees = FeeCollector::new(settings.fees.clone(), registry.clone())
//!         .with_signer("polygon", Arc::new(signer));
//!
//!     let facilitator = X402Facilitator::new(
//!         settings.facilitator.clone(),
//!         Arc::new(InMemoryPaymentRepository::new()),
//!         registry,
//!         Arc::new(fees),
//!     )?
//!     .with_rate_limiter(settings.rate_limiter().await?);
//!
//!     println!("{:?}", facilitator.supported());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`facilitator`] - payment request state machine
//! - [`network`] - chain clients, signers and the network registry
//! - [`fees`] - fee computation and collection
//! - [`exchange`] - exchange rates for converting the fixed fee
//! - [`circuit_breaker`] - per-dependency breaker
//! - [`rate_limit`] - per-caller admission control
//! - [`webhook`] - signed event delivery
//! - [`storage`] - repository traits and in-memory / Redis backends
//! - [`crypto`] - payer signatures and webhook HMACs
//! - [`config`] - environment-driven settings
//!
//! ## Optional Features
//!
//! - **`redis`**: Redis payment storage and rate-limit store

pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod exchange;
pub mod facilitator;
pub mod fees;
pub mod network;
pub mod rate_limit;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod webhook;

// Re-exports for convenience
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Settings;
pub use error::{Result, X402Error};
pub use exchange::ExchangeRateService;
pub use facilitator::X402Facilitator;
pub use fees::{FeeCollector, FeeConfig};
pub use network::{ChainClient, NetworkRegistry, TransactionSigner};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use types::*;
pub use webhook::{WebhookConfig, WebhookDispatcher};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
