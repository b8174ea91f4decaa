//! Facilitator configuration and capability types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Facilitator configuration
#[derive(Debug, Clone)]
pub struct FacilitatorConfig {
    /// Lifetime of a payment request before it expires
    pub payment_ttl: Duration,
    /// Accepted difference between claimed and on-chain amounts
    pub amount_tolerance: Decimal,
    /// Upper bound on the optional on-chain verification call
    pub verification_timeout: Duration,
    /// Smallest accepted payment amount
    pub min_amount: Decimal,
    /// Largest accepted payment amount
    pub max_amount: Decimal,
}

impl FacilitatorConfig {
    /// Validate the facilitator configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.payment_ttl.is_zero() {
            return Err(crate::X402Error::config("Payment TTL must be positive"));
        }

        if self.amount_tolerance < Decimal::ZERO {
            return Err(crate::X402Error::config("Amount tolerance cannot be negative"));
        }

        if self.min_amount <= Decimal::ZERO || self.max_amount < self.min_amount {
            return Err(crate::X402Error::config(
                "Amount limits must satisfy 0 < min_amount <= max_amount",
            ));
        }

        Ok(())
    }

    /// Set the payment TTL
    pub fn with_payment_ttl(mut self, ttl: Duration) -> Self {
        self.payment_ttl = ttl;
        self
    }

    /// Set the on-chain amount tolerance
    pub fn with_amount_tolerance(mut self, tolerance: Decimal) -> Self {
        self.amount_tolerance = tolerance;
        self
    }

    /// Set the verification timeout
    pub fn with_verification_timeout(mut self, timeout: Duration) -> Self {
        self.verification_timeout = timeout;
        self
    }

    /// Set the accepted amount range
    pub fn with_amount_limits(mut self, min: Decimal, max: Decimal) -> Self {
        self.min_amount = min;
        self.max_amount = max;
        self
    }
}

impl Default for FacilitatorConfig {
    fn default() -> Self {
        Self {
            payment_ttl: Duration::from_secs(15 * 60),
            amount_tolerance: Decimal::new(1, 3),
            verification_timeout: Duration::from_secs(10),
            min_amount: Decimal::new(1, 2),
            max_amount: Decimal::from(1_000_000),
        }
    }
}

/// Capability descriptor returned by `X402Facilitator::supported`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
    pub networks: Vec<SupportedNetwork>,
    pub schemes: Vec<String>,
    pub limits: Limits,
}

/// One registered network and the currencies it settles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportedNetwork {
    pub network: String,
    pub currencies: Vec<String>,
}

/// Amount and lifetime limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub payment_ttl_seconds: u64,
}
