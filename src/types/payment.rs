//! Payment-related types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use super::constants::schemes;
use crate::X402Error;

/// x402 protocol version
pub const X402_VERSION: u32 = 1;

/// Payment proof format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
    Upto,
    Streaming,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Exact => schemes::EXACT,
            Scheme::Upto => schemes::UPTO,
            Scheme::Streaming => schemes::STREAMING,
        }
    }
}

impl FromStr for Scheme {
    type Err = X402Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            schemes::EXACT => Ok(Scheme::Exact),
            schemes::UPTO => Ok(Scheme::Upto),
            schemes::STREAMING => Ok(Scheme::Streaming),
            other => Err(X402Error::validation(format!("Unknown scheme: {}", other))),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a payment request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Verified,
    /// Interim state held while settlement transfers are in flight
    Settling,
    Settled,
    Cancelled,
    Failed,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Verified => "verified",
            PaymentStatus::Settling => "settling",
            PaymentStatus::Settled => "settled",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Expired => "expired",
        }
    }

    /// Terminal requests are never mutated again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Settled
                | PaymentStatus::Cancelled
                | PaymentStatus::Failed
                | PaymentStatus::Expired
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hybrid platform fee derived from an amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Gross payment amount
    pub amount: Decimal,
    /// amount x fee percentage
    pub percentage_fee: Decimal,
    /// Fixed component, in the payment currency
    pub fixed_fee: Decimal,
    /// percentage_fee + fixed_fee
    pub total_fee: Decimal,
    /// amount - total_fee; may be negative, settlement rejects it
    pub net_amount: Decimal,
}

/// How a settlement moved funds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMethod {
    /// Fee was zero; a single transfer of the full amount
    NoFee,
    /// Two ordered native transfers (payee, then platform)
    DualTransaction,
    /// One atomic split-contract call
    ContractSplit,
}

/// Outcome of a fee split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResult {
    pub method: SettlementMethod,
    pub network: String,
    pub currency: String,
    pub fee_breakdown: FeeBreakdown,
    /// Transfer of the net amount to the payee (same as `split_tx` for contract splits)
    pub payee_tx: Option<String>,
    /// Transfer of the fee to the platform wallet
    pub fee_tx: Option<String>,
    /// Atomic split transaction
    pub split_tx: Option<String>,
    /// Platform wallet that received the fee
    pub fee_wallet: Option<String>,
}

impl SettlementResult {
    /// All transaction hashes produced, in submission order
    pub fn transaction_hashes(&self) -> Vec<String> {
        [&self.payee_tx, &self.fee_tx, &self.split_tx]
            .into_iter()
            .flatten()
            .fold(Vec::new(), |mut acc, tx| {
                if !acc.contains(tx) {
                    acc.push(tx.clone());
                }
                acc
            })
    }
}

/// Input to `X402Facilitator::create`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    /// Caller-supplied payment id
    pub payment_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub network: String,
    pub from_address: String,
    pub to_address: String,
    pub scheme: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl CreatePaymentRequest {
    /// Create a new payment request input with the `exact` scheme
    pub fn new(
        payment_id: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
        network: impl Into<String>,
        from_address: impl Into<String>,
        to_address: impl Into<String>,
    ) -> Self {
        Self {
            payment_id: payment_id.into(),
            amount,
            currency: currency.into(),
            network: network.into(),
            from_address: from_address.into(),
            to_address: to_address.into(),
            scheme: schemes::EXACT.to_string(),
            metadata: HashMap::new(),
        }
    }

    /// Set the payment scheme
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A payment request tracked by the facilitator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Facilitator-assigned id
    pub id: String,
    /// Caller-supplied payment id
    pub payment_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub network: String,
    pub from_address: String,
    pub to_address: String,
    pub scheme: Scheme,
    pub status: PaymentStatus,
    /// Bumped on every mutation; used for compare-and-swap
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub signature: Option<String>,
    pub transaction_hash: Option<String>,
    pub settlement: Option<SettlementResult>,
    pub cancel_reason: Option<String>,
    /// Last error that moved the request to FAILED or was recorded against it
    pub failure_reason: Option<String>,
    /// Machine-readable code of `failure_reason`
    pub failure_code: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl PaymentRequest {
    /// Whether the request is past its TTL at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Fee breakdown applied at settlement, if any
    pub fn fee_breakdown(&self) -> Option<&FeeBreakdown> {
        self.settlement.as_ref().map(|s| &s.fee_breakdown)
    }

    /// Partial native split: payee paid, fee leg missing
    pub fn needs_reconciliation(&self) -> bool {
        self.status == PaymentStatus::Failed
            && self
                .settlement
                .as_ref()
                .map(|s| s.payee_tx.is_some() && s.fee_tx.is_none() && s.split_tx.is_none())
                .unwrap_or(false)
    }
}

/// Result of a successful `verify`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub request_id: String,
    pub status: PaymentStatus,
    pub verified_at: DateTime<Utc>,
    pub payer: String,
    pub transaction_hash: Option<String>,
    /// Whether the proof was checked against an on-chain transaction
    pub on_chain: bool,
}

/// Fees collected in one currency
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeTotals {
    pub percentage_fees: Decimal,
    pub fixed_fees: Decimal,
    pub total_fees: Decimal,
    pub transaction_count: usize,
}

impl FeeTotals {
    fn add(&mut self, fee: &FeeBreakdown) {
        self.percentage_fees += fee.percentage_fee;
        self.fixed_fees += fee.fixed_fee;
        self.total_fees += fee.total_fee;
        self.transaction_count += 1;
    }
}

/// Fees collected by settled requests over a period
///
/// Amounts in different currencies are never added together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeCollectionSummary {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Currency filter; `None` means all
    pub currency: Option<String>,
    /// Network filter; `None` means all
    pub network: Option<String>,
    pub by_currency: BTreeMap<String, FeeTotals>,
    pub transaction_count: usize,
}

impl FeeCollectionSummary {
    pub fn new(
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        currency: Option<&str>,
        network: Option<&str>,
    ) -> Self {
        Self {
            period_start,
            period_end,
            currency: currency.map(str::to_string),
            network: network.map(str::to_string),
            by_currency: BTreeMap::new(),
            transaction_count: 0,
        }
    }

    /// Count `request` if it settled inside the period and matches the filters
    pub fn record(&mut self, request: &PaymentRequest) -> bool {
        let Some(settled_at) = request.settled_at else {
            return false;
        };
        let Some(fee) = request.fee_breakdown() else {
            return false;
        };
        if request.status != PaymentStatus::Settled
            || settled_at < self.period_start
            || settled_at >= self.period_end
            || self.currency.as_deref().is_some_and(|c| c != request.currency)
            || self.network.as_deref().is_some_and(|n| n != request.network)
        {
            return false;
        }

        self.by_currency
            .entry(request.currency.clone())
            .or_default()
            .add(fee);
        self.transaction_count += 1;
        true
    }

    /// Totals for one currency
    pub fn totals(&self, currency: &str) -> FeeTotals {
        self.by_currency.get(currency).copied().unwrap_or_default()
    }
}

/// Receipt of a successful `settle`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub request_id: String,
    pub status: PaymentStatus,
    pub settled_at: DateTime<Utc>,
    pub settlement: SettlementResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_parsing() {
        assert_eq!("exact".parse::<Scheme>().unwrap(), Scheme::Exact);
        assert_eq!("upto".parse::<Scheme>().unwrap(), Scheme::Upto);
        assert_eq!("streaming".parse::<Scheme>().unwrap(), Scheme::Streaming);
        assert!(matches!(
            "subscription".parse::<Scheme>(),
            Err(X402Error::Validation(_))
        ));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(!PaymentStatus::Verified.is_terminal());
        assert!(!PaymentStatus::Settling.is_terminal());
        assert!(PaymentStatus::Settled.is_terminal());
        assert!(PaymentStatus::Cancelled.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Expired.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&PaymentStatus::Settling).unwrap();
        assert_eq!(json, "\"settling\"");
    }

    #[test]
    fn test_transaction_hashes_dedup() {
        let breakdown = FeeBreakdown {
            amount: Decimal::ONE,
            percentage_fee: Decimal::ZERO,
            fixed_fee: Decimal::ZERO,
            total_fee: Decimal::ZERO,
            net_amount: Decimal::ONE,
        };
        let result = SettlementResult {
            method: SettlementMethod::ContractSplit,
            network: "polygon".to_string(),
            currency: "USDC".to_string(),
            fee_breakdown: breakdown,
            payee_tx: Some("0xsplit".to_string()),
            fee_tx: None,
            split_tx: Some("0xsplit".to_string()),
            fee_wallet: None,
        };
        assert_eq!(result.transaction_hashes(), vec!["0xsplit".to_string()]);
    }
}
