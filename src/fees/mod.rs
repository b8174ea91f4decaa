//! Platform fee computation and collection
//!
//! The platform charges a hybrid fee: a percentage of the amount plus a fixed
//! component. [`compute_fee`] derives the breakdown; [`FeeCollector`] moves the
//! funds.
//!
//! Native currencies are split with two ordered transfers (payee first, then
//! the platform wallet). That split is not atomic: if the second transfer
//! fails the payee has been paid and the fee is missing, which surfaces as
//! `PartialSettlement` and is never retried here. Tokens go through a split
//! contract so both legs commit together.

use crate::exchange::ExchangeRateService;
use crate::network::{NetworkRegistry, TransactionSigner};
use crate::types::constants::currencies;
use crate::types::{Asset, FeeBreakdown, SettlementMethod, SettlementResult};
use crate::{Result, X402Error};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::sync::Arc;


/// Hybrid fee for `amount`
///
/// Pure and total: a fee larger than the amount yields a negative
/// `net_amount`, which settlement rejects.
pub fn compute_fee(amount: Decimal, fee_percentage: Decimal, fee_fixed: Decimal) -> FeeBreakdown {
    let percentage_fee = amount * fee_percentage;
    let total_fee = percentage_fee + fee_fixed;
    FeeBreakdown {
        amount,
        percentage_fee,
        fixed_fee: fee_fixed,
        total_fee,
        net_amount: amount - total_fee,
    }
}

/// Round fee components to what the asset can represent
fn round_to_asset(breakdown: FeeBreakdown, decimals: u32) -> FeeBreakdown {
    let percentage_fee = breakdown
        .percentage_fee
        .round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
    let fixed_fee = breakdown
        .fixed_fee
        .round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
    let total_fee = percentage_fee + fixed_fee;
    FeeBreakdown {
        amount: breakdown.amount,
        percentage_fee,
        fixed_fee,
        total_fee,
        net_amount: breakdown.amount - total_fee,
    }
}

/// Fee schedule and platform wallets
#[derive(Debug, Clone)]
pub struct FeeConfig {
    /// Percentage component (0.029 = 2.9%)
    pub fee_percentage: Decimal,
    /// Fixed component, in `fee_fixed_currency`
    pub fee_fixed: Decimal,
    pub fee_fixed_currency: String,
    /// Platform wallet per network id
    pub fee_wallets: HashMap<String, String>,
    /// Split contract per network id (token settlements)
    pub split_contracts: HashMap<String, String>,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            fee_percentage: Decimal::new(29, 3),
            fee_fixed: Decimal::new(30, 2),
            fee_fixed_currency: currencies::USD.to_string(),
            fee_wallets: HashMap::new(),
            split_contracts: HashMap::new(),
        }
    }
}

impl FeeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fee_percentage < Decimal::ZERO || self.fee_percentage >= Decimal::ONE {
            return Err(X402Error::config("Fee percentage must be in the range [0, 1)"));
        }
        if self.fee_fixed < Decimal::ZERO {
            return Err(X402Error::config("Fixed fee cannot be negative"));
        }
        if self.fee_fixed_currency.is_empty() {
            return Err(X402Error::config("Fixed fee currency is required"));
        }
        Ok(())
    }

    /// Set the hybrid fee
    pub fn with_fee(mut self, percentage: Decimal, fixed: Decimal) -> Self {
        self.fee_percentage = percentage;
        self.fee_fixed = fixed;
        self
    }

    pub fn with_fixed_currency(mut self, currency: impl Into<String>) -> Self {
        self.fee_fixed_currency = currency.into();
        self
    }

    /// Set the platform wallet for a network
    pub fn with_fee_wallet(mut self, network: impl Into<String>, wallet: impl Into<String>) -> Self {
        self.fee_wallets.insert(network.into(), wallet.into());
        self
    }

    /// Set the split contract for a network
    pub fn with_split_contract(
        mut self,
        network: impl Into<String>,
        contract: impl Into<String>,
    ) -> Self {
        self.split_contracts.insert(network.into(), contract.into());
        self
    }
}

/// Computes and collects the platform fee on settlement
pub struct FeeCollector {
    config: FeeConfig,
    registry: Arc<NetworkRegistry>,
    exchange: Option<Arc<ExchangeRateService>>,
    signers: HashMap<String, Arc<dyn TransactionSigner>>,
}

impl std::fmt::Debug for FeeCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut signer_networks: Vec<&String> = self.signers.keys().collect();
        signer_networks.sort();
        f.debug_struct("FeeCollector")
            .field("config", &self.config)
            .field("signers", &signer_networks)
            .finish()
    }
}

impl FeeCollector {
    pub fn new(config: FeeConfig, registry: Arc<NetworkRegistry>) -> Self {
        Self {
            config,
            registry,
            exchange: None,
            signers: HashMap::new(),
        }
    }

    /// Convert fixed fees for non-pegged currencies through `exchange`
    pub fn with_exchange(mut self, exchange: Arc<ExchangeRateService>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// Signer that moves funds on `network`
    pub fn with_signer(
        mut self,
        network: impl Into<String>,
        signer: Arc<dyn TransactionSigner>,
    ) -> Self {
        self.signers.insert(network.into(), signer);
        self
    }

    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    /// Fee breakdown with the configured schedule, fixed fee taken as-is
    pub fn compute_fee(&self, amount: Decimal) -> FeeBreakdown {
        compute_fee(amount, self.config.fee_percentage, self.config.fee_fixed)
    }

    /// Fixed fee expressed in `currency`
    pub async fn fixed_fee_in(&self, currency: &str) -> Result<Decimal> {
        let fixed_currency = self.config.fee_fixed_currency.as_str();
        if self.config.fee_fixed.is_zero()
            || fixed_currency.eq_ignore_ascii_case(currency)
            || (currencies::is_usd_pegged(fixed_currency) && currencies::is_usd_pegged(currency))
        {
            return Ok(self.config.fee_fixed);
        }

        let exchange = self.exchange.as_ref().ok_or_else(|| {
            X402Error::config(format!(
                "No exchange-rate service to convert the {} fixed fee into {}",
                fixed_currency, currency
            ))
        })?;
        exchange
            .convert(self.config.fee_fixed, fixed_currency, currency)
            .await
    }

    /// Fee breakdown for a payment, in the payment currency
    ///
    /// Converts the fixed fee when needed and rounds both components to the
    /// asset's precision.
    pub async fn fee_for(&self, amount: Decimal, currency: &str, network: &str) -> Result<FeeBreakdown> {
        let asset = self.registry.config(network)?.asset(currency)?;
        let fixed = self.fixed_fee_in(currency).await?;
        let breakdown = compute_fee(amount, self.config.fee_percentage, fixed);
        Ok(round_to_asset(breakdown, asset.decimals()))
    }

    /// Platform wallet for `network`
    pub fn fee_wallet(&self, network: &str) -> Result<&str> {
        self.config
            .fee_wallets
            .get(network)
            .map(String::as_str)
            .ok_or_else(|| {
                X402Error::config(format!("No fee collection wallet configured for {}", network))
            })
    }

    fn signer(&self, network: &str) -> Result<&Arc<dyn TransactionSigner>> {
        self.signers
            .get(network)
            .ok_or_else(|| X402Error::config(format!("No settlement signer configured for {}", network)))
    }

    /// Move `amount` from `payer`, paying `payee` the net and the platform the fee
    pub async fn collect_fee(
        &self,
        amount: Decimal,
        currency: &str,
        network: &str,
        payer: &str,
        payee: &str,
        breakdown: &FeeBreakdown,
    ) -> Result<SettlementResult> {
        if breakdown.amount != amount {
            return Err(X402Error::validation(format!(
                "Fee breakdown is for {}, payment is {}",
                breakdown.amount, amount
            )));
        }
        if breakdown.net_amount < Decimal::ZERO {
            return Err(X402Error::policy_violation(format!(
                "Fee {} exceeds payment amount {}",
                breakdown.total_fee, amount
            )));
        }

        let asset = self.registry.config(network)?.asset(currency)?;
        let signer = self.signer(network)?;

        let mut result = SettlementResult {
            method: SettlementMethod::NoFee,
            network: network.to_string(),
            currency: currency.to_string(),
            fee_breakdown: *breakdown,
            payee_tx: None,
            fee_tx: None,
            split_tx: None,
            fee_wallet: None,
        };

        if breakdown.total_fee.is_zero() {
            let tx = self
                .registry
                .send_payment(payer, payee, breakdown.net_amount, currency, network, signer.as_ref())
                .await?;
            tracing::info!(%network, %currency, payee_tx = %tx, "settled without fee");
            result.payee_tx = Some(tx);
            return Ok(result);
        }

        // Resolve everything the split needs before moving any funds
        let fee_wallet = self.fee_wallet(network)?.to_string();
        result.fee_wallet = Some(fee_wallet.clone());

        match asset {
            Asset::Native { .. } => {
                // Both legs must be fundable before the first one is sent
                let needed = breakdown.net_amount + breakdown.total_fee;
                let balance = self.registry.get_balance(payer, currency, network).await?;
                if balance < needed {
                    return Err(X402Error::insufficient_funds(format!(
                        "{} holds {} {} on {}, needs {}",
                        payer, balance, currency, network, needed
                    )));
                }

                let payee_tx = self
                    .registry
                    .send_payment(payer, payee, breakdown.net_amount, currency, network, signer.as_ref())
                    .await?;

                let fee_tx = match self
                    .registry
                    .send_payment(payer, &fee_wallet, breakdown.total_fee, currency, network, signer.as_ref())
                    .await
                {
                    Ok(tx) => tx,
                    Err(e) => {
                        tracing::error!(
                            %network,
                            %currency,
                            %payer,
                            %payee,
                            payee_tx = %payee_tx,
                            fee = %breakdown.total_fee,
                            error = %e,
                            "fee transfer failed after payee was paid; manual reconciliation required"
                        );
                        return Err(X402Error::partial_settlement(
                            payee_tx,
                            format!("fee transfer of {} {} failed: {}", breakdown.total_fee, currency, e),
                        ));
                    }
                };

                tracing::info!(
                    %network,
                    %currency,
                    payee_tx = %payee_tx,
                    fee_tx = %fee_tx,
                    fee = %breakdown.total_fee,
                    "fee collected with dual transaction"
                );
                result.method = SettlementMethod::DualTransaction;
                result.payee_tx = Some(payee_tx);
                result.fee_tx = Some(fee_tx);
            }
            Asset::Token(token) => {
                let split_contract = self
                    .config
                    .split_contracts
                    .get(network)
                    .ok_or_else(|| {
                        X402Error::config(format!("No split contract configured for {}", network))
                    })?;

                let tx = self
                    .registry
                    .split_token_payment(
                        payer,
                        network,
                        &token,
                        split_contract,
                        payee,
                        breakdown.net_amount,
                        &fee_wallet,
                        breakdown.total_fee,
                        signer.as_ref(),
                    )
                    .await?;

                tracing::info!(
                    %network,
                    %currency,
                    split_tx = %tx,
                    fee = %breakdown.total_fee,
                    "fee collected with contract split"
                );
                result.method = SettlementMethod::ContractSplit;
                result.payee_tx = Some(tx.clone());
                result.fee_tx = Some(tx.clone());
                result.split_tx = Some(tx);
            }
        }

        Ok(result)
    }
}
