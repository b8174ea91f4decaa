//! Payment lifecycle state machine
//!
//! [`X402Facilitator`] owns the life of a payment request:
//!
//! ```text
//! PENDING ──verify──▶ VERIFIED ──settle──▶ SETTLING ──▶ SETTLED
//!    │                   │                     └──────▶ FAILED
//!    └──cancel──▶ CANCELLED ◀──cancel──┘
//! ```
//!
//! PENDING and VERIFIED requests become EXPIRED once their TTL passes; a
//! mismatching on-chain proof moves a PENDING request to FAILED.
//!
//! Every mutation is a compare-and-swap on the request's `version`, so
//! concurrent callers never both win a transition and no lock is held while
//! chain calls are in flight. Settlement first claims the request by moving
//! it to SETTLING; a duplicate settle sees SETTLING and is rejected.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use rust_decimal::Decimal;
//! use x402_settlement::facilitator::X402Facilitator;
//! use x402_settlement::fees::{FeeCollector, FeeConfig};
//! use x402_settlement::network::NetworkRegistry;
//! use x402_settlement::storage::InMemoryPaymentRepository;
//! use x402_settlement::types::{CreatePaymentRequest, FacilitatorConfig};
//!
//! # async fn example(registry: Arc<NetworkRegistry>, signature: &str) -> x402_settlement::Result<()> {
//! let fees = FeeCollector::new(FeeConfig::default(), registry.clone());
//! let facilitator = X402Facilitator::new(
//!     FacilitatorConfig::default(),
//!     Arc::new(InMemoryPaymentRepository::new()),
//!     registry,
//!     Arc::new(fees),
//! )?;
//!
//! let request = facilitator
//!     .create(
//!         "agent-1",
//!         CreatePaymentRequest::new(
//!             "order-42",
//!             Decimal::new(5000, 2),
//!             "USDC",
//!             "polygon",
//!             "0x857b06519E91e3A54538791bDbb0E22373e36b66",
//!             "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
//!         ),
//!     )
//!     .await?;
//!
//! facilitator.verify("agent-1", &request.id, signature, None).await?;
//! let receipt = facilitator.settle("agent-1", &request.id).await?;
//! println!("net to payee: {}", receipt.settlement.fee_breakdown.net_amount);
//! # Ok(())
//! # }
//! ```

use crate::clock::{self, SharedClock};
use crate::crypto::signature::{canonical_message, verify_payment_signature};
use crate::fees::FeeCollector;
use crate::network::{evm, solana, NetworkRegistry, TransactionInfo, TxState};
use crate::rate_limit::RateLimiter;
use crate::storage::PaymentRepository;
use crate::types::constants::{events, operations, schemes};
use crate::types::{
    Capabilities, CreatePaymentRequest, FacilitatorConfig, FeeBreakdown, FeeCollectionSummary,
    Limits, NetworkKind, PaymentRequest, PaymentStatus, Scheme, SettlementMethod, SettlementReceipt,
    SettlementResult, SupportedNetwork, VerificationResult, X402_VERSION,
};
use crate::webhook::{EventSink, NoopSink};
use crate::{Result, X402Error};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;


/// Settles x402 payments on behalf of payees
pub struct X402Facilitator {
    config: FacilitatorConfig,
    payments: Arc<dyn PaymentRepository>,
    registry: Arc<NetworkRegistry>,
    fees: Arc<FeeCollector>,
    rate_limiter: Option<RateLimiter>,
    events: Arc<dyn EventSink>,
    clock: SharedClock,
}

impl std::fmt::Debug for X402Facilitator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X402Facilitator")
            .field("config", &self.config)
            .field("networks", &self.registry.networks())
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish()
    }
}

impl X402Facilitator {
    /// Create a facilitator; events are dropped until [`with_events`](Self::with_events)
    pub fn new(
        config: FacilitatorConfig,
        payments: Arc<dyn PaymentRepository>,
        registry: Arc<NetworkRegistry>,
        fees: Arc<FeeCollector>,
    ) -> Result<Self> {
        config.validate()?;
        fees.config().validate()?;

        Ok(Self {
            config,
            payments,
            registry,
            fees,
            rate_limiter: None,
            events: Arc::new(NoopSink),
            clock: clock::system(),
        })
    }

    /// Admit caller operations through `limiter`
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Publish state transitions to `events`
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &FacilitatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NetworkRegistry> {
        &self.registry
    }

    async fn admit(&self, caller: &str, operation: &str) -> Result<()> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.enforce(caller, operation).await?;
        }
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<PaymentRequest> {
        self.payments
            .get(id)
            .await?
            .ok_or_else(|| X402Error::not_found(format!("Payment request {}", id)))
    }

    fn is_due(&self, request: &PaymentRequest, now: DateTime<Utc>) -> bool {
        matches!(request.status, PaymentStatus::Pending | PaymentStatus::Verified)
            && request.is_expired_at(now)
    }

    /// Read-modify-write one request, retrying on version conflicts
    ///
    /// A PENDING or VERIFIED request past its TTL is expired instead and the
    /// call fails with `Expired`. `apply` may reject the current state.
    async fn update<F>(&self, id: &str, mut apply: F) -> Result<PaymentRequest>
    where
        F: FnMut(&mut PaymentRequest, DateTime<Utc>) -> Result<()>,
    {
        loop {
            let current = self.load(id).await?;
            let now = self.clock.now();

            if self.is_due(&current, now) {
                self.expire(current).await?;
                return Err(X402Error::expired(format!(
                    "Payment request {} expired",
                    id
                )));
            }

            let mut next = current.clone();
            apply(&mut next, now)?;

            if self
                .payments
                .compare_and_swap(next.clone(), current.version)
                .await?
            {
                next.version = current.version + 1;
                return Ok(next);
            }
            tracing::debug!(request_id = %id, version = current.version, "version conflict, retrying");
        }
    }

    /// Move a due request to EXPIRED; `false` if another writer moved it first
    async fn expire(&self, current: PaymentRequest) -> Result<bool> {
        let mut expired = current.clone();
        expired.status = PaymentStatus::Expired;
        expired.failure_reason = Some("Payment request expired".to_string());
        expired.failure_code = Some("expired".to_string());

        if !self
            .payments
            .compare_and_swap(expired.clone(), current.version)
            .await?
        {
            return Ok(false);
        }
        expired.version = current.version + 1;

        tracing::info!(
            request_id = %expired.id,
            from_status = %current.status,
            expires_at = %expired.expires_at,
            "payment request expired"
        );
        self.emit(events::PAYMENT_EXPIRED, &expired, None).await;
        Ok(true)
    }

    async fn emit(&self, event_type: &str, request: &PaymentRequest, extra: Option<Value>) {
        let mut payload = json!({
            "event": event_type,
            "request_id": request.id,
            "payment_id": request.payment_id,
            "status": request.status,
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "network": request.network,
            "from": request.from_address,
            "to": request.to_address,
            "scheme": request.scheme,
            "transaction_hash": request.transaction_hash,
            "timestamp": self.clock.now().to_rfc3339(),
        });
        if let (Some(Value::Object(extra)), Some(map)) = (extra, payload.as_object_mut()) {
            map.extend(extra);
        }
        self.events.publish(event_type, payload).await;
    }

    fn validate_address(kind: NetworkKind, address: &str) -> Result<()> {
        match kind {
            NetworkKind::Evm => evm::parse_address(address).map(|_| ()),
            NetworkKind::Solana => solana::decode_pubkey(address).map(|_| ()),
        }
    }

    /// Register a new PENDING payment request
    pub async fn create(&self, caller: &str, input: CreatePaymentRequest) -> Result<PaymentRequest> {
        self.admit(caller, operations::PAYMENT_CREATE).await?;

        if input.payment_id.trim().is_empty() {
            return Err(X402Error::validation("Payment id is required"));
        }
        if input.amount <= Decimal::ZERO {
            return Err(X402Error::validation("Amount must be greater than zero"));
        }
        if input.amount < self.config.min_amount || input.amount > self.config.max_amount {
            return Err(X402Error::validation(format!(
                "Amount {} is outside the accepted range [{}, {}]",
                input.amount, self.config.min_amount, self.config.max_amount
            )));
        }

        let scheme: Scheme = input.scheme.parse()?;
        let network = self.registry.config(&input.network)?;
        if !network.supports_currency(&input.currency) {
            return Err(X402Error::validation(format!(
                "Currency {} is not supported on {}",
                input.currency, input.network
            )));
        }
        Self::validate_address(network.kind, &input.from_address)?;
        Self::validate_address(network.kind, &input.to_address)?;

        let ttl = chrono::Duration::from_std(self.config.payment_ttl)
            .map_err(|_| X402Error::config("Payment TTL is out of range"))?;
        let now = self.clock.now();

        let request = PaymentRequest {
            id: uuid::Uuid::new_v4().to_string(),
            payment_id: input.payment_id,
            amount: input.amount.normalize(),
            currency: input.currency,
            network: input.network,
            from_address: input.from_address,
            to_address: input.to_address,
            scheme,
            status: PaymentStatus::Pending,
            version: 0,
            created_at: now,
            expires_at: now + ttl,
            verified_at: None,
            settled_at: None,
            cancelled_at: None,
            failed_at: None,
            signature: None,
            transaction_hash: None,
            settlement: None,
            cancel_reason: None,
            failure_reason: None,
            failure_code: None,
            metadata: input.metadata,
        };

        self.payments.insert(request.clone()).await?;
        tracing::info!(
            request_id = %request.id,
            payment_id = %request.payment_id,
            amount = %request.amount,
            currency = %request.currency,
            network = %request.network,
            "payment request created"
        );
        self.emit(events::PAYMENT_CREATED, &request, None).await;
        Ok(request)
    }

    /// Check the payer's signature, and the on-chain transaction when given
    ///
    /// A bad signature leaves the request PENDING with the reason recorded.
    /// On-chain data that disagrees with the request fails it. A transaction
    /// that is not mined yet, a timeout, or an open circuit leave it untouched.
    pub async fn verify(
        &self,
        caller: &str,
        request_id: &str,
        signature: &str,
        tx_hash: Option<&str>,
    ) -> Result<VerificationResult> {
        self.admit(caller, operations::PAYMENT_VERIFY).await?;

        let request = self.load(request_id).await?;
        if self.is_due(&request, self.clock.now()) {
            self.expire(request).await?;
            return Err(X402Error::expired(format!("Payment request {} expired", request_id)));
        }
        match request.status {
            PaymentStatus::Pending => {}
            PaymentStatus::Expired => {
                return Err(X402Error::expired(format!("Payment request {} expired", request_id)))
            }
            other => {
                return Err(X402Error::invalid_state(format!(
                    "Payment request {} is {}, verify requires pending",
                    request_id, other
                )))
            }
        }

        let kind = self.registry.config(&request.network)?.kind;
        let message = canonical_message(
            request.amount,
            &request.currency,
            &request.from_address,
            &request.to_address,
        );
        if let Err(e) = verify_payment_signature(kind, &message, signature, &request.from_address) {
            tracing::warn!(request_id, error = %e, "payment signature rejected");
            self.record_rejection(request_id, &e).await;
            return Err(e);
        }

        if let Some(tx_hash) = tx_hash {
            let info = self
                .registry
                .get_transaction_status(tx_hash, &request.network, Some(self.config.verification_timeout))
                .await?;
            if let Err(e) = self.check_transaction(&request, kind, &info) {
                if matches!(e, X402Error::TransactionMismatch(_)) {
                    self.fail_verification(request_id, tx_hash, &e).await?;
                }
                return Err(e);
            }
        }

        let signature = signature.to_string();
        let tx_hash = tx_hash.map(String::from);
        let verified = self
            .update(request_id, |request, now| {
                if request.status != PaymentStatus::Pending {
                    return Err(X402Error::invalid_state(format!(
                        "Payment request {} is {}, verify requires pending",
                        request.id, request.status
                    )));
                }
                request.status = PaymentStatus::Verified;
                request.verified_at = Some(now);
                request.signature = Some(signature.clone());
                request.transaction_hash = tx_hash.clone();
                request.failure_reason = None;
                request.failure_code = None;
                Ok(())
            })
            .await?;

        tracing::info!(
            request_id,
            payer = %verified.from_address,
            on_chain = verified.transaction_hash.is_some(),
            "payment verified"
        );
        self.emit(events::PAYMENT_VERIFIED, &verified, None).await;

        Ok(VerificationResult {
            request_id: verified.id.clone(),
            status: verified.status,
            verified_at: verified.verified_at.unwrap_or(verified.created_at),
            payer: verified.from_address.clone(),
            on_chain: verified.transaction_hash.is_some(),
            transaction_hash: verified.transaction_hash,
        })
    }

    /// Compare a looked-up transaction with the claimed payment
    fn check_transaction(
        &self,
        request: &PaymentRequest,
        kind: NetworkKind,
        info: &TransactionInfo,
    ) -> Result<()> {
        match info.state {
            TxState::Confirmed => {}
            TxState::Pending => {
                return Err(X402Error::transaction_pending(format!(
                    "Transaction {} is not mined yet",
                    info.hash
                )))
            }
            TxState::NotFound => {
                return Err(X402Error::transaction_mismatch(format!(
                    "Transaction {} not found on {}",
                    info.hash, request.network
                )))
            }
            TxState::Failed => {
                return Err(X402Error::transaction_mismatch(format!(
                    "Transaction {} reverted",
                    info.hash
                )))
            }
        }

        let same = |a: Option<&str>, b: &str| match (kind, a) {
            (NetworkKind::Evm, Some(a)) => a.eq_ignore_ascii_case(b),
            (NetworkKind::Solana, Some(a)) => a == b,
            (_, None) => false,
        };

        if !same(info.from.as_deref(), &request.from_address) {
            return Err(X402Error::transaction_mismatch(format!(
                "Transaction sender {:?} is not the payer {}",
                info.from, request.from_address
            )));
        }
        if !same(info.to.as_deref(), &request.to_address) {
            return Err(X402Error::transaction_mismatch(format!(
                "Transaction recipient {:?} is not the payee {}",
                info.to, request.to_address
            )));
        }
        if !info
            .currency
            .as_deref()
            .map(|c| c.eq_ignore_ascii_case(&request.currency))
            .unwrap_or(false)
        {
            return Err(X402Error::transaction_mismatch(format!(
                "Transaction moved {:?}, payment is in {}",
                info.currency, request.currency
            )));
        }
        let amount = info.amount.ok_or_else(|| {
            X402Error::transaction_mismatch(format!("Transaction {} carries no amount", info.hash))
        })?;
        if (amount - request.amount).abs() > self.config.amount_tolerance {
            return Err(X402Error::transaction_mismatch(format!(
                "Transaction amount {} differs from {} by more than {}",
                amount, request.amount, self.config.amount_tolerance
            )));
        }
        Ok(())
    }

    /// Note a rejected signature on a request that stays PENDING
    async fn record_rejection(&self, request_id: &str, error: &X402Error) {
        let reason = error.to_string();
        let code = error.code();
        let result = self
            .update(request_id, |request, _| {
                if request.status == PaymentStatus::Pending {
                    request.failure_reason = Some(reason.clone());
                    request.failure_code = Some(code.to_string());
                }
                Ok(())
            })
            .await;
        if let Err(e) = result {
            tracing::debug!(request_id, error = %e, "could not record signature rejection");
        }
    }

    async fn fail_verification(&self, request_id: &str, tx_hash: &str, error: &X402Error) -> Result<()> {
        let reason = error.to_string();
        let failed = self
            .update(request_id, |request, now| {
                if request.status != PaymentStatus::Pending {
                    return Err(X402Error::invalid_state(format!(
                        "Payment request {} is {}",
                        request.id, request.status
                    )));
                }
                request.status = PaymentStatus::Failed;
                request.failed_at = Some(now);
                request.transaction_hash = Some(tx_hash.to_string());
                request.failure_reason = Some(reason.clone());
                request.failure_code = Some(error.code().to_string());
                Ok(())
            })
            .await?;

        tracing::warn!(request_id, tx_hash, reason = %reason, "disputed payment marked failed");
        self.emit(
            events::PAYMENT_FAILED,
            &failed,
            Some(json!({"error": {"code": error.code(), "message": reason}})),
        )
        .await;
        Ok(())
    }

    /// Collect the platform fee and pay the payee
    ///
    /// Only VERIFIED requests settle. Any failure after the request has been
    /// claimed leaves it FAILED with the cause recorded; nothing is retried.
    pub async fn settle(&self, caller: &str, request_id: &str) -> Result<SettlementReceipt> {
        self.admit(caller, operations::PAYMENT_SETTLE).await?;

        let claimed = self
            .update(request_id, |request, _| {
                if request.status != PaymentStatus::Verified {
                    return Err(X402Error::invalid_state(format!(
                        "Payment request {} is {}, settle requires verified",
                        request.id, request.status
                    )));
                }
                request.status = PaymentStatus::Settling;
                Ok(())
            })
            .await?;
        tracing::info!(request_id, version = claimed.version, "settlement started");

        let mut breakdown: Option<FeeBreakdown> = None;
        let outcome = async {
            let fee = self
                .fees
                .fee_for(claimed.amount, &claimed.currency, &claimed.network)
                .await?;
            breakdown = Some(fee);
            self.fees
                .collect_fee(
                    claimed.amount,
                    &claimed.currency,
                    &claimed.network,
                    &claimed.from_address,
                    &claimed.to_address,
                    &fee,
                )
                .await
        }
        .await;

        match outcome {
            Ok(settlement) => self.finish_settlement(request_id, settlement).await,
            Err(e) => {
                self.fail_settlement(request_id, &claimed, breakdown, &e).await?;
                Err(e)
            }
        }
    }

    async fn finish_settlement(
        &self,
        request_id: &str,
        settlement: SettlementResult,
    ) -> Result<SettlementReceipt> {
        let settled = self
            .update(request_id, |request, now| {
                if request.status != PaymentStatus::Settling {
                    return Err(X402Error::invalid_state(format!(
                        "Payment request {} left settling while its transfers ran",
                        request.id
                    )));
                }
                request.status = PaymentStatus::Settled;
                request.settled_at = Some(now);
                request.transaction_hash = settlement
                    .split_tx
                    .clone()
                    .or_else(|| settlement.payee_tx.clone());
                request.settlement = Some(settlement.clone());
                Ok(())
            })
            .await?;

        let fee = settlement.fee_breakdown;
        tracing::info!(
            request_id,
            method = ?settlement.method,
            total_fee = %fee.total_fee,
            net_amount = %fee.net_amount,
            transactions = ?settlement.transaction_hashes(),
            "payment settled"
        );
        self.emit(
            events::PAYMENT_SETTLED,
            &settled,
            Some(json!({ "settlement": settlement })),
        )
        .await;

        Ok(SettlementReceipt {
            request_id: settled.id.clone(),
            status: settled.status,
            settled_at: settled.settled_at.unwrap_or(settled.created_at),
            settlement,
        })
    }

    async fn fail_settlement(
        &self,
        request_id: &str,
        claimed: &PaymentRequest,
        breakdown: Option<FeeBreakdown>,
        error: &X402Error,
    ) -> Result<()> {
        // A partial native split keeps the payee leg for reconciliation
        let partial = match (error, breakdown) {
            (X402Error::PartialSettlement { payee_tx, .. }, Some(fee)) => Some(SettlementResult {
                method: SettlementMethod::DualTransaction,
                network: claimed.network.clone(),
                currency: claimed.currency.clone(),
                fee_breakdown: fee,
                payee_tx: Some(payee_tx.clone()),
                fee_tx: None,
                split_tx: None,
                fee_wallet: self.fees.fee_wallet(&claimed.network).ok().map(String::from),
            }),
            _ => None,
        };

        let reason = error.to_string();
        let failed = self
            .update(request_id, |request, now| {
                request.status = PaymentStatus::Failed;
                request.failed_at = Some(now);
                request.failure_reason = Some(reason.clone());
                request.failure_code = Some(error.code().to_string());
                if let Some(partial) = &partial {
                    request.transaction_hash = partial.payee_tx.clone();
                    request.settlement = Some(partial.clone());
                }
                Ok(())
            })
            .await?;

        if failed.needs_reconciliation() {
            tracing::error!(
                request_id,
                payee_tx = ?failed.transaction_hash,
                reason = %reason,
                "payee paid but fee uncollected; manual reconciliation required"
            );
        } else {
            tracing::warn!(request_id, code = error.code(), reason = %reason, "settlement failed");
        }

        self.emit(
            events::PAYMENT_FAILED,
            &failed,
            Some(json!({"error": {"code": error.code(), "message": reason}})),
        )
        .await;
        Ok(())
    }

    /// Withdraw a PENDING or VERIFIED request
    pub async fn cancel(&self, caller: &str, request_id: &str, reason: &str) -> Result<PaymentRequest> {
        self.admit(caller, operations::PAYMENT_CANCEL).await?;

        let cancelled = self
            .update(request_id, |request, now| {
                if !matches!(request.status, PaymentStatus::Pending | PaymentStatus::Verified) {
                    return Err(X402Error::invalid_state(format!(
                        "Payment request {} is {} and can no longer be cancelled",
                        request.id, request.status
                    )));
                }
                request.status = PaymentStatus::Cancelled;
                request.cancelled_at = Some(now);
                request.cancel_reason = Some(reason.to_string());
                Ok(())
            })
            .await?;

        tracing::info!(request_id, reason, "payment request cancelled");
        self.emit(
            events::PAYMENT_CANCELLED,
            &cancelled,
            Some(json!({ "reason": reason })),
        )
        .await;
        Ok(cancelled)
    }

    /// Current snapshot of a request
    ///
    /// A request found past its TTL is expired on the way out.
    pub async fn get_status(&self, caller: &str, request_id: &str) -> Result<PaymentRequest> {
        self.admit(caller, operations::PAYMENT_GET).await?;

        let request = self.load(request_id).await?;
        if self.is_due(&request, self.clock.now()) {
            self.expire(request).await?;
            return self.load(request_id).await;
        }
        Ok(request)
    }

    /// Expire every overdue PENDING or VERIFIED request; returns their ids
    pub async fn expire_stale(&self) -> Result<Vec<String>> {
        let now = self.clock.now();
        let mut expired = Vec::new();

        for status in [PaymentStatus::Pending, PaymentStatus::Verified] {
            for request in self.payments.list_by_status(status).await? {
                if !self.is_due(&request, now) {
                    continue;
                }
                let id = request.id.clone();
                if self.expire(request).await? {
                    expired.push(id);
                }
            }
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired stale payment requests");
        }
        Ok(expired)
    }

    /// FAILED requests whose payee leg went through but whose fee leg did not
    pub async fn reconciliation_candidates(&self) -> Result<Vec<PaymentRequest>> {
        Ok(self
            .payments
            .list_by_status(PaymentStatus::Failed)
            .await?
            .into_iter()
            .filter(PaymentRequest::needs_reconciliation)
            .collect())
    }

    /// Platform fees collected by requests settled in `[start, end)`
    pub async fn fee_summary(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        currency: Option<&str>,
        network: Option<&str>,
    ) -> Result<FeeCollectionSummary> {
        if end < start {
            return Err(X402Error::validation(format!(
                "Summary period ends ({}) before it starts ({})",
                end, start
            )));
        }

        let mut summary = FeeCollectionSummary::new(start, end, currency, network);
        for request in self.payments.list_by_status(PaymentStatus::Settled).await? {
            summary.record(&request);
        }
        tracing::debug!(
            %start,
            %end,
            transactions = summary.transaction_count,
            "fee collection summary"
        );
        Ok(summary)
    }

    /// Networks, currencies, schemes and limits this facilitator accepts
    pub fn supported(&self) -> Capabilities {
        let networks = self
            .registry
            .networks()
            .into_iter()
            .filter_map(|id| {
                let config = self.registry.config(&id).ok()?;
                let mut currencies = vec![config.native_currency.clone()];
                currencies.extend(config.tokens.iter().map(|t| t.symbol.clone()));
                Some(SupportedNetwork {
                    network: id,
                    currencies,
                })
            })
            .collect();

        Capabilities {
            x402_version: X402_VERSION,
            networks,
            schemes: [schemes::EXACT, schemes::UPTO, schemes::STREAMING]
                .into_iter()
                .map(String::from)
                .collect(),
            limits: Limits {
                min_amount: self.config.min_amount,
                max_amount: self.config.max_amount,
                payment_ttl_seconds: self.config.payment_ttl.as_secs(),
            },
        }
    }
}
