//! Core types for the settlement core
//!
//! Plain data shared by the facilitator, the fee collector, the network
//! registry and the webhook subsystem.
//!
//! # Architecture
//!
//! - [`network`] - Network configuration and asset resolution
//! - [`payment`] - Payment requests, fee breakdowns and settlement results
//! - [`facilitator`] - Facilitator configuration and capability descriptor
//! - [`webhook`] - Webhook delivery records and subscriptions
//! - [`constants`] - Protocol constants (networks, currencies, schemes, events)
//!
//! # Examples
//!
//! ```
//! use x402_settlement::types::{CreatePaymentRequest, NetworkConfig};
//! use rust_decimal::Decimal;
//!
//! let input = CreatePaymentRequest::new(
//!     "order-42",
//!     Decimal::new(5000, 2),
//!     "USDC",
//!     "polygon",
//!     "0x857b06519E91e3A54538791bDbb0E22373e36b66",
//!     "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
//! );
//!
//! let polygon = NetworkConfig::polygon();
//! assert!(polygon.supports_currency(&input.currency));
//! ```

pub mod constants;
pub mod facilitator;
pub mod network;
pub mod payment;
pub mod webhook;

// Re-export commonly used types
pub use constants::{currencies, events, networks, operations, schemes};
pub use facilitator::{Capabilities, FacilitatorConfig, Limits, SupportedNetwork};
pub use network::{Asset, NetworkConfig, NetworkKind, TokenConfig};
pub use payment::{
    CreatePaymentRequest, FeeBreakdown, FeeCollectionSummary, FeeTotals, PaymentRequest,
    PaymentStatus, Scheme,
    SettlementMethod, SettlementReceipt, SettlementResult, VerificationResult, X402_VERSION,
};
pub use webhook::{DeliveryStatus, WebhookDeliveryRecord, WebhookStats, WebhookSubscription};
