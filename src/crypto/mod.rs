//! Cryptographic utilities for x402 payments
//!
//! This module provides the primitives the facilitator needs to trust a payment
//! proof and the webhook subsystem needs to authenticate its deliveries.
//!
//! # Architecture
//!
//! - [`signature`] - Payer signature verification (secp256k1 recovery for EVM
//!   networks, ed25519 for Solana) and signing helpers
//! - [`hmac`] - HMAC-SHA256 webhook signatures with constant-time verification
//!
//! # Examples
//!
//! ## Verifying a payer signature
//!
//! ```
//! use x402_settlement::crypto::signature;
//! use x402_settlement::types::NetworkKind;
//! use rust_decimal::Decimal;
//!
//! # fn example() -> x402_settlement::Result<()> {
//! let private_key = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
//! let payer = format!("{:?}", signature::address_from_private_key(private_key)?);
//! let payee = "0x209693Bc6afc0C5328bA36FaF03C514EF312287C";
//!
//! let message = signature::canonical_message(Decimal::new(5000, 2), "USDC", &payer, payee);
//! let sig = signature::sign_payment_message(&message, private_key)?;
//!
//! signature::verify_payment_signature(NetworkKind::Evm, &message, &sig, &payer)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Signing a webhook body
//!
//! ```
//! use x402_settlement::crypto::hmac;
//!
//! # fn example() -> x402_settlement::Result<()> {
//! let body = hmac::canonical_json(&serde_json::json!({"event_type": "payment.settled"}))?;
//! let header = hmac::compute_signature(b"shared-secret", &body)?;
//! assert!(hmac::verify_signature(b"shared-secret", &body, &header));
//! # Ok(())
//! # }
//! ```

pub mod hmac;
pub mod signature;

#[cfg(test)]
mod tests;

// Re-export commonly used items
pub use signature::{
    address_from_private_key, canonical_message, keccak256, personal_message_hash,
    sign_message_hash, sign_payment_message, verify_evm_signature, verify_payment_signature,
    verify_solana_signature,
};
