//! Tests for cryptographic utilities

use super::signature;
use crate::types::NetworkKind;
use crate::X402Error;
use ed25519_dalek::{Signer, SigningKey};
use ethereum_types::Address;
use rust_decimal::Decimal;
use std::str::FromStr;

const PRIVATE_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const PAYEE: &str = "0x209693Bc6afc0C5328bA36FaF03C514EF312287C";

fn payer_address() -> String {
    format!("{:?}", signature::address_from_private_key(PRIVATE_KEY).unwrap())
}

#[test]
fn test_address_from_private_key() {
    let address = signature::address_from_private_key(PRIVATE_KEY).unwrap();
    assert_eq!(
        address,
        Address::from_str("2c7536E3605D9C16a7a3D7b1898e529396a65c23").unwrap()
    );
}

#[test]
fn test_canonical_message_normalizes_amount() {
    let a = signature::canonical_message(Decimal::new(5000, 2), "USDC", "0xa", "0xb");
    let b = signature::canonical_message(Decimal::from(50), "USDC", "0xa", "0xb");
    assert_eq!(a, "50|USDC|0xa|0xb");
    assert_eq!(a, b);
}

#[test]
fn test_evm_signature_roundtrip() {
    let payer = payer_address();
    let message = signature::canonical_message(Decimal::new(5000, 2), "USDC", &payer, PAYEE);
    let sig = signature::sign_payment_message(&message, PRIVATE_KEY).unwrap();

    assert_eq!(sig.len(), 2 + 130);
    assert!(signature::verify_payment_signature(NetworkKind::Evm, &message, &sig, &payer).is_ok());
}

#[test]
fn test_evm_signature_for_other_message_is_rejected() {
    let payer = payer_address();
    let signed = signature::canonical_message(Decimal::new(5000, 2), "USDC", &payer, PAYEE);
    let claimed = signature::canonical_message(Decimal::new(50000, 2), "USDC", &payer, PAYEE);
    let sig = signature::sign_payment_message(&signed, PRIVATE_KEY).unwrap();

    let result = signature::verify_payment_signature(NetworkKind::Evm, &claimed, &sig, &payer);
    assert!(matches!(result, Err(X402Error::InvalidSignature(_))));
}

#[test]
fn test_evm_signature_from_other_signer_is_rejected() {
    let message = "10|ETH|0xa|0xb";
    let sig = signature::sign_payment_message(message, PRIVATE_KEY).unwrap();

    let result = signature::verify_payment_signature(NetworkKind::Evm, message, &sig, PAYEE);
    assert!(matches!(result, Err(X402Error::InvalidSignature(_))));
}

#[test]
fn test_malformed_signatures() {
    let payer = payer_address();
    let wrong_length = "ab".repeat(64);
    for bad in ["", "not-hex", "0xdeadbeef", wrong_length.as_str()] {
        let result = signature::verify_payment_signature(NetworkKind::Evm, "1|ETH|a|b", bad, &payer);
        assert!(
            matches!(result, Err(X402Error::InvalidSignature(_))),
            "expected InvalidSignature for {:?}",
            bad
        );
    }
}

#[test]
fn test_solana_signature_roundtrip() {
    let signing_key = SigningKey::from_bytes(&[7u8; 32]);
    let payer = bs58::encode(signing_key.verifying_key().to_bytes()).into_string();
    let message = signature::canonical_message(Decimal::new(25, 1), "SOL", &payer, "Recipient");

    let sig = signing_key.sign(message.as_bytes());
    let hex_sig = hex::encode(sig.to_bytes());
    let b58_sig = bs58::encode(sig.to_bytes()).into_string();

    assert!(signature::verify_payment_signature(NetworkKind::Solana, &message, &hex_sig, &payer).is_ok());
    assert!(signature::verify_payment_signature(NetworkKind::Solana, &message, &b58_sig, &payer).is_ok());

    let other = signature::canonical_message(Decimal::new(26, 1), "SOL", &payer, "Recipient");
    let result = signature::verify_payment_signature(NetworkKind::Solana, &other, &hex_sig, &payer);
    assert!(matches!(result, Err(X402Error::InvalidSignature(_))));
}

#[test]
fn test_solana_invalid_address() {
    let result = signature::verify_solana_signature(&"00".repeat(64), b"msg", "0OIl");
    assert!(matches!(result, Err(X402Error::InvalidSignature(_))));
}
