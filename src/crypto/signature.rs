//! Signature utilities

use crate::types::NetworkKind;
use crate::{Result, X402Error};
use ethereum_types::{Address, H256};
use k256::ecdsa::{RecoveryId, Signature as K256Signature, VerifyingKey};
use rust_decimal::Decimal;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use std::str::FromStr;

/// Canonical payment message signed by the payer
///
/// `amount|currency|from|to`, with the amount normalized so `50.00` and `50`
/// produce the same message.
pub fn canonical_message(amount: Decimal, currency: &str, from: &str, to: &str) -> String {
    format!("{}|{}|{}|{}", amount.normalize(), currency, from, to)
}

/// EIP-191 `personal_sign` digest of a message
pub fn personal_message_hash(message: &[u8]) -> H256 {
    let mut prefixed = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    prefixed.extend_from_slice(message);
    H256::from(keccak256(&prefixed))
}

/// Verify a 65-byte `r || s || v` secp256k1 signature against an address
pub fn verify_evm_signature(
    signature: &str,
    message_hash: H256,
    expected_address: Address,
) -> Result<bool> {
    let sig_bytes = hex::decode(signature.trim_start_matches("0x"))
        .map_err(|_| X402Error::invalid_signature("Invalid hex signature"))?;

    if sig_bytes.len() != 65 {
        return Err(X402Error::invalid_signature("Signature must be 65 bytes"));
    }

    // Accept both raw (0/1) and Ethereum-style (27/28) recovery bytes
    let v = match sig_bytes[64] {
        27 | 28 => sig_bytes[64] - 27,
        v => v,
    };

    let recovery_id =
        RecoveryId::try_from(v).map_err(|_| X402Error::invalid_signature("Invalid recovery ID"))?;

    let k256_sig = K256Signature::try_from(&sig_bytes[0..64])
        .map_err(|_| X402Error::invalid_signature("Invalid signature format"))?;

    let verifying_key =
        VerifyingKey::recover_from_prehash(message_hash.as_bytes(), &k256_sig, recovery_id)
            .map_err(|_| X402Error::invalid_signature("Failed to recover public key"))?;

    let recovered_address = ethereum_address_from_pubkey(&verifying_key)?;

    Ok(recovered_address == expected_address)
}

/// Sign a message hash with a private key
///
/// Returns `0x`-prefixed `r || s || v` with `v` in {27, 28}.
pub fn sign_message_hash(message_hash: H256, private_key: &str) -> Result<String> {
    let secret_key = parse_secret_key(private_key)?;

    let secp = Secp256k1::new();
    let message = Message::from_digest_slice(message_hash.as_bytes())
        .map_err(|_| X402Error::invalid_signature("Invalid message hash"))?;

    let (recovery_id, compact) = secp
        .sign_ecdsa_recoverable(&message, &secret_key)
        .serialize_compact();

    let mut sig_bytes = [0u8; 65];
    sig_bytes[0..64].copy_from_slice(&compact);
    sig_bytes[64] = recovery_id.to_i32() as u8 + 27;

    Ok(format!("0x{}", hex::encode(sig_bytes)))
}

/// Derive the Ethereum address controlled by a private key
pub fn address_from_private_key(private_key: &str) -> Result<Address> {
    let secret_key = parse_secret_key(private_key)?;
    let secp = Secp256k1::new();
    let public_key = PublicKey::from_secret_key(&secp, &secret_key);
    let uncompressed = public_key.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    Ok(Address::from_slice(&hash[12..]))
}

pub(crate) fn parse_secret_key(private_key: &str) -> Result<SecretKey> {
    let private_key_bytes = hex::decode(private_key.trim_start_matches("0x"))
        .map_err(|_| X402Error::invalid_signature("Invalid hex private key"))?;

    SecretKey::from_slice(&private_key_bytes)
        .map_err(|_| X402Error::invalid_signature("Invalid private key"))
}

/// Convert a public key to an Ethereum address
fn ethereum_address_from_pubkey(pubkey: &VerifyingKey) -> Result<Address> {
    let encoded = pubkey.to_encoded_point(false);
    let pubkey_bytes = encoded.as_bytes();
    if pubkey_bytes.len() != 65 {
        return Err(X402Error::invalid_signature("Invalid public key length"));
    }

    // Drop the 0x04 prefix, the address is the last 20 bytes of the hash
    let pubkey_hash = keccak256(&pubkey_bytes[1..]);
    Ok(Address::from_slice(&pubkey_hash[12..]))
}

/// Keccak-256 hash function
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    use sha3::{Digest, Keccak256};
    Keccak256::digest(data).into()
}

/// Verify an ed25519 signature from a base58 Solana address
///
/// The signature may be hex (optionally `0x`-prefixed) or base58.
pub fn verify_solana_signature(signature: &str, message: &[u8], address: &str) -> Result<bool> {
    use ed25519_dalek::{Signature, VerifyingKey};

    let key_bytes: [u8; 32] = bs58::decode(address)
        .into_vec()
        .map_err(|_| X402Error::invalid_signature("Invalid base58 address"))?
        .try_into()
        .map_err(|_| X402Error::invalid_signature("Solana address must be 32 bytes"))?;

    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|_| X402Error::invalid_signature("Invalid ed25519 public key"))?;

    let sig_bytes: [u8; 64] = decode_signature_bytes(signature)?
        .try_into()
        .map_err(|_| X402Error::invalid_signature("Signature must be 64 bytes"))?;

    let signature = Signature::from_bytes(&sig_bytes);
    Ok(verifying_key.verify_strict(message, &signature).is_ok())
}

fn decode_signature_bytes(signature: &str) -> Result<Vec<u8>> {
    let stripped = signature.trim_start_matches("0x");
    if stripped.len() == 128 && stripped.chars().all(|c| c.is_ascii_hexdigit()) {
        return hex::decode(stripped).map_err(|_| X402Error::invalid_signature("Invalid hex"));
    }
    bs58::decode(signature)
        .into_vec()
        .map_err(|_| X402Error::invalid_signature("Signature is neither hex nor base58"))
}

/// Verify that `signature` over the canonical message was produced by `payer`
///
/// Fails with `InvalidSignature` on malformed input or a signer mismatch.
pub fn verify_payment_signature(
    kind: NetworkKind,
    message: &str,
    signature: &str,
    payer: &str,
) -> Result<()> {
    if signature.trim().is_empty() {
        return Err(X402Error::invalid_signature("Signature is empty"));
    }

    let valid = match kind {
        NetworkKind::Evm => {
            let payer_address = Address::from_str(payer.trim_start_matches("0x"))
                .map_err(|_| X402Error::invalid_signature("Invalid payer address"))?;
            verify_evm_signature(
                signature,
                personal_message_hash(message.as_bytes()),
                payer_address,
            )?
        }
        NetworkKind::Solana => verify_solana_signature(signature, message.as_bytes(), payer)?,
    };

    if valid {
        Ok(())
    } else {
        Err(X402Error::invalid_signature(
            "Signature was not produced by the payer",
        ))
    }
}

/// Sign the canonical message as an EVM payer (EIP-191)
pub fn sign_payment_message(message: &str, private_key: &str) -> Result<String> {
    sign_message_hash(personal_message_hash(message.as_bytes()), private_key)
}
