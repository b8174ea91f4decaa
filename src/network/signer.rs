//! Transaction signing capability
//!
//! Key custody is not this crate's concern. Chain clients only ever see a
//! [`TransactionSigner`]; production deployments back it with an HSM or a
//! key-management service, and [`LocalSigner`] holds raw keys for
//! development and tests.

use crate::crypto::signature::{address_from_private_key, parse_secret_key};
use crate::types::NetworkKind;
use crate::{Result, X402Error};
use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey};
use ethereum_types::{Address, H256};
use secp256k1::{Message, Secp256k1, SecretKey};

/// A recoverable secp256k1 signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// Raw recovery id (0 or 1)
    pub recovery_id: u8,
}

/// Opaque signing capability for one payer
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Address this signer controls on a chain family
    fn address(&self, kind: NetworkKind) -> Result<String>;

    /// Sign a 32-byte digest with the secp256k1 key
    async fn sign_prehash(&self, hash: H256) -> Result<RecoverableSignature>;

    /// Sign a message with the ed25519 key
    async fn sign_ed25519(&self, message: &[u8]) -> Result<[u8; 64]>;
}

/// Signer holding keys in process memory
#[derive(Clone, Default)]
pub struct LocalSigner {
    evm: Option<(SecretKey, Address)>,
    solana: Option<SigningKey>,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("evm", &self.evm.as_ref().map(|(_, addr)| *addr))
            .field(
                "solana",
                &self
                    .solana
                    .as_ref()
                    .map(|key| bs58::encode(key.verifying_key().as_bytes()).into_string()),
            )
            .finish()
    }
}

impl LocalSigner {
    /// Signer with no keys; add them with `with_*`
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hex secp256k1 private key for EVM networks
    pub fn with_evm_key(mut self, private_key: &str) -> Result<Self> {
        let secret = parse_secret_key(private_key)?;
        let address = address_from_private_key(private_key)?;
        self.evm = Some((secret, address));
        Ok(self)
    }

    /// Add a Solana ed25519 key
    ///
    /// Accepts a 32-byte seed as hex, or a 64-byte keypair as base58 (the
    /// format Solana wallets export).
    pub fn with_solana_key(mut self, key: &str) -> Result<Self> {
        let stripped = key.trim_start_matches("0x");
        let bytes = if stripped.len() == 64 && stripped.chars().all(|c| c.is_ascii_hexdigit()) {
            hex::decode(stripped).map_err(|_| X402Error::config("Invalid hex Solana key"))?
        } else {
            bs58::decode(key)
                .into_vec()
                .map_err(|_| X402Error::config("Solana key is neither hex nor base58"))?
        };

        let seed: [u8; 32] = match bytes.len() {
            32 | 64 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&bytes[..32]);
                seed
            }
            n => {
                return Err(X402Error::config(format!(
                    "Solana key must be 32 or 64 bytes, got {}",
                    n
                )))
            }
        };

        self.solana = Some(SigningKey::from_bytes(&seed));
        Ok(self)
    }
}

#[async_trait]
impl TransactionSigner for LocalSigner {
    fn address(&self, kind: NetworkKind) -> Result<String> {
        match kind {
            NetworkKind::Evm => self
                .evm
                .as_ref()
                .map(|(_, address)| format!("0x{}", hex::encode(address.as_bytes())))
                .ok_or_else(|| X402Error::config("No EVM key loaded")),
            NetworkKind::Solana => self
                .solana
                .as_ref()
                .map(|key| bs58::encode(key.verifying_key().as_bytes()).into_string())
                .ok_or_else(|| X402Error::config("No Solana key loaded")),
        }
    }

    async fn sign_prehash(&self, hash: H256) -> Result<RecoverableSignature> {
        let (secret, _) = self
            .evm
            .as_ref()
            .ok_or_else(|| X402Error::config("No EVM key loaded"))?;

        let secp = Secp256k1::new();
        let message = Message::from_digest_slice(hash.as_bytes())
            .map_err(|_| X402Error::invalid_signature("Invalid message hash"))?;
        let (recovery_id, compact) = secp
            .sign_ecdsa_recoverable(&message, secret)
            .serialize_compact();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[..32]);
        s.copy_from_slice(&compact[32..]);

        Ok(RecoverableSignature {
            r,
            s,
            recovery_id: recovery_id.to_i32() as u8,
        })
    }

    async fn sign_ed25519(&self, message: &[u8]) -> Result<[u8; 64]> {
        let key = self
            .solana
            .as_ref()
            .ok_or_else(|| X402Error::config("No Solana key loaded"))?;
        Ok(key.sign(message).to_bytes())
    }
}
