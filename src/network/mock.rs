//! Scripted chain client and signer for tests

use super::{
    ChainClient, FeeEstimate, RecoverableSignature, TransactionInfo, TransactionSigner, TxKind,
    TxState,
};
use crate::types::{NetworkConfig, NetworkKind, TokenConfig};
use crate::{Result, X402Error};
use async_trait::async_trait;
use ethereum_types::H256;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// How a recorded transfer was submitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferKind {
    Native,
    Token,
    Split {
        fee_wallet: String,
        fee_amount: Decimal,
    },
}

/// A transfer the scripted client accepted
#[derive(Debug, Clone)]
pub struct SentTransfer {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub amount: Decimal,
    pub currency: String,
    pub kind: TransferKind,
}

/// In-memory chain with scriptable balances and failures
pub struct ScriptedChainClient {
    config: NetworkConfig,
    balances: Mutex<HashMap<(String, String), Decimal>>,
    transactions: Mutex<HashMap<String, TransactionInfo>>,
    transfers: Mutex<Vec<SentTransfer>>,
    fail_send_at: Mutex<Option<usize>>,
    fail_all: AtomicBool,
    delay: Mutex<Option<Duration>>,
    sends: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedChainClient {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            balances: Mutex::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
            transfers: Mutex::new(Vec::new()),
            fail_send_at: Mutex::new(None),
            fail_all: AtomicBool::new(false),
            delay: Mutex::new(None),
            sends: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn polygon() -> Self {
        Self::new(NetworkConfig::polygon())
    }

    pub fn ethereum() -> Self {
        Self::new(NetworkConfig::ethereum())
    }

    pub fn set_balance(&self, address: &str, currency: &str, amount: Decimal) {
        self.balances
            .lock()
            .unwrap()
            .insert((address.to_lowercase(), currency.to_string()), amount);
    }

    pub fn balance(&self, address: &str, currency: &str) -> Decimal {
        self.balances
            .lock()
            .unwrap()
            .get(&(address.to_lowercase(), currency.to_string()))
            .copied()
            .unwrap_or_default()
    }

    pub fn add_transaction(&self, info: TransactionInfo) {
        self.transactions
            .lock()
            .unwrap()
            .insert(info.hash.clone(), info);
    }

    /// Fail the `n`-th send (1-based) with a chain error
    pub fn fail_send_at(&self, n: usize) {
        *self.fail_send_at.lock().unwrap() = Some(n);
    }

    pub fn fail_all_calls(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn transfers(&self) -> Vec<SentTransfer> {
        self.transfers.lock().unwrap().clone()
    }

    /// Calls that reached the client
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(X402Error::chain("node unreachable"));
        }
        Ok(())
    }

    fn record_send(
        &self,
        signer: &dyn TransactionSigner,
        to: &str,
        amount: Decimal,
        currency: &str,
        kind: TransferKind,
    ) -> Result<String> {
        let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.fail_send_at.lock().unwrap() == Some(n) {
            return Err(X402Error::chain(format!("send #{} rejected by node", n)));
        }

        let from = signer.address(self.config.kind)?;
        let debit = match &kind {
            TransferKind::Split { fee_amount, .. } => amount + *fee_amount,
            _ => amount,
        };
        let remaining = self.balance(&from, currency) - debit;
        self.set_balance(&from, currency, remaining);
        let credited = self.balance(to, currency) + amount;
        self.set_balance(to, currency, credited);

        let hash = format!("0x{:064x}", n);
        self.add_transaction(TransactionInfo {
            hash: hash.clone(),
            network: self.config.id.clone(),
            state: TxState::Confirmed,
            block_number: Some(100 + n as u64),
            confirmations: 1,
            from: Some(from.clone()),
            to: Some(to.to_string()),
            amount: Some(amount),
            currency: Some(currency.to_string()),
        });
        self.transfers.lock().unwrap().push(SentTransfer {
            hash: hash.clone(),
            from,
            to: to.to_string(),
            amount,
            currency: currency.to_string(),
            kind,
        });
        Ok(hash)
    }
}

#[async_trait]
impl ChainClient for ScriptedChainClient {
    fn config(&self) -> &NetworkConfig {
        &self.config
    }

    async fn native_balance(&self, address: &str) -> Result<Decimal> {
        self.enter().await?;
        Ok(self.balance(address, &self.config.native_currency))
    }

    async fn token_balance(&self, token: &TokenConfig, address: &str) -> Result<Decimal> {
        self.enter().await?;
        Ok(self.balance(address, &token.symbol))
    }

    async fn estimate_fee(&self, kind: TxKind) -> Result<FeeEstimate> {
        self.enter().await?;
        Ok(FeeEstimate {
            network: self.config.id.clone(),
            kind,
            currency: self.config.native_currency.clone(),
            gas_price: Some(30_000_000_000),
            gas_limit: Some(kind.evm_gas_limit()),
            estimated_fee: Decimal::from_str("0.00063").unwrap_or_default(),
        })
    }

    async fn send_native(
        &self,
        signer: &dyn TransactionSigner,
        to: &str,
        amount: Decimal,
    ) -> Result<String> {
        self.enter().await?;
        let currency = self.config.native_currency.clone();
        self.record_send(signer, to, amount, &currency, TransferKind::Native)
    }

    async fn send_token(
        &self,
        signer: &dyn TransactionSigner,
        token: &TokenConfig,
        to: &str,
        amount: Decimal,
    ) -> Result<String> {
        self.enter().await?;
        self.record_send(signer, to, amount, &token.symbol, TransferKind::Token)
    }

    async fn split_token(
        &self,
        signer: &dyn TransactionSigner,
        token: &TokenConfig,
        _split_contract: &str,
        payee: &str,
        net_amount: Decimal,
        fee_wallet: &str,
        fee_amount: Decimal,
    ) -> Result<String> {
        self.enter().await?;
        let hash = self.record_send(
            signer,
            payee,
            net_amount,
            &token.symbol,
            TransferKind::Split {
                fee_wallet: fee_wallet.to_string(),
                fee_amount,
            },
        )?;
        let credited = self.balance(fee_wallet, &token.symbol) + fee_amount;
        self.set_balance(fee_wallet, &token.symbol, credited);
        Ok(hash)
    }

    async fn transaction(&self, hash: &str) -> Result<TransactionInfo> {
        self.enter().await?;
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .unwrap_or_else(|| TransactionInfo::not_found(hash, &self.config.id)))
    }
}

/// Signer that reports a fixed address and produces dummy signatures
#[derive(Debug, Clone)]
pub struct ScriptedSigner {
    address: String,
}

impl ScriptedSigner {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
        }
    }
}

#[async_trait]
impl TransactionSigner for ScriptedSigner {
    fn address(&self, _kind: NetworkKind) -> Result<String> {
        Ok(self.address.clone())
    }

    async fn sign_prehash(&self, _hash: H256) -> Result<RecoverableSignature> {
        Ok(RecoverableSignature {
            r: [1u8; 32],
            s: [2u8; 32],
            recovery_id: 0,
        })
    }

    async fn sign_ed25519(&self, _message: &[u8]) -> Result<[u8; 64]> {
        Ok([0u8; 64])
    }
}
