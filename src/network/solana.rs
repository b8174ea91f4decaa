//! Solana over JSON-RPC
//!
//! Native SOL transfers are built as legacy system-program transfer
//! messages, signed through the [`TransactionSigner`] and submitted base64
//! encoded. Fees are deterministic: 5000 lamports per signature.

use super::rpc::JsonRpcClient;
use super::signer::TransactionSigner;
use super::units::{from_base_units, to_base_units};
use super::{ChainClient, FeeEstimate, TransactionInfo, TxKind, TxState};
use crate::types::{NetworkConfig, NetworkKind, TokenConfig};
use crate::{Result, X402Error};
use async_trait::async_trait;
use base64::Engine;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

/// Fee per signature in lamports
pub const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

/// Confirmations reported once a slot is finalized
const FINALIZED_CONFIRMATIONS: u64 = 32;

/// System program id (all zero bytes)
const SYSTEM_PROGRAM_ID: [u8; 32] = [0u8; 32];

/// System program `Transfer` instruction index
const SYSTEM_TRANSFER: u32 = 2;

pub(crate) fn decode_pubkey(raw: &str) -> Result<[u8; 32]> {
    bs58::decode(raw)
        .into_vec()
        .ok()
        .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
        .ok_or_else(|| X402Error::validation(format!("Invalid Solana address: {}", raw)))
}

fn push_compact_u16(out: &mut Vec<u8>, value: usize) {
    let mut remaining = value;
    loop {
        let mut byte = (remaining & 0x7f) as u8;
        remaining >>= 7;
        if remaining == 0 {
            out.push(byte);
            return;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

/// Serialized legacy message for a single system transfer
pub(crate) fn transfer_message(
    from: &[u8; 32],
    to: &[u8; 32],
    lamports: u64,
    recent_blockhash: &[u8; 32],
) -> Vec<u8> {
    let mut message = Vec::with_capacity(150);

    // 1 required signature, 0 read-only signed, 1 read-only unsigned (program)
    message.extend_from_slice(&[1, 0, 1]);

    push_compact_u16(&mut message, 3);
    message.extend_from_slice(from);
    message.extend_from_slice(to);
    message.extend_from_slice(&SYSTEM_PROGRAM_ID);

    message.extend_from_slice(recent_blockhash);

    push_compact_u16(&mut message, 1);
    message.push(2);
    push_compact_u16(&mut message, 2);
    message.extend_from_slice(&[0, 1]);

    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&SYSTEM_TRANSFER.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());
    push_compact_u16(&mut message, data.len());
    message.extend_from_slice(&data);

    message
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct Blockhash {
    blockhash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    slot: u64,
    #[serde(default)]
    confirmations: Option<u64>,
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    confirmation_status: Option<String>,
}

/// JSON-RPC client for Solana
#[derive(Debug)]
pub struct SolanaRpcClient {
    config: NetworkConfig,
    rpc: JsonRpcClient,
}

impl SolanaRpcClient {
    /// Connect to the cluster at `rpc_url`
    pub fn new(config: NetworkConfig, rpc_url: &str) -> Result<Self> {
        Self::with_rpc(config, JsonRpcClient::new(rpc_url)?)
    }

    pub fn with_rpc(config: NetworkConfig, rpc: JsonRpcClient) -> Result<Self> {
        if config.kind != NetworkKind::Solana {
            return Err(X402Error::config(format!(
                "{} is not a Solana network",
                config.id
            )));
        }
        Ok(Self { config, rpc })
    }

    fn spl_unsupported(&self, token: &TokenConfig) -> X402Error {
        X402Error::config(format!(
            "SPL token {} is not supported on {}",
            token.symbol, self.config.id
        ))
    }

    /// Value transfer performed by a jsonParsed transaction
    fn parse_transfer(&self, tx: &Value) -> Result<(Option<String>, Option<String>, Option<Decimal>)> {
        let instructions = tx
            .pointer("/transaction/message/instructions")
            .and_then(Value::as_array);

        let transfer = instructions.and_then(|list| {
            list.iter().find(|ix| {
                ix.get("program").and_then(Value::as_str) == Some("system")
                    && ix.pointer("/parsed/type").and_then(Value::as_str) == Some("transfer")
            })
        });

        let Some(info) = transfer.and_then(|ix| ix.pointer("/parsed/info")) else {
            return Ok((None, None, None));
        };

        let source = info.get("source").and_then(Value::as_str).map(String::from);
        let destination = info
            .get("destination")
            .and_then(Value::as_str)
            .map(String::from);
        let amount = info
            .get("lamports")
            .and_then(Value::as_u64)
            .map(|lamports| from_base_units(u128::from(lamports), self.config.native_decimals))
            .transpose()?;

        Ok((source, destination, amount))
    }
}

#[async_trait]
impl ChainClient for SolanaRpcClient {
    fn config(&self) -> &NetworkConfig {
        &self.config
    }

    async fn native_balance(&self, address: &str) -> Result<Decimal> {
        decode_pubkey(address)?;
        let balance: WithContext<u64> = self
            .rpc
            .call("getBalance", json!([address, {"commitment": "confirmed"}]))
            .await?;
        from_base_units(u128::from(balance.value), self.config.native_decimals)
    }

    async fn token_balance(&self, token: &TokenConfig, _address: &str) -> Result<Decimal> {
        Err(self.spl_unsupported(token))
    }

    async fn estimate_fee(&self, kind: TxKind) -> Result<FeeEstimate> {
        Ok(FeeEstimate {
            network: self.config.id.clone(),
            kind,
            currency: self.config.native_currency.clone(),
            gas_price: None,
            gas_limit: None,
            estimated_fee: from_base_units(
                u128::from(LAMPORTS_PER_SIGNATURE),
                self.config.native_decimals,
            )?,
        })
    }

    async fn send_native(
        &self,
        signer: &dyn TransactionSigner,
        to: &str,
        amount: Decimal,
    ) -> Result<String> {
        let from_address = signer.address(NetworkKind::Solana)?;
        let from = decode_pubkey(&from_address)?;
        let recipient = decode_pubkey(to)?;
        if from == recipient {
            return Err(X402Error::validation("Sender and recipient are the same account"));
        }

        let lamports = u64::try_from(to_base_units(amount, self.config.native_decimals)?)
            .map_err(|_| X402Error::validation(format!("Amount {} is out of range", amount)))?;

        let latest: WithContext<Blockhash> = self
            .rpc
            .call("getLatestBlockhash", json!([{"commitment": "finalized"}]))
            .await?;
        let blockhash = decode_pubkey(&latest.value.blockhash)
            .map_err(|_| X402Error::chain("Node returned an invalid blockhash"))?;

        let message = transfer_message(&from, &recipient, lamports, &blockhash);
        let signature = signer.sign_ed25519(&message).await?;

        let mut wire = Vec::with_capacity(1 + 64 + message.len());
        push_compact_u16(&mut wire, 1);
        wire.extend_from_slice(&signature);
        wire.extend_from_slice(&message);

        let encoded = base64::engine::general_purpose::STANDARD.encode(&wire);
        let tx_signature: String = self
            .rpc
            .call(
                "sendTransaction",
                json!([encoded, {"encoding": "base64", "preflightCommitment": "confirmed"}]),
            )
            .await?;

        tracing::info!(
            network = %self.config.id,
            from = %from_address,
            to = %to,
            tx_hash = %tx_signature,
            "transaction submitted"
        );
        Ok(tx_signature)
    }

    async fn send_token(
        &self,
        _signer: &dyn TransactionSigner,
        token: &TokenConfig,
        _to: &str,
        _amount: Decimal,
    ) -> Result<String> {
        Err(self.spl_unsupported(token))
    }

    async fn split_token(
        &self,
        _signer: &dyn TransactionSigner,
        token: &TokenConfig,
        _split_contract: &str,
        _payee: &str,
        _net_amount: Decimal,
        _fee_wallet: &str,
        _fee_amount: Decimal,
    ) -> Result<String> {
        Err(self.spl_unsupported(token))
    }

    async fn transaction(&self, hash: &str) -> Result<TransactionInfo> {
        let statuses: WithContext<Vec<Option<SignatureStatus>>> = self
            .rpc
            .call(
                "getSignatureStatuses",
                json!([[hash], {"searchTransactionHistory": true}]),
            )
            .await?;

        let Some(status) = statuses.value.into_iter().next().flatten() else {
            return Ok(TransactionInfo::not_found(hash, &self.config.id));
        };

        let mut info = TransactionInfo::not_found(hash, &self.config.id);
        info.block_number = Some(status.slot);

        if status.confirmation_status.as_deref() == Some("processed") {
            info.state = TxState::Pending;
            return Ok(info);
        }

        let tx: Option<Value> = self
            .rpc
            .call(
                "getTransaction",
                json!([hash, {
                    "encoding": "jsonParsed",
                    "commitment": "confirmed",
                    "maxSupportedTransactionVersion": 0
                }]),
            )
            .await?;
        let Some(tx) = tx else {
            info.state = TxState::Pending;
            return Ok(info);
        };

        let (from, to, amount) = self.parse_transfer(&tx)?;
        let failed = status.err.is_some()
            || tx
                .pointer("/meta/err")
                .map(|err| !err.is_null())
                .unwrap_or(false);

        info.state = if failed {
            TxState::Failed
        } else {
            TxState::Confirmed
        };
        info.confirmations = status
            .confirmations
            .map(|c| c + 1)
            .unwrap_or(FINALIZED_CONFIRMATIONS);
        info.from = from;
        info.to = to;
        info.amount = amount;
        info.currency = Some(self.config.native_currency.clone());
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::signer::LocalSigner;
    use mockito::Matcher;
    use std::str::FromStr;

    const SOLANA_SEED: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    fn account(byte: u8) -> String {
        bs58::encode([byte; 32]).into_string()
    }

    async fn mock_rpc(server: &mut mockito::Server, method: &str, result: Value) -> mockito::Mock {
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": method })))
            .with_status(200)
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string())
            .create_async()
            .await
    }

    fn client(server: &mockito::Server) -> SolanaRpcClient {
        SolanaRpcClient::new(NetworkConfig::solana(), &server.url()).unwrap()
    }

    #[test]
    fn test_compact_u16() {
        let mut out = Vec::new();
        push_compact_u16(&mut out, 3);
        push_compact_u16(&mut out, 0x80);
        push_compact_u16(&mut out, 0x3fff);
        assert_eq!(out, vec![0x03, 0x80, 0x01, 0xff, 0x7f]);
    }

    #[test]
    fn test_transfer_message_layout() {
        let from = [1u8; 32];
        let to = [2u8; 32];
        let blockhash = [3u8; 32];
        let message = transfer_message(&from, &to, 1_000, &blockhash);

        assert_eq!(message.len(), 150);
        assert_eq!(&message[..4], &[1, 0, 1, 3]);
        assert_eq!(&message[4..36], &from);
        assert_eq!(&message[68..100], &SYSTEM_PROGRAM_ID);
        assert_eq!(&message[100..132], &blockhash);
        // instruction: program index, accounts, data
        assert_eq!(&message[132..138], &[1, 2, 2, 0, 1, 12]);
        assert_eq!(&message[138..142], &2u32.to_le_bytes());
        assert_eq!(&message[142..150], &1_000u64.to_le_bytes());
    }

    #[tokio::test]
    async fn test_native_balance() {
        let mut server = mockito::Server::new_async().await;
        mock_rpc(
            &mut server,
            "getBalance",
            json!({"context": {"slot": 1}, "value": 2_500_000_000u64}),
        )
        .await;

        let balance = client(&server).native_balance(&account(7)).await.unwrap();
        assert_eq!(balance, Decimal::from_str("2.5").unwrap());
    }

    #[tokio::test]
    async fn test_fixed_fee() {
        let server = mockito::Server::new_async().await;
        let estimate = client(&server).estimate_fee(TxKind::Transfer).await.unwrap();
        assert_eq!(estimate.estimated_fee, Decimal::from_str("0.000005").unwrap());
        assert_eq!(estimate.currency, "SOL");
        assert!(estimate.gas_price.is_none());
    }

    #[tokio::test]
    async fn test_send_native_signs_and_submits() {
        let mut server = mockito::Server::new_async().await;
        mock_rpc(
            &mut server,
            "getLatestBlockhash",
            json!({"context": {"slot": 1}, "value": {"blockhash": account(3), "lastValidBlockHeight": 100}}),
        )
        .await;
        let send = server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({"method": "sendTransaction"})),
                Matcher::Regex("base64".to_string()),
            ]))
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"5sig"}"#)
            .create_async()
            .await;

        let signer = LocalSigner::new().with_solana_key(SOLANA_SEED).unwrap();
        let signature = client(&server)
            .send_native(&signer, &account(7), Decimal::from_str("0.25").unwrap())
            .await
            .unwrap();

        assert_eq!(signature, "5sig");
        send.assert_async().await;
    }

    #[tokio::test]
    async fn test_spl_tokens_are_config_errors() {
        let server = mockito::Server::new_async().await;
        let token = TokenConfig {
            symbol: "USDC".to_string(),
            contract: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string(),
            decimals: 6,
        };
        let result = client(&server).token_balance(&token, &account(7)).await;
        assert!(matches!(result, Err(X402Error::Config(_))));
    }

    #[tokio::test]
    async fn test_transaction_parses_system_transfer() {
        let recipient = account(7);
        let mut server = mockito::Server::new_async().await;
        mock_rpc(
            &mut server,
            "getSignatureStatuses",
            json!({"context": {"slot": 10}, "value": [{
                "slot": 9,
                "confirmations": null,
                "err": null,
                "confirmationStatus": "finalized"
            }]}),
        )
        .await;
        mock_rpc(
            &mut server,
            "getTransaction",
            json!({
                "slot": 9,
                "meta": {"err": null, "fee": 5000},
                "transaction": {"message": {"instructions": [{
                    "program": "system",
                    "programId": "11111111111111111111111111111111",
                    "parsed": {"type": "transfer", "info": {
                        "source": "payer111",
                        "destination": recipient,
                        "lamports": 250_000_000u64
                    }}
                }]}}
            }),
        )
        .await;

        let info = client(&server).transaction("5sig").await.unwrap();

        assert_eq!(info.state, TxState::Confirmed);
        assert_eq!(info.block_number, Some(9));
        assert_eq!(info.confirmations, FINALIZED_CONFIRMATIONS);
        assert_eq!(info.to.as_deref(), Some(recipient.as_str()));
        assert_eq!(info.amount, Some(Decimal::from_str("0.25").unwrap()));
    }

    #[tokio::test]
    async fn test_unknown_signature() {
        let mut server = mockito::Server::new_async().await;
        mock_rpc(
            &mut server,
            "getSignatureStatuses",
            json!({"context": {"slot": 10}, "value": [null]}),
        )
        .await;

        let info = client(&server).transaction("missing").await.unwrap();
        assert_eq!(info.state, TxState::NotFound);
    }
}
