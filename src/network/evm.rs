//! Ethereum-style chains over JSON-RPC
//!
//! Transactions are legacy (type 0) EIP-155 transactions: RLP-encoded,
//! hashed with keccak-256, signed through the [`TransactionSigner`] and
//! submitted with `eth_sendRawTransaction`.

use super::rpc::JsonRpcClient;
use super::signer::{RecoverableSignature, TransactionSigner};
use super::units::{from_base_units, parse_quantity, to_base_units, u256_to_u128};
use super::{ChainClient, FeeEstimate, TransactionInfo, TxKind, TxState};
use crate::crypto::signature::keccak256;
use crate::types::{NetworkConfig, NetworkKind, TokenConfig};
use crate::{Result, X402Error};
use async_trait::async_trait;
use ethereum_types::{Address, H256, U256};
use rlp::RlpStream;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;

/// `transfer(address,uint256)`
const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
/// `balanceOf(address)`
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
/// Split contract entry point; pulls both legs from the payer's allowance
const SPLIT_SIGNATURE: &str = "split(address,address,uint256,address,uint256)";

/// Legacy transaction fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: U256,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    fn append_fields(&self, stream: &mut RlpStream) {
        stream
            .append(&self.nonce)
            .append(&self.gas_price)
            .append(&self.gas_limit)
            .append(&self.to)
            .append(&self.value)
            .append(&self.data);
    }

    /// EIP-155 signing hash
    pub fn signing_hash(&self, chain_id: u64) -> H256 {
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&chain_id).append(&0u8).append(&0u8);
        H256::from(keccak256(&stream.out()))
    }

    /// Raw signed transaction bytes
    pub fn encode_signed(&self, chain_id: u64, signature: &RecoverableSignature) -> Vec<u8> {
        let v = u64::from(signature.recovery_id) + chain_id * 2 + 35;
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream
            .append(&v)
            .append(&U256::from_big_endian(&signature.r))
            .append(&U256::from_big_endian(&signature.s));
        stream.out().to_vec()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    from: String,
    #[serde(default)]
    to: Option<String>,
    value: String,
    #[serde(default)]
    input: String,
    #[serde(default)]
    block_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    block_number: Option<String>,
}

pub(crate) fn parse_address(raw: &str) -> Result<Address> {
    Address::from_str(raw.trim_start_matches("0x"))
        .map_err(|_| X402Error::validation(format!("Invalid EVM address: {}", raw)))
}

pub(crate) fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

fn address_word(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

fn uint_word(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

fn encode_call(selector: &[u8], words: &[[u8; 32]]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32 * words.len());
    data.extend_from_slice(selector);
    for word in words {
        data.extend_from_slice(word);
    }
    data
}

fn to_u64(value: U256) -> Result<u64> {
    if value.bits() > 64 {
        return Err(X402Error::chain(format!("Value {} exceeds u64", value)));
    }
    Ok(value.low_u64())
}

/// JSON-RPC client for one EVM network
#[derive(Debug)]
pub struct EvmRpcClient {
    config: NetworkConfig,
    rpc: JsonRpcClient,
}

impl EvmRpcClient {
    /// Connect to the node at `rpc_url`
    pub fn new(config: NetworkConfig, rpc_url: &str) -> Result<Self> {
        Self::with_rpc(config, JsonRpcClient::new(rpc_url)?)
    }

    pub fn with_rpc(config: NetworkConfig, rpc: JsonRpcClient) -> Result<Self> {
        if config.kind != NetworkKind::Evm || config.chain_id.is_none() {
            return Err(X402Error::config(format!(
                "{} is not an EVM network with a chain id",
                config.id
            )));
        }
        Ok(Self { config, rpc })
    }

    fn chain_id(&self) -> Result<u64> {
        self.config
            .chain_id
            .ok_or_else(|| X402Error::config(format!("{} has no chain id", self.config.id)))
    }

    async fn gas_price(&self) -> Result<U256> {
        let raw: String = self.rpc.call("eth_gasPrice", json!([])).await?;
        parse_quantity(&raw)
    }

    /// Sign and submit a transaction from the signer's address
    async fn submit(
        &self,
        signer: &dyn TransactionSigner,
        to: Address,
        value: U256,
        data: Vec<u8>,
        gas_limit: u64,
    ) -> Result<String> {
        let chain_id = self.chain_id()?;
        let from = signer.address(NetworkKind::Evm)?;

        let nonce: String = self
            .rpc
            .call("eth_getTransactionCount", json!([from, "pending"]))
            .await?;
        let tx = LegacyTransaction {
            nonce: parse_quantity(&nonce)?,
            gas_price: self.gas_price().await?,
            gas_limit,
            to,
            value,
            data,
        };

        let signature = signer.sign_prehash(tx.signing_hash(chain_id)).await?;
        let raw = tx.encode_signed(chain_id, &signature);

        let hash: String = self
            .rpc
            .call(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;

        tracing::info!(
            network = %self.config.id,
            from = %from,
            to = %format_address(&to),
            tx_hash = %hash,
            "transaction submitted"
        );
        Ok(hash)
    }

    /// Recipient, amount and currency of the value transfer in `tx`
    fn decode_transfer(
        &self,
        tx: &RpcTransaction,
    ) -> Result<(Option<String>, Option<Decimal>, Option<String>)> {
        if let Some(to) = &tx.to {
            let token = self
                .config
                .tokens
                .iter()
                .find(|t| t.contract.eq_ignore_ascii_case(to));

            if let Some(token) = token {
                let input = hex::decode(tx.input.trim_start_matches("0x")).unwrap_or_default();
                if input.len() >= 68 && input[..4] == TRANSFER_SELECTOR {
                    let recipient = Address::from_slice(&input[16..36]);
                    let units = u256_to_u128(U256::from_big_endian(&input[36..68]))?;
                    return Ok((
                        Some(format_address(&recipient)),
                        Some(from_base_units(units, token.decimals)?),
                        Some(token.symbol.clone()),
                    ));
                }
                // Some other call on a token contract moves no recognizable value
                return Ok((Some(to.clone()), None, Some(token.symbol.clone())));
            }
        }

        let wei = u256_to_u128(parse_quantity(&tx.value)?)?;
        Ok((
            tx.to.clone(),
            Some(from_base_units(wei, self.config.native_decimals)?),
            Some(self.config.native_currency.clone()),
        ))
    }
}

#[async_trait]
impl ChainClient for EvmRpcClient {
    fn config(&self) -> &NetworkConfig {
        &self.config
    }

    async fn native_balance(&self, address: &str) -> Result<Decimal> {
        let address = parse_address(address)?;
        let raw: String = self
            .rpc
            .call(
                "eth_getBalance",
                json!([format_address(&address), "latest"]),
            )
            .await?;
        from_base_units(
            u256_to_u128(parse_quantity(&raw)?)?,
            self.config.native_decimals,
        )
    }

    async fn token_balance(&self, token: &TokenConfig, address: &str) -> Result<Decimal> {
        let owner = parse_address(address)?;
        let data = encode_call(&BALANCE_OF_SELECTOR, &[address_word(&owner)]);

        let raw: String = self
            .rpc
            .call(
                "eth_call",
                json!([{"to": token.contract, "data": format!("0x{}", hex::encode(data))}, "latest"]),
            )
            .await?;
        from_base_units(u256_to_u128(parse_quantity(&raw)?)?, token.decimals)
    }

    async fn estimate_fee(&self, kind: TxKind) -> Result<FeeEstimate> {
        let gas_price = u256_to_u128(self.gas_price().await?)?;
        let gas_limit = kind.evm_gas_limit();
        let fee_wei = gas_price
            .checked_mul(u128::from(gas_limit))
            .ok_or_else(|| X402Error::chain("Gas fee overflow"))?;

        Ok(FeeEstimate {
            network: self.config.id.clone(),
            kind,
            currency: self.config.native_currency.clone(),
            gas_price: Some(gas_price),
            gas_limit: Some(gas_limit),
            estimated_fee: from_base_units(fee_wei, self.config.native_decimals)?,
        })
    }

    async fn send_native(
        &self,
        signer: &dyn TransactionSigner,
        to: &str,
        amount: Decimal,
    ) -> Result<String> {
        let to = parse_address(to)?;
        let value = U256::from(to_base_units(amount, self.config.native_decimals)?);
        self.submit(signer, to, value, Vec::new(), TxKind::Transfer.evm_gas_limit())
            .await
    }

    async fn send_token(
        &self,
        signer: &dyn TransactionSigner,
        token: &TokenConfig,
        to: &str,
        amount: Decimal,
    ) -> Result<String> {
        let recipient = parse_address(to)?;
        let contract = parse_address(&token.contract)?;
        let units = U256::from(to_base_units(amount, token.decimals)?);

        let data = encode_call(
            &TRANSFER_SELECTOR,
            &[address_word(&recipient), uint_word(units)],
        );
        self.submit(
            signer,
            contract,
            U256::zero(),
            data,
            TxKind::TokenTransfer.evm_gas_limit(),
        )
        .await
    }

    async fn split_token(
        &self,
        signer: &dyn TransactionSigner,
        token: &TokenConfig,
        split_contract: &str,
        payee: &str,
        net_amount: Decimal,
        fee_wallet: &str,
        fee_amount: Decimal,
    ) -> Result<String> {
        let contract = parse_address(split_contract)?;
        let selector = &keccak256(SPLIT_SIGNATURE.as_bytes())[..4];

        let data = encode_call(
            selector,
            &[
                address_word(&parse_address(&token.contract)?),
                address_word(&parse_address(payee)?),
                uint_word(U256::from(to_base_units(net_amount, token.decimals)?)),
                address_word(&parse_address(fee_wallet)?),
                uint_word(U256::from(to_base_units(fee_amount, token.decimals)?)),
            ],
        );
        self.submit(
            signer,
            contract,
            U256::zero(),
            data,
            TxKind::ContractCall.evm_gas_limit(),
        )
        .await
    }

    async fn transaction(&self, hash: &str) -> Result<TransactionInfo> {
        let tx: Option<RpcTransaction> = self
            .rpc
            .call("eth_getTransactionByHash", json!([hash]))
            .await?;
        let Some(tx) = tx else {
            return Ok(TransactionInfo::not_found(hash, &self.config.id));
        };

        let (to, amount, currency) = self.decode_transfer(&tx)?;
        let mut info = TransactionInfo {
            hash: hash.to_string(),
            network: self.config.id.clone(),
            state: TxState::Pending,
            block_number: None,
            confirmations: 0,
            from: Some(tx.from.clone()),
            to,
            amount,
            currency,
        };

        if tx.block_number.is_none() {
            return Ok(info);
        }

        let receipt: Option<RpcReceipt> = self
            .rpc
            .call("eth_getTransactionReceipt", json!([hash]))
            .await?;
        let Some(receipt) = receipt else {
            return Ok(info);
        };

        let block = receipt
            .block_number
            .or(tx.block_number)
            .map(|b| parse_quantity(&b).and_then(to_u64))
            .transpose()?;
        let head: String = self.rpc.call("eth_blockNumber", json!([])).await?;
        let head = to_u64(parse_quantity(&head)?)?;

        info.state = match receipt.status.as_deref() {
            Some("0x1") => TxState::Confirmed,
            _ => TxState::Failed,
        };
        info.block_number = block;
        info.confirmations = block.map(|b| head.saturating_sub(b) + 1).unwrap_or(0);
        Ok(info)
    }
}
