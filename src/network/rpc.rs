//! Minimal JSON-RPC 2.0 transport shared by the chain clients

use crate::{Result, X402Error};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default per-request timeout for node calls
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

/// JSON-RPC client bound to one node URL
#[derive(Debug)]
pub struct JsonRpcClient {
    url: String,
    client: Client,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_RPC_TIMEOUT)
            .build()
            .map_err(|e| X402Error::config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(url, client))
    }

    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` and decode its `result`
    ///
    /// A JSON `null` result decodes into `Option::None` when `T` is an
    /// `Option`; node-reported errors become `X402Error::Chain`, and node
    /// messages about missing funds become `X402Error::InsufficientFunds`.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::trace!(url = %self.url, method = %method, id, "rpc request");

        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(X402Error::chain(format!(
                "{} failed with status {}: {}",
                method, status, text
            )));
        }

        let decoded: RpcResponse = response.json().await?;

        if let Some(error) = decoded.error {
            let lowered = error.message.to_lowercase();
            if lowered.contains("insufficient funds") || lowered.contains("insufficient lamports") {
                return Err(X402Error::insufficient_funds(error.message));
            }
            return Err(X402Error::chain(format!(
                "{} failed: {} (code {})",
                method, error.message, error.code
            )));
        }

        Ok(serde_json::from_value(decoded.result.unwrap_or(Value::Null))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_decodes_result() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::PartialJson(json!({"method": "eth_chainId"})))
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x89"}"#)
            .create_async()
            .await;

        let rpc = JsonRpcClient::new(server.url()).unwrap();
        let chain_id: String = rpc.call("eth_chainId", json!([])).await.unwrap();

        assert_eq!(chain_id, "0x89");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_null_result_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
            .create_async()
            .await;

        let rpc = JsonRpcClient::new(server.url()).unwrap();
        let tx: Option<Value> = rpc
            .call("eth_getTransactionByHash", json!(["0xabc"]))
            .await
            .unwrap();
        assert!(tx.is_none());
    }

    #[tokio::test]
    async fn test_node_errors_are_typed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(
                r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"insufficient funds for gas * price + value"}}"#,
            )
            .create_async()
            .await;

        let rpc = JsonRpcClient::new(server.url()).unwrap();
        let result: Result<String> = rpc.call("eth_sendRawTransaction", json!(["0x00"])).await;
        assert!(matches!(result, Err(X402Error::InsufficientFunds(_))));
    }

    #[tokio::test]
    async fn test_http_failure_is_chain_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let rpc = JsonRpcClient::new(server.url()).unwrap();
        let result: Result<String> = rpc.call("eth_gasPrice", json!([])).await;
        assert!(matches!(result, Err(X402Error::Chain(_))));
    }
}
