//! JSON-RPC chain provider.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, TxHash, U256};
use anyhow::Context;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use super::{ChainProvider, TransactionReceipt, TransactionRequest, quantity};
use crate::error::RpcError;

/// Default timeout for RPC requests.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC 2.0 response envelope. A missing `result` reads as `null`.
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Call `method` on the endpoint at `url` and decode its result.
///
/// Failures are classified as [`RpcError`] so callers can decide whether a
/// retry is worthwhile.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, RpcError> {
    let transport = |source: reqwest::Error| RpcError::Transport {
        method: method.to_string(),
        source,
    };

    let response: RpcResponse = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(transport)?
        .json()
        .await
        .map_err(transport)?;

    if let Some(error) = response.error {
        tracing::trace!(method, code = error.code, message = %error.message, "RPC error");
        return Err(RpcError::Node {
            method: method.to_string(),
            code: error.code,
            message: error.message,
        });
    }

    serde_json::from_value(response.result).map_err(|source| RpcError::Decode {
        method: method.to_string(),
        source,
    })
}

/// Block header fields read from `eth_getBlockByNumber`.
#[derive(Debug, Deserialize)]
struct BlockInfo {
    #[serde(with = "quantity")]
    timestamp: u64,
}

/// Chain provider backed by a JSON-RPC endpoint.
///
/// Transactions are signed by the node (`eth_sendTransaction`), so the sender
/// must be an account the node manages, e.g. an Anvil dev account or an
/// unlocked account on a forked node.
#[derive(Debug, Clone)]
pub struct JsonRpcChain {
    client: reqwest::Client,
    url: String,
}

impl JsonRpcChain {
    /// Create a provider for `url` with the given per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let url = url.into();
        url::Url::parse(&url).with_context(|| format!("Invalid RPC URL: {}", url))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, url })
    }

    /// The RPC endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> anyhow::Result<T> {
        Ok(json_rpc_call(&self.client, &self.url, method, params).await?)
    }
}

impl ChainProvider for JsonRpcChain {
    async fn send_transaction(&self, tx: TransactionRequest) -> anyhow::Result<TxHash> {
        let tx = serde_json::to_value(&tx).context("Failed to serialize transaction")?;
        self.call("eth_sendTransaction", vec![tx]).await
    }

    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> anyhow::Result<Option<TransactionReceipt>> {
        self.call("eth_getTransactionReceipt", vec![serde_json::json!(hash)])
            .await
    }

    async fn block_number(&self) -> anyhow::Result<u64> {
        let number: String = self.call("eth_blockNumber", vec![]).await?;
        quantity::parse(&number).with_context(|| format!("Invalid block number: {}", number))
    }

    async fn code_at(&self, address: Address) -> anyhow::Result<Bytes> {
        self.call(
            "eth_getCode",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }

    async fn storage_at(&self, address: Address, slot: B256) -> anyhow::Result<B256> {
        self.call(
            "eth_getStorageAt",
            vec![
                serde_json::json!(address),
                serde_json::json!(slot),
                serde_json::json!("latest"),
            ],
        )
        .await
    }

    async fn balance(&self, address: Address) -> anyhow::Result<U256> {
        self.call(
            "eth_getBalance",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }

    async fn block_timestamp(&self) -> anyhow::Result<u64> {
        let block: BlockInfo = self
            .call(
                "eth_getBlockByNumber",
                vec![serde_json::json!("latest"), serde_json::json!(false)],
            )
            .await?;
        Ok(block.timestamp)
    }
}
