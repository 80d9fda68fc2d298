//! JSON-RPC transport for [`ChainClient`].
//!
//! Signing is left to the node (`eth_sendTransaction` from an unlocked or
//! node-managed account). Read-only calls are retried with backoff;
//! transaction submission never is.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use alloy_core::primitives::{Address, B256, Bytes, U64};
use anyhow::Context;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use url::Url;

use crate::chain::{ChainClient, Receipt, TxRequest};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts for an idempotent read before giving up.
const READ_RETRIES: usize = 3;

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
    id: u64,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url.clone())
        .json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown");
        match error.get("data").and_then(|d| d.as_str()) {
            Some(data) => anyhow::bail!("RPC error: {} ({})", message, data),
            None => anyhow::bail!("RPC error: {}", message),
        }
    }

    let result_value = result.get("result").context("No result in response")?.clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    status: Option<U64>,
    block_number: U64,
    block_hash: Option<B256>,
    contract_address: Option<Address>,
    gas_used: Option<U64>,
}

impl From<RpcReceipt> for Receipt {
    fn from(r: RpcReceipt) -> Self {
        Receipt {
            tx_hash: r.transaction_hash,
            // pre-Byzantium receipts carry no status
            success: r.status.is_none_or(|s| s == U64::from(1)),
            block_number: r.block_number.to::<u64>(),
            block_hash: r.block_hash,
            contract_address: r.contract_address,
            gas_used: r.gas_used.map(|g| g.to::<u64>()),
        }
    }
}

fn tx_object(tx: &TxRequest) -> Value {
    let mut obj = json!({
        "from": tx.from,
        "data": tx.data,
    });
    if let Some(to) = tx.to {
        obj["to"] = json!(to);
    }
    if let Some(gas) = tx.gas {
        obj["gas"] = json!(format!("{:#x}", gas));
    }
    obj
}

/// [`ChainClient`] over HTTP JSON-RPC.
#[derive(Debug)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: Url,
    from: Address,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: Url, from: Address) -> anyhow::Result<Self> {
        Ok(Self {
            http: create_client()?,
            url,
            from,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> anyhow::Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        json_rpc_call(&self.http, &self.url, id, method, params).await
    }

    /// A read that is safe to repeat.
    async fn read<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> anyhow::Result<T> {
        (|| self.request(method, params.clone()))
            .retry(ExponentialBuilder::default().with_max_times(READ_RETRIES))
            .notify(|err, dur| {
                tracing::debug!(
                    method,
                    error = %err,
                    retry_in = ?dur,
                    "RPC read failed, retrying..."
                );
            })
            .await
    }
}

impl ChainClient for JsonRpcClient {
    fn deployer(&self) -> Address {
        self.from
    }

    async fn chain_id(&self) -> anyhow::Result<u64> {
        let id: U64 = self.read("eth_chainId", vec![]).await?;
        Ok(id.to::<u64>())
    }

    // Not retried: a revert here is an answer, not a transport hiccup.
    async fn estimate_gas(&self, tx: &TxRequest) -> anyhow::Result<u64> {
        let gas: U64 = self.request("eth_estimateGas", vec![tx_object(tx)]).await?;
        Ok(gas.to::<u64>())
    }

    async fn send_transaction(&self, tx: &TxRequest) -> anyhow::Result<B256> {
        self.request("eth_sendTransaction", vec![tx_object(tx)]).await
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> anyhow::Result<Option<Receipt>> {
        let receipt: Option<RpcReceipt> = self
            .read("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await?;
        Ok(receipt.map(Receipt::from))
    }

    async fn block_number(&self) -> anyhow::Result<u64> {
        let number: U64 = self.read("eth_blockNumber", vec![]).await?;
        Ok(number.to::<u64>())
    }

    async fn call(&self, tx: &TxRequest) -> anyhow::Result<Bytes> {
        self.read("eth_call", vec![tx_object(tx), json!("latest")]).await
    }
}
