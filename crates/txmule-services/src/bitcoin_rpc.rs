//! bitcoind JSON-RPC client: transaction submission and confirmation depth.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use txmule_core::NetworkKind;

use crate::service::{ConfirmationSource, TxSubmitter};

/// bitcoind "No such mempool or blockchain transaction".
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize, thiserror::Error)]
#[error("rpc error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// One node endpoint. The node's own chain decides which network a
/// transaction lands on; `NetworkKind` is only logged.
#[derive(Clone)]
pub struct BitcoinRpc {
    url: String,
    user: String,
    password: String,
    client: Client,
}

impl BitcoinRpc {
    pub fn new(
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build rpc client")?;
        Ok(Self {
            url: url.into(),
            user: user.into(),
            password: password.into(),
            client,
        })
    }

    /// Call `method`; an RPC-level error is returned as `Ok(Err(..))`.
    async fn call(&self, method: &str, params: Value) -> Result<std::result::Result<Value, RpcError>> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "txmule",
            "method": method,
            "params": params,
        });

        let mut req = self.client.post(&self.url).json(&body);
        if !self.user.is_empty() {
            req = req.basic_auth(&self.user, Some(&self.password));
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("failed to reach node at {}", self.url))?;
        let status = resp.status();

        // bitcoind reports RPC errors with 404/500 and a JSON body.
        let parsed: RpcResponse = match resp.json().await {
            Ok(parsed) => parsed,
            Err(e) => anyhow::bail!("{method}: unparseable response ({status}): {e}"),
        };

        Ok(match parsed.error {
            Some(err) => Err(err),
            None => Ok(parsed.result),
        })
    }
}

#[async_trait]
impl TxSubmitter for BitcoinRpc {
    async fn submit(&self, raw_tx: &str, network: NetworkKind) -> Result<String> {
        tracing::debug!(%network, bytes = raw_tx.len() / 2, "sendrawtransaction");
        let txid = self
            .call("sendrawtransaction", json!([raw_tx]))
            .await??;
        txid.as_str()
            .map(String::from)
            .context("sendrawtransaction returned a non-string txid")
    }
}

#[async_trait]
impl ConfirmationSource for BitcoinRpc {
    async fn confirmation_depth(&self, tx_hash: &str, network: NetworkKind) -> Result<Option<u64>> {
        tracing::trace!(%network, tx_hash, "getrawtransaction");
        match self
            .call("getrawtransaction", json!([tx_hash, true]))
            .await?
        {
            Ok(tx) => Ok(Some(confirmations(&tx))),
            Err(err) if err.code == RPC_INVALID_ADDRESS_OR_KEY => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Mempool transactions carry no `confirmations` field.
fn confirmations(tx: &Value) -> u64 {
    tx.get("confirmations").and_then(Value::as_u64).unwrap_or(0)
}
