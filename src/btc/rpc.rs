use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Reply to `fundrawtransaction`.
#[derive(Debug, Clone, Deserialize)]
pub struct FundedTransaction {
    pub hex: String,
    /// Index of the change output, -1 when no change was added.
    pub changepos: i64,
    pub fee: f64,
}

/// Reply to `signrawtransactionwithwallet`.
#[derive(Debug, Clone, Deserialize)]
pub struct SignedTransaction {
    pub hex: String,
    pub complete: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptPubKey {
    pub hex: String,
}

/// Unspent lock output as reported by `gettxout`.
#[derive(Debug, Clone, Deserialize)]
pub struct LockTxOut {
    /// Output value in whole bitcoin.
    pub value: f64,
    pub confirmations: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

#[derive(Debug, Clone, Serialize)]
pub struct RawTxInput {
    pub txid: String,
    pub vout: u32,
    pub sequence: u32,
}

/// The node surface the swap driver consumes. One outstanding call per
/// driver at a time; implementations do not need to be re-entrant.
#[allow(async_fn_in_trait)]
pub trait BitcoinRpc {
    async fn get_raw_change_address(&self) -> Result<String>;

    async fn fund_raw_transaction(&self, raw_tx_hex: &str) -> Result<FundedTransaction>;

    async fn sign_raw_transaction(&self, raw_tx_hex: &str) -> Result<SignedTransaction>;

    /// Returns the txid, or an empty string when the node refused the
    /// transaction. Transport failures are errors.
    async fn send_raw_transaction(&self, raw_tx_hex: &str) -> Result<String>;

    async fn create_raw_transaction(
        &self,
        inputs: &[RawTxInput],
        outputs: &Value,
        lock_time: Option<u32>,
    ) -> Result<String>;

    async fn dump_priv_key(&self, address: &str) -> Result<String>;

    /// `None` when the output is spent or unknown to the node.
    async fn get_tx_out(&self, tx_id: &str, vout: u32) -> Result<Option<LockTxOut>>;
}

/// Error member of a JSON-RPC reply, as opposed to a transport failure.
#[derive(Debug, thiserror::Error)]
#[error("{method}: {message}")]
pub struct NodeRpcError {
    pub method: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct BitcoinNodeConfig {
    pub url: String,
    pub rpc_user: String,
    pub rpc_password: String,
}

#[derive(Debug, Clone)]
pub struct BitcoinRpcClient {
    http: reqwest::Client,
    cfg: BitcoinNodeConfig,
}

impl BitcoinRpcClient {
    pub fn new(cfg: BitcoinNodeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "beam-btc-swap",
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.cfg.url)
            .basic_auth(&self.cfg.rpc_user, Some(&self.cfg.rpc_password))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("send {method} request"))?;

        // The node answers RPC-level errors with a non-2xx status but still
        // puts the error object in the body; read the body either way.
        let reply: Value = response
            .json()
            .await
            .with_context(|| format!("read {method} reply"))?;

        if let Some(error) = reply.get("error")
            && !error.is_null()
        {
            return Err(NodeRpcError {
                method: method.to_string(),
                message: error.to_string(),
            }
            .into());
        }

        reply
            .get("result")
            .cloned()
            .with_context(|| format!("{method} reply has no result"))
    }
}

impl BitcoinRpc for BitcoinRpcClient {
    async fn get_raw_change_address(&self) -> Result<String> {
        // The contract spends a P2PKH key, so ask for a legacy address.
        let result = self.call("getrawchangeaddress", json!(["legacy"])).await?;
        serde_json::from_value(result).context("parse getrawchangeaddress result")
    }

    async fn fund_raw_transaction(&self, raw_tx_hex: &str) -> Result<FundedTransaction> {
        let result = self
            .call("fundrawtransaction", json!([raw_tx_hex]))
            .await?;
        serde_json::from_value(result).context("parse fundrawtransaction result")
    }

    async fn sign_raw_transaction(&self, raw_tx_hex: &str) -> Result<SignedTransaction> {
        let result = self
            .call("signrawtransactionwithwallet", json!([raw_tx_hex]))
            .await?;
        serde_json::from_value(result).context("parse signrawtransactionwithwallet result")
    }

    async fn send_raw_transaction(&self, raw_tx_hex: &str) -> Result<String> {
        match self.call("sendrawtransaction", json!([raw_tx_hex])).await {
            Ok(result) => serde_json::from_value(result).context("parse sendrawtransaction result"),
            // A node-side rejection is a broadcast failure, not a transport
            // problem; report it as the empty txid the driver checks for.
            Err(err) if err.is::<NodeRpcError>() => {
                tracing::warn!(error = %err, "sendrawtransaction rejected");
                Ok(String::new())
            }
            Err(err) => Err(err),
        }
    }

    async fn create_raw_transaction(
        &self,
        inputs: &[RawTxInput],
        outputs: &Value,
        lock_time: Option<u32>,
    ) -> Result<String> {
        let mut params = vec![
            serde_json::to_value(inputs).context("encode createrawtransaction inputs")?,
            outputs.clone(),
        ];
        if let Some(lock_time) = lock_time {
            params.push(json!(lock_time));
        }

        let result = self
            .call("createrawtransaction", Value::Array(params))
            .await?;
        serde_json::from_value(result).context("parse createrawtransaction result")
    }

    async fn dump_priv_key(&self, address: &str) -> Result<String> {
        let result = self.call("dumpprivkey", json!([address])).await?;
        serde_json::from_value(result).context("parse dumpprivkey result")
    }

    async fn get_tx_out(&self, tx_id: &str, vout: u32) -> Result<Option<LockTxOut>> {
        let result = self.call("gettxout", json!([tx_id, vout])).await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .context("parse gettxout result")
    }
}
