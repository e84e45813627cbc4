//! Minimal EVM JSON-RPC client (§6 "Outbound wire protocols"). Each call is
//! a suspension point with the §5 default 10s deadline.

use std::time::Duration;

use primitive_types::{H160, U256};
use purser_common::config::DEFAULT_RPC_TIMEOUT_SECS;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc error {code}: {message}")]
    Node { code: i64, message: String },
    #[error("malformed rpc response: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Clone)]
pub struct TransactionReceipt {
    pub status: bool,
    pub block_number: u64,
    pub gas_used: u64,
}

pub struct EvmRpcClient {
    http: Client,
    endpoint: String,
}

impl EvmRpcClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS))
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response: RpcResponse = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        if let Some(err) = response.error {
            return Err(RpcError::Node {
                code: err.code,
                message: err.message,
            });
        }
        response.result.ok_or_else(|| RpcError::Malformed("missing result".into()))
    }

    pub async fn eth_call(&self, to: H160, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let params = json!([{
            "to": format!("0x{}", hex::encode(to.as_bytes())),
            "data": format!("0x{}", hex::encode(data)),
        }, "latest"]);
        let result = self.call("eth_call", params).await?;
        decode_hex_bytes(&result)
    }

    pub async fn eth_get_balance(&self, address: H160) -> Result<U256, RpcError> {
        let params = json!([format!("0x{}", hex::encode(address.as_bytes())), "latest"]);
        let result = self.call("eth_getBalance", params).await?;
        decode_hex_u256(&result)
    }

    pub async fn eth_get_transaction_count(&self, address: H160, tag: &str) -> Result<u64, RpcError> {
        let params = json!([format!("0x{}", hex::encode(address.as_bytes())), tag]);
        let result = self.call("eth_getTransactionCount", params).await?;
        decode_hex_u64(&result)
    }

    pub async fn eth_gas_price(&self) -> Result<U256, RpcError> {
        let result = self.call("eth_gasPrice", json!([])).await?;
        decode_hex_u256(&result)
    }

    pub async fn eth_send_raw_transaction(&self, raw_tx: &[u8]) -> Result<String, RpcError> {
        let params = json!([format!("0x{}", hex::encode(raw_tx))]);
        let result = self.call("eth_sendRawTransaction", params).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::Malformed("expected tx hash string".into()))
    }

    pub async fn eth_get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>, RpcError> {
        let result = self.call("eth_getTransactionReceipt", json!([tx_hash])).await?;
        if result.is_null() {
            return Ok(None);
        }
        let status = result
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Malformed("missing status".into()))?;
        let block_number = result
            .get("blockNumber")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Malformed("missing blockNumber".into()))?;
        let gas_used = result
            .get("gasUsed")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Malformed("missing gasUsed".into()))?;
        Ok(Some(TransactionReceipt {
            status: status == "0x1",
            block_number: u64::from_str_radix(block_number.trim_start_matches("0x"), 16)
                .map_err(|e| RpcError::Malformed(e.to_string()))?,
            gas_used: u64::from_str_radix(gas_used.trim_start_matches("0x"), 16)
                .map_err(|e| RpcError::Malformed(e.to_string()))?,
        }))
    }

    pub async fn eth_block_number(&self) -> Result<u64, RpcError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        decode_hex_u64(&result)
    }
}

fn decode_hex_bytes(value: &Value) -> Result<Vec<u8>, RpcError> {
    let s = value.as_str().ok_or_else(|| RpcError::Malformed("expected hex string".into()))?;
    hex::decode(s.trim_start_matches("0x")).map_err(|e| RpcError::Malformed(e.to_string()))
}

fn decode_hex_u256(value: &Value) -> Result<U256, RpcError> {
    let s = value.as_str().ok_or_else(|| RpcError::Malformed("expected hex string".into()))?;
    U256::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| RpcError::Malformed(e.to_string()))
}

fn decode_hex_u64(value: &Value) -> Result<u64, RpcError> {
    let s = value.as_str().ok_or_else(|| RpcError::Malformed("expected hex string".into()))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| RpcError::Malformed(e.to_string()))
}

#[derive(Debug, Clone, Serialize)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: H160,
    pub value: U256,
    pub data: Vec<u8>,
    pub chain_id: u64,
}
