//! JSON-RPC client for the EVM chain endpoint
//!
//! `ChainProvider` is the seam the transfer and nominee services talk to; `RpcChainClient`
//! implements it over HTTPS with the standard `eth_*` methods.
use crate::blockchain::{Address, Amount, TxHash};
use crate::errors::{WalletError, WalletResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Parameters for `eth_call` and `eth_estimateGas`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
}

impl CallRequest {
    pub fn new(to: Address, data: Vec<u8>) -> Self {
        Self {
            from: None,
            to,
            value: 0,
            data,
        }
    }

    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    fn to_json(&self) -> Value {
        let mut object = json!({
            "to": self.to.to_lower_hex(),
            "data": format!("0x{}", hex::encode(&self.data)),
        });
        if let Some(from) = &self.from {
            object["from"] = json!(from.to_lower_hex());
        }
        if self.value > 0 {
            object["value"] = json!(format_quantity(self.value));
        }
        object
    }
}

/// The parts of a transaction receipt the wallet reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub success: bool,
    pub block_number: Option<u64>,
}

#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn chain_id(&self) -> WalletResult<u64>;

    async fn balance(&self, address: &Address) -> WalletResult<Amount>;

    /// Nonce for the next transaction, counting pending ones.
    async fn transaction_count(&self, address: &Address) -> WalletResult<u64>;

    async fn gas_price(&self) -> WalletResult<u128>;

    async fn estimate_gas(&self, call: &CallRequest) -> WalletResult<u64>;

    async fn send_raw_transaction(&self, raw: &[u8]) -> WalletResult<TxHash>;

    /// `None` while the transaction is still pending.
    async fn transaction_receipt(&self, hash: &TxHash) -> WalletResult<Option<TxReceipt>>;

    async fn call(&self, call: &CallRequest) -> WalletResult<Vec<u8>>;
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// JSON-RPC error structure
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    status: Option<String>,
    block_number: Option<String>,
}

/// HTTP client for an EVM JSON-RPC endpoint
pub struct RpcChainClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcChainClient {
    pub fn new(url: impl Into<String>) -> WalletResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                WalletError::NetworkError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make a JSON-RPC call. A `null` result is returned as `Value::Null`.
    async fn rpc_call(&self, method: &str, params: Value) -> WalletResult<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        log::debug!("RPC {} #{}", method, request.id);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| match WalletError::from(e) {
                WalletError::ConnectionTimeout => WalletError::ConnectionTimeout,
                other => WalletError::NetworkError(format!("HTTP request failed: {}", other)),
            })?;

        if !response.status().is_success() {
            return Err(WalletError::NetworkError(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| WalletError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = rpc_response.error {
            return Err(WalletError::NetworkError(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        Ok(rpc_response.result.unwrap_or(Value::Null))
    }

    async fn quantity(&self, method: &str, params: Value) -> WalletResult<u128> {
        let result = self.rpc_call(method, params).await?;
        parse_quantity(expect_str(&result, method)?)
    }
}

#[async_trait]
impl ChainProvider for RpcChainClient {
    async fn chain_id(&self) -> WalletResult<u64> {
        let value = self.quantity("eth_chainId", json!([])).await?;
        narrow(value, "eth_chainId")
    }

    async fn balance(&self, address: &Address) -> WalletResult<Amount> {
        let wei = self
            .quantity("eth_getBalance", json!([address.to_lower_hex(), "latest"]))
            .await?;
        Ok(Amount::from_wei(wei))
    }

    async fn transaction_count(&self, address: &Address) -> WalletResult<u64> {
        let value = self
            .quantity(
                "eth_getTransactionCount",
                json!([address.to_lower_hex(), "pending"]),
            )
            .await?;
        narrow(value, "eth_getTransactionCount")
    }

    async fn gas_price(&self) -> WalletResult<u128> {
        self.quantity("eth_gasPrice", json!([])).await
    }

    async fn estimate_gas(&self, call: &CallRequest) -> WalletResult<u64> {
        let value = self
            .quantity("eth_estimateGas", json!([call.to_json()]))
            .await?;
        narrow(value, "eth_estimateGas")
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> WalletResult<TxHash> {
        let result = self
            .rpc_call(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        expect_str(&result, "eth_sendRawTransaction")?.parse()
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> WalletResult<Option<TxReceipt>> {
        let result = self
            .rpc_call("eth_getTransactionReceipt", json!([hash.to_string()]))
            .await?;
        parse_receipt(result)
    }

    async fn call(&self, call: &CallRequest) -> WalletResult<Vec<u8>> {
        let result = self
            .rpc_call("eth_call", json!([call.to_json(), "latest"]))
            .await?;
        decode_hex_data(expect_str(&result, "eth_call")?)
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_quantity(raw: &str) -> WalletResult<u128> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| WalletError::InvalidResponse(format!("Not a hex quantity: {}", raw)))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|_| WalletError::InvalidResponse(format!("Invalid hex quantity: {}", raw)))
}

/// Hex quantity without leading zeros, as JSON-RPC expects.
pub fn format_quantity(value: u128) -> String {
    format!("0x{:x}", value)
}

fn decode_hex_data(raw: &str) -> WalletResult<Vec<u8>> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(digits)
        .map_err(|_| WalletError::InvalidResponse(format!("Invalid hex data: {}", raw)))
}

fn parse_receipt(result: Value) -> WalletResult<Option<TxReceipt>> {
    if result.is_null() {
        return Ok(None);
    }
    let raw: RawReceipt = serde_json::from_value(result)
        .map_err(|e| WalletError::InvalidResponse(format!("Malformed receipt: {}", e)))?;
    // Pre-Byzantium receipts carry no status field.
    let success = match raw.status.as_deref() {
        Some(status) => parse_quantity(status)? == 1,
        None => true,
    };
    let block_number = match raw.block_number.as_deref() {
        Some(number) => Some(narrow(parse_quantity(number)?, "blockNumber")?),
        None => None,
    };
    Ok(Some(TxReceipt {
        success,
        block_number,
    }))
}

fn expect_str<'a>(value: &'a Value, method: &str) -> WalletResult<&'a str> {
    value.as_str().ok_or_else(|| {
        WalletError::InvalidResponse(format!("Unexpected {} result: {}", method, value))
    })
}

fn narrow(value: u128, what: &str) -> WalletResult<u64> {
    u64::try_from(value)
        .map_err(|_| WalletError::InvalidResponse(format!("{} out of range", what)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert_eq!(parse_quantity("0x1bc16d674ec80000").unwrap(), 2_000_000_000_000_000_000);
        assert!(parse_quantity("1234").is_err());
        assert!(parse_quantity("0xzz").is_err());
        assert_eq!(format_quantity(0), "0x0");
        assert_eq!(format_quantity(21_000), "0x5208");
    }

    #[test]
    fn call_request_json() {
        let to = Address::from_array([0x11; 20]);
        let from = Address::from_array([0x22; 20]);
        let request = CallRequest::new(to, vec![0xde, 0xad]).with_from(from);
        let encoded = request.to_json();
        assert_eq!(encoded["to"], json!(to.to_lower_hex()));
        assert_eq!(encoded["from"], json!(from.to_lower_hex()));
        assert_eq!(encoded["data"], json!("0xdead"));
        assert!(encoded.get("value").is_none());
    }

    #[test]
    fn receipts() {
        assert_eq!(parse_receipt(Value::Null).unwrap(), None);
        let ok = parse_receipt(json!({"status": "0x1", "blockNumber": "0x10"})).unwrap();
        assert_eq!(
            ok,
            Some(TxReceipt {
                success: true,
                block_number: Some(16)
            })
        );
        let reverted = parse_receipt(json!({"status": "0x0", "blockNumber": "0x10"})).unwrap();
        assert!(!reverted.unwrap().success);
    }

    /// Serve one HTTP request with a canned JSON body and hand back the request body.
    async fn serve_once(body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&received).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|line| {
                            let lower = line.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if received.len() >= split + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            let text = String::from_utf8_lossy(&received).to_string();
            text.split("\r\n\r\n").nth(1).unwrap_or_default().to_string()
        });
        (url, handle)
    }

    #[tokio::test]
    async fn balance_over_http() {
        let (url, server) =
            serve_once(r#"{"jsonrpc":"2.0","id":1,"result":"0xde0b6b3a7640000"}"#).await;
        let client = RpcChainClient::new(url).unwrap();
        let address = Address::from_array([0xab; 20]);

        let balance = client.balance(&address).await.unwrap();
        assert_eq!(balance.wei(), 1_000_000_000_000_000_000);

        let request: Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(request["method"], "eth_getBalance");
        assert_eq!(request["params"][0], json!(address.to_lower_hex()));
        assert_eq!(request["params"][1], "latest");
    }

    #[tokio::test]
    async fn rpc_error_is_reported() {
        let (url, server) = serve_once(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"nonce too low"}}"#,
        )
        .await;
        let client = RpcChainClient::new(url).unwrap();

        let err = client.send_raw_transaction(&[0xf8, 0x00]).await.unwrap_err();
        match err {
            WalletError::NetworkError(msg) => assert!(msg.contains("nonce too low")),
            other => panic!("unexpected error: {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = RpcChainClient::new(url).unwrap();
        let result = client.gas_price().await;
        assert!(matches!(
            result,
            Err(WalletError::NetworkError(_)) | Err(WalletError::ConnectionTimeout)
        ));
    }
}
