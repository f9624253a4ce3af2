use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Minimal Solana JSON-RPC client
#[derive(Debug)]
pub struct SolanaRpc {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
    pub slot: u64,
    pub confirmations: Option<u64>,
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(default)]
    pub confirmation_status: Option<String>,
}

impl SolanaRpc {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(method, id, "rpc call");

        let response = self.client.post(&self.url).json(&request).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::Api {
                service: "solana-rpc".to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        let body: RpcResponse = serde_json::from_str(&text)?;
        if let Some(err) = body.error {
            return Err(Error::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(body.result.unwrap_or(Value::Null))
    }

    /// `getHealth`; Ok when the node reports "ok"
    pub async fn get_health(&self) -> Result<()> {
        let result = self.call("getHealth", json!([])).await?;
        match result.as_str() {
            Some("ok") => Ok(()),
            _ => Err(Error::Rpc {
                code: 0,
                message: format!("unhealthy node: {}", result),
            }),
        }
    }

    /// Balance in lamports
    pub async fn get_balance(&self, pubkey: &str) -> Result<u64> {
        let result = self
            .call("getBalance", json!([pubkey, {"commitment": "confirmed"}]))
            .await?;
        result["value"].as_u64().ok_or_else(|| Error::Rpc {
            code: 0,
            message: format!("unexpected getBalance result: {}", result),
        })
    }

    /// Submit a signed base64 transaction, returning its signature
    pub async fn send_transaction(&self, signed_base64: &str) -> Result<String> {
        let result = self
            .call(
                "sendTransaction",
                json!([signed_base64, {
                    "encoding": "base64",
                    "skipPreflight": false,
                    "preflightCommitment": "confirmed",
                    "maxRetries": 0
                }]),
            )
            .await?;
        let signature = result
            .as_str()
            .ok_or_else(|| Error::Rpc {
                code: 0,
                message: format!("unexpected sendTransaction result: {}", result),
            })?
            .to_string();
        info!(signature = %signature, "transaction submitted");
        Ok(signature)
    }

    /// Status of one signature; `None` when the cluster has not seen it
    pub async fn get_signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>> {
        let result = self
            .call(
                "getSignatureStatuses",
                json!([[signature], {"searchTransactionHistory": true}]),
            )
            .await?;
        let entry = result["value"]
            .as_array()
            .and_then(|v| v.first())
            .cloned()
            .unwrap_or(Value::Null);
        if entry.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(entry)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_get_health() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/").json_body_partial(r#"{"method": "getHealth"}"#);
            then.status(200)
                .json_body(json!({"jsonrpc": "2.0", "id": 1, "result": "ok"}));
        });
        let rpc = SolanaRpc::new(&server.url("/")).unwrap();
        assert!(rpc.get_health().await.is_ok());
    }

    #[tokio::test]
    async fn test_get_balance() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).json_body_partial(r#"{"method": "getBalance"}"#);
            then.status(200).json_body(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": {"context": {"slot": 1}, "value": 2500000000u64}
            }));
        });
        let rpc = SolanaRpc::new(&server.url("/")).unwrap();
        assert_eq!(rpc.get_balance("abc").await.unwrap(), 2_500_000_000);
    }

    #[tokio::test]
    async fn test_send_transaction() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .json_body_partial(r#"{"method": "sendTransaction"}"#)
                .body_contains(r#""encoding":"base64""#);
            then.status(200)
                .json_body(json!({"jsonrpc": "2.0", "id": 1, "result": "5sig"}));
        });
        let rpc = SolanaRpc::new(&server.url("/")).unwrap();
        assert_eq!(rpc.send_transaction("AQID").await.unwrap(), "5sig");
        mock.assert();
    }

    #[tokio::test]
    async fn test_rpc_error_object() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200).json_body(json!({
                "jsonrpc": "2.0", "id": 1,
                "error": {"code": -32002, "message": "Transaction simulation failed"}
            }));
        });
        let rpc = SolanaRpc::new(&server.url("/")).unwrap();
        match rpc.send_transaction("AQID").await {
            Err(Error::Rpc { code, message }) => {
                assert_eq!(code, -32002);
                assert!(message.contains("simulation"));
            }
            other => panic!("expected rpc error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_signature_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).json_body_partial(r#"{"method": "getSignatureStatuses"}"#);
            then.status(200).json_body(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": {"context": {"slot": 10}, "value": [
                    {"slot": 9, "confirmations": null, "err": null, "confirmationStatus": "finalized"}
                ]}
            }));
        });
        let rpc = SolanaRpc::new(&server.url("/")).unwrap();
        let status = rpc.get_signature_status("5sig").await.unwrap().unwrap();
        assert_eq!(status.slot, 9);
        assert_eq!(status.confirmation_status.as_deref(), Some("finalized"));
        assert!(status.err.is_none());
    }

    #[tokio::test]
    async fn test_signature_status_unknown() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200).json_body(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": {"context": {"slot": 10}, "value": [null]}
            }));
        });
        let rpc = SolanaRpc::new(&server.url("/")).unwrap();
        assert!(rpc.get_signature_status("5sig").await.unwrap().is_none());
    }
}
