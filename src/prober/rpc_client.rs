use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::constants::{JSONRPC_V1, JSONRPC_V2};
use crate::error::{ProbeError, Result};

#[derive(Serialize, Debug)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a Value,
    id: u64,
}

#[derive(Deserialize, Debug)]
struct RpcResponse {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize, Debug)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl RpcResponse {
    fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(ProbeError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        // `"result": null` is a valid answer and deserializes to `None` here.
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Prefixes schemeless targets with `http://`.
pub fn normalize_target(target: &str) -> String {
    let target = target.trim();
    if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("http://{}", target)
    }
}

/// JSON-RPC client over HTTP(S), owned by a single probe.
pub struct RpcClient {
    url: String,
    client: Client,
    version: &'static str,
    credentials: Option<(String, String)>,
    request_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Transport(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.to_string(),
            client,
            version: JSONRPC_V2,
            credentials: None,
            request_id: AtomicU64::new(0),
        })
    }

    /// Switches to the 1.0 envelope with HTTP basic auth, as bitcoind expects.
    /// An empty user sends no credentials.
    pub fn with_basic_auth(mut self, user: &str, pass: &str) -> Self {
        self.version = JSONRPC_V1;
        if !user.is_empty() {
            self.credentials = Some((user.to_string(), pass.to_string()));
        }
        self
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn post<T: Serialize + ?Sized>(&self, body: &T) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(body);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Transport(format!(
                "RPC request failed with status: {}",
                status
            )));
        }
        Ok(response)
    }

    /// Issues one call and returns its raw `result`.
    pub async fn call(&self, method: &str, params: &Value) -> Result<Value> {
        let request = RpcRequest {
            jsonrpc: self.version,
            method,
            params,
            id: self.next_request_id(),
        };
        tracing::debug!(url = %self.url, method, "sending RPC request");

        let response = self.post(&request).await?;
        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| ProbeError::Decode(format!("invalid RPC response for {}: {}", method, e)))?;

        body.into_result()
    }

    /// Sends every call as one JSON array and returns the per-call outcomes
    /// in request order. The outer `Err` is reserved for transport failures
    /// and unparseable batch bodies.
    pub async fn batch_call(&self, calls: &[(String, Value)]) -> Result<Vec<Result<Value>>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<u64> = calls.iter().map(|_| self.next_request_id()).collect();
        let requests: Vec<RpcRequest<'_>> = calls
            .iter()
            .zip(&ids)
            .map(|((method, params), id)| RpcRequest {
                jsonrpc: self.version,
                method: method.as_str(),
                params,
                id: *id,
            })
            .collect();
        tracing::debug!(url = %self.url, size = requests.len(), "sending RPC batch");

        let response = self.post(&requests).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProbeError::Decode(format!("invalid RPC batch response: {}", e)))?;

        let items = match body {
            Value::Array(items) => items,
            // Some servers answer a rejected batch with a single error object.
            other => {
                let single: RpcResponse = serde_json::from_value(other)
                    .map_err(|e| ProbeError::Decode(format!("invalid RPC batch response: {}", e)))?;
                return Err(single.into_result().err().unwrap_or_else(|| {
                    ProbeError::Decode("RPC batch answered with a single result".to_string())
                }));
            }
        };

        let mut slots: Vec<Option<Result<Value>>> = calls.iter().map(|_| None).collect();
        for item in items {
            let response: RpcResponse = serde_json::from_value(item)
                .map_err(|e| ProbeError::Decode(format!("invalid RPC batch element: {}", e)))?;
            let Some(index) = response
                .id
                .as_u64()
                .and_then(|id| ids.iter().position(|candidate| *candidate == id))
            else {
                tracing::warn!(id = %response.id, "ignoring RPC batch element with unknown id");
                continue;
            };
            slots[index] = Some(response.into_result());
        }

        Ok(slots
            .into_iter()
            .zip(calls)
            .map(|(slot, (method, _))| {
                slot.unwrap_or_else(|| {
                    Err(ProbeError::Decode(format!(
                        "RPC batch response has no element for {}",
                        method
                    )))
                })
            })
            .collect())
    }
}
