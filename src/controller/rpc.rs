//! JSON-RPC helpers for chain connectivity probes and contract reads
//!
//! Used by the network reconciler to verify that the configured L1 endpoint
//! really serves the declared chain id, and by the discovery strategies to
//! read addresses out of on-chain contracts. Every call is timeout-bounded;
//! a slow endpoint returns control to the reconcile loop instead of hanging.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

async fn rpc_request(
    http: &reqwest::Client,
    url: &str,
    method: &str,
    params: serde_json::Value,
    timeout: Duration,
) -> Result<serde_json::Value> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });

    debug!(url, method, "JSON-RPC request");

    let resp = http
        .post(url)
        .json(&body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| Error::RpcError {
            url: url.to_string(),
            detail: e.to_string(),
        })?;

    if !resp.status().is_success() {
        return Err(Error::RpcError {
            url: url.to_string(),
            detail: format!("HTTP {}", resp.status()),
        });
    }

    let parsed: JsonRpcResponse = resp.json().await.map_err(|e| Error::RpcError {
        url: url.to_string(),
        detail: format!("invalid JSON-RPC response: {e}"),
    })?;

    if let Some(err) = parsed.error {
        return Err(Error::RpcError {
            url: url.to_string(),
            detail: format!("{} (code {})", err.message, err.code),
        });
    }

    parsed.result.ok_or_else(|| Error::RpcError {
        url: url.to_string(),
        detail: "response has neither result nor error".to_string(),
    })
}

/// Query `eth_chainId` and return the chain id as an integer.
pub async fn fetch_chain_id(
    http: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<u64> {
    let result = rpc_request(http, url, "eth_chainId", json!([]), timeout).await?;
    let hex = result.as_str().ok_or_else(|| Error::RpcError {
        url: url.to_string(),
        detail: format!("eth_chainId returned non-string result: {result}"),
    })?;
    parse_hex_u64(hex).map_err(|e| Error::RpcError {
        url: url.to_string(),
        detail: e.to_string(),
    })
}

/// Perform an `eth_call` against `to` with the given calldata, returning
/// the raw hex return value.
pub async fn eth_call(
    http: &reqwest::Client,
    url: &str,
    to: &str,
    data: &str,
    timeout: Duration,
) -> Result<String> {
    let result = rpc_request(
        http,
        url,
        "eth_call",
        json!([{ "to": to, "data": data }, "latest"]),
        timeout,
    )
    .await?;
    result
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::RpcError {
            url: url.to_string(),
            detail: format!("eth_call returned non-string result: {result}"),
        })
}

/// Parse a 0x-prefixed hex quantity.
pub fn parse_hex_u64(hex: &str) -> Result<u64> {
    let stripped = hex.trim_start_matches("0x");
    u64::from_str_radix(stripped, 16)
        .map_err(|e| Error::DiscoveryError(format!("invalid hex quantity {hex:?}: {e}")))
}

/// Extract the address from a 32-byte ABI-encoded return word.
pub fn address_from_word(word: &str) -> Result<String> {
    let stripped = word.trim_start_matches("0x");
    if stripped.len() != 64 {
        return Err(Error::DiscoveryError(format!(
            "expected a 32-byte return word, got {} hex chars",
            stripped.len()
        )));
    }
    Ok(format!("0x{}", &stripped[24..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(parse_hex_u64("0xa").unwrap(), 10);
        assert_eq!(parse_hex_u64("0xaa37dc").unwrap(), 11155420);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn test_address_from_word() {
        let word = "0x000000000000000000000000034edd2a225f7f429a63e0f1d2084b9e0a93b538";
        assert_eq!(
            address_from_word(word).unwrap(),
            "0x034edd2a225f7f429a63e0f1d2084b9e0a93b538"
        );
        assert!(address_from_word("0x1234").is_err());
    }

    #[tokio::test]
    async fn test_fetch_chain_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(serde_json::json!({"method": "eth_chainId"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "result": "0xa"
            })))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let id = fetch_chain_id(&http, &server.uri(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(id, 10);
    }

    #[tokio::test]
    async fn test_rpc_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 1,
                "error": {"code": -32601, "message": "method not found"}
            })))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let err = fetch_chain_id(&http, &server.uri(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("method not found"));
    }

    #[tokio::test]
    async fn test_http_failure_is_rpc_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let err = fetch_chain_id(&http, &server.uri(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RpcError { .. }));
    }
}
