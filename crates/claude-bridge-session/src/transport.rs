// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP implementation of the SDK interface.
//!
//! Talks to the chain's session broker over REST:
//!
//! ```text
//! POST   /v1/auth                      authenticate, returns a bearer token
//! POST   /v1/sessions                  open a paid session
//! POST   /v1/sessions/{id}/messages    send a prompt; response is NDJSON
//! DELETE /v1/sessions/{id}             settle and close
//! ```
//!
//! Prompt responses stream as newline-delimited JSON records (`token`,
//! `usage`, `error`, `done`).  TCP chunks can split a record anywhere, so a
//! carry-over buffer holds the tail of the last incomplete line between
//! chunks and only complete lines are parsed.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use claude_bridge_config::BridgeConfig;
use claude_bridge_model::{ImageAttachment, TokenUsage};

use crate::registry;
use crate::sdk::{
    AuthCredentials, InferenceSdk, SdkError, SessionHandle, SessionManager, StartSessionParams,
    TokenSink,
};

#[derive(Debug)]
pub struct HttpSdk {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    client: reqwest::Client,
    gateway_url: String,
    chain_id: u64,
    rpc_url: String,
    marketplace_address: String,
    bearer: Mutex<Option<String>>,
    last_usage: Mutex<TokenUsage>,
}

impl HttpSdk {
    /// Resolve the chain from the registry and construct an unauthenticated
    /// client against its session broker.
    pub fn connect(config: &BridgeConfig) -> Result<Self, SdkError> {
        let chain = registry::lookup(config.chain_id).ok_or_else(|| {
            SdkError::Config(format!("chain id {} is not in the registry", config.chain_id))
        })?;
        debug!(chain = chain.name, gateway = chain.gateway_url, "sdk transport ready");
        Ok(Self {
            inner: Arc::new(Inner {
                client: reqwest::Client::new(),
                gateway_url: chain.gateway_url.trim_end_matches('/').to_string(),
                chain_id: chain.chain_id,
                rpc_url: chain.rpc_url.to_string(),
                marketplace_address: chain.marketplace_address.to_string(),
                bearer: Mutex::new(None),
                last_usage: Mutex::new(TokenUsage::default()),
            }),
        })
    }
}

#[async_trait]
impl InferenceSdk for HttpSdk {
    async fn authenticate(
        &self,
        method: &str,
        credentials: AuthCredentials,
    ) -> Result<(), SdkError> {
        let body = json!({
            "method": method,
            "credentials": credentials,
            "chainId": self.inner.chain_id,
            "rpcUrl": self.inner.rpc_url,
            "marketplace": self.inner.marketplace_address,
        });
        let resp = self
            .inner
            .client
            .post(format!("{}/v1/auth", self.inner.gateway_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| SdkError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        #[derive(Deserialize)]
        struct AuthResponse {
            token: String,
        }
        let auth: AuthResponse = resp
            .json()
            .await
            .map_err(|e| SdkError::Network(format!("malformed auth response: {e}")))?;
        *self.inner.bearer.lock().unwrap() = Some(auth.token);
        Ok(())
    }

    fn session_manager(&self) -> Arc<dyn SessionManager> {
        Arc::new(HttpSessionManager { inner: Arc::clone(&self.inner) })
    }
}

struct HttpSessionManager {
    inner: Arc<Inner>,
}

impl HttpSessionManager {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .inner
            .client
            .request(method, format!("{}{path}", self.inner.gateway_url));
        if let Some(token) = self.inner.bearer.lock().unwrap().as_deref() {
            builder = builder.bearer_auth(token);
        }
        builder
    }
}

#[async_trait]
impl SessionManager for HttpSessionManager {
    async fn start_session(&self, params: StartSessionParams) -> Result<SessionHandle, SdkError> {
        let resp = self
            .request(reqwest::Method::POST, "/v1/sessions")
            .json(&params)
            .send()
            .await
            .map_err(|e| SdkError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct SessionResponse {
            session_id: u64,
            job_id: u64,
        }
        let session: SessionResponse = resp
            .json()
            .await
            .map_err(|e| SdkError::Network(format!("malformed session response: {e}")))?;
        Ok(SessionHandle { session_id: session.session_id, job_id: session.job_id })
    }

    async fn send_prompt_streaming(
        &self,
        session_id: u64,
        prompt: &str,
        on_token: Option<TokenSink>,
        images: &[ImageAttachment],
    ) -> Result<String, SdkError> {
        let body = json!({ "prompt": prompt, "images": images });
        let resp = self
            .request(reqwest::Method::POST, &format!("/v1/sessions/{session_id}/messages"))
            .json(&body)
            .send()
            .await
            .map_err(|e| SdkError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let mut stream = resp.bytes_stream();
        let mut carry = String::new();
        let mut response = String::new();
        let mut usage: Option<TokenUsage> = None;

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| SdkError::Network(e.to_string()))?;
            carry.push_str(&String::from_utf8_lossy(&bytes));
            // Parse every complete line; the tail stays in the carry buffer.
            while let Some(pos) = carry.find('\n') {
                let line = carry[..pos].trim_end_matches('\r').trim().to_string();
                carry.drain(..=pos);
                if line.is_empty() {
                    continue;
                }
                match parse_stream_record(&line)? {
                    StreamRecord::Token(text) => {
                        if let Some(sink) = on_token.as_ref() {
                            let _ = sink.send(text.clone()).await;
                        }
                        response.push_str(&text);
                    }
                    StreamRecord::Usage(u) => usage = Some(u),
                    StreamRecord::Done => {}
                }
            }
        }

        if let Some(usage) = usage {
            *self.inner.last_usage.lock().unwrap() = usage;
        } else {
            warn!(session_id, "stream ended without a usage record");
        }
        Ok(response)
    }

    async fn last_token_usage(&self) -> TokenUsage {
        *self.inner.last_usage.lock().unwrap()
    }

    async fn end_session(&self, session_id: u64) -> Result<(), SdkError> {
        let resp = self
            .request(reqwest::Method::DELETE, &format!("/v1/sessions/{session_id}"))
            .send()
            .await
            .map_err(|e| SdkError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        Ok(())
    }
}

// ─── Wire decoding ────────────────────────────────────────────────────────────

#[derive(Debug)]
enum StreamRecord {
    Token(String),
    Usage(TokenUsage),
    Done,
}

fn parse_stream_record(line: &str) -> Result<StreamRecord, SdkError> {
    let v: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| SdkError::Network(format!("malformed stream record: {e}")))?;
    match v["type"].as_str().unwrap_or("") {
        "token" => Ok(StreamRecord::Token(v["text"].as_str().unwrap_or("").to_string())),
        "usage" => Ok(StreamRecord::Usage(TokenUsage {
            llm_tokens: v["llmTokens"].as_u64().unwrap_or(0),
            vlm_tokens: v["vlmTokens"].as_u64().unwrap_or(0),
            total_tokens: v["totalTokens"].as_u64().unwrap_or(0),
        })),
        "error" => Err(classify_error(
            v["code"].as_str().unwrap_or(""),
            v["message"].as_str().unwrap_or("stream error"),
            None,
        )),
        // Unknown record types are skipped so broker upgrades stay compatible.
        _ => Ok(StreamRecord::Done),
    }
}

/// Map a non-2xx broker response into the SDK error taxonomy, preferring the
/// machine-readable `code` in the body over the HTTP status.
async fn error_from_response(resp: reqwest::Response) -> SdkError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
    let code = parsed["code"].as_str().unwrap_or("");
    let message = parsed["message"].as_str().unwrap_or(body.trim());
    classify_error(code, message, Some(status))
}

fn classify_error(code: &str, message: &str, status: Option<StatusCode>) -> SdkError {
    if code.starts_with("SESSION_") {
        return SdkError::session(code, message);
    }
    match code {
        "INSUFFICIENT_FUNDS" => return SdkError::InsufficientFunds(message.into()),
        "HOST_UNAVAILABLE" | "NO_HOSTS_AVAILABLE" => {
            return SdkError::HostUnavailable(message.into())
        }
        "AUTH_FAILED" | "INVALID_SIGNATURE" => return SdkError::Auth(message.into()),
        _ => {}
    }
    match status {
        Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN) => {
            SdkError::Auth(message.into())
        }
        Some(StatusCode::PAYMENT_REQUIRED) => SdkError::InsufficientFunds(message.into()),
        Some(StatusCode::SERVICE_UNAVAILABLE) | Some(StatusCode::BAD_GATEWAY) => {
            SdkError::HostUnavailable(message.into())
        }
        Some(s) => SdkError::Network(format!("broker returned {s}: {message}")),
        None => SdkError::Network(message.into()),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(chain_id: u64) -> BridgeConfig {
        BridgeConfig {
            port: 3456,
            private_key: "0x1".into(),
            host_address: None,
            model_name: "glm-4".into(),
            chain_id,
            deposit_amount: "0.0002".into(),
            price_per_token: 5000,
            proof_interval: 100,
            duration_secs: 86_400,
            api_key: None,
        }
    }

    #[test]
    fn connect_rejects_unknown_chains() {
        let err = HttpSdk::connect(&test_config(555)).unwrap_err();
        assert!(matches!(err, SdkError::Config(_)));
    }

    #[test]
    fn connect_accepts_the_default_chain() {
        assert!(HttpSdk::connect(&test_config(84532)).is_ok());
    }

    #[test]
    fn token_record_parses_text() {
        match parse_stream_record(r#"{"type":"token","text":"hi"}"#).unwrap() {
            StreamRecord::Token(t) => assert_eq!(t, "hi"),
            _ => panic!("expected token record"),
        }
    }

    #[test]
    fn usage_record_parses_counts() {
        let line = r#"{"type":"usage","llmTokens":3,"vlmTokens":2,"totalTokens":5}"#;
        match parse_stream_record(line).unwrap() {
            StreamRecord::Usage(u) => {
                assert_eq!(u.total_tokens, 5);
                assert_eq!(u.vlm_tokens, 2);
            }
            _ => panic!("expected usage record"),
        }
    }

    #[test]
    fn error_record_maps_session_codes() {
        let line = r#"{"type":"error","code":"SESSION_NOT_FOUND","message":"unknown session"}"#;
        let err = parse_stream_record(line).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn classify_prefers_body_code_over_status() {
        let err = classify_error("INSUFFICIENT_FUNDS", "deposit too low", Some(StatusCode::BAD_REQUEST));
        assert!(matches!(err, SdkError::InsufficientFunds(_)));
    }

    #[test]
    fn classify_session_codes_pass_through() {
        let err = classify_error("SESSION_NOT_ACTIVE", "idle too long", Some(StatusCode::CONFLICT));
        assert!(matches!(&err, SdkError::Session { code, .. } if code == "SESSION_NOT_ACTIVE"));
    }

    #[test]
    fn classify_falls_back_to_status() {
        assert!(matches!(
            classify_error("", "nope", Some(StatusCode::UNAUTHORIZED)),
            SdkError::Auth(_)
        ));
        assert!(matches!(
            classify_error("", "broke", Some(StatusCode::PAYMENT_REQUIRED)),
            SdkError::InsufficientFunds(_)
        ));
        assert!(matches!(
            classify_error("", "down", Some(StatusCode::SERVICE_UNAVAILABLE)),
            SdkError::HostUnavailable(_)
        ));
        assert!(matches!(
            classify_error("", "teapot", Some(StatusCode::IM_A_TEAPOT)),
            SdkError::Network(_)
        ));
    }
}
