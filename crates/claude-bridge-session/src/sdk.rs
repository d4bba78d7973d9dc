// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The narrow interface to the external inference SDK.
//!
//! The SDK owns everything blockchain-shaped — session escrow, encryption,
//! proof settlement — and the bridge only ever touches it through these two
//! traits.  Production uses [`crate::HttpSdk`]; tests use
//! [`crate::ScriptedMockSdk`].

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use claude_bridge_model::{ImageAttachment, TokenUsage};

/// Wire code for a session the host no longer knows about.
pub const CODE_SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
/// Wire code for a session that exists but is no longer serving.
pub const CODE_SESSION_NOT_ACTIVE: &str = "SESSION_NOT_ACTIVE";

/// Streaming token callback.  Sends are best-effort; a full or closed channel
/// never fails the prompt.
pub type TokenSink = tokio::sync::mpsc::Sender<String>;

/// Credentials for [`InferenceSdk::authenticate`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCredentials {
    pub private_key: String,
}

/// Parameters for opening a paid session.
///
/// `host` is skipped entirely when unset — the SDK treats the *absence* of
/// the key as "auto-discover a host", which an explicit `null` would defeat.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionParams {
    pub chain_id: u64,
    pub model_id: String,
    pub payment_method: String,
    pub encryption: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub deposit_amount: String,
    pub price_per_token: u64,
    pub proof_interval: u64,
    pub duration: u64,
}

/// An open session as reported by the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    pub session_id: u64,
    pub job_id: u64,
}

/// Failure taxonomy surfaced by the SDK, re-raised to callers unchanged.
#[derive(Debug, Clone, Error)]
pub enum SdkError {
    #[error("sdk configuration error: {0}")]
    Config(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("inference host unavailable: {0}")]
    HostUnavailable(String),
    #[error("session error ({code}): {message}")]
    Session { code: String, message: String },
    #[error("network error: {0}")]
    Network(String),
}

impl SdkError {
    pub fn session(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Session { code: code.into(), message: message.into() }
    }

    /// Errors the bridge answers by recreating the session and retrying once.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Session { code, .. }
            if code == CODE_SESSION_NOT_FOUND || code == CODE_SESSION_NOT_ACTIVE)
    }
}

/// Entry point of the SDK: authenticate once, then hand out the session
/// manager.
#[async_trait]
pub trait InferenceSdk: Send + Sync {
    /// Authenticate with the given method (the bridge always uses
    /// `"privatekey"`).
    async fn authenticate(&self, method: &str, credentials: AuthCredentials)
        -> Result<(), SdkError>;

    fn session_manager(&self) -> Arc<dyn SessionManager>;
}

/// Session lifecycle and prompt transport.
#[async_trait]
pub trait SessionManager: Send + Sync {
    async fn start_session(&self, params: StartSessionParams) -> Result<SessionHandle, SdkError>;

    /// Stream one prompt through an open session.  Tokens are forwarded to
    /// `on_token` as they arrive; the accumulated response is returned once
    /// the stream completes.
    async fn send_prompt_streaming(
        &self,
        session_id: u64,
        prompt: &str,
        on_token: Option<TokenSink>,
        images: &[ImageAttachment],
    ) -> Result<String, SdkError>;

    /// Usage accounting for the most recently completed send.
    async fn last_token_usage(&self) -> TokenUsage;

    async fn end_session(&self, session_id: u64) -> Result<(), SdkError>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
