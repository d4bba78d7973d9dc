// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Session lifecycle on top of the SDK.
//!
//! # Session handling
//!
//! ```text
//! first send:            ensure_session → startSession → id cached
//! later sends:           cached id reused, no SDK call
//! SESSION_NOT_FOUND /
//! SESSION_NOT_ACTIVE:    cached id dropped → startSession → send retried ONCE
//! second failure:        surfaced to the caller unchanged
//! shutdown:              endSession(cached id), state cleared
//! ```
//!
//! The cached handle lives behind a `tokio::sync::Mutex` that is held across
//! `start_session`, so concurrent first requests share a single in-flight
//! session creation instead of racing to open duplicates.  Sends themselves
//! run outside the lock and are not serialized.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use claude_bridge_config::BridgeConfig;
use claude_bridge_model::{ImageAttachment, SendPromptResult};

use crate::sdk::{
    AuthCredentials, InferenceSdk, SdkError, SessionHandle, SessionManager, StartSessionParams,
    TokenSink,
};

pub struct SessionBridge {
    sdk: Arc<dyn InferenceSdk>,
    sessions: Arc<dyn SessionManager>,
    config: BridgeConfig,
    active: Mutex<Option<SessionHandle>>,
}

impl SessionBridge {
    pub fn new(sdk: Arc<dyn InferenceSdk>, config: BridgeConfig) -> Self {
        let sessions = sdk.session_manager();
        Self { sdk, sessions, config, active: Mutex::new(None) }
    }

    /// Authenticate against the SDK.  No session is opened here; that happens
    /// lazily on the first send.
    pub async fn initialize(&self) -> Result<(), SdkError> {
        self.sdk
            .authenticate(
                "privatekey",
                AuthCredentials { private_key: self.config.private_key.clone() },
            )
            .await?;
        info!(chain_id = self.config.chain_id, model = %self.config.model_name, "sdk authenticated");
        Ok(())
    }

    /// Return the live session id, opening a session if none is cached.
    pub async fn ensure_session(&self) -> Result<u64, SdkError> {
        let mut active = self.active.lock().await;
        if let Some(handle) = *active {
            return Ok(handle.session_id);
        }
        let handle = self.sessions.start_session(self.start_params()).await?;
        info!(
            session_id = handle.session_id,
            job_id = handle.job_id,
            "session opened"
        );
        *active = Some(handle);
        Ok(handle.session_id)
    }

    /// Forward one prompt through the session, recovering once if the host
    /// reports the session gone or inactive.
    pub async fn send_prompt(
        &self,
        prompt: &str,
        on_token: Option<TokenSink>,
        images: &[ImageAttachment],
    ) -> Result<SendPromptResult, SdkError> {
        let session_id = self.ensure_session().await?;

        let response = match self
            .sessions
            .send_prompt_streaming(session_id, prompt, on_token.clone(), images)
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_recoverable() => {
                warn!(session_id, error = %e, "session invalid; recreating and retrying once");
                self.invalidate(session_id).await;
                let retry_id = self.ensure_session().await?;
                self.sessions
                    .send_prompt_streaming(retry_id, prompt, on_token, images)
                    .await?
            }
            Err(e) => return Err(e),
        };

        let token_usage = self.sessions.last_token_usage().await;
        debug!(
            total_tokens = token_usage.total_tokens,
            response_len = response.len(),
            "prompt completed"
        );
        Ok(SendPromptResult { response, token_usage })
    }

    /// Close the active session, if any, and clear the cached handle.
    pub async fn shutdown(&self) -> Result<(), SdkError> {
        let handle = self.active.lock().await.take();
        if let Some(handle) = handle {
            info!(session_id = handle.session_id, "ending session");
            self.sessions.end_session(handle.session_id).await?;
        }
        Ok(())
    }

    /// Drop the cached handle, but only if it still refers to the session the
    /// failure was observed on — a concurrent request may already have opened
    /// a replacement.
    async fn invalidate(&self, failed_session_id: u64) {
        let mut active = self.active.lock().await;
        if matches!(*active, Some(h) if h.session_id == failed_session_id) {
            *active = None;
        }
    }

    fn start_params(&self) -> StartSessionParams {
        StartSessionParams {
            chain_id: self.config.chain_id,
            model_id: self.config.model_name.clone(),
            payment_method: "deposit".into(),
            encryption: true,
            host: self.config.host_address.clone(),
            deposit_amount: self.config.deposit_amount.clone(),
            price_per_token: self.config.price_per_token,
            proof_interval: self.config.proof_interval,
            duration: self.config.duration_secs,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptedMockSdk, ScriptedSessionManager};
    use crate::sdk::CODE_SESSION_NOT_FOUND;
    use claude_bridge_model::TokenUsage;

    fn test_config() -> BridgeConfig {
        BridgeConfig {
            port: 3456,
            private_key: "0xdeadbeef".into(),
            host_address: None,
            model_name: "glm-4".into(),
            chain_id: 84532,
            deposit_amount: "0.0002".into(),
            price_per_token: 5000,
            proof_interval: 100,
            duration_secs: 86_400,
            api_key: None,
        }
    }

    fn bridge_over(manager: ScriptedSessionManager) -> (SessionBridge, Arc<ScriptedSessionManager>) {
        let sdk = Arc::new(ScriptedMockSdk::new(manager));
        let manager = sdk.manager();
        (SessionBridge::new(sdk.clone(), test_config()), manager)
    }

    #[tokio::test]
    async fn initialize_authenticates_with_private_key() {
        let sdk = Arc::new(ScriptedMockSdk::new(ScriptedSessionManager::new()));
        let bridge = SessionBridge::new(sdk.clone(), test_config());
        bridge.initialize().await.unwrap();
        let calls = sdk.auth_calls.lock().unwrap().clone();
        assert_eq!(calls, vec![("privatekey".to_string(), "0xdeadbeef".to_string())]);
    }

    #[tokio::test]
    async fn session_is_created_once_and_reused() {
        let (bridge, manager) = bridge_over(
            ScriptedSessionManager::new().with_reply("ok"),
        );
        let first = bridge.ensure_session().await.unwrap();
        let second = bridge.ensure_session().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.start_params.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_prompt_returns_response_and_usage() {
        let usage = TokenUsage { llm_tokens: 3, vlm_tokens: 2, total_tokens: 5 };
        let (bridge, manager) = bridge_over(
            ScriptedSessionManager::new().with_reply("Test response").with_usage(usage),
        );
        let out = bridge.send_prompt("hello", None, &[]).await.unwrap();
        assert_eq!(out.response, "Test response");
        assert_eq!(out.token_usage, usage);
        assert_eq!(manager.sends.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recovery_recreates_session_and_retries_once() {
        // First send dies with SESSION_NOT_FOUND; the retry
        // succeeds on a freshly created session.
        let manager = ScriptedSessionManager::new()
            .with_session_ids([42, 99])
            .with_outcomes([
                Err(SdkError::session(CODE_SESSION_NOT_FOUND, "session 42 unknown")),
                Ok("Recovered".into()),
            ]);
        let (bridge, manager) = bridge_over(manager);

        let out = bridge.send_prompt("test", None, &[]).await.unwrap();
        assert_eq!(out.response, "Recovered");
        assert_eq!(manager.start_params.lock().unwrap().len(), 2, "one recovery start");
        let sends = manager.sends.lock().unwrap().clone();
        assert_eq!(sends[0].0, 42);
        assert_eq!(sends[1].0, 99, "retry must use the fresh session");
    }

    #[tokio::test]
    async fn second_recoverable_failure_propagates_unchanged() {
        let manager = ScriptedSessionManager::new()
            .with_session_ids([1, 2, 3])
            .with_outcomes([
                Err(SdkError::session(CODE_SESSION_NOT_FOUND, "gone")),
                Err(SdkError::session(CODE_SESSION_NOT_FOUND, "still gone")),
            ]);
        let (bridge, manager) = bridge_over(manager);

        let err = bridge.send_prompt("test", None, &[]).await.unwrap_err();
        assert!(matches!(&err, SdkError::Session { code, message }
            if code == CODE_SESSION_NOT_FOUND && message == "still gone"));
        assert_eq!(
            manager.start_params.lock().unwrap().len(),
            2,
            "retries must not nest"
        );
    }

    #[tokio::test]
    async fn non_recoverable_errors_are_not_retried() {
        let manager = ScriptedSessionManager::new()
            .with_outcomes([Err(SdkError::Network("connection reset".into()))]);
        let (bridge, manager) = bridge_over(manager);

        let err = bridge.send_prompt("test", None, &[]).await.unwrap_err();
        assert!(matches!(err, SdkError::Network(_)));
        assert_eq!(manager.start_params.lock().unwrap().len(), 1);
        assert_eq!(manager.sends.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn start_params_omit_host_when_unconfigured() {
        // Auto-discovery: no host key may reach the SDK.
        let (bridge, manager) = bridge_over(ScriptedSessionManager::new());
        bridge.ensure_session().await.unwrap();
        let params = manager.start_params.lock().unwrap()[0].clone();
        let v = serde_json::to_value(&params).unwrap();
        assert!(!v.as_object().unwrap().contains_key("host"));
        assert_eq!(v["modelId"], "glm-4");
        assert_eq!(v["chainId"], 84532);
        assert_eq!(v["encryption"], true);
    }

    #[tokio::test]
    async fn start_params_pin_host_when_configured() {
        let sdk = Arc::new(ScriptedMockSdk::new(ScriptedSessionManager::new()));
        let manager = sdk.manager();
        let mut config = test_config();
        config.host_address = Some("0xAbCd".into());
        let bridge = SessionBridge::new(sdk, config);
        bridge.ensure_session().await.unwrap();
        let params = manager.start_params.lock().unwrap()[0].clone();
        assert_eq!(params.host.as_deref(), Some("0xAbCd"));
    }

    #[tokio::test]
    async fn shutdown_ends_the_active_session_once() {
        let (bridge, manager) = bridge_over(
            ScriptedSessionManager::new().with_session_ids([7]),
        );
        bridge.ensure_session().await.unwrap();
        bridge.shutdown().await.unwrap();
        bridge.shutdown().await.unwrap();
        assert_eq!(*manager.ended.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn shutdown_without_session_is_a_no_op() {
        let (bridge, manager) = bridge_over(ScriptedSessionManager::new());
        bridge.shutdown().await.unwrap();
        assert!(manager.ended.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_after_recovery_uses_new_session_for_later_sends() {
        let manager = ScriptedSessionManager::new()
            .with_session_ids([42, 99])
            .with_outcomes([
                Err(SdkError::session(CODE_SESSION_NOT_FOUND, "gone")),
                Ok("first".into()),
                Ok("second".into()),
            ]);
        let (bridge, manager) = bridge_over(manager);

        bridge.send_prompt("a", None, &[]).await.unwrap();
        bridge.send_prompt("b", None, &[]).await.unwrap();
        let sends = manager.sends.lock().unwrap().clone();
        assert_eq!(sends.last().unwrap().0, 99, "later sends stay on the recovered session");
        assert_eq!(manager.start_params.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn tokens_are_forwarded_to_the_sink() {
        let (bridge, _) = bridge_over(
            ScriptedSessionManager::new().with_reply("streamed reply here"),
        );
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let out = bridge.send_prompt("hi", Some(tx), &[]).await.unwrap();
        let mut streamed = String::new();
        while let Ok(tok) = rx.try_recv() {
            streamed.push_str(&tok);
        }
        assert_eq!(streamed, out.response);
    }
}
