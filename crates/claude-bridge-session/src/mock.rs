// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;

use claude_bridge_model::{ImageAttachment, TokenUsage};

use crate::sdk::{
    AuthCredentials, InferenceSdk, SdkError, SessionHandle, SessionManager, StartSessionParams,
    TokenSink,
};

/// A pre-scripted mock SDK.  Each `send_prompt_streaming` call pops the next
/// outcome from the front of the queue, and every interaction is recorded so
/// tests can assert exact call sequences without network access.
pub struct ScriptedMockSdk {
    manager: Arc<ScriptedSessionManager>,
    /// `(method, private_key)` of every `authenticate` call.
    pub auth_calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedMockSdk {
    pub fn new(manager: ScriptedSessionManager) -> Self {
        Self { manager: Arc::new(manager), auth_calls: Mutex::new(Vec::new()) }
    }

    /// Convenience: an SDK whose every send succeeds with `reply` and reports
    /// `total_tokens` of usage.
    pub fn always_text(reply: impl Into<String>, total_tokens: u64) -> Self {
        Self::new(
            ScriptedSessionManager::new()
                .with_reply(reply)
                .with_usage(TokenUsage { llm_tokens: total_tokens, vlm_tokens: 0, total_tokens }),
        )
    }

    /// The shared manager, for inspecting recorded calls after the fact.
    pub fn manager(&self) -> Arc<ScriptedSessionManager> {
        Arc::clone(&self.manager)
    }
}

#[async_trait]
impl InferenceSdk for ScriptedMockSdk {
    async fn authenticate(
        &self,
        method: &str,
        credentials: AuthCredentials,
    ) -> Result<(), SdkError> {
        self.auth_calls
            .lock()
            .unwrap()
            .push((method.to_string(), credentials.private_key));
        Ok(())
    }

    fn session_manager(&self) -> Arc<dyn SessionManager> {
        self.manager.clone()
    }
}

/// The scripted session manager behind [`ScriptedMockSdk`].
#[derive(Default)]
pub struct ScriptedSessionManager {
    /// Ids handed out by successive `start_session` calls; once exhausted a
    /// monotonic counter takes over.
    session_ids: Mutex<VecDeque<u64>>,
    fallback_id: AtomicU64,
    /// Ordered outcomes for `send_prompt_streaming`.
    outcomes: Mutex<VecDeque<Result<String, SdkError>>>,
    /// Fallback reply once outcomes are exhausted.
    default_reply: Mutex<Option<String>>,
    usage: Mutex<TokenUsage>,
    /// Every `start_session` call, in order.
    pub start_params: Mutex<Vec<StartSessionParams>>,
    /// Every send: `(session_id, prompt)`.
    pub sends: Mutex<Vec<(u64, String)>>,
    /// Images passed alongside each send.
    pub sent_images: Mutex<Vec<Vec<ImageAttachment>>>,
    /// Sessions closed via `end_session`.
    pub ended: Mutex<Vec<u64>>,
}

impl ScriptedSessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_ids(self, ids: impl IntoIterator<Item = u64>) -> Self {
        *self.session_ids.lock().unwrap() = ids.into_iter().collect();
        self
    }

    pub fn with_outcomes(
        self,
        outcomes: impl IntoIterator<Item = Result<String, SdkError>>,
    ) -> Self {
        *self.outcomes.lock().unwrap() = outcomes.into_iter().collect();
        self
    }

    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        *self.default_reply.lock().unwrap() = Some(reply.into());
        self
    }

    pub fn with_usage(self, usage: TokenUsage) -> Self {
        *self.usage.lock().unwrap() = usage;
        self
    }
}

#[async_trait]
impl SessionManager for ScriptedSessionManager {
    async fn start_session(&self, params: StartSessionParams) -> Result<SessionHandle, SdkError> {
        self.start_params.lock().unwrap().push(params);
        let session_id = self
            .session_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| 1 + self.fallback_id.fetch_add(1, Ordering::Relaxed));
        Ok(SessionHandle { session_id, job_id: session_id + 1000 })
    }

    async fn send_prompt_streaming(
        &self,
        session_id: u64,
        prompt: &str,
        on_token: Option<TokenSink>,
        images: &[ImageAttachment],
    ) -> Result<String, SdkError> {
        self.sends.lock().unwrap().push((session_id, prompt.to_string()));
        self.sent_images.lock().unwrap().push(images.to_vec());

        let outcome = self.outcomes.lock().unwrap().pop_front();
        let text = match outcome {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Err(e),
            None => self
                .default_reply
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| "[no more scripts]".into()),
        };

        if let Some(sink) = on_token {
            // Stream word-sized chunks the way a real host would.
            for token in text.split_inclusive(' ') {
                let _ = sink.send(token.to_string()).await;
            }
        }
        Ok(text)
    }

    async fn last_token_usage(&self) -> TokenUsage {
        *self.usage.lock().unwrap()
    }

    async fn end_session(&self, session_id: u64) -> Result<(), SdkError> {
        self.ended.lock().unwrap().push(session_id);
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StartSessionParams {
        StartSessionParams {
            chain_id: 84532,
            model_id: "glm-4".into(),
            payment_method: "deposit".into(),
            encryption: true,
            host: None,
            deposit_amount: "0.0002".into(),
            price_per_token: 5000,
            proof_interval: 100,
            duration: 86_400,
        }
    }

    #[tokio::test]
    async fn scripted_ids_are_handed_out_in_order() {
        let m = ScriptedSessionManager::new().with_session_ids([42, 99]);
        assert_eq!(m.start_session(params()).await.unwrap().session_id, 42);
        assert_eq!(m.start_session(params()).await.unwrap().session_id, 99);
        // Queue exhausted: the fallback counter takes over.
        assert_eq!(m.start_session(params()).await.unwrap().session_id, 1);
    }

    #[tokio::test]
    async fn outcomes_pop_in_order_then_fall_back() {
        let m = ScriptedSessionManager::new()
            .with_outcomes([Ok("one".into()), Ok("two".into())])
            .with_reply("rest");
        assert_eq!(m.send_prompt_streaming(1, "p", None, &[]).await.unwrap(), "one");
        assert_eq!(m.send_prompt_streaming(1, "p", None, &[]).await.unwrap(), "two");
        assert_eq!(m.send_prompt_streaming(1, "p", None, &[]).await.unwrap(), "rest");
    }

    #[tokio::test]
    async fn streamed_tokens_concatenate_to_the_reply() {
        let m = ScriptedSessionManager::new().with_reply("a b c");
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let full = m.send_prompt_streaming(1, "p", Some(tx), &[]).await.unwrap();
        let mut collected = String::new();
        while let Ok(t) = rx.try_recv() {
            collected.push_str(&t);
        }
        assert_eq!(collected, full);
    }

    #[tokio::test]
    async fn images_are_recorded_per_send() {
        let m = ScriptedSessionManager::new().with_reply("ok");
        let images = vec![ImageAttachment { data: "AAA".into(), format: "png".into() }];
        m.send_prompt_streaming(1, "p", None, &images).await.unwrap();
        assert_eq!(m.sent_images.lock().unwrap()[0], images);
    }
}
