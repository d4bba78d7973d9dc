// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The HTTP face of the bridge.
//!
//! # Routes
//!
//! | Method    | Path           | Behaviour                                |
//! |-----------|----------------|------------------------------------------|
//! | `GET`     | `/health`      | `{"status":"ok"}`                        |
//! | `OPTIONS` | `/v1/messages` | CORS preflight, empty 200                |
//! | `POST`    | `/v1/messages` | Messages request → buffered JSON answer  |
//! | `GET`     | `/v1/messages` | 405 envelope                             |
//! | any       | anything else  | 404 envelope                             |
//!
//! Every response carries the permissive CORS headers; local IDE clients run
//! from arbitrary origins.  Failures use the Anthropic error envelope
//! `{"type":"error","error":{"type":...,"message":...}}`.
//!
//! The handler is buffered end to end: the backend stream is drained to
//! completion, split into text and tool-call events, and returned as one
//! JSON body — even when the client asked for `stream: true`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::sync::mpsc;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use claude_bridge_model::{
    convert_messages, estimate_input_tokens, estimator_text, ErrorResponse, MessagesRequest,
    MessagesResponse, ParserEvent, ResponseBlock, StopReason, ToolCallParser, UsageInfo,
};
use claude_bridge_session::{SdkError, SessionBridge};

use crate::auth::require_api_key;

/// Shared server state; cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<SessionBridge>,
    pub api_key: Option<String>,
}

/// Assemble the full route tree with CORS and auth layers applied.
pub fn build_router(state: AppState) -> Router {
    let messages = Router::new()
        .route(
            "/v1/messages",
            post(handle_messages).options(preflight).get(method_not_allowed),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .merge(messages)
        .fallback(not_found)
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("POST, OPTIONS, GET"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("content-type, x-api-key, anthropic-version"),
        ))
        .with_state(state)
}

/// Bind and serve until the shutdown future resolves.
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "claude bridge listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ─── Handlers ─────────────────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> Response {
    error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        "invalid_request_error",
        "method not allowed; use POST",
    )
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not_found_error", "unknown route")
}

async fn handle_messages(State(state): State<AppState>, body: Bytes) -> Response {
    let request: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                format!("invalid request body: {e}"),
            );
        }
    };

    let converted = match convert_messages(
        &request.messages,
        request.system.as_deref(),
        request.tools.as_deref(),
    ) {
        Ok(converted) => converted,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_request_error", e.to_string());
        }
    };

    let input_tokens =
        estimate_input_tokens(&estimator_text(&request.messages, request.system.as_deref()));
    debug!(
        model = %request.model,
        prompt_len = converted.prompt.len(),
        images = converted.images.len(),
        "forwarding request"
    );

    // The token callback feeds server-side logging only; the HTTP client
    // always receives one buffered JSON body.
    let (token_tx, mut token_rx) = mpsc::channel::<String>(64);
    let drain = tokio::spawn(async move {
        let mut tokens = 0usize;
        while token_rx.recv().await.is_some() {
            tokens += 1;
        }
        tokens
    });

    let sent = state
        .bridge
        .send_prompt(&converted.prompt, Some(token_tx), &converted.images)
        .await;
    let streamed_tokens = drain.await.unwrap_or(0);

    let sent = match sent {
        Ok(sent) => sent,
        Err(e) => {
            warn!(error = %e, "backend send failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, sdk_error_kind(&e), e.to_string());
        }
    };
    debug!(streamed_tokens, total_tokens = sent.token_usage.total_tokens, "backend stream complete");

    let mut parser = ToolCallParser::new();
    let mut events = parser.feed(&sent.response);
    events.extend(parser.flush());

    let stop_reason = match events.last() {
        Some(ParserEvent::ToolCall { .. }) => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    };

    let response = MessagesResponse {
        id: format!("msg_{}", Uuid::new_v4().simple()),
        kind: "message".into(),
        role: "assistant".into(),
        model: request.model,
        content: events_to_blocks(&events),
        stop_reason,
        stop_sequence: None,
        usage: UsageInfo { input_tokens, output_tokens: sent.token_usage.total_tokens },
    };
    (StatusCode::OK, Json(response)).into_response()
}

// ─── Response assembly ────────────────────────────────────────────────────────

/// Map parser events onto response content blocks, coalescing adjacent text.
fn events_to_blocks(events: &[ParserEvent]) -> Vec<ResponseBlock> {
    let mut blocks: Vec<ResponseBlock> = Vec::new();
    for event in events {
        match event {
            ParserEvent::Text { text } => match blocks.last_mut() {
                Some(ResponseBlock::Text { text: previous }) => previous.push_str(text),
                _ => blocks.push(ResponseBlock::Text { text: text.clone() }),
            },
            ParserEvent::ToolCall { name, arguments } => blocks.push(ResponseBlock::ToolUse {
                id: format!("call_{}", Uuid::new_v4().simple()),
                name: name.clone(),
                input: serde_json::Value::Object(arguments.clone()),
            }),
        }
    }
    blocks
}

pub(crate) fn error_response(
    status: StatusCode,
    kind: &str,
    message: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse::new(kind, message))).into_response()
}

/// Encode the SDK failure kind into an Anthropic `error.type`.
fn sdk_error_kind(error: &SdkError) -> &'static str {
    match error {
        SdkError::Auth(_) => "authentication_error",
        SdkError::InsufficientFunds(_) => "permission_error",
        SdkError::HostUnavailable(_) => "overloaded_error",
        SdkError::Config(_) | SdkError::Session { .. } | SdkError::Network(_) => "api_error",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
