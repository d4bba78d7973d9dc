// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
/// End-to-end tests wiring config → session bridge → HTTP gateway over the
/// scripted mock SDK.
use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use claude_bridge_config::{BridgeConfig, PartialConfig};
use claude_bridge_gateway::{build_router, AppState};
use claude_bridge_session::{
    ScriptedMockSdk, ScriptedSessionManager, SdkError, SessionBridge, CODE_SESSION_NOT_FOUND,
};

fn resolved_config() -> BridgeConfig {
    let env: HashMap<&str, &str> = HashMap::from([
        ("CLAUDE_BRIDGE_PRIVATE_KEY", "0xdeadbeef"),
        ("CLAUDE_BRIDGE_MODEL", "glm-4"),
    ]);
    PartialConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()))
        .resolve()
        .expect("minimal env config must resolve")
}

fn app_over(sdk: ScriptedMockSdk) -> (axum::Router, Arc<ScriptedSessionManager>) {
    let manager = sdk.manager();
    let config = resolved_config();
    let api_key = config.api_key.clone();
    let bridge = Arc::new(SessionBridge::new(Arc::new(sdk), config));
    (build_router(AppState { bridge, api_key }), manager)
}

fn post_messages(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn hello_round_trip_through_the_full_stack() {
    let (app, manager) = app_over(ScriptedMockSdk::always_text("Test response", 5));

    let body = r#"{"model":"glm-4","max_tokens":100,
                   "messages":[{"role":"user","content":"Hello"}]}"#;
    let response = app.oneshot(post_messages(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let v = read_json(response).await;
    assert_eq!(v["content"][0]["text"], "Test response");
    assert_eq!(v["stop_reason"], "end_turn");
    assert_eq!(v["usage"]["input_tokens"], 3);
    assert_eq!(v["usage"]["output_tokens"], 5);

    // The backend must have received a ChatML prompt, not raw JSON.
    let (session_id, prompt) = manager.sends.lock().unwrap()[0].clone();
    assert_eq!(session_id, 1, "lazily created first session");
    assert!(prompt.contains("<|im_start|>user\nHello\n<|im_end|>\n"));
    assert!(prompt.ends_with("<|im_start|>assistant\n"));
}

#[tokio::test]
async fn session_is_reused_across_requests() {
    let (app, manager) = app_over(ScriptedMockSdk::always_text("ok", 1));
    let body = r#"{"model":"glm-4","max_tokens":10,"messages":[{"role":"user","content":"a"}]}"#;

    for _ in 0..3 {
        let response = app.clone().oneshot(post_messages(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(manager.start_params.lock().unwrap().len(), 1, "one session for all requests");
    assert_eq!(manager.sends.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn dead_session_recovers_invisibly() {
    let manager = ScriptedSessionManager::new()
        .with_session_ids([42, 99])
        .with_outcomes([
            Err(SdkError::session(CODE_SESSION_NOT_FOUND, "session 42 unknown")),
            Ok("Recovered".into()),
        ]);
    let (app, manager) = app_over(ScriptedMockSdk::new(manager));

    let body = r#"{"model":"glm-4","max_tokens":10,"messages":[{"role":"user","content":"hi"}]}"#;
    let response = app.oneshot(post_messages(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["content"][0]["text"], "Recovered");

    let sends = manager.sends.lock().unwrap().clone();
    assert_eq!(sends[0].0, 42);
    assert_eq!(sends[1].0, 99);
}

#[tokio::test]
async fn image_blocks_travel_as_sidecar_attachments() {
    let (app, manager) = app_over(ScriptedMockSdk::always_text("seen", 1));

    let body = r#"{"model":"glm-4","max_tokens":10,"messages":[
        {"role":"user","content":[
            {"type":"text","text":"what is this?"},
            {"type":"image","source":{"type":"base64","media_type":"image/png","data":"iVBORw0K"}}
        ]}]}"#;
    let response = app.oneshot(post_messages(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let images = manager.sent_images.lock().unwrap()[0].clone();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].format, "png");
    assert_eq!(images[0].data, "iVBORw0K");
    let prompt = manager.sends.lock().unwrap()[0].1.clone();
    assert!(!prompt.contains("iVBORw0K"), "image data must stay out of the prompt");
}

#[tokio::test]
async fn tool_definitions_reach_the_system_prompt() {
    let (app, manager) = app_over(ScriptedMockSdk::always_text("ok", 1));

    let body = r#"{"model":"glm-4","max_tokens":10,
        "system":"You are helpful.",
        "tools":[{"name":"get_weather","description":"Get weather info",
                  "input_schema":{"type":"object","properties":{"city":{"type":"string"}},
                                  "required":["city"]}}],
        "messages":[{"role":"user","content":"Hi"}]}"#;
    let response = app.oneshot(post_messages(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let prompt = manager.sends.lock().unwrap()[0].1.clone();
    assert!(prompt.starts_with("<|im_start|>system\n"));
    assert!(prompt.contains("- get_weather: Get weather info [city]"));
    assert!(prompt.contains("IMPORTANT"));
}

#[tokio::test]
async fn config_layers_resolve_with_defaults() {
    let config = resolved_config();
    assert_eq!(config.port, 3456);
    assert_eq!(config.chain_id, 84532);
    assert_eq!(config.model_name, "glm-4");
    assert!(config.api_key.is_none());
}
