// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `x-api-key` gating for `/v1/messages`.
//!
//! The gate is armed only when the server was started with an API key; with
//! no key configured the header is ignored whether present or not.  Key
//! comparison uses [`subtle::ConstantTimeEq`] to prevent timing oracles.
//! CORS preflights pass through unchecked — a browser cannot attach custom
//! headers to an `OPTIONS` probe.

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::server::{error_response, AppState};

pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !key_matches(expected, provided) {
        warn!("rejected request with missing or mismatched x-api-key");
        return error_response(
            StatusCode::FORBIDDEN,
            "authentication_error",
            "invalid x-api-key",
        );
    }
    next.run(req).await
}

fn key_matches(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
