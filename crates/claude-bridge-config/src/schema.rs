// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub(crate) const DEFAULT_PORT: u16 = 3456;
pub(crate) const DEFAULT_CHAIN_ID: u64 = 84532;
pub(crate) const DEFAULT_DEPOSIT_AMOUNT: &str = "0.0002";
pub(crate) const DEFAULT_PRICE_PER_TOKEN: u64 = 5000;
pub(crate) const DEFAULT_PROOF_INTERVAL: u64 = 100;
pub(crate) const DEFAULT_DURATION_SECS: u64 = 86_400;

/// The fully resolved startup configuration.
///
/// Built once in the composition root from CLI flags merged over environment
/// variables merged over defaults; nothing else in the tree reads the
/// environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// HTTP listen port.
    pub port: u16,
    /// EOA private key handed to the SDK for authentication and settlement.
    pub private_key: String,
    /// Pinned inference host.  `None` lets the SDK auto-discover one.
    pub host_address: Option<String>,
    /// Model identifier forwarded verbatim to the SDK.
    pub model_name: String,
    /// Chain used for contract and RPC selection.
    pub chain_id: u64,
    /// Session deposit, kept as the decimal string the SDK expects.
    pub deposit_amount: String,
    /// Price per token in wei.
    pub price_per_token: u64,
    /// Tokens between on-chain proof checkpoints.
    pub proof_interval: u64,
    /// Session lifetime in seconds.
    pub duration_secs: u64,
    /// When set, `/v1/messages` requires a matching `x-api-key` header.
    pub api_key: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required config field `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
