// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use clap::Parser;

use claude_bridge_config::PartialConfig;

/// Serve the Anthropic Messages API locally and forward every request to a
/// paid on-chain inference session.
///
/// Required settings may come from flags or from `CLAUDE_BRIDGE_*`
/// environment variables; flags win.
#[derive(Parser, Debug)]
#[command(name = "claude-bridge", version, about)]
pub struct Cli {
    /// Listen port for the HTTP server.
    #[arg(long)]
    pub port: Option<u16>,

    /// EOA private key used by the SDK for authentication and settlement.
    #[arg(long, value_name = "HEX")]
    pub private_key: Option<String>,

    /// Pin a specific inference host address; omit to auto-discover.
    #[arg(long, value_name = "ADDRESS")]
    pub host: Option<String>,

    /// Model identifier passed through to the SDK.
    #[arg(long, value_name = "NAME")]
    pub model: Option<String>,

    /// Chain id for contract and RPC selection.
    #[arg(long)]
    pub chain_id: Option<u64>,

    /// Session deposit as a decimal token amount.
    #[arg(long, value_name = "AMOUNT")]
    pub deposit_amount: Option<String>,

    /// Price per token in wei.
    #[arg(long)]
    pub price_per_token: Option<u64>,

    /// Tokens between on-chain proof checkpoints.
    #[arg(long)]
    pub proof_interval: Option<u64>,

    /// Session lifetime in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub duration: Option<u64>,

    /// Require this value in the `x-api-key` header on /v1/messages.
    #[arg(long, value_name = "KEY")]
    pub api_key: Option<String>,

    /// Log at debug level (RUST_LOG overrides).
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl Cli {
    /// The flag layer of the config merge.  Numerics are stringified here so
    /// that coercion and validation stay in one place, the resolver.
    pub fn as_partial(&self) -> PartialConfig {
        PartialConfig {
            port: self.port.map(|v| v.to_string()),
            private_key: self.private_key.clone(),
            host_address: self.host.clone(),
            model_name: self.model.clone(),
            chain_id: self.chain_id.map(|v| v.to_string()),
            deposit_amount: self.deposit_amount.clone(),
            price_per_token: self.price_per_token.map(|v| v.to_string()),
            proof_interval: self.proof_interval.map(|v| v.to_string()),
            duration_secs: self.duration.map(|v| v.to_string()),
            api_key: self.api_key.clone(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
