// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Config resolution: defaults ← environment ← CLI flags.
//!
//! All ingress values are kept as strings until [`PartialConfig::resolve`],
//! which is the single place numeric coercion and validation happen.  The
//! resolver performs no I/O, so it is trivially testable.

use crate::schema::{
    BridgeConfig, ConfigError, DEFAULT_CHAIN_ID, DEFAULT_DEPOSIT_AMOUNT, DEFAULT_DURATION_SECS,
    DEFAULT_PORT, DEFAULT_PRICE_PER_TOKEN, DEFAULT_PROOF_INTERVAL,
};

const ENV_PREFIX: &str = "CLAUDE_BRIDGE_";

/// A partially specified configuration from one ingress surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialConfig {
    pub port: Option<String>,
    pub private_key: Option<String>,
    pub host_address: Option<String>,
    pub model_name: Option<String>,
    pub chain_id: Option<String>,
    pub deposit_amount: Option<String>,
    pub price_per_token: Option<String>,
    pub proof_interval: Option<String>,
    pub duration_secs: Option<String>,
    pub api_key: Option<String>,
}

impl PartialConfig {
    /// Read the `CLAUDE_BRIDGE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Environment reading with an injectable lookup, so tests never have to
    /// mutate process-global state.  Empty values count as unset.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let var = |suffix: &str| {
            get(&format!("{ENV_PREFIX}{suffix}")).filter(|v| !v.trim().is_empty())
        };
        Self {
            port: var("PORT"),
            private_key: var("PRIVATE_KEY"),
            host_address: var("HOST"),
            model_name: var("MODEL"),
            chain_id: var("CHAIN_ID"),
            deposit_amount: var("DEPOSIT_AMOUNT"),
            price_per_token: var("PRICE_PER_TOKEN"),
            proof_interval: var("PROOF_INTERVAL"),
            duration_secs: var("DURATION"),
            api_key: var("API_KEY"),
        }
    }

    /// Layer `over` on top of `self`; set fields in `over` win.
    pub fn merged_with(self, over: PartialConfig) -> Self {
        Self {
            port: over.port.or(self.port),
            private_key: over.private_key.or(self.private_key),
            host_address: over.host_address.or(self.host_address),
            model_name: over.model_name.or(self.model_name),
            chain_id: over.chain_id.or(self.chain_id),
            deposit_amount: over.deposit_amount.or(self.deposit_amount),
            price_per_token: over.price_per_token.or(self.price_per_token),
            proof_interval: over.proof_interval.or(self.proof_interval),
            duration_secs: over.duration_secs.or(self.duration_secs),
            api_key: over.api_key.or(self.api_key),
        }
    }

    /// Validate and coerce into the final [`BridgeConfig`].
    ///
    /// `private_key` and `model_name` must be present and non-empty; numeric
    /// fields are parsed from their string form; everything else falls back
    /// to its default.  `host_address` is preserved verbatim when present.
    pub fn resolve(self) -> Result<BridgeConfig, ConfigError> {
        let private_key = require(self.private_key, "private_key")?;
        let model_name = require(self.model_name, "model_name")?;

        Ok(BridgeConfig {
            port: parse_or(self.port, "port", DEFAULT_PORT)?,
            private_key,
            host_address: self.host_address,
            model_name,
            chain_id: parse_or(self.chain_id, "chain_id", DEFAULT_CHAIN_ID)?,
            deposit_amount: self.deposit_amount.unwrap_or_else(|| DEFAULT_DEPOSIT_AMOUNT.into()),
            price_per_token: parse_or(self.price_per_token, "price_per_token", DEFAULT_PRICE_PER_TOKEN)?,
            proof_interval: parse_or(self.proof_interval, "proof_interval", DEFAULT_PROOF_INTERVAL)?,
            duration_secs: parse_or(self.duration_secs, "duration", DEFAULT_DURATION_SECS)?,
            api_key: self.api_key,
        })
    }
}

fn require(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(field)),
    }
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    field: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            field,
            reason: e.to_string(),
        }),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
