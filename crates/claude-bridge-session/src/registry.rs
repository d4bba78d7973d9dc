// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Chain registry: static metadata for every chain the bridge can settle on.
//!
//! This module is the single source of truth for chain ids and their contract
//! and endpoint addresses.  It does **not** contain connection logic – that
//! lives in [`crate::HttpSdk`].

/// Metadata describing one supported chain.
#[derive(Debug, Clone)]
pub struct ChainMeta {
    /// EVM chain id used in `--chain-id` and session params.
    pub chain_id: u64,
    /// Human-readable chain name.
    pub name: &'static str,
    /// JSON-RPC endpoint handed to the SDK for settlement traffic.
    pub rpc_url: &'static str,
    /// Session-broker endpoint the HTTP transport talks to.
    pub gateway_url: &'static str,
    /// Session marketplace contract.
    pub marketplace_address: &'static str,
    /// ERC-20 used for deposits.
    pub payment_token_address: &'static str,
}

/// Complete registry of supported chains.
pub static CHAINS: &[ChainMeta] = &[
    ChainMeta {
        chain_id: 84532,
        name: "Base Sepolia",
        rpc_url: "https://sepolia.base.org",
        gateway_url: "https://gateway.base-sepolia.fabstir.net",
        marketplace_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3",
        payment_token_address: "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512",
    },
    ChainMeta {
        chain_id: 8453,
        name: "Base",
        rpc_url: "https://mainnet.base.org",
        gateway_url: "https://gateway.base.fabstir.net",
        marketplace_address: "0x9A676e781A523b5d0C0e43731313A708CB607508",
        payment_token_address: "0x0B306BF915C4d645ff596e518fAf3F9669b97016",
    },
    ChainMeta {
        chain_id: 31337,
        name: "Local devnet",
        rpc_url: "http://127.0.0.1:8545",
        gateway_url: "http://127.0.0.1:8080",
        marketplace_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3",
        payment_token_address: "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512",
    },
];

/// Look up a chain by id.  Returns `None` for unregistered chains.
pub fn lookup(chain_id: u64) -> Option<&'static ChainMeta> {
    CHAINS.iter().find(|c| c.chain_id == chain_id)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
