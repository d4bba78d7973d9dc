// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use claude_bridge_config::PartialConfig;
use claude_bridge_gateway::{serve, AppState};
use claude_bridge_session::{HttpSdk, SessionBridge};
use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Flags merge over environment merge over defaults; this is the only
    // place the process environment is read.
    let config = PartialConfig::from_env()
        .merged_with(cli.as_partial())
        .resolve()
        .context("invalid configuration")?;

    let sdk = HttpSdk::connect(&config).context("constructing the inference SDK")?;
    let bridge = Arc::new(SessionBridge::new(Arc::new(sdk), config.clone()));
    bridge.initialize().await.context("authenticating against the SDK")?;

    let state = AppState { bridge: bridge.clone(), api_key: config.api_key.clone() };
    serve(state, config.port, shutdown_signal()).await?;

    info!("server stopped; closing session");
    if let Err(e) = bridge.shutdown().await {
        // Settlement happens on session expiry anyway, so a failed close is
        // not worth a non-zero exit.
        error!("session shutdown failed: {e}");
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}
