// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! canaryd: one member of the canary routing cluster.
//!
//! Configuration is environment-driven; see `env.rs` for the knobs.

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use canary_node::{env, lifecycle};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canary_node=info,canaryd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match env::config_from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let handle = match lifecycle::startup(config).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
        _ = handle.cancelled() => {}
    }

    let fatal = handle.node.take_fatal();
    handle.shutdown().await;

    match fatal {
        Some(reason) => {
            error!(%reason, "node stopped after fatal error");
            ExitCode::FAILURE
        }
        None => {
            info!("node stopped");
            ExitCode::SUCCESS
        }
    }
}
