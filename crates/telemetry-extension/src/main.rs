// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process::ExitCode, sync::Arc};
use tracing::{debug, error, info, warn};

use telemetry_extension::{
    config::ExtensionConfig,
    dispatch::build_sink,
    extension::{Extension, LoggingHandler},
    logger,
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("TELEMETRY_EXTENSION_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or_else(|_| "info".to_string());

    if let Err(e) = logger::init(&log_level) {
        eprintln!("TELEMETRY_EXTENSION | ERROR | Could not set up logging: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    let config = match ExtensionConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let sink = match build_sink(&config.sink, config.dispatch_timeout) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Could not create dispatch sink: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Starting {} with {} sink",
        config.extension_name,
        sink.name()
    );

    let extension = Extension::new(config, Arc::new(LoggingHandler), sink);

    // A termination signal exits right away; only SHUTDOWN guarantees a final flush.
    tokio::select! {
        result = extension.run() => match result {
            Ok(summary) => {
                info!(
                    "Extension finished after {} invocations, final dispatch {:?}, {} records evicted",
                    summary.invocations, summary.final_dispatch, summary.evicted
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Extension terminated: {e}");
                ExitCode::FAILURE
            }
        },
        signal = shutdown_signal() => {
            warn!("Received {signal}, exiting without flushing buffered telemetry");
            ExitCode::SUCCESS
        }
    }
}

async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = ctrl_c() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            },
            Err(e) => {
                warn!("Could not install SIGTERM handler: {e}");
                ctrl_c().await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
        "SIGINT"
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for SIGINT: {e}");
        std::future::pending::<()>().await;
    }
}
