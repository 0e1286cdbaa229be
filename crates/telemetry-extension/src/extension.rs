// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Drives the full extension protocol.
//!
//! ```text
//! register -> start listener (bound) -> subscribe -> loop { next -> dispatch }
//! ```
//!
//! The listener has to be bound before the subscription goes out, otherwise the
//! host's first pushes race the socket. On `SHUTDOWN` the loop performs the one
//! forced final dispatch and stops the listener.

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::buffer::BufferQueue;
use crate::config::ExtensionConfig;
use crate::dispatch::{DispatchEngine, DispatchOutcome, Sink};
use crate::error::ExtensionError;
use crate::error_reporter::ErrorReporter;
use crate::ingest::IngestListener;
use crate::lifecycle::{ErrorPhase, EventType, LifecycleClient, LifecycleEvent};
use crate::subscription::{SubscriptionConfig, SubscriptionManager, SubscriptionOutcome};

/// Application logic run on every `INVOKE` event.
///
/// Errors are logged and never stop the lifecycle loop.
#[async_trait]
pub trait InvokeHandler: Send + Sync {
    async fn on_invoke(&self, event: &LifecycleEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Handler that only logs the invocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl InvokeHandler for LoggingHandler {
    async fn on_invoke(&self, event: &LifecycleEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        debug!(
            "Invocation {} of {}",
            event.request_id().unwrap_or("<unknown>"),
            event.invoked_function_arn().unwrap_or("<unknown>")
        );
        Ok(())
    }
}

/// What happened over the life of the extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub invocations: u64,
    pub subscription: SubscriptionOutcome,
    pub final_dispatch: DispatchOutcome,
    /// Records evicted from a full queue.
    pub evicted: u64,
}

pub struct Extension {
    config: ExtensionConfig,
    handler: Arc<dyn InvokeHandler>,
    sink: Arc<dyn Sink>,
}

impl Extension {
    pub fn new(
        config: ExtensionConfig,
        handler: Arc<dyn InvokeHandler>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self {
            config,
            handler,
            sink,
        }
    }

    /// Runs until the host sends `SHUTDOWN` or a fatal error occurs.
    ///
    /// Fatal errors after registration are reported to the host before being
    /// returned.
    pub async fn run(self) -> Result<RunSummary, ExtensionError> {
        let config = self.config;
        let mut client = LifecycleClient::new(&config.runtime_api)?;
        let subscription_manager =
            SubscriptionManager::new(&config.runtime_api, config.subscription_api)?;
        let mut reporter = ErrorReporter::new();

        let registration_id = client
            .register(
                &config.extension_name,
                &[EventType::Invoke, EventType::Shutdown],
            )
            .await?
            .id
            .clone();

        let queue = BufferQueue::new(config.queue_max_items);
        let listener = match IngestListener::start(
            &config.listener_host,
            config.listener_port,
            queue.clone(),
            config.max_push_bytes,
        )
        .await
        {
            Ok(listener) => listener,
            Err(e) => {
                reporter.report(&client, ErrorPhase::Init, &e).await;
                client.terminate();
                return Err(e);
            }
        };

        let subscription_config = SubscriptionConfig {
            destination_uri: listener.destination_uri(),
            record_types: config.record_types.clone(),
            buffering: config.buffering,
        };
        let subscription = subscription_manager
            .subscribe(&registration_id, &subscription_config)
            .await;

        let mut listener = Some(listener);
        match &subscription {
            SubscriptionOutcome::Accepted => {}
            SubscriptionOutcome::Unsupported => {
                warn!("Continuing without telemetry subscription; no records will be pushed");
            }
            SubscriptionOutcome::Failed(reason) => {
                warn!("Telemetry subscription failed ({reason}), stopping ingest listener");
                if let Some(listener) = listener.take() {
                    listener.stop().await;
                }
            }
        }

        let mut engine = DispatchEngine::new(
            queue.clone(),
            self.sink,
            config.batch_policy(),
            config.shutdown_grace,
        );
        let mut invocations = 0u64;

        loop {
            let event = match client.next().await {
                Ok(event) => event,
                Err(e) => {
                    reporter.report(&client, ErrorPhase::Shutdown, &e).await;
                    if let Some(listener) = listener.take() {
                        listener.stop().await;
                    }
                    return Err(e);
                }
            };

            match event.event_type {
                EventType::Invoke => {
                    invocations += 1;
                    if let Err(e) = self.handler.on_invoke(&event).await {
                        error!("Invoke handler failed: {e}");
                    }
                    engine.dispatch(false).await;
                }
                EventType::Shutdown => {
                    info!(
                        "Received SHUTDOWN ({})",
                        event.shutdown_reason().unwrap_or("no reason given")
                    );
                    let final_dispatch = engine.dispatch_final().await?;
                    if let Some(listener) = listener.take() {
                        listener.stop().await;
                    }
                    client.finish()?;

                    return Ok(RunSummary {
                        invocations,
                        subscription,
                        final_dispatch,
                        evicted: queue.evicted(),
                    });
                }
            }
        }
    }
}
