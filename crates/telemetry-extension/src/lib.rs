// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Telemetry Extension
//!
//! A sidecar that attaches to a managed function host, registers for lifecycle
//! events and forwards the telemetry the host pushes to it.
//!
//! ## Architecture
//!
//! - [`lifecycle`]: registration, the `event/next` long-poll and error reporting
//! - [`subscription`]: the one-shot handshake telling the host where to push
//! - [`ingest`]: the HTTP listener receiving pushed record batches
//! - [`buffer`]: the bounded queue shared by the listener and the dispatcher
//! - [`dispatch`]: batch gating and delivery to a [`dispatch::Sink`]
//! - [`extension`]: the orchestration tying all of the above together

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod error_reporter;
pub mod extension;
pub mod http;
pub mod ingest;
pub mod lifecycle;

/// Logging infrastructure and tracing setup
pub mod logger;

pub mod subscription;
