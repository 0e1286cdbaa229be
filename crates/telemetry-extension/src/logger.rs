// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log formatting for the extension process.
//!
//! The host interleaves the extension's stdout with the function's own output,
//! so every line is prefixed to keep it identifiable:
//!
//! ```text
//! TELEMETRY_EXTENSION | INFO | Registered extension with id 4f2c...
//! TELEMETRY_EXTENSION | DEBUG | Queued 3 pushed records
//! ```

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const LOG_PREFIX: &str = "TELEMETRY_EXTENSION";

/// Formats events as `TELEMETRY_EXTENSION | LEVEL | message fields`.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "{LOG_PREFIX} | {} | ", event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Builds the filter directive for `log_level`, silencing chatty transport crates.
pub fn env_filter(log_level: &str) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    EnvFilter::try_new(format!("h2=off,hyper=off,rustls=off,{log_level}"))
}

/// Installs the global subscriber. Must be called once, before any logging.
pub fn init(log_level: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(log_level)?)
        .with_level(true)
        .with_target(false)
        .with_ansi(false)
        .without_time()
        .event_format(Formatter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
