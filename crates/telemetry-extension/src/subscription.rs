// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One-shot handshake telling the host where to push telemetry.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, ExtensionError};
use crate::http::build_client;
use crate::lifecycle::EXTENSION_ID_HEADER;

const TELEMETRY_SCHEMA_VERSION: &str = "2022-07-01";
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

const MIN_BUFFER_TIMEOUT_MS: u64 = 25;
const MAX_BUFFER_TIMEOUT_MS: u64 = 30_000;
const MIN_BUFFER_MAX_BYTES: u64 = 262_144;
const MAX_BUFFER_MAX_BYTES: u64 = 1_048_576;
const MIN_BUFFER_MAX_ITEMS: u64 = 1_000;
const MAX_BUFFER_MAX_ITEMS: u64 = 10_000;

/// Which host API the subscription goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionApi {
    /// `PUT /2022-07-01/telemetry`
    Telemetry,
    /// Legacy `PUT /2020-08-15/logs`
    Logs,
}

impl SubscriptionApi {
    pub fn path(&self) -> &'static str {
        match self {
            SubscriptionApi::Telemetry => "/2022-07-01/telemetry",
            SubscriptionApi::Logs => "/2020-08-15/logs",
        }
    }
}

impl FromStr for SubscriptionApi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "telemetry" => Ok(SubscriptionApi::Telemetry),
            "logs" => Ok(SubscriptionApi::Logs),
            other => Err(format!("unknown subscription api '{other}'")),
        }
    }
}

/// Category of records the host should push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Platform,
    Function,
    Extension,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordType::Platform => "platform",
            RecordType::Function => "function",
            RecordType::Extension => "extension",
        };
        f.write_str(name)
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "platform" => Ok(RecordType::Platform),
            "function" => Ok(RecordType::Function),
            "extension" => Ok(RecordType::Extension),
            other => Err(format!("unknown record type '{other}'")),
        }
    }
}

/// Host-side batching applied before each push to the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferingConfig {
    pub timeout_ms: u64,
    pub max_bytes: u64,
    pub max_items: u64,
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1_000,
            max_bytes: MIN_BUFFER_MAX_BYTES,
            max_items: MAX_BUFFER_MAX_ITEMS,
        }
    }
}

impl BufferingConfig {
    /// Checks every limit against the range the host accepts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "TELEMETRY_BUFFER_TIMEOUT_MS",
            self.timeout_ms,
            MIN_BUFFER_TIMEOUT_MS,
            MAX_BUFFER_TIMEOUT_MS,
        )?;
        check_range(
            "TELEMETRY_BUFFER_MAX_BYTES",
            self.max_bytes,
            MIN_BUFFER_MAX_BYTES,
            MAX_BUFFER_MAX_BYTES,
        )?;
        check_range(
            "TELEMETRY_BUFFER_MAX_ITEMS",
            self.max_items,
            MIN_BUFFER_MAX_ITEMS,
            MAX_BUFFER_MAX_ITEMS,
        )
    }
}

fn check_range(name: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionConfig {
    pub destination_uri: String,
    pub record_types: Vec<RecordType>,
    pub buffering: BufferingConfig,
}

/// Result of the subscription handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionOutcome {
    /// The host will push records to the destination.
    Accepted,
    /// The host has no telemetry push support (e.g. a local emulator).
    Unsupported,
    /// Any other outcome; the listener is useless from here on.
    Failed(String),
}

#[derive(Serialize)]
struct Destination<'a> {
    protocol: &'static str,
    #[serde(rename = "URI")]
    uri: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    schema_version: Option<&'static str>,
    types: &'a [RecordType],
    buffering: BufferingConfig,
    destination: Destination<'a>,
}

pub struct SubscriptionManager {
    url: String,
    api: SubscriptionApi,
    client: reqwest::Client,
}

impl SubscriptionManager {
    pub fn new(runtime_api: &str, api: SubscriptionApi) -> Result<Self, ExtensionError> {
        Ok(Self {
            url: format!("http://{runtime_api}{}", api.path()),
            api,
            client: build_client(SUBSCRIBE_TIMEOUT)?,
        })
    }

    /// Issues the single subscription call. Never retried.
    ///
    /// Callers must only subscribe once the listener behind `config.destination_uri`
    /// is bound, otherwise the host's first pushes can be lost.
    pub async fn subscribe(
        &self,
        registration_id: &str,
        config: &SubscriptionConfig,
    ) -> SubscriptionOutcome {
        let body = SubscribeRequest {
            schema_version: match self.api {
                SubscriptionApi::Telemetry => Some(TELEMETRY_SCHEMA_VERSION),
                SubscriptionApi::Logs => None,
            },
            types: &config.record_types,
            buffering: config.buffering,
            destination: Destination {
                protocol: "HTTP",
                uri: &config.destination_uri,
            },
        };

        debug!(
            "Subscribing {} to {:?} records at {}",
            config.destination_uri, config.record_types, self.url
        );

        let response = match self
            .client
            .put(&self.url)
            .header(EXTENSION_ID_HEADER, registration_id)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Telemetry subscription request failed: {e}");
                return SubscriptionOutcome::Failed(e.to_string());
            }
        };

        let status = response.status();
        match status {
            StatusCode::OK => {
                info!("Subscribed to telemetry API at {}", self.url);
                SubscriptionOutcome::Accepted
            }
            StatusCode::ACCEPTED => {
                warn!(
                    "Telemetry API not supported by the host; the listener will stay idle"
                );
                SubscriptionOutcome::Unsupported
            }
            _ => {
                let text = response.text().await.unwrap_or_default();
                error!("Telemetry subscription failed with status {status}: {text}");
                SubscriptionOutcome::Failed(format!("status {status}: {text}"))
            }
        }
    }
}
