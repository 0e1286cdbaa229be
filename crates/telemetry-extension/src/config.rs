// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::buffer::DEFAULT_MAX_QUEUE_ITEMS;
use crate::dispatch::BatchPolicy;
use crate::error::ConfigError;
use crate::subscription::{BufferingConfig, RecordType, SubscriptionApi};

const DEFAULT_LISTENER_PORT: u16 = 4243;
const DEFAULT_LISTENER_HOST: &str = "sandbox.localdomain";
const SAM_LOCAL_LISTENER_HOST: &str = "0.0.0.0";
const DEFAULT_MAX_PUSH_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_BATCH_AGE_MS: u64 = 10_000;
const DEFAULT_MAX_BATCH_BYTES: usize = 4 * 1024;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 1_000;
const DEFAULT_EXTENSION_NAME: &str = "telemetry-extension";

/// Where dispatched batches go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkConfig {
    /// No destination configured; batches are logged and dropped.
    None,
    /// POST each batch as a JSON array to this URI.
    Http { uri: String },
    /// Write each batch as an object under this local directory.
    LocalObjectStore { root: PathBuf },
    /// Write each batch as an object into this S3 bucket.
    S3 { bucket: String },
}

/// Runtime configuration of the extension, read from the environment.
#[derive(Debug, Clone)]
pub struct ExtensionConfig {
    /// `host:port` of the host control plane.
    pub runtime_api: String,
    /// Name sent on registration. Must match the extension's file name on the host.
    pub extension_name: String,
    pub log_level: String,
    pub subscription_api: SubscriptionApi,
    pub record_types: Vec<RecordType>,
    /// Batching the host applies before pushing to the listener.
    pub buffering: BufferingConfig,
    pub listener_host: String,
    /// 0 binds an ephemeral port.
    pub listener_port: u16,
    pub max_push_bytes: usize,
    pub queue_max_items: usize,
    pub sink: SinkConfig,
    pub min_batch_size: usize,
    /// Send a short batch once this long has passed since the queue was drained.
    /// Zero disables the check.
    pub max_batch_age: Duration,
    /// Send a short batch once the queue holds roughly this many bytes. Zero
    /// disables the check.
    pub max_batch_bytes: usize,
    pub dispatch_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            runtime_api: "127.0.0.1:9001".to_string(),
            extension_name: DEFAULT_EXTENSION_NAME.to_string(),
            log_level: "info".to_string(),
            subscription_api: SubscriptionApi::Telemetry,
            record_types: vec![RecordType::Platform],
            buffering: BufferingConfig::default(),
            listener_host: DEFAULT_LISTENER_HOST.to_string(),
            listener_port: DEFAULT_LISTENER_PORT,
            max_push_bytes: DEFAULT_MAX_PUSH_BYTES,
            queue_max_items: DEFAULT_MAX_QUEUE_ITEMS,
            sink: SinkConfig::None,
            min_batch_size: 1,
            max_batch_age: Duration::from_millis(DEFAULT_MAX_BATCH_AGE_MS),
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            dispatch_timeout: Duration::from_millis(DEFAULT_DISPATCH_TIMEOUT_MS),
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
        }
    }
}

impl ExtensionConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let runtime_api = lookup("AWS_LAMBDA_RUNTIME_API")
            .filter(|val| !val.trim().is_empty())
            .ok_or(ConfigError::Missing("AWS_LAMBDA_RUNTIME_API"))?;

        let extension_name = lookup("TELEMETRY_EXTENSION_NAME")
            .or_else(executable_name)
            .unwrap_or(defaults.extension_name);

        let log_level = lookup("TELEMETRY_EXTENSION_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let subscription_api = match lookup("TELEMETRY_SUBSCRIPTION_API") {
            Some(val) => val.parse().map_err(|_| ConfigError::InvalidValue {
                name: "TELEMETRY_SUBSCRIPTION_API",
                value: val,
            })?,
            None => defaults.subscription_api,
        };

        let record_types = match lookup("TELEMETRY_RECORD_TYPES") {
            Some(val) => parse_record_types(&val)?,
            None => defaults.record_types,
        };

        let buffering = BufferingConfig {
            timeout_ms: parse_number(&lookup, "TELEMETRY_BUFFER_TIMEOUT_MS")?
                .unwrap_or(defaults.buffering.timeout_ms),
            max_bytes: parse_number(&lookup, "TELEMETRY_BUFFER_MAX_BYTES")?
                .unwrap_or(defaults.buffering.max_bytes),
            max_items: parse_number(&lookup, "TELEMETRY_BUFFER_MAX_ITEMS")?
                .unwrap_or(defaults.buffering.max_items),
        };

        let sam_local = lookup("AWS_SAM_LOCAL").is_some_and(|val| val == "true");
        let listener_host = lookup("TELEMETRY_LISTENER_HOST").unwrap_or_else(|| {
            if sam_local {
                SAM_LOCAL_LISTENER_HOST.to_string()
            } else {
                defaults.listener_host
            }
        });
        let listener_port = parse_number(&lookup, "TELEMETRY_LISTENER_PORT")?
            .unwrap_or(defaults.listener_port);

        let max_push_bytes = parse_number(&lookup, "TELEMETRY_MAX_PUSH_BYTES")?
            .unwrap_or(defaults.max_push_bytes);
        let queue_max_items = parse_number(&lookup, "TELEMETRY_QUEUE_MAX_ITEMS")?
            .unwrap_or(defaults.queue_max_items);

        let sink = if let Some(uri) = lookup("DISPATCH_POST_URI").filter(|v| !v.is_empty()) {
            SinkConfig::Http { uri }
        } else if let Some(bucket) = lookup("DISPATCH_S3_BUCKET").filter(|v| !v.is_empty()) {
            SinkConfig::S3 { bucket }
        } else if let Some(root) = lookup("DISPATCH_OBJECT_STORE_PATH").filter(|v| !v.is_empty())
        {
            SinkConfig::LocalObjectStore {
                root: PathBuf::from(root),
            }
        } else {
            SinkConfig::None
        };

        // An unparsable batch size falls back to 1 so every event flushes.
        let min_batch_size = lookup("DISPATCH_MIN_BATCH_SIZE")
            .and_then(|val| val.trim().parse::<usize>().ok())
            .filter(|size| *size > 0)
            .unwrap_or(defaults.min_batch_size);

        let max_batch_age = parse_number(&lookup, "DISPATCH_MAX_BATCH_AGE_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_batch_age);
        let max_batch_bytes = parse_number(&lookup, "DISPATCH_MAX_BATCH_BYTES")?
            .unwrap_or(defaults.max_batch_bytes);

        let dispatch_timeout = parse_number(&lookup, "DISPATCH_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.dispatch_timeout);
        let shutdown_grace = parse_number(&lookup, "TELEMETRY_SHUTDOWN_GRACE_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.shutdown_grace);

        let config = Self {
            runtime_api,
            extension_name,
            log_level,
            subscription_api,
            record_types,
            buffering,
            listener_host,
            listener_port,
            max_push_bytes,
            queue_max_items,
            sink,
            min_batch_size,
            max_batch_age,
            max_batch_bytes,
            dispatch_timeout,
            shutdown_grace,
        };

        config.validate()?;
        Ok(config)
    }

    /// Thresholds for unforced dispatches.
    pub fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy {
            min_batch_size: self.min_batch_size,
            max_batch_age: self.max_batch_age,
            max_batch_bytes: self.max_batch_bytes,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime_api.trim().is_empty() {
            return Err(ConfigError::Missing("AWS_LAMBDA_RUNTIME_API"));
        }

        if self.extension_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "TELEMETRY_EXTENSION_NAME",
                value: self.extension_name.clone(),
            });
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                name: "TELEMETRY_EXTENSION_LOG_LEVEL",
                value: self.log_level.clone(),
            });
        }

        if self.record_types.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "TELEMETRY_RECORD_TYPES",
                value: String::new(),
            });
        }

        self.buffering.validate()?;

        if self.queue_max_items == 0 {
            return Err(ConfigError::InvalidValue {
                name: "TELEMETRY_QUEUE_MAX_ITEMS",
                value: "0".to_string(),
            });
        }

        if matches!(self.sink, SinkConfig::S3 { .. }) && !cfg!(feature = "aws") {
            return Err(ConfigError::Unsupported(
                "DISPATCH_S3_BUCKET requires the `aws` feature".to_string(),
            ));
        }

        Ok(())
    }
}

fn executable_name() -> Option<String> {
    env::current_exe()
        .ok()?
        .file_name()?
        .to_str()
        .map(str::to_string)
}

fn parse_number<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        Some(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: val }),
        None => Ok(None),
    }
}

fn parse_record_types(val: &str) -> Result<Vec<RecordType>, ConfigError> {
    let mut record_types = Vec::new();
    for part in val.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let record_type = part.parse().map_err(|_| ConfigError::InvalidValue {
            name: "TELEMETRY_RECORD_TYPES",
            value: val.to_string(),
        })?;
        if !record_types.contains(&record_type) {
            record_types.push(record_type);
        }
    }
    Ok(record_types)
}
