// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::lifecycle::state::LifecycleState;

/// Errors surfaced by the extension runtime.
///
/// Only the fatal kinds ever leave [`crate::extension::Extension::run`]; the non-fatal
/// ones are logged where they happen and the lifecycle loop keeps going.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("Registration failed: {0}")]
    RegistrationFailure(String),

    #[error("Unrecognized lifecycle event type '{0}'")]
    ProtocolViolation(String),

    #[error("Failed to fetch next lifecycle event: {0}")]
    NextEventFailure(String),

    #[error("Failed to start ingest listener: {0}")]
    ListenerStartFailure(String),

    #[error("Invalid lifecycle transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Final dispatch already performed")]
    FinalDispatchRepeated,

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl ExtensionError {
    /// Value sent in the `Lambda-Extension-Function-Error-Type` header when this
    /// error is reported to the host.
    pub fn error_type(&self) -> &'static str {
        match self {
            ExtensionError::RegistrationFailure(_) => "Extension.RegistrationFailed",
            ExtensionError::ProtocolViolation(_) => "Extension.UnknownEventType",
            ExtensionError::NextEventFailure(_) => "Extension.NextEventFailed",
            ExtensionError::ListenerStartFailure(_) => "Extension.ListenerStartFailed",
            ExtensionError::InvalidTransition { .. } => "Extension.InvalidState",
            ExtensionError::FinalDispatchRepeated => "Extension.InvalidState",
            ExtensionError::HttpClient(_) => "Extension.HttpClientFailed",
        }
    }
}

/// Environment could not be turned into an [`crate::config::ExtensionConfig`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}'")]
    InvalidValue { name: &'static str, value: String },

    #[error("{name} must be between {min} and {max}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("{0}")]
    Unsupported(String),
}

/// A batch could not be delivered to the configured sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to serialize batch: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sink request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Sink responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Object store write failed: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Failed to prepare sink directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Unsupported(String),
}
