// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use super::state::LifecycleState;
use super::{EXTENSION_ERROR_TYPE_HEADER, EXTENSION_ID_HEADER, EXTENSION_NAME_HEADER};
use crate::error::ExtensionError;
use crate::http::build_lifecycle_client;

/// Lifecycle events an extension can register interest in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Invoke,
    Shutdown,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Invoke => f.write_str("INVOKE"),
            EventType::Shutdown => f.write_str("SHUTDOWN"),
        }
    }
}

impl FromStr for EventType {
    type Err = ExtensionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INVOKE" => Ok(EventType::Invoke),
            "SHUTDOWN" => Ok(EventType::Shutdown),
            other => Err(ExtensionError::ProtocolViolation(other.to_string())),
        }
    }
}

/// Phase a fatal error is reported against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorPhase {
    Init,
    Shutdown,
}

impl ErrorPhase {
    fn path(&self) -> &'static str {
        match self {
            ErrorPhase::Init => "init/error",
            ErrorPhase::Shutdown => "exit/error",
        }
    }
}

/// Outcome of a successful registration.
///
/// # Example register response body
///
/// ```json
/// {
///    "functionName": "helloWorld",
///    "functionVersion": "$LATEST",
///    "handler": "lambda_function.lambda_handler"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// Opaque identifier issued by the host, sent on every later call.
    #[serde(skip)]
    pub id: String,
    #[serde(skip)]
    pub events: Vec<EventType>,
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub function_version: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
}

/// One event returned by `event/next`.
///
/// # Example `INVOKE` payload
///
/// ```json
/// {
///     "eventType": "INVOKE",
///     "deadlineMs": 676051,
///     "requestId": "3da1f2dc-3222-475e-9205-e2e6c6318895",
///     "invokedFunctionArn": "arn:aws:lambda:us-east-1:123456789012:function:ExtensionTest",
///     "tracing": {
///         "type": "X-Amzn-Trace-Id",
///         "value": "Root=1-5f35ae12-0c0fec141ab77a00bc047aa2;Parent=2be948a625588e32;Sampled=1"
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub event_type: EventType,
    /// The complete response body.
    pub payload: Value,
}

impl LifecycleEvent {
    fn str_field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.str_field("requestId")
    }

    pub fn invoked_function_arn(&self) -> Option<&str> {
        self.str_field("invokedFunctionArn")
    }

    pub fn shutdown_reason(&self) -> Option<&str> {
        self.str_field("shutdownReason")
    }

    pub fn deadline_ms(&self) -> Option<u64> {
        self.payload.get("deadlineMs").and_then(Value::as_u64)
    }
}

/// Client for the host's extension lifecycle API.
///
/// Calls are only valid in the order enforced by [`LifecycleState`]; `next` takes
/// `&mut self` so two polls can never be outstanding at once.
#[derive(Debug)]
pub struct LifecycleClient {
    base_url: String,
    client: reqwest::Client,
    state: LifecycleState,
    registration: Option<Registration>,
}

impl LifecycleClient {
    pub fn new(runtime_api: &str) -> Result<Self, ExtensionError> {
        Ok(Self {
            base_url: format!("http://{runtime_api}/2020-01-01/extension"),
            client: build_lifecycle_client()?,
            state: LifecycleState::Init,
            registration: None,
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn registration(&self) -> Option<&Registration> {
        self.registration.as_ref()
    }

    pub fn registration_id(&self) -> Option<&str> {
        self.registration.as_ref().map(|r| r.id.as_str())
    }

    /// Registers the extension under `name` for the given events.
    ///
    /// The name must match the extension's file name as seen by the host.
    pub async fn register(
        &mut self,
        name: &str,
        events: &[EventType],
    ) -> Result<&Registration, ExtensionError> {
        let registered = self.state.transition(LifecycleState::Registered)?;
        let url = format!("{}/register", self.base_url);
        info!("Registering extension {name} at {url}");

        let registration = match self.send_register(&url, name, events).await {
            Ok(registration) => registration,
            Err(e) => {
                self.terminate();
                return Err(e);
            }
        };

        info!("Registered extension with id {}", registration.id);
        self.state = registered;
        Ok(&*self.registration.insert(registration))
    }

    async fn send_register(
        &self,
        url: &str,
        name: &str,
        events: &[EventType],
    ) -> Result<Registration, ExtensionError> {
        let response = self
            .client
            .post(url)
            .header(EXTENSION_NAME_HEADER, name)
            .json(&json!({ "events": events }))
            .send()
            .await
            .map_err(|e| ExtensionError::RegistrationFailure(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(ExtensionError::RegistrationFailure(format!(
                "host responded with status {status}: {text}"
            )));
        }

        let id = response
            .headers()
            .get(EXTENSION_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ExtensionError::RegistrationFailure(format!(
                    "response is missing the {EXTENSION_ID_HEADER} header"
                ))
            })?;

        // Function metadata is informational; a body we can't read doesn't fail registration.
        let mut registration = match response.json::<Registration>().await {
            Ok(registration) => registration,
            Err(e) => {
                debug!("Could not decode register response body: {e}");
                Registration::default()
            }
        };
        registration.id = id;
        registration.events = events.to_vec();
        Ok(registration)
    }

    /// Blocks until the host delivers the next lifecycle event.
    ///
    /// There is no client-side timeout: the host may keep the request open for
    /// the whole time the sandbox is idle or frozen.
    pub async fn next(&mut self) -> Result<LifecycleEvent, ExtensionError> {
        self.state = self.state.transition(LifecycleState::WaitNext)?;

        match self.poll_next().await {
            Ok(event) => {
                let to = match event.event_type {
                    EventType::Invoke => LifecycleState::Processing,
                    EventType::Shutdown => LifecycleState::ShuttingDown,
                };
                self.state = self.state.transition(to)?;
                Ok(event)
            }
            Err(e) => {
                self.terminate();
                Err(e)
            }
        }
    }

    async fn poll_next(&self) -> Result<LifecycleEvent, ExtensionError> {
        let registration_id = self.registration_id().unwrap_or_default();
        let url = format!("{}/event/next", self.base_url);

        let response = self
            .client
            .get(&url)
            .header(EXTENSION_ID_HEADER, registration_id)
            .send()
            .await
            .map_err(|e| ExtensionError::NextEventFailure(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(ExtensionError::NextEventFailure(format!(
                "host responded with status {status}: {text}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ExtensionError::NextEventFailure(e.to_string()))?;

        let event_type = payload
            .get("eventType")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .parse::<EventType>()?;

        debug!("Received {event_type} event");
        Ok(LifecycleEvent {
            event_type,
            payload,
        })
    }

    /// Notifies the host of a fatal error. Returns whether the host accepted it.
    ///
    /// Failures are logged and never propagated; the process is about to exit anyway.
    pub async fn report_error(&self, phase: ErrorPhase, error_type: &str, detail: &str) -> bool {
        let Some(registration_id) = self.registration_id() else {
            error!("Cannot report {phase:?} error without a registration id: {detail}");
            return false;
        };

        let url = format!("{}/{}", self.base_url, phase.path());
        let result = self
            .client
            .post(&url)
            .header(EXTENSION_ID_HEADER, registration_id)
            .header(EXTENSION_ERROR_TYPE_HEADER, error_type)
            .json(&json!({ "errorMessage": detail, "errorType": error_type }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!("Reported {error_type} to the host");
                true
            }
            Ok(response) => {
                error!(
                    "Host rejected {error_type} report with status {}",
                    response.status()
                );
                false
            }
            Err(e) => {
                error!("Failed to report {error_type} to the host: {e}");
                false
            }
        }
    }

    /// Completes the shutdown sequence.
    pub fn finish(&mut self) -> Result<(), ExtensionError> {
        self.state = self.state.transition(LifecycleState::Terminated)?;
        Ok(())
    }

    /// Moves to `Terminated` after a fatal error. No-op if already terminated.
    pub fn terminate(&mut self) {
        if !self.state.is_terminal() {
            self.state = LifecycleState::Terminated;
        }
    }
}
