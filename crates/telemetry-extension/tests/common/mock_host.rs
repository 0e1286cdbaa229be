// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scripted stand-in for the host control plane.
//!
//! Each call to `event/next` pops one [`Step`]: its pushes are delivered to the
//! subscribed destination first, then its event is returned. Once the script is
//! exhausted the host answers with `SHUTDOWN`.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, Request, Response};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use super::helpers::send_tcp_request;
use super::mock_server::ReceivedRequest;

pub const EXTENSION_ID: &str = "mock-extension-id";

#[derive(Clone, Debug)]
pub struct Step {
    /// Raw bodies pushed to the subscribed destination before the event is returned.
    pub pushes: Vec<String>,
    pub event: Value,
}

impl Step {
    pub fn invoke(pushes: &[&str]) -> Self {
        Step {
            pushes: pushes.iter().map(|p| p.to_string()).collect(),
            event: json!({
                "eventType": "INVOKE",
                "deadlineMs": 676051,
                "requestId": "3da1f2dc-3222-475e-9205-e2e6c6318895",
                "invokedFunctionArn": "arn:aws:lambda:us-east-1:123456789012:function:Test"
            }),
        }
    }

    pub fn shutdown(pushes: &[&str]) -> Self {
        Step {
            pushes: pushes.iter().map(|p| p.to_string()).collect(),
            event: json!({
                "eventType": "SHUTDOWN",
                "shutdownReason": "spindown",
                "deadlineMs": 42069
            }),
        }
    }

    pub fn raw(event: Value) -> Self {
        Step {
            pushes: Vec::new(),
            event,
        }
    }
}

/// Outcome of a push the host made. `None` means the connection failed.
#[derive(Clone, Debug, PartialEq)]
pub struct PushResult {
    pub body: String,
    pub status: Option<u16>,
}

#[derive(Debug)]
struct HostState {
    issue_id: bool,
    subscribe_status: u16,
    destination: Option<String>,
    steps: VecDeque<Step>,
    push_results: Vec<PushResult>,
    requests: Vec<ReceivedRequest>,
}

#[derive(Clone)]
pub struct MockHost {
    pub addr: SocketAddr,
    state: Arc<Mutex<HostState>>,
}

impl MockHost {
    /// Starts a host answering the subscription with `subscribe_status`.
    pub async fn start(subscribe_status: u16, steps: Vec<Step>) -> Self {
        Self::start_with(true, subscribe_status, steps).await
    }

    /// Starts a host that never issues a registration id.
    pub async fn start_without_id() -> Self {
        Self::start_with(false, 200, Vec::new()).await
    }

    async fn start_with(issue_id: bool, subscribe_status: u16, steps: Vec<Step>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock host");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let state = Arc::new(Mutex::new(HostState {
            issue_id,
            subscribe_status,
            destination: None,
            steps: steps.into(),
            push_results: Vec::new(),
            requests: Vec::new(),
        }));
        let state_clone = state.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };

                let io = TokioIo::new(stream);
                let state = state_clone.clone();

                tokio::spawn(async move {
                    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                        handle(req, state.clone())
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockHost { addr, state }
    }

    /// Value for `AWS_LAMBDA_RUNTIME_API`.
    pub fn runtime_api(&self) -> String {
        self.addr.to_string()
    }

    pub fn destination(&self) -> Option<String> {
        self.state.lock().unwrap().destination.clone()
    }

    pub fn push_results(&self) -> Vec<PushResult> {
        self.state.lock().unwrap().push_results.clone()
    }

    pub fn get_requests_for_path(&self, path: &str) -> Vec<ReceivedRequest> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|req| req.path == path)
            .cloned()
            .collect()
    }
}

async fn handle(
    req: Request<Incoming>,
    state: Arc<Mutex<HostState>>,
) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    let body = req
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes().to_vec())
        .unwrap_or_default();

    state.lock().unwrap().requests.push(ReceivedRequest {
        method: method.clone(),
        path: path.clone(),
        headers,
        body: body.clone(),
    });

    match (method.as_str(), path.as_str()) {
        ("POST", "/2020-01-01/extension/register") => {
            let issue_id = state.lock().unwrap().issue_id;
            let mut response = Response::builder().status(200);
            if issue_id {
                response = response.header("Lambda-Extension-Identifier", EXTENSION_ID);
            }
            response.body(Full::new(Bytes::from(
                json!({
                    "functionName": "test-function",
                    "functionVersion": "$LATEST",
                    "handler": "index.handler"
                })
                .to_string(),
            )))
        }
        ("PUT", "/2022-07-01/telemetry") | ("PUT", "/2020-08-15/logs") => {
            let request: Value = serde_json::from_slice(&body).unwrap_or_default();
            let mut state = state.lock().unwrap();
            state.destination = request["destination"]["URI"].as_str().map(str::to_string);
            Response::builder()
                .status(state.subscribe_status)
                .body(Full::new(Bytes::from_static(b"{}")))
        }
        ("GET", "/2020-01-01/extension/event/next") => {
            let (step, destination) = {
                let mut state = state.lock().unwrap();
                let step = state
                    .steps
                    .pop_front()
                    .unwrap_or_else(|| Step::shutdown(&[]));
                (step, state.destination.clone())
            };

            for push in step.pushes {
                let status = match &destination {
                    Some(uri) => send_tcp_request(&format!("{uri}/"), push.clone().into_bytes())
                        .await
                        .ok(),
                    None => None,
                };
                state.lock().unwrap().push_results.push(PushResult {
                    body: push,
                    status,
                });
            }

            Response::builder()
                .status(200)
                .body(Full::new(Bytes::from(step.event.to_string())))
        }
        ("POST", "/2020-01-01/extension/init/error")
        | ("POST", "/2020-01-01/extension/exit/error") => Response::builder()
            .status(202)
            .body(Full::new(Bytes::from_static(b"{}"))),
        _ => Response::builder()
            .status(404)
            .body(Full::new(Bytes::new())),
    }
}
