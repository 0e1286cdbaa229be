// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::net::SocketAddr;

use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{http, Method, Request, StatusCode};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::BufferQueue;
use crate::error::ExtensionError;
use crate::http::{log_and_create_http_response, HttpResponse};

const DEFAULT_ADVERTISED_HOST: &str = "sandbox.localdomain";

/// HTTP endpoint the host pushes telemetry batches to.
///
/// Every push is acknowledged with `200` once its body has been read, whether or
/// not it held anything usable, so the host never retries against us.
#[derive(Debug)]
pub struct IngestListener {
    local_addr: SocketAddr,
    host: String,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl IngestListener {
    /// Binds `host:port` and starts accepting pushes.
    ///
    /// Returns only once the socket is bound, so the address can be handed to the
    /// host straight away.
    pub async fn start(
        host: &str,
        port: u16,
        queue: BufferQueue,
        max_push_bytes: usize,
    ) -> Result<Self, ExtensionError> {
        let listener = TcpListener::bind((host, port)).await.map_err(|e| {
            ExtensionError::ListenerStartFailure(format!("cannot bind {host}:{port}: {e}"))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ExtensionError::ListenerStartFailure(e.to_string()))?;

        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(serve_tcp(
            listener,
            queue,
            max_push_bytes,
            cancel_token.clone(),
        ));

        info!("Listening for telemetry on {local_addr}");
        Ok(Self {
            local_addr,
            host: host.to_string(),
            cancel_token,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URI the host should push to.
    ///
    /// A wildcard bind address can't be dialed, so it is advertised under the
    /// sandbox host name instead.
    pub fn destination_uri(&self) -> String {
        let host = match self.host.as_str() {
            "0.0.0.0" | "::" | "[::]" => DEFAULT_ADVERTISED_HOST,
            host => host,
        };
        format!("http://{host}:{}", self.local_addr.port())
    }

    /// Stops accepting, aborts open connections and closes the socket.
    pub async fn stop(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.task.await {
            error!("Ingest listener task failed: {e}");
        }
        debug!("Ingest listener on {} stopped", self.local_addr);
    }
}

async fn serve_tcp(
    listener: TcpListener,
    queue: BufferQueue,
    max_push_bytes: usize,
    cancel_token: CancellationToken,
) {
    let server = hyper::server::conn::http1::Builder::new();
    let mut joinset = tokio::task::JoinSet::new();

    loop {
        let conn = tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("Ingest listener error: {e}");
                    break;
                }
                Ok((conn, _)) => conn,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => match finished {
                Err(e) if e.is_panic() => {
                    error!("Connection handler panicked: {:?}", e);
                    continue;
                },
                Ok(()) | Err(_) => continue,
            },
        };

        let conn = hyper_util::rt::TokioIo::new(conn);
        let server = server.clone();
        let queue = queue.clone();
        joinset.spawn(async move {
            let service =
                service_fn(move |req| handle_push(req, queue.clone(), max_push_bytes));
            if let Err(e) = server.serve_connection(conn, service).await {
                debug!("Connection error: {e}");
            }
        });
    }

    joinset.shutdown().await;
}

async fn handle_push(
    req: Request<Incoming>,
    queue: BufferQueue,
    max_push_bytes: usize,
) -> http::Result<HttpResponse> {
    if req.method() != Method::POST && req.method() != Method::PUT {
        return log_and_create_http_response(
            &format!("Method {} not allowed", req.method()),
            StatusCode::METHOD_NOT_ALLOWED,
        );
    }

    let body = match Limited::new(req.into_body(), max_push_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Discarding push body that could not be read: {e}");
            return acknowledge();
        }
    };

    match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Array(records)) if records.is_empty() => {
            debug!("Received empty push");
        }
        Ok(Value::Array(records)) => {
            let count = records.len();
            queue.append(records);
            debug!("Queued {count} pushed records");
        }
        Ok(other) => {
            warn!(
                "Discarding push that is not a JSON array (got {})",
                json_kind(&other)
            );
        }
        Err(e) => {
            warn!("Discarding malformed push body: {e}");
        }
    }

    acknowledge()
}

fn acknowledge() -> http::Result<HttpResponse> {
    log_and_create_http_response("OK", StatusCode::OK)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
