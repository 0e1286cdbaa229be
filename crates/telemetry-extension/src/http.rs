// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{http, Response, StatusCode};
use serde_json::json;
use tracing::{debug, error};

pub type HttpResponse = Response<Full<Bytes>>;

/// Does two things:
/// 1. Logs the given message. A success status code (within 200-299) will cause a debug log to be
///    written, otherwise error will be written.
/// 2. Returns the given message in the body of JSON response with the given status code.
///
/// Response body format:
/// {
///     "message": message
/// }
pub fn log_and_create_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    if status.is_success() {
        debug!("{message}");
    } else {
        error!("{message}");
    }
    let body = json!({ "message": message }).to_string();
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
}

/// Builds a reqwest client with a request timeout, used for sink deliveries and
/// one-shot control plane calls. Uses rustls TLS by default.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// Builds the client used for the lifecycle long-poll.
///
/// The host may hold `event/next` open for the whole idle period between
/// invocations, so neither the request nor the pooled connection may time out.
pub fn build_lifecycle_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().pool_idle_timeout(None).build()
}
