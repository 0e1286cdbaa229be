// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use bytes::Bytes;
use http_body_util::Full;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::time::timeout;

use telemetry_extension::config::{ExtensionConfig, SinkConfig};

/// POST `body` to `uri` over a fresh connection and return the response status.
///
/// Fails at the transport level when nothing is listening on the target.
pub async fn send_tcp_request(
    uri: &str,
    body: Vec<u8>,
) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
    let uri: hyper::Uri = uri.parse()?;
    let authority = uri.authority().ok_or("uri without authority")?.to_string();

    let stream = timeout(
        Duration::from_secs(2),
        tokio::net::TcpStream::connect(authority.as_str()),
    )
    .await??;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let request = Request::builder()
        .uri(uri.path())
        .method("POST")
        .header("Host", authority)
        .header("Content-Type", "application/json")
        .header("Content-Length", body.len().to_string())
        .body(Full::new(Bytes::from(body)))?;

    let response = timeout(Duration::from_secs(2), sender.send_request(request)).await??;
    Ok(response.status().as_u16())
}

/// Configuration pointing at a mock host and a mock sink, with no shutdown delay.
pub fn test_config(runtime_api: &str, sink_url: &str, min_batch_size: usize) -> ExtensionConfig {
    ExtensionConfig {
        runtime_api: runtime_api.to_string(),
        extension_name: "test-extension".to_string(),
        listener_host: "127.0.0.1".to_string(),
        listener_port: 0,
        sink: SinkConfig::Http {
            uri: format!("{sink_url}/batches"),
        },
        min_batch_size,
        shutdown_grace: Duration::ZERO,
        ..Default::default()
    }
}
