// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use object_store::{path::Path, ObjectStore, PutPayload};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::SinkConfig;
use crate::error::SinkError;
use crate::http::build_client;

const OBJECT_KEY_PREFIX: &str = "telemetry";

/// Records drained from the queue in one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchBatch {
    pub records: Vec<Value>,
}

impl DispatchBatch {
    pub fn new(records: Vec<Value>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serializes the batch as a JSON array.
    pub fn to_json(&self) -> Result<Vec<u8>, SinkError> {
        Ok(serde_json::to_vec(&self.records)?)
    }
}

/// Destination for dispatched batches.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Delivers one batch. Called once per batch; failures are not retried.
    async fn send(&self, batch: &DispatchBatch) -> Result<(), SinkError>;

    fn name(&self) -> &'static str;
}

/// POSTs each batch as a JSON array.
pub struct HttpSink {
    uri: String,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(uri: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        Ok(Self {
            uri: uri.into(),
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn send(&self, batch: &DispatchBatch) -> Result<(), SinkError> {
        let body = batch.to_json()?;
        let response = self
            .client
            .post(&self.uri)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!("Sink at {} accepted batch with status {status}", self.uri);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Status {
            status: status.as_u16(),
            body,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Writes each batch as one JSON object in an object store.
///
/// Keys look like `telemetry/0001700000000000-<uuid>.json` so a listing comes
/// back in dispatch order.
pub struct ObjectStoreSink {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreSink {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_prefix(store, OBJECT_KEY_PREFIX)
    }

    pub fn with_prefix(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn next_key(&self) -> Path {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Path::from(format!(
            "{}/{millis:016}-{}.json",
            self.prefix,
            uuid::Uuid::new_v4()
        ))
    }
}

#[async_trait]
impl Sink for ObjectStoreSink {
    async fn send(&self, batch: &DispatchBatch) -> Result<(), SinkError> {
        let key = self.next_key();
        let payload = PutPayload::from(batch.to_json()?);
        self.store.put(&key, payload).await?;
        debug!("Wrote {} records to {key}", batch.len());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "object_store"
    }
}

/// Used when no destination is configured. Every batch is dropped.
pub struct NullSink;

#[async_trait]
impl Sink for NullSink {
    async fn send(&self, batch: &DispatchBatch) -> Result<(), SinkError> {
        warn!(
            "No dispatch destination configured, dropping {} records",
            batch.len()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

/// Builds the sink selected by configuration.
pub fn build_sink(config: &SinkConfig, timeout: Duration) -> Result<Arc<dyn Sink>, SinkError> {
    match config {
        SinkConfig::None => Ok(Arc::new(NullSink)),
        SinkConfig::Http { uri } => Ok(Arc::new(HttpSink::new(uri.clone(), timeout)?)),
        SinkConfig::LocalObjectStore { root } => {
            std::fs::create_dir_all(root)?;
            let store = object_store::local::LocalFileSystem::new_with_prefix(root)?;
            Ok(Arc::new(ObjectStoreSink::new(Arc::new(store))))
        }
        SinkConfig::S3 { bucket } => build_s3_sink(bucket),
    }
}

#[cfg(feature = "aws")]
fn build_s3_sink(bucket: &str) -> Result<Arc<dyn Sink>, SinkError> {
    let store = object_store::aws::AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .build()?;
    Ok(Arc::new(ObjectStoreSink::new(Arc::new(store))))
}

#[cfg(not(feature = "aws"))]
fn build_s3_sink(bucket: &str) -> Result<Arc<dyn Sink>, SinkError> {
    Err(SinkError::Unsupported(format!(
        "S3 bucket {bucket} requires the `aws` feature"
    )))
}
