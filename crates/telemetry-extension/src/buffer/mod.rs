// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO queue of telemetry records shared between ingestion and dispatch.
//!
//! The ingest listener's connection tasks append pushed batches while the
//! lifecycle loop drains the queue through the dispatch engine. Both sides go
//! through a single [`std::sync::Mutex`]; critical sections only move records in
//! or out of the [`VecDeque`], so no I/O or `.await` ever happens under the lock.
//!
//! # Ordering
//!
//! A batch appended by one push lands contiguously and in arrival order. A push
//! racing with a drain ends up entirely in the drained batch or entirely in the
//! next one, depending on which side takes the lock first.
//!
//! # Memory Management
//!
//! The queue is bounded by `max_items`. When full, the oldest record is evicted
//! to make room, a warning is logged and the eviction is counted.
//!
//! The queue also keeps an approximate serialized size of its contents, which
//! the dispatch engine uses as a size threshold.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::warn;

/// An opaque telemetry record as pushed by the host.
pub type TelemetryRecord = Value;

/// Default upper bound on queued records before FIFO eviction kicks in.
pub const DEFAULT_MAX_QUEUE_ITEMS: usize = 50_000;

#[derive(Debug)]
struct Inner {
    records: VecDeque<TelemetryRecord>,
    max_items: usize,
    bytes: usize,
    evicted: u64,
}

/// Thread-safe handle to the shared record queue.
///
/// Cloning the handle is cheap and every clone refers to the same queue.
///
/// Overflow eviction is the only way records are dropped outside of a failed
/// sink delivery.
#[derive(Debug, Clone)]
pub struct BufferQueue {
    inner: Arc<Mutex<Inner>>,
}

impl Default for BufferQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUE_ITEMS)
    }
}

impl BufferQueue {
    /// Creates an empty queue holding at most `max_items` records.
    ///
    /// A bound of zero is raised to one so an append is never a silent no-op.
    pub fn new(max_items: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                records: VecDeque::new(),
                max_items: max_items.max(1),
                bytes: 0,
                evicted: 0,
            })),
        }
    }

    /// Appends a batch of records as a single critical section.
    ///
    /// Returns the number of records that had to be evicted to fit the batch.
    pub fn append(&self, batch: Vec<TelemetryRecord>) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let mut inner = self.lock();
        let mut evicted = 0;
        for record in batch {
            if inner.records.len() >= inner.max_items {
                if let Some(oldest) = inner.records.pop_front() {
                    inner.bytes = inner.bytes.saturating_sub(approximate_size(&oldest));
                }
                evicted += 1;
            }
            inner.bytes += approximate_size(&record);
            inner.records.push_back(record);
        }
        inner.evicted += evicted as u64;
        let max_items = inner.max_items;
        drop(inner);

        if evicted > 0 {
            warn!(
                "Telemetry queue full ({} items), dropped {} oldest records",
                max_items, evicted
            );
        }
        evicted
    }

    /// Atomically swaps the queue contents for an empty queue and returns them in
    /// FIFO order.
    pub fn take_all(&self) -> Vec<TelemetryRecord> {
        let mut inner = self.lock();
        inner.bytes = 0;
        std::mem::take(&mut inner.records).into()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Approximate serialized size of the queued records, in bytes.
    pub fn bytes(&self) -> usize {
        self.lock().bytes
    }

    /// Total number of records evicted since the queue was created.
    pub fn evicted(&self) -> u64 {
        self.lock().evicted
    }

    // A panic while holding the lock can't leave the deque half-written, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Compact JSON length of `value`, without serializing it.
fn approximate_size(value: &Value) -> usize {
    match value {
        Value::Null => 4,
        Value::Bool(true) => 4,
        Value::Bool(false) => 5,
        Value::Number(n) => n.to_string().len(),
        Value::String(s) => s.len() + 2,
        Value::Array(items) => {
            2 + items.len().saturating_sub(1) + items.iter().map(approximate_size).sum::<usize>()
        }
        Value::Object(fields) => {
            2 + fields.len().saturating_sub(1)
                + fields
                    .iter()
                    .map(|(key, value)| key.len() + 3 + approximate_size(value))
                    .sum::<usize>()
        }
    }
}
