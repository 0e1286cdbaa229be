// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info};

use super::sink::{DispatchBatch, Sink};
use crate::buffer::BufferQueue;
use crate::error::ExtensionError;

/// What a single dispatch attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Below the batch threshold; the queue was left untouched.
    Skipped,
    /// Nothing queued; no sink call was made.
    Empty,
    Sent { count: usize },
    /// The sink failed and the batch was discarded.
    Dropped { count: usize },
}

/// Thresholds an unforced dispatch checks. Crossing any one of them sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub min_batch_size: usize,
    /// Time since the queue was last drained. Zero disables the check.
    pub max_batch_age: Duration,
    /// Approximate serialized size of the queue. Zero disables the check.
    pub max_batch_bytes: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            min_batch_size: 1,
            max_batch_age: Duration::ZERO,
            max_batch_bytes: 0,
        }
    }
}

/// Drains the shared queue into a sink under the batch thresholds.
///
/// Only the lifecycle loop drives the engine, so dispatches never overlap.
pub struct DispatchEngine {
    queue: BufferQueue,
    sink: Arc<dyn Sink>,
    policy: BatchPolicy,
    shutdown_grace: Duration,
    last_drained: Instant,
    final_dispatched: bool,
}

impl DispatchEngine {
    pub fn new(
        queue: BufferQueue,
        sink: Arc<dyn Sink>,
        policy: BatchPolicy,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            queue,
            sink,
            policy: BatchPolicy {
                min_batch_size: policy.min_batch_size.max(1),
                ..policy
            },
            shutdown_grace,
            last_drained: Instant::now(),
            final_dispatched: false,
        }
    }

    /// Sends the queued records if there are any and either `force` is set or one
    /// of the [`BatchPolicy`] thresholds has been crossed.
    pub async fn dispatch(&mut self, force: bool) -> DispatchOutcome {
        let queued = self.queue.len();
        if queued == 0 {
            debug!("Nothing to dispatch");
            self.last_drained = Instant::now();
            return DispatchOutcome::Empty;
        }
        if !force && !self.threshold_reached(queued) {
            debug!("Holding {queued} records, no batch threshold met");
            return DispatchOutcome::Skipped;
        }

        // Pushes can land between the length check and the swap; take whatever is there.
        let batch = DispatchBatch::new(self.queue.take_all());
        self.last_drained = Instant::now();
        if batch.is_empty() {
            return DispatchOutcome::Empty;
        }

        let count = batch.len();
        match self.sink.send(&batch).await {
            Ok(()) => {
                debug!("Dispatched {count} records to {} sink", self.sink.name());
                DispatchOutcome::Sent { count }
            }
            Err(e) => {
                error!(
                    "Failed to dispatch {count} records to {} sink, dropping batch: {e}",
                    self.sink.name()
                );
                DispatchOutcome::Dropped { count }
            }
        }
    }

    fn threshold_reached(&self, queued: usize) -> bool {
        if queued >= self.policy.min_batch_size {
            return true;
        }

        let age = self.last_drained.elapsed();
        if !self.policy.max_batch_age.is_zero() && age >= self.policy.max_batch_age {
            debug!("Batch age threshold met after {}ms", age.as_millis());
            return true;
        }

        let bytes = self.queue.bytes();
        if self.policy.max_batch_bytes > 0 && bytes >= self.policy.max_batch_bytes {
            debug!("Batch size threshold met at {bytes} bytes");
            return true;
        }

        false
    }

    /// The forced dispatch performed on `SHUTDOWN`. Allowed exactly once.
    ///
    /// Waits out the shutdown grace period first so pushes the host is still
    /// completing make it into the final batch.
    pub async fn dispatch_final(&mut self) -> Result<DispatchOutcome, ExtensionError> {
        if self.final_dispatched {
            return Err(ExtensionError::FinalDispatchRepeated);
        }
        self.final_dispatched = true;

        if !self.shutdown_grace.is_zero() {
            tokio::time::sleep(self.shutdown_grace).await;
        }

        let outcome = self.dispatch(true).await;
        info!("Final dispatch: {outcome:?}");
        Ok(outcome)
    }

    pub fn final_dispatched(&self) -> bool {
        self.final_dispatched
    }

    pub fn queue(&self) -> &BufferQueue {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<Value>>>,
        fail: bool,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn send(&self, batch: &DispatchBatch) -> Result<(), SinkError> {
            self.batches.lock().unwrap().push(batch.records.clone());
            if self.fail {
                return Err(SinkError::Status {
                    status: 500,
                    body: "unavailable".to_string(),
                });
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn engine(sink: Arc<RecordingSink>, min_batch_size: usize) -> DispatchEngine {
        let policy = BatchPolicy {
            min_batch_size,
            ..Default::default()
        };
        DispatchEngine::new(BufferQueue::default(), sink, policy, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_empty_queue_makes_no_call() {
        let sink = Arc::new(RecordingSink::default());
        let mut engine = engine(sink.clone(), 1);

        assert_eq!(engine.dispatch(false).await, DispatchOutcome::Empty);
        assert_eq!(engine.dispatch(true).await, DispatchOutcome::Empty);
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_threshold_gates_unforced_dispatch() {
        let sink = Arc::new(RecordingSink::default());
        let mut engine = engine(sink.clone(), 3);

        engine.queue().append(vec![json!("a"), json!("b")]);
        assert_eq!(engine.dispatch(false).await, DispatchOutcome::Skipped);
        assert_eq!(engine.queue().len(), 2);

        engine.queue().append(vec![json!("c")]);
        assert_eq!(
            engine.dispatch(false).await,
            DispatchOutcome::Sent { count: 3 }
        );
        assert!(engine.queue().is_empty());
        assert_eq!(
            *sink.batches.lock().unwrap(),
            vec![vec![json!("a"), json!("b"), json!("c")]]
        );
    }

    #[tokio::test]
    async fn test_force_ignores_threshold() {
        let sink = Arc::new(RecordingSink::default());
        let mut engine = engine(sink.clone(), 100);

        engine.queue().append(vec![json!("a")]);
        assert_eq!(
            engine.dispatch(true).await,
            DispatchOutcome::Sent { count: 1 }
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_sink_failure_drops_batch() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let mut engine = engine(sink.clone(), 1);

        engine.queue().append(vec![json!("a"), json!("b")]);
        assert_eq!(
            engine.dispatch(false).await,
            DispatchOutcome::Dropped { count: 2 }
        );
        assert!(engine.queue().is_empty());
        assert!(logs_contain("dropping batch"));

        // Not retried on the next dispatch.
        assert_eq!(engine.dispatch(true).await, DispatchOutcome::Empty);
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_final_dispatch_runs_once() {
        let sink = Arc::new(RecordingSink::default());
        let mut engine = engine(sink.clone(), 10);

        engine.queue().append(vec![json!("a")]);
        assert_eq!(
            engine.dispatch_final().await.unwrap(),
            DispatchOutcome::Sent { count: 1 }
        );
        assert!(engine.final_dispatched());
        assert!(matches!(
            engine.dispatch_final().await,
            Err(ExtensionError::FinalDispatchRepeated)
        ));
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_final_dispatch_on_empty_queue() {
        let sink = Arc::new(RecordingSink::default());
        let mut engine = engine(sink.clone(), 1);

        assert_eq!(
            engine.dispatch_final().await.unwrap(),
            DispatchOutcome::Empty
        );
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_dispatch_waits_for_late_pushes() {
        let sink = Arc::new(RecordingSink::default());
        let queue = BufferQueue::default();
        let mut engine = DispatchEngine::new(
            queue.clone(),
            sink.clone(),
            BatchPolicy::default(),
            Duration::from_secs(1),
        );

        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            queue.append(vec![json!("late")]);
        });

        assert_eq!(
            engine.dispatch_final().await.unwrap(),
            DispatchOutcome::Sent { count: 1 }
        );
        late.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_threshold_sends_small_batch() {
        let sink = Arc::new(RecordingSink::default());
        let policy = BatchPolicy {
            min_batch_size: 10,
            max_batch_age: Duration::from_secs(10),
            max_batch_bytes: 0,
        };
        let mut engine =
            DispatchEngine::new(BufferQueue::default(), sink.clone(), policy, Duration::ZERO);

        engine.queue().append(vec![json!("a")]);
        assert_eq!(engine.dispatch(false).await, DispatchOutcome::Skipped);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(engine.dispatch(false).await, DispatchOutcome::Skipped);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            engine.dispatch(false).await,
            DispatchOutcome::Sent { count: 1 }
        );

        // The clock restarts once the queue is drained.
        engine.queue().append(vec![json!("b")]);
        assert_eq!(engine.dispatch(false).await, DispatchOutcome::Skipped);
        assert_eq!(*sink.batches.lock().unwrap(), vec![vec![json!("a")]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_time_does_not_count_towards_age() {
        let sink = Arc::new(RecordingSink::default());
        let policy = BatchPolicy {
            min_batch_size: 10,
            max_batch_age: Duration::from_secs(10),
            max_batch_bytes: 0,
        };
        let mut engine =
            DispatchEngine::new(BufferQueue::default(), sink.clone(), policy, Duration::ZERO);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(engine.dispatch(false).await, DispatchOutcome::Empty);

        engine.queue().append(vec![json!("a")]);
        assert_eq!(engine.dispatch(false).await, DispatchOutcome::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_byte_threshold_sends_small_batch() {
        let sink = Arc::new(RecordingSink::default());
        let policy = BatchPolicy {
            min_batch_size: 10,
            max_batch_age: Duration::ZERO,
            max_batch_bytes: 64,
        };
        let mut engine =
            DispatchEngine::new(BufferQueue::default(), sink.clone(), policy, Duration::ZERO);

        engine.queue().append(vec![json!({"message": "short"})]);
        assert_eq!(engine.dispatch(false).await, DispatchOutcome::Skipped);

        engine.queue().append(vec![json!({"message": "x".repeat(64)})]);
        assert_eq!(
            engine.dispatch(false).await,
            DispatchOutcome::Sent { count: 2 }
        );
        assert!(engine.queue().is_empty());
        assert_eq!(engine.queue().bytes(), 0);
    }
}
