// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod engine;
pub mod sink;

pub use engine::{BatchPolicy, DispatchEngine, DispatchOutcome};
pub use sink::{build_sink, DispatchBatch, HttpSink, NullSink, ObjectStoreSink, Sink};
