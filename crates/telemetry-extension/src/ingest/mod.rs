// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Inbound side of the telemetry pipeline: the host pushes JSON arrays of
//! records here and they are appended to the shared [`crate::buffer::BufferQueue`].

pub mod listener;

pub use listener::IngestListener;
