// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Common test utilities and mock endpoints for integration tests

pub mod helpers;
pub mod mock_host;
pub mod mock_server;
