// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use tracing::{error, warn};

use crate::error::ExtensionError;
use crate::lifecycle::{ErrorPhase, LifecycleClient};

/// Forwards fatal errors to the host, at most once per phase.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    reported: HashSet<ErrorPhase>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `err` for `phase`. Returns `true` if a report was sent to the host.
    ///
    /// A second report for the same phase is dropped, as is any report made
    /// before the extension obtained a registration id.
    pub async fn report(
        &mut self,
        client: &LifecycleClient,
        phase: ErrorPhase,
        err: &ExtensionError,
    ) -> bool {
        error!("Fatal {phase:?} error: {err}");

        if client.registration_id().is_none() {
            warn!("Not registered with the host, skipping {phase:?} error report");
            return false;
        }

        if !self.reported.insert(phase) {
            warn!("{phase:?} error already reported, skipping");
            return false;
        }

        client
            .report_error(phase, err.error_type(), &err.to_string())
            .await;
        true
    }

    pub fn has_reported(&self, phase: ErrorPhase) -> bool {
        self.reported.contains(&phase)
    }
}
