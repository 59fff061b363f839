// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::controller::BatchController;

/// Background task that flushes a controller's batch once it outlives the
/// destination flush timeout.
///
/// The task only holds a weak reference, so a controller dropped without
/// shutdown ends the task on the next tick.
#[derive(Debug)]
pub(crate) struct FlushTimeoutChecker {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl FlushTimeoutChecker {
    /// Spawns the checker. The first check runs one `period` from now.
    pub(crate) fn start(controller: Weak<BatchController>, period: Duration) -> Self {
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let first_check = Instant::now() + period;

        let task = tokio::spawn(async move {
            let mut interval = interval_at(first_check, period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(controller) = controller.upgrade() else {
                            debug!("Controller dropped, stopping flush timeout checker");
                            break;
                        };
                        controller.flush_expired().await;
                    }
                    () = token.cancelled() => {
                        debug!("Flush timeout checker shutting down");
                        break;
                    }
                }
            }
        });

        Self { cancel_token, task }
    }

    /// Cancels the checker and waits for its task to finish.
    pub(crate) async fn stop(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.task.await {
            error!("Flush timeout checker task failed: {e}");
        }
    }
}
