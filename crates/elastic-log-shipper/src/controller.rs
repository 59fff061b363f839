// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-destination batching and flush control.
//!
//! Every document submitted to a destination goes through one
//! [`BatchController`]. The controller starts in single mode, where each
//! document is indexed on its own. The first submission flagged as end of
//! batch switches it to batching mode for the rest of its life:
//!
//! ```text
//!   submit(doc, end_of_batch)
//!          │
//!          v
//!   batching || end_of_batch ? ──no──> index_one(doc)
//!          │ yes
//!          v
//!   batch.push(doc)  (batch created lazily, checker started once)
//!          │
//!          v
//!   end_of_batch ? ──no──> buffered until the next flush
//!          │ yes
//!          v
//!   take batch ──> index_bulk(batch)
//! ```
//!
//! The flush timeout checker takes the same path when a batch outlives the
//! configured timeout.
//!
//! # Exclusion
//!
//! The batching flag, the batch and the checker handle live in one state
//! struct behind one mutex. A flush takes the batch out of the state before
//! the lock is released, so a batch is sent at most once and a document is
//! never appended to a batch that is already on the wire. Backend calls run
//! outside the state lock but inside a shared send gate, which shutdown takes
//! exclusively before closing the store.
//!
//! # Errors
//!
//! A failed send is reported through `tracing`. It is returned to the
//! producer only when the destination does not ignore exceptions. A failed
//! flush drops its batch.

use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error};

use crate::batch::Batch;
use crate::config::DestinationConfig;
use crate::constants::{BACKGROUND_FAILURE_CAPACITY, FLUSH_CHECK_INTERVAL};
use crate::document::Document;
use crate::error::{ShipperError, StoreError};
use crate::index_store::IndexStore;
use crate::timeout_checker::FlushTimeoutChecker;

/// A timed flush that failed on a destination that does not ignore
/// exceptions. There is no caller to return it to, so it is broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundFailure {
    pub destination: String,
    pub message: String,
}

#[derive(Debug, Default)]
struct ControllerState {
    batching: bool,
    batch: Option<Batch>,
    checker: Option<FlushTimeoutChecker>,
    closed: bool,
}

pub struct BatchController {
    config: DestinationConfig,
    store: Arc<dyn IndexStore>,
    state: Mutex<ControllerState>,
    /// Shared by every backend call, exclusive for shutdown.
    sends: RwLock<()>,
    failures: broadcast::Sender<BackgroundFailure>,
    me: Weak<BatchController>,
}

impl BatchController {
    /// Verifies or creates the destination index and returns a controller in
    /// single mode.
    pub async fn connect(
        config: DestinationConfig,
        store: Arc<dyn IndexStore>,
    ) -> Result<Arc<Self>, ShipperError> {
        if let Err(source) = store.ensure_index_exists(&config.index_name).await {
            store.close().await;
            return Err(ShipperError::Initialization {
                destination: config.name,
                source,
            });
        }
        debug!(
            "Destination '{}' ready on index '{}'",
            config.name, config.index_name
        );

        let (failures, _) = broadcast::channel(BACKGROUND_FAILURE_CAPACITY);
        Ok(Arc::new_cyclic(|me| Self {
            config,
            store,
            state: Mutex::new(ControllerState::default()),
            sends: RwLock::new(()),
            failures,
            me: me.clone(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DestinationConfig {
        &self.config
    }

    pub async fn is_batching(&self) -> bool {
        self.state.lock().await.batching
    }

    /// Number of documents waiting for the next flush.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.batch.as_ref().map_or(0, Batch::len)
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    pub fn subscribe_failures(&self) -> broadcast::Receiver<BackgroundFailure> {
        self.failures.subscribe()
    }

    /// Sends `document` now or buffers it, flushing the batch when
    /// `end_of_batch` is set.
    pub async fn submit(&self, document: Document, end_of_batch: bool) -> Result<(), ShipperError> {
        match self.route(document, end_of_batch).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    "Error logging into Elasticsearch for destination '{}' on index '{}': {e}",
                    self.name(),
                    self.config.index_name
                );
                if self.config.ignore_exceptions {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn route(&self, document: Document, end_of_batch: bool) -> Result<(), ShipperError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ShipperError::Closed(self.config.name.clone()));
        }

        if !state.batching && !end_of_batch {
            let _send = self.sends.read().await;
            drop(state);
            return self
                .store
                .index_one(&self.config.index_name, &document)
                .await
                .map_err(|source| self.delivery_error(source));
        }

        if !state.batching {
            state.batching = true;
            debug!("Destination '{}' entering batching mode", self.name());
            if self.config.flush_timeout().is_some() {
                state.checker = Some(FlushTimeoutChecker::start(
                    self.me.clone(),
                    FLUSH_CHECK_INTERVAL,
                ));
            }
        }
        state.batch.get_or_insert_with(Batch::new).push(document);

        if !end_of_batch {
            return Ok(());
        }
        let Some(batch) = state.batch.take() else {
            return Ok(());
        };
        let _send = self.sends.read().await;
        drop(state);
        self.send_batch(&batch)
            .await
            .map_err(|source| self.delivery_error(source))
    }

    /// Flushes the batch if it is older than the destination timeout.
    pub(crate) async fn flush_expired(&self) {
        let Some(timeout) = self.config.flush_timeout() else {
            return;
        };
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        let batch = match state.batch.take() {
            Some(batch) if batch.is_expired(Instant::now(), timeout) => batch,
            fresh => {
                state.batch = fresh;
                return;
            }
        };
        let _send = self.sends.read().await;
        drop(state);

        debug!(
            "Batch for destination '{}' exceeded {}s, flushing",
            self.name(),
            timeout.as_secs()
        );
        if let Err(source) = self.send_batch(&batch).await {
            let e = self.delivery_error(source);
            error!("Error logging into Elasticsearch during a bulk request execution: {e}");
            if !self.config.ignore_exceptions {
                // Fails only when nobody subscribed.
                let _ = self.failures.send(BackgroundFailure {
                    destination: self.config.name.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    /// Flushes any pending batch, stops the checker and closes the store.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let (batch, checker) = {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            (state.batch.take(), state.checker.take())
        };

        if let Some(checker) = checker {
            checker.stop().await;
        }

        if let Some(batch) = batch {
            if let Err(source) = self.send_batch(&batch).await {
                error!(
                    "Error flushing pending batch while shutting down destination '{}': {}",
                    self.name(),
                    self.delivery_error(source)
                );
            }
        }

        // Waits for in-flight sends started before the state was closed.
        let _gate = self.sends.write().await;
        self.store.close().await;
        debug!("Destination '{}' shut down", self.name());
    }

    async fn send_batch(&self, batch: &Batch) -> Result<(), StoreError> {
        debug!(
            "Flushing {} documents to index '{}'",
            batch.len(),
            self.config.index_name
        );
        self.store
            .index_bulk(&self.config.index_name, batch.documents())
            .await
    }

    fn delivery_error(&self, source: StoreError) -> ShipperError {
        ShipperError::Delivery {
            destination: self.config.name.clone(),
            source,
        }
    }
}

impl std::fmt::Debug for BatchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
