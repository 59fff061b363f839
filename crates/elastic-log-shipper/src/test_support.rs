// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory index store used by unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::DestinationConfig;
use crate::document::Document;
use crate::error::StoreError;
use crate::index_store::{IndexStore, IndexStoreConnector};

pub(crate) fn document(position: i64) -> Document {
    let Value::Object(map) = json!({ "position": position }) else {
        unreachable!()
    };
    map
}

fn rejected() -> StoreError {
    StoreError::BulkRejected("simulated failure".to_string())
}

#[derive(Debug, Default)]
pub(crate) struct RecordingStore {
    ensured: Mutex<Vec<String>>,
    singles: Mutex<Vec<Document>>,
    bulks: Mutex<Vec<Vec<Document>>>,
    fail_init: AtomicBool,
    failing_inits: AtomicUsize,
    init_delay: Mutex<Option<Duration>>,
    fail_single: AtomicBool,
    fail_bulk: AtomicBool,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    closed_during_send: AtomicBool,
    close_count: AtomicUsize,
}

impl RecordingStore {
    pub(crate) fn ensured(&self) -> Vec<String> {
        self.ensured.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn singles(&self) -> Vec<Document> {
        self.singles.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn bulks(&self) -> Vec<Vec<Document>> {
        self.bulks.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn bulk_sizes(&self) -> Vec<usize> {
        self.bulks().iter().map(Vec::len).collect()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub(crate) fn closed_after_all_sends(&self) -> bool {
        self.close_count() > 0 && !self.closed_during_send.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    /// Fails only the next `count` index checks.
    pub(crate) fn fail_next_inits(&self, count: usize) {
        self.failing_inits.store(count, Ordering::SeqCst);
    }

    pub(crate) fn set_init_delay(&self, delay: Duration) {
        *self.init_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    pub(crate) fn fail_single(&self, fail: bool) {
        self.fail_single.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_bulk(&self, fail: bool) {
        self.fail_bulk.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    async fn simulate_send(&self) {
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl IndexStore for RecordingStore {
    async fn ensure_index_exists(&self, index: &str) -> Result<(), StoreError> {
        let delay = *self.init_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted_failure = self
            .failing_inits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure || self.fail_init.load(Ordering::SeqCst) {
            return Err(rejected());
        }
        self.ensured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(index.to_string());
        Ok(())
    }

    async fn index_one(&self, _index: &str, document: &Document) -> Result<(), StoreError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.simulate_send().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_single.load(Ordering::SeqCst) {
            return Err(rejected());
        }
        self.singles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(document.clone());
        Ok(())
    }

    async fn index_bulk(&self, _index: &str, documents: &[Document]) -> Result<(), StoreError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.simulate_send().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_bulk.load(Ordering::SeqCst) {
            return Err(rejected());
        }
        self.bulks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(documents.to_vec());
        Ok(())
    }

    async fn close(&self) {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            self.closed_during_send.store(true, Ordering::SeqCst);
        }
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out one shared [`RecordingStore`] and counts connections.
#[derive(Debug, Default)]
pub(crate) struct RecordingConnector {
    pub(crate) store: Arc<RecordingStore>,
    connects: AtomicUsize,
    refuse: AtomicBool,
}

impl RecordingConnector {
    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl IndexStoreConnector for RecordingConnector {
    fn connect(&self, _config: &DestinationConfig) -> Result<Arc<dyn IndexStore>, StoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(self.store.clone())
    }
}
