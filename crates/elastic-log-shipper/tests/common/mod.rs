// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use async_trait::async_trait;
use elastic_log_shipper::{
    DestinationConfig, Document, IndexStore, IndexStoreConnector, StoreError,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// What a destination sent, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    One(Document),
    Bulk(Vec<Document>),
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    sent: Mutex<Vec<Sent>>,
    failing: AtomicBool,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn single_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::One(_)))
            .count()
    }

    pub fn bulk_sizes(&self) -> Vec<usize> {
        self.sent()
            .iter()
            .filter_map(|s| match s {
                Sent::Bulk(docs) => Some(docs.len()),
                Sent::One(_) => None,
            })
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::BulkRejected("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn ensure_index_exists(&self, _index: &str) -> Result<(), StoreError> {
        self.check()
    }

    async fn index_one(&self, _index: &str, document: &Document) -> Result<(), StoreError> {
        self.check()?;
        self.sent.lock().unwrap().push(Sent::One(document.clone()));
        Ok(())
    }

    async fn index_bulk(&self, _index: &str, documents: &[Document]) -> Result<(), StoreError> {
        self.check()?;
        self.sent.lock().unwrap().push(Sent::Bulk(documents.to_vec()));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Gives every destination its own [`MemoryStore`], keyed by name.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    stores: Mutex<Vec<(String, Arc<MemoryStore>)>>,
}

impl MemoryConnector {
    pub fn store(&self, name: &str) -> Option<Arc<MemoryStore>> {
        self.stores
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, store)| store.clone())
    }
}

impl IndexStoreConnector for MemoryConnector {
    fn connect(&self, config: &DestinationConfig) -> Result<Arc<dyn IndexStore>, StoreError> {
        let store = Arc::new(MemoryStore::default());
        self.stores
            .lock()
            .unwrap()
            .push((config.name.clone(), store.clone()));
        Ok(store)
    }
}

pub fn document(position: i64) -> Document {
    let Value::Object(map) = json!({ "event": "test", "position": position }) else {
        unreachable!()
    };
    map
}

pub fn positions(documents: &[Document]) -> Vec<i64> {
    documents
        .iter()
        .map(|d| d["position"].as_i64().unwrap())
        .collect()
}
