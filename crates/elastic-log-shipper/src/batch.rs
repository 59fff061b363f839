// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio::time::Instant;

use crate::document::Document;

/// Documents buffered since the last flush, in submission order.
#[derive(Debug, Clone)]
pub(crate) struct Batch {
    documents: Vec<Document>,
    created_at: Instant,
}

impl Batch {
    pub(crate) fn new() -> Self {
        Self {
            documents: Vec::new(),
            created_at: Instant::now(),
        }
    }

    pub(crate) fn push(&mut self, document: Document) {
        self.documents.push(document);
    }

    pub(crate) fn len(&self) -> usize {
        self.documents.len()
    }

    /// Strictly older than `timeout` at `now`.
    pub(crate) fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > timeout
    }

    pub(crate) fn documents(&self) -> &[Document] {
        &self.documents
    }
}
