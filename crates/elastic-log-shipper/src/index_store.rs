// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Index store seam and its Elasticsearch implementation.
//!
//! The batch controller only talks to [`IndexStore`]. [`ElasticClient`] maps
//! the three operations onto the Elasticsearch REST API:
//!
//! ```text
//!   ensure_index_exists  ->  HEAD /{index}, then PUT /{index} on 404
//!   index_one            ->  POST /{index}/_doc
//!   index_bulk           ->  POST /{index}/_bulk  (application/x-ndjson)
//! ```

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::DestinationConfig;
use crate::constants::REQUEST_TIMEOUT;
use crate::document::Document;
use crate::error::StoreError;

#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Verifies that `index` exists, creating it when missing.
    async fn ensure_index_exists(&self, index: &str) -> Result<(), StoreError>;
    /// Indexes one document in its own request.
    async fn index_one(&self, index: &str, document: &Document) -> Result<(), StoreError>;
    /// Indexes all `documents` in a single bulk request.
    async fn index_bulk(&self, index: &str, documents: &[Document]) -> Result<(), StoreError>;
    /// Releases the backend connection. Later calls fail with [`StoreError::Closed`].
    async fn close(&self);
}

/// Builds the store a destination controller will own.
pub trait IndexStoreConnector: Send + Sync {
    fn connect(&self, config: &DestinationConfig) -> Result<Arc<dyn IndexStore>, StoreError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ElasticConnector;

impl IndexStoreConnector for ElasticConnector {
    fn connect(&self, config: &DestinationConfig) -> Result<Arc<dyn IndexStore>, StoreError> {
        Ok(Arc::new(ElasticClient::new(config)?))
    }
}

/// Elasticsearch REST client. Requests rotate over the configured endpoints.
#[derive(Debug)]
pub struct ElasticClient {
    client: reqwest::Client,
    base_urls: Vec<String>,
    next_endpoint: AtomicUsize,
    credentials: Option<(String, String)>,
    closed: AtomicBool,
}

impl ElasticClient {
    pub fn new(config: &DestinationConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_urls: config.endpoints.iter().map(|e| e.base_url()).collect(),
            next_endpoint: AtomicUsize::new(0),
            credentials: config
                .credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
            closed: AtomicBool::new(false),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, StoreError> {
        if self.closed.load(Ordering::Acquire) || self.base_urls.is_empty() {
            return Err(StoreError::Closed);
        }
        let slot = self.next_endpoint.fetch_add(1, Ordering::Relaxed) % self.base_urls.len();
        let url = format!("{}/{}", self.base_urls[slot], path);
        let builder = self.client.request(method, url);
        Ok(match &self.credentials {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        })
    }

    async fn check_status(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status { status, body })
    }
}

/// Newline-delimited bulk body: one empty `index` action per document.
pub(crate) fn bulk_body(documents: &[Document]) -> Result<String, StoreError> {
    let mut body = String::new();
    for document in documents {
        body.push_str("{\"index\":{}}\n");
        body.push_str(&serde_json::to_string(document)?);
        body.push('\n');
    }
    Ok(body)
}

/// Returns the first item-level error of a bulk response, if any item failed.
fn bulk_failure(response: &Value) -> Option<String> {
    if !response.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    let failed = response
        .get("items")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.as_object()?.values().next()?.get("error"))
        .count();
    let first = response
        .get("items")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find_map(|item| item.as_object()?.values().next()?.get("error"))
        .map(|error| {
            error
                .get("reason")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), ToString::to_string)
        })
        .unwrap_or_else(|| "unknown error".to_string());
    Some(format!("{failed} item(s) failed, first: {first}"))
}

#[async_trait]
impl IndexStore for ElasticClient {
    async fn ensure_index_exists(&self, index: &str) -> Result<(), StoreError> {
        let response = self.request(Method::HEAD, index)?.send().await?;
        match response.status() {
            status if status.is_success() => {
                debug!("Index '{index}' already exists");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                debug!("Creating index '{index}'");
                let response = self.request(Method::PUT, index)?.send().await?;
                Self::check_status(response).await.map(|_| ())
            }
            _ => Self::check_status(response).await.map(|_| ()),
        }
    }

    async fn index_one(&self, index: &str, document: &Document) -> Result<(), StoreError> {
        let response = self
            .request(Method::POST, &format!("{index}/_doc"))?
            .json(document)
            .send()
            .await?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn index_bulk(&self, index: &str, documents: &[Document]) -> Result<(), StoreError> {
        if documents.is_empty() {
            return Ok(());
        }
        let response = self
            .request(Method::POST, &format!("{index}/_bulk"))?
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(bulk_body(documents)?)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let body: Value = response.json().await?;
        match bulk_failure(&body) {
            Some(reason) => Err(StoreError::BulkRejected(reason)),
            None => Ok(()),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
