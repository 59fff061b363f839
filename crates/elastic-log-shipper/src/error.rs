// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Errors raised by an index store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Bulk request rejected: {0}")]
    BulkRejected(String),

    #[error("Failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Index store is closed")]
    Closed,
}

/// Errors surfaced to producers of a destination.
#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to initialize destination '{destination}': {source}")]
    Initialization {
        destination: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to deliver to destination '{destination}': {source}")]
    Delivery {
        destination: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to convert parameter '{field}' for logger '{logger}': {source}")]
    Conversion {
        logger: String,
        field: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Destination '{0}' is shut down")]
    Closed(String),
}
