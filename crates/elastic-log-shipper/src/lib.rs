// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching log shipper for Elasticsearch destinations.
//!
//! Producers submit documents to a named destination through its
//! [`BatchController`]. Documents are indexed one by one until a producer marks
//! an end of batch, after which the destination buffers documents and sends
//! them in bulk, either on the next end of batch or once the buffer outlives
//! the destination flush timeout.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod appender;
mod batch;
pub mod config;
pub mod constants;
pub mod controller;
pub mod document;
pub mod error;
pub mod index_store;
pub mod registry;
mod timeout_checker;

#[cfg(test)]
mod test_support;

pub use appender::Appender;
pub use config::{DestinationAttributes, DestinationConfig, Endpoint};
pub use controller::{BackgroundFailure, BatchController};
pub use document::{
    Document, DocumentBuilder, ErrorInfo, FieldRegistry, Level, LogParameter, LogRecord,
    SourceLocation, StackFrame,
};
pub use error::{ShipperError, StoreError};
pub use index_store::{ElasticClient, ElasticConnector, IndexStore, IndexStoreConnector};
pub use registry::ControllerRegistry;
