// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use tracing::{debug, error};

use crate::config::DestinationConfig;
use crate::controller::BatchController;
use crate::document::{DocumentBuilder, FieldRegistry, LogRecord};
use crate::error::ShipperError;
use crate::registry::ControllerRegistry;

/// Logger-facing entry point for one destination.
///
/// Appenders created with the same destination name share the controller,
/// and therefore the batch.
#[derive(Debug, Clone)]
pub struct Appender {
    controller: Arc<BatchController>,
    builder: DocumentBuilder,
}

impl Appender {
    pub async fn new(
        registry: &ControllerRegistry,
        config: DestinationConfig,
        fields: Arc<FieldRegistry>,
    ) -> Result<Self, ShipperError> {
        let name = config.name.clone();
        let controller = registry.get_or_create(config).await.map_err(|e| {
            error!("Error initializing Elasticsearch appender named '{name}': {e}");
            e
        })?;
        Ok(Self {
            controller,
            builder: DocumentBuilder::new(fields),
        })
    }

    pub fn name(&self) -> &str {
        self.controller.name()
    }

    pub fn controller(&self) -> &Arc<BatchController> {
        &self.controller
    }

    /// Builds the document for `record` and hands it to the destination.
    pub async fn append(&self, record: &LogRecord) -> Result<(), ShipperError> {
        let ignore_exceptions = self.controller.config().ignore_exceptions;
        let result = match self.builder.build(record, ignore_exceptions) {
            Ok(document) => self.controller.submit(document, record.end_of_batch).await,
            Err(e) => Err(e),
        };
        match result {
            Err(e) => {
                debug!(
                    "Failed record from '{}' on appender '{}'",
                    record.logger,
                    self.name()
                );
                if ignore_exceptions {
                    Ok(())
                } else {
                    Err(e)
                }
            }
            Ok(()) => Ok(()),
        }
    }
}
