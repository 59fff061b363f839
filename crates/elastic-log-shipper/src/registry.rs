// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::DestinationConfig;
use crate::controller::BatchController;
use crate::error::ShipperError;
use crate::index_store::{ElasticConnector, IndexStoreConnector};

type ControllerCell = Arc<OnceCell<Arc<BatchController>>>;

/// Destination name to controller mapping shared by every producer.
///
/// The map lock only guards lookups and insertions. Connecting a destination
/// happens inside that destination's own cell, so a slow backend never delays
/// other names. A cell stays in the map when its initialization fails, and
/// the next caller retries on that same cell, so one name never ends up with
/// two controllers.
pub struct ControllerRegistry {
    connector: Arc<dyn IndexStoreConnector>,
    controllers: Mutex<HashMap<String, ControllerCell>>,
}

impl ControllerRegistry {
    pub fn new(connector: Arc<dyn IndexStoreConnector>) -> Self {
        Self {
            connector,
            controllers: Mutex::new(HashMap::new()),
        }
    }

    pub fn elastic() -> Self {
        Self::new(Arc::new(ElasticConnector))
    }

    /// Returns the controller registered under `config.name`, connecting it
    /// the first time. Later calls with the same name ignore `config`.
    ///
    /// A failed connection leaves no controller behind. The next call, or a
    /// caller already waiting on the same name, tries again.
    pub async fn get_or_create(
        &self,
        config: DestinationConfig,
    ) -> Result<Arc<BatchController>, ShipperError> {
        let cell = self.cell(&config.name);
        let controller = cell
            .get_or_try_init(|| async move {
                let store = self.connector.connect(&config).map_err(|source| {
                    ShipperError::Initialization {
                        destination: config.name.clone(),
                        source,
                    }
                })?;
                BatchController::connect(config, store).await
            })
            .await?;
        Ok(Arc::clone(controller))
    }

    pub fn get(&self, name: &str) -> Option<Arc<BatchController>> {
        self.lock()
            .get(name)
            .and_then(|cell| cell.get())
            .cloned()
    }

    /// Removes and shuts down `name`. Returns false when no connected
    /// controller is registered under it.
    ///
    /// An initialization in progress for `name` is waited for first.
    pub async fn shutdown(&self, name: &str) -> bool {
        let Some(cell) = self.lock().get(name).cloned() else {
            return false;
        };
        self.shutdown_cell(name, &cell).await
    }

    /// Shuts down every destination, including those still connecting.
    pub async fn shutdown_all(&self) {
        let cells: Vec<(String, ControllerCell)> = self
            .lock()
            .iter()
            .map(|(name, cell)| (name.clone(), cell.clone()))
            .collect();
        debug!("Shutting down {} destinations", cells.len());
        for (name, cell) in cells {
            self.shutdown_cell(&name, &cell).await;
        }
    }

    async fn shutdown_cell(&self, name: &str, cell: &ControllerCell) -> bool {
        let controller = Self::settled(name, cell).await;
        {
            let mut controllers = self.lock();
            if controllers
                .get(name)
                .is_some_and(|current| Arc::ptr_eq(current, cell))
            {
                controllers.remove(name);
            }
        }
        match controller {
            Some(controller) => {
                controller.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Waits for any initialization running in `cell` and returns its
    /// controller. An empty cell is left empty.
    async fn settled(name: &str, cell: &ControllerCell) -> Option<Arc<BatchController>> {
        cell.get_or_try_init(|| async { Err(ShipperError::Closed(name.to_string())) })
            .await
            .ok()
            .cloned()
    }

    /// Number of connected destinations.
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell(&self, name: &str) -> ControllerCell {
        self.lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ControllerCell>> {
        self.controllers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRegistry")
            .field("destinations", &self.len())
            .finish_non_exhaustive()
    }
}
