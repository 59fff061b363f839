// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Cluster used when a destination does not name one.
pub const DEFAULT_CLUSTER: &str = "http://localhost:9200";

/// Cadence of the batch age check. The first check runs one period after
/// batching mode is entered.
pub const FLUSH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Per-request timeout of the Elasticsearch HTTP client.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the background failure broadcast channel. Slow observers lose
/// the oldest failures first.
pub const BACKGROUND_FAILURE_CAPACITY: usize = 64;

/// Timestamp layout of emitted documents, e.g. `2024-05-01T10:15:30.123+0000`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";
