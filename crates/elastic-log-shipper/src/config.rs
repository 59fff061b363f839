// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::Url;
use std::env;
use std::fmt;
use std::time::Duration;
use tracing::warn;

use crate::constants::DEFAULT_CLUSTER;
use crate::error::ShipperError;

/// A single backend node of a destination cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(protocol: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
        }
    }

    /// Parses `protocol://host[:port]`. A missing port falls back to the
    /// scheme default.
    pub fn parse(url: &str) -> Option<Self> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_string();
        let port = parsed.port_or_known_default()?;
        Some(Self {
            protocol: parsed.scheme().to_string(),
            host,
            port,
        })
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_url())
    }
}

/// Splits a cluster string on whitespace, commas and semicolons, dropping
/// entries that do not parse as an endpoint URL.
pub fn parse_cluster(cluster: &str) -> Vec<Endpoint> {
    cluster
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|s| !s.is_empty())
        .filter_map(|s| {
            let endpoint = Endpoint::parse(s);
            if endpoint.is_none() {
                warn!("Dropping malformed endpoint '{s}'");
            }
            endpoint
        })
        .collect()
}

/// Raw, unvalidated destination attributes as they come from a logging
/// configuration file or the environment.
#[derive(Debug, Clone, Default)]
pub struct DestinationAttributes {
    pub name: Option<String>,
    pub cluster: Option<String>,
    pub index: Option<String>,
    pub flush_timeout_secs: Option<i64>,
    pub ignore_exceptions: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl DestinationAttributes {
    /// Reads the `ELASTIC_LOG_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            name: env::var("ELASTIC_LOG_NAME").ok(),
            cluster: env::var("ELASTIC_LOG_CLUSTER").ok(),
            index: env::var("ELASTIC_LOG_INDEX").ok(),
            flush_timeout_secs: env::var("ELASTIC_LOG_FLUSH_TIMEOUT")
                .ok()
                .and_then(|val| val.trim().parse::<i64>().ok()),
            ignore_exceptions: env::var("ELASTIC_LOG_IGNORE_EXCEPTIONS")
                .ok()
                .map(|val| val.to_lowercase() != "false"),
            username: env::var("ELASTIC_LOG_USERNAME").ok(),
            password: env::var("ELASTIC_LOG_PASSWORD").ok(),
        }
    }
}

/// Validated configuration of one named destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationConfig {
    /// Registry key. All producers using this name share one controller.
    pub name: String,
    pub index_name: String,
    /// Age in seconds after which an open batch is force-flushed. `<= 0`
    /// disables the background checker.
    pub flush_timeout_secs: i64,
    pub ignore_exceptions: bool,
    /// Basic authentication, applied only when both parts are non-blank.
    pub username: Option<String>,
    pub password: Option<String>,
    pub endpoints: Vec<Endpoint>,
}

impl DestinationConfig {
    /// Configuration with defaults for everything but the name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            index_name: name.clone(),
            name,
            flush_timeout_secs: 0,
            ignore_exceptions: true,
            username: None,
            password: None,
            endpoints: parse_cluster(DEFAULT_CLUSTER),
        }
    }

    pub fn from_attributes(attributes: DestinationAttributes) -> Result<Self, ShipperError> {
        let name = attributes
            .name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| {
                ShipperError::InvalidConfig("No name provided for Elastic destination".to_string())
            })?;

        let mut endpoints = parse_cluster(attributes.cluster.as_deref().unwrap_or(DEFAULT_CLUSTER));
        if endpoints.is_empty() {
            warn!("No valid endpoint for destination '{name}', using {DEFAULT_CLUSTER}");
            endpoints = parse_cluster(DEFAULT_CLUSTER);
        }

        let config = Self {
            index_name: attributes
                .index
                .filter(|index| !index.trim().is_empty())
                .unwrap_or_else(|| name.clone()),
            name,
            flush_timeout_secs: attributes.flush_timeout_secs.unwrap_or(0),
            ignore_exceptions: attributes.ignore_exceptions.unwrap_or(true),
            username: attributes.username,
            password: attributes.password,
            endpoints,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ShipperError> {
        Self::from_attributes(DestinationAttributes::from_env())
    }

    #[must_use]
    pub fn with_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = index_name.into();
        self
    }

    #[must_use]
    pub fn with_flush_timeout_secs(mut self, flush_timeout_secs: i64) -> Self {
        self.flush_timeout_secs = flush_timeout_secs;
        self
    }

    #[must_use]
    pub fn with_ignore_exceptions(mut self, ignore_exceptions: bool) -> Self {
        self.ignore_exceptions = ignore_exceptions;
        self
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.endpoints = endpoints;
        self
    }

    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn validate(&self) -> Result<(), ShipperError> {
        if self.name.trim().is_empty() {
            return Err(ShipperError::InvalidConfig(
                "Destination name cannot be empty".to_string(),
            ));
        }
        if self.index_name.trim().is_empty() {
            return Err(ShipperError::InvalidConfig(format!(
                "Index name for destination '{}' cannot be empty",
                self.name
            )));
        }
        if self.endpoints.is_empty() {
            return Err(ShipperError::InvalidConfig(format!(
                "Destination '{}' has no endpoint",
                self.name
            )));
        }
        Ok(())
    }

    /// The timeout-based flush interval, or `None` when disabled.
    pub fn flush_timeout(&self) -> Option<Duration> {
        u64::try_from(self.flush_timeout_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Basic authentication pair, when both parts are non-blank.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.trim().is_empty() && !pass.trim().is_empty() => {
                Some((user, pass))
            }
            _ => None,
        }
    }
}
