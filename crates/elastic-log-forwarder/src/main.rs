// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process::ExitCode, sync::Arc};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use elastic_log_shipper::{
    Appender, ControllerRegistry, DestinationConfig, FieldRegistry, Level, LogRecord,
};

const LOGGER_NAME: &str = "elastic-log-forwarder";

/// A line buffered until we know whether it closes a batch.
struct PendingLine(Option<String>);

impl PendingLine {
    /// Replaces the buffered line with `line`, returning the previous one.
    fn replace(&mut self, line: String) -> Option<String> {
        self.0.replace(line)
    }

    fn take(&mut self) -> Option<String> {
        self.0.take()
    }
}

fn record(message: String, end_of_batch: bool) -> LogRecord {
    LogRecord::new(Level::Info, LOGGER_NAME, message)
        .with_thread("stdin")
        .end_of_batch(end_of_batch)
}

async fn forward(appender: &Appender, message: String, end_of_batch: bool) {
    if let Err(e) = appender.append(&record(message, end_of_batch)).await {
        debug!("Dropped line for destination '{}': {e}", appender.name());
    }
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("ELASTIC_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");
    let filter = EnvFilter::try_new(&env_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");

    let config = match DestinationConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid destination configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let registry = ControllerRegistry::elastic();
    let appender = match Appender::new(&registry, config, Arc::new(FieldRegistry::new())).await {
        Ok(appender) => appender,
        Err(_) => return ExitCode::FAILURE,
    };
    info!(
        "Forwarding stdin to destination '{}' on index '{}'",
        appender.name(),
        appender.controller().config().index_name
    );

    let mut failures = appender.controller().subscribe_failures();
    let failure_watch = tokio::spawn(async move {
        loop {
            match failures.recv().await {
                Ok(failure) => warn!(
                    "Unhandled background flush failure on '{}': {}",
                    failure.destination, failure.message
                ),
                Err(RecvError::Lagged(missed)) => {
                    warn!("Missed {missed} background flush failures");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut pending = PendingLine(None);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {
                    if let Some(previous) = pending.take() {
                        forward(&appender, previous, true).await;
                    }
                }
                Ok(Some(line)) => {
                    if let Some(previous) = pending.replace(line) {
                        forward(&appender, previous, false).await;
                    }
                }
                Ok(None) => {
                    debug!("End of input");
                    break;
                }
                Err(e) => {
                    error!("Error reading stdin: {e}");
                    break;
                }
            },
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    if let Some(previous) = pending.take() {
        forward(&appender, previous, false).await;
    }
    registry.shutdown_all().await;
    failure_watch.abort();

    ExitCode::SUCCESS
}
