// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conversion of application log records into flat index documents.
//!
//! A document always carries `message`, `level`, `logger`, `timestamp` and
//! `thread`. Location fields, error fields and typed parameters are added when
//! present:
//!
//! ```json
//! {
//!   "message": "order rejected",
//!   "level": "WARN",
//!   "logger": "shop::orders",
//!   "timestamp": "2024-05-01T10:15:30.123+0000",
//!   "thread": "worker-3",
//!   "class": "shop::orders", "method": "reject", "line": 42,
//!   "errorMessage": "insufficient stock", "errorType": "shop::StockError",
//!   "order": {"id": 17, "total": 99.5}
//! }
//! ```
//!
//! Parameters are only emitted when their type was registered in the
//! [`FieldRegistry`] with the field name they should be stored under.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::error;

use crate::constants::TIMESTAMP_FORMAT;
use crate::error::ShipperError;

/// Ready-to-send payload. Opaque to the batch controller.
pub type Document = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub class: String,
    pub method: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub class: String,
    pub method: String,
    pub line: u32,
}

impl StackFrame {
    fn to_value(&self) -> Value {
        let mut frame = Map::new();
        frame.insert("class".to_string(), Value::from(self.class.clone()));
        frame.insert("method".to_string(), Value::from(self.method.clone()));
        frame.insert("line".to_string(), Value::from(self.line));
        frame.insert("string".to_string(), Value::from(self.to_string()));
        Value::Object(frame)
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.class, self.method, self.line)
    }
}

/// Error attached to a log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub message: String,
    pub error_type: String,
    pub frames: Vec<StackFrame>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: error_type.into(),
            frames: Vec::new(),
        }
    }

    pub fn from_error<E: std::error::Error + 'static>(error: &E) -> Self {
        Self::new(error.to_string(), std::any::type_name::<E>())
    }

    #[must_use]
    pub fn with_frame(mut self, frame: StackFrame) -> Self {
        self.frames.push(frame);
        self
    }
}

/// A structured value attached to a log record.
pub trait LogParameter: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn to_value(&self) -> serde_json::Result<Value>;
}

impl<T: Serialize + Any + Send + Sync> LogParameter for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// One application log record.
#[derive(Clone)]
pub struct LogRecord {
    pub message: String,
    pub level: Level,
    pub logger: String,
    pub thread: String,
    pub location: Option<SourceLocation>,
    pub error: Option<ErrorInfo>,
    pub parameters: Vec<Arc<dyn LogParameter>>,
    pub context: BTreeMap<String, String>,
    pub include_location: bool,
    /// Flush the destination batch after this record.
    pub end_of_batch: bool,
}

impl LogRecord {
    pub fn new(level: Level, logger: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level,
            logger: logger.into(),
            thread: std::thread::current()
                .name()
                .unwrap_or("unnamed")
                .to_string(),
            location: None,
            error: None,
            parameters: Vec::new(),
            context: BTreeMap::new(),
            include_location: false,
            end_of_batch: false,
        }
    }

    #[must_use]
    pub fn with_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = thread.into();
        self
    }

    /// Attaches a source location and turns location capture on.
    #[must_use]
    pub fn with_location(
        mut self,
        class: impl Into<String>,
        method: impl Into<String>,
        line: u32,
    ) -> Self {
        self.location = Some(SourceLocation {
            class: class.into(),
            method: method.into(),
            line,
        });
        self.include_location = true;
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }

    #[must_use]
    pub fn with_parameter<P: LogParameter>(mut self, parameter: P) -> Self {
        self.parameters.push(Arc::new(parameter));
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn include_location(mut self, include_location: bool) -> Self {
        self.include_location = include_location;
        self
    }

    #[must_use]
    pub fn end_of_batch(mut self, end_of_batch: bool) -> Self {
        self.end_of_batch = end_of_batch;
        self
    }
}

impl fmt::Debug for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogRecord")
            .field("message", &self.message)
            .field("level", &self.level)
            .field("logger", &self.logger)
            .field("thread", &self.thread)
            .field("location", &self.location)
            .field("error", &self.error)
            .field("parameters", &self.parameters.len())
            .field("context", &self.context)
            .field("include_location", &self.include_location)
            .field("end_of_batch", &self.end_of_batch)
            .finish()
    }
}

/// Parameter type to document field name table, filled at startup.
#[derive(Debug, Default)]
pub struct FieldRegistry {
    fields: RwLock<HashMap<TypeId, String>>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores parameters of type `T` under `field`. Re-registering replaces
    /// the previous name.
    pub fn register<T: 'static>(&self, field: impl Into<String>) -> &Self {
        let field = field.into();
        let mut fields = self.fields.write().unwrap_or_else(PoisonError::into_inner);
        if field.is_empty() {
            fields.remove(&TypeId::of::<T>());
        } else {
            fields.insert(TypeId::of::<T>(), field);
        }
        self
    }

    pub fn field_for(&self, parameter: &dyn Any) -> Option<String> {
        self.fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&parameter.type_id())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.fields.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct DocumentBuilder {
    fields: Arc<FieldRegistry>,
}

impl DocumentBuilder {
    pub fn new(fields: Arc<FieldRegistry>) -> Self {
        Self { fields }
    }

    /// Builds the document for `record`.
    ///
    /// A parameter that fails to serialize is reported and left out. With
    /// `ignore_exceptions == false` the failure is returned instead.
    pub fn build(
        &self,
        record: &LogRecord,
        ignore_exceptions: bool,
    ) -> Result<Document, ShipperError> {
        let mut doc = Document::new();
        doc.insert("message".to_string(), Value::from(record.message.clone()));
        doc.insert("level".to_string(), Value::from(record.level.as_str()));
        doc.insert("logger".to_string(), Value::from(record.logger.clone()));
        doc.insert(
            "timestamp".to_string(),
            Value::from(Utc::now().format(TIMESTAMP_FORMAT).to_string()),
        );
        doc.insert("thread".to_string(), Value::from(record.thread.clone()));

        if record.include_location {
            if let Some(location) = &record.location {
                doc.insert("class".to_string(), Value::from(location.class.clone()));
                doc.insert("method".to_string(), Value::from(location.method.clone()));
                doc.insert("line".to_string(), Value::from(location.line));
            }
        }

        if let Some(error) = &record.error {
            doc.insert("errorMessage".to_string(), Value::from(error.message.clone()));
            doc.insert("errorType".to_string(), Value::from(error.error_type.clone()));
            if record.include_location {
                doc.insert(
                    "stack".to_string(),
                    Value::Array(error.frames.iter().map(StackFrame::to_value).collect()),
                );
            }
        }

        for (key, value) in &record.context {
            doc.entry(key.clone())
                .or_insert_with(|| Value::from(value.clone()));
        }

        for parameter in &record.parameters {
            let Some(field) = self.fields.field_for(parameter.as_ref().as_any()) else {
                continue;
            };
            match parameter.to_value() {
                Ok(value) => {
                    doc.insert(field, value);
                }
                Err(e) => {
                    error!(
                        "Error logging into Elasticsearch for logger '{}' \
                         converting parameter '{}': {e}",
                        record.logger, field
                    );
                    if !ignore_exceptions {
                        return Err(ShipperError::Conversion {
                            logger: record.logger.clone(),
                            field,
                            source: e,
                        });
                    }
                }
            }
        }

        Ok(doc)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde::Serializer;
    use tracing_test::traced_test;

    #[derive(Serialize)]
    struct Order {
        id: u64,
        total: f64,
    }

    #[derive(Serialize)]
    struct Unregistered {
        secret: String,
    }

    struct Broken;

    impl Serialize for Broken {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("cannot serialize Broken"))
        }
    }

    fn builder() -> DocumentBuilder {
        let fields = FieldRegistry::new();
        fields.register::<Order>("order").register::<Broken>("broken");
        DocumentBuilder::new(Arc::new(fields))
    }

    #[test]
    fn test_standard_fields() {
        let record =
            LogRecord::new(Level::Info, "shop::orders", "order accepted").with_thread("worker-1");
        let doc = builder().build(&record, true).unwrap();

        assert_eq!(doc["message"], "order accepted");
        assert_eq!(doc["level"], "INFO");
        assert_eq!(doc["logger"], "shop::orders");
        assert_eq!(doc["thread"], "worker-1");
        let timestamp = doc["timestamp"].as_str().unwrap();
        assert_eq!(timestamp.len(), "2024-05-01T10:15:30.123+0000".len());
        assert!(timestamp.ends_with("+0000"));
        assert!(!doc.contains_key("class"));
        assert!(!doc.contains_key("errorMessage"));
    }

    #[test]
    fn test_location_fields() {
        let record =
            LogRecord::new(Level::Debug, "shop", "m").with_location("shop::orders", "accept", 42);
        let doc = builder().build(&record, true).unwrap();

        assert_eq!(doc["class"], "shop::orders");
        assert_eq!(doc["method"], "accept");
        assert_eq!(doc["line"], 42);
    }

    #[test]
    fn test_location_skipped_when_capture_disabled() {
        let record = LogRecord::new(Level::Debug, "shop", "m")
            .with_location("shop::orders", "accept", 42)
            .include_location(false);
        let doc = builder().build(&record, true).unwrap();

        assert!(!doc.contains_key("class"));
    }

    #[test]
    fn test_error_fields_and_stack() {
        let error = ErrorInfo::new("insufficient stock", "shop::StockError")
            .with_frame(StackFrame {
                class: "shop::stock".to_string(),
                method: "reserve".to_string(),
                line: 10,
            });
        let record = LogRecord::new(Level::Error, "shop", "order rejected")
            .with_error(error.clone())
            .with_location("shop::orders", "reject", 7);
        let doc = builder().build(&record, true).unwrap();

        assert_eq!(doc["errorMessage"], "insufficient stock");
        assert_eq!(doc["errorType"], "shop::StockError");
        let stack = doc["stack"].as_array().unwrap();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack[0]["method"], "reserve");
        assert_eq!(stack[0]["string"], "shop::stock.reserve:10");

        let record = LogRecord::new(Level::Error, "shop", "order rejected").with_error(error);
        let doc = builder().build(&record, true).unwrap();
        assert!(doc.contains_key("errorType"));
        assert!(!doc.contains_key("stack"));
    }

    #[test]
    fn test_error_info_from_error() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let info = ErrorInfo::from_error(&io);
        assert_eq!(info.message, "disk full");
        assert_eq!(info.error_type, "std::io::error::Error");
    }

    #[test]
    fn test_registered_parameter_is_emitted() {
        let record = LogRecord::new(Level::Info, "shop", "m")
            .with_parameter(Order { id: 17, total: 99.5 })
            .with_parameter(Unregistered {
                secret: "hidden".to_string(),
            });
        let doc = builder().build(&record, true).unwrap();

        assert_eq!(doc["order"]["id"], 17);
        assert_eq!(doc["order"]["total"], 99.5);
        assert!(!doc.values().any(|v| v.get("secret").is_some()));
    }

    #[test]
    fn test_context_does_not_override_standard_fields() {
        let record = LogRecord::new(Level::Info, "shop", "real message")
            .with_context("requestId", "abc-123")
            .with_context("message", "spoofed");
        let doc = builder().build(&record, true).unwrap();

        assert_eq!(doc["requestId"], "abc-123");
        assert_eq!(doc["message"], "real message");
    }

    #[test]
    #[traced_test]
    fn test_conversion_error_ignored_keeps_document() {
        let record = LogRecord::new(Level::Info, "shop", "m")
            .with_parameter(Broken)
            .with_parameter(Order { id: 1, total: 1.0 });
        let doc = builder().build(&record, true).unwrap();

        assert!(!doc.contains_key("broken"));
        assert!(doc.contains_key("order"));
        assert!(logs_contain("converting parameter 'broken'"));
    }

    #[test]
    fn test_conversion_error_propagated() {
        let record = LogRecord::new(Level::Info, "shop", "m").with_parameter(Broken);
        let result = builder().build(&record, false);

        match result {
            Err(ShipperError::Conversion { logger, field, .. }) => {
                assert_eq!(logger, "shop");
                assert_eq!(field, "broken");
            }
            other => panic!("expected conversion error, got {other:?}"),
        }
    }

    #[test]
    fn test_field_registry_unregister_with_empty_name() {
        let fields = FieldRegistry::new();
        fields.register::<Order>("order");
        assert_eq!(fields.len(), 1);
        fields.register::<Order>("");
        assert!(fields.is_empty());
        assert!(fields.field_for(&Order { id: 1, total: 0.0 }).is_none());
    }
}
