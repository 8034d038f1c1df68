use crate::shared::logging::append_event_line;
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub event: &'static str,
    pub workflow_id: String,
    pub timestamp: i64,
    pub fields: Vec<(&'static str, Value)>,
}

impl AuditEvent {
    pub fn new(event: &'static str, workflow_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            event,
            workflow_id: workflow_id.into(),
            timestamp,
            fields: Vec::new(),
        }
    }

    pub fn with(mut self, key: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((key, value.into()));
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value)
    }
}

/// Observability collaborator notified after each persisted transition.
/// Implementations must not fail the engine operation that emitted the event.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}

/// Appends audit events as JSON lines.
#[derive(Debug, Clone)]
pub struct JsonlAuditLog {
    path: PathBuf,
}

impl JsonlAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&self, event: &AuditEvent) {
        let mut fields = Vec::with_capacity(event.fields.len() + 1);
        fields.push(("workflow_id", Value::String(event.workflow_id.clone())));
        fields.extend(event.fields.iter().map(|(k, v)| (*k, v.clone())));
        let _ = append_event_line(&self.path, event.timestamp, event.event, &fields);
    }
}
