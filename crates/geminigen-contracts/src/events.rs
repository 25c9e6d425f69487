use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Everything the generator writes to its activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SessionStarted,
    RequestStarted,
    RequestRetry,
    RequestFailed,
    ImageSaved,
    ImageResized,
    GenerationFinished,
    GenerationFailed,
    Status,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session_started",
            EventKind::RequestStarted => "request_started",
            EventKind::RequestRetry => "request_retry",
            EventKind::RequestFailed => "request_failed",
            EventKind::ImageSaved => "image_saved",
            EventKind::ImageResized => "image_resized",
            EventKind::GenerationFinished => "generation_finished",
            EventKind::GenerationFailed => "generation_failed",
            EventKind::Status => "status",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object fields of `value`; anything other than an object yields no fields.
pub fn payload_from(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}

/// `events.jsonl` writer shared by one generator session and its clones.
///
/// Lines start with `type`, `session_id` and `ts`; the event's own fields
/// follow and replace those on a name clash.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<LogFile>,
}

#[derive(Debug)]
struct LogFile {
    path: PathBuf,
    session_id: String,
    append: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(LogFile {
                path: path.into(),
                session_id: session_id.into(),
                append: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Appends one event and returns the object that was written.
    pub fn emit(&self, kind: EventKind, fields: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(kind.as_str().to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        event.extend(fields);

        self.append_line(&serde_json::to_string(&event)?)
            .with_context(|| {
                format!(
                    "failed to append {kind} event to {}",
                    self.inner.path.display()
                )
            })?;
        Ok(Value::Object(event))
    }

    pub fn status(&self, message: &str) -> anyhow::Result<Value> {
        let mut fields = EventPayload::new();
        fields.insert("message".to_string(), Value::String(message.to_string()));
        self.emit(EventKind::Status, fields)
    }

    fn append_line(&self, line: &str) -> anyhow::Result<()> {
        let path = &self.inner.path;
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let _guard = self
            .inner
            .append
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    #[test]
    fn emit_writes_one_compact_line_per_event() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-1");

        let emitted = writer.emit(
            EventKind::RequestStarted,
            payload_from(json!({"model": "m"})),
        )?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        assert!(line.starts_with(r#"{"type":"request_started","session_id":"session-1","ts":"#));
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["model"], "m");
        DateTime::parse_from_rfc3339(parsed["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn event_fields_replace_default_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "session-1");

        let emitted = writer.emit(
            EventKind::ImageSaved,
            payload_from(json!({"session_id": "other"})),
        )?;

        assert_eq!(emitted["session_id"], "other");
        Ok(())
    }

    #[test]
    fn status_lines_append_in_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "session-1");

        writer.status("first")?;
        writer.status("second")?;

        let content = fs::read_to_string(&path)?;
        let messages: Vec<String> = content
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row["message"].as_str().map(str::to_string))
            .collect();
        assert_eq!(messages, vec!["first", "second"]);
        Ok(())
    }

    #[test]
    fn unwritable_log_names_the_event_and_path() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path(), "session-1");

        let err = writer
            .status("hello")
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.starts_with("failed to append status event to "), "{err}");
        Ok(())
    }

    #[test]
    fn non_object_values_give_empty_payloads() {
        assert!(payload_from(json!(["a"])).is_empty());
        assert_eq!(payload_from(json!({"k": 1})).len(), 1);
    }
}
