use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedImageRecord {
    pub path: String,
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(default)]
    pub resized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRequest {
    pub mode: String,
    pub model: String,
    pub endpoint: String,
    pub prompt: String,
    pub source_image: Option<String>,
    pub attempts: u32,
}

pub fn build_receipt(
    request: &ReceiptRequest,
    payload: &Value,
    saved: &[SavedImageRecord],
    diagnostics: &Map<String, Value>,
    warnings: &[String],
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert(
        "ts".to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
    );
    root.insert(
        "request".to_string(),
        serde_json::to_value(request).unwrap_or(Value::Null),
    );
    root.insert("payload".to_string(), sanitize_payload(payload));
    root.insert(
        "images".to_string(),
        serde_json::to_value(saved).unwrap_or_else(|_| Value::Array(Vec::new())),
    );
    root.insert(
        "diagnostics".to_string(),
        Value::Object(diagnostics.clone()),
    );
    root.insert(
        "warnings".to_string(),
        Value::Array(warnings.iter().cloned().map(Value::String).collect()),
    );
    Value::Object(root)
}

pub fn write_receipt(path: &Path, receipt: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(receipt)?)?;
    Ok(())
}

/// Replaces inline image payloads with a placeholder so receipts stay small.
pub fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                if key.eq_ignore_ascii_case("data") && row.is_string() {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}
