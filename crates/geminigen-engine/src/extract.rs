//! Locating image payloads in a `generateContent` response.
//!
//! The documented response shape is tried first. Everything is then scanned
//! as a generic JSON tree so payloads at unexpected paths are still found.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Shorter strings without a data-URI prefix are never payloads.
pub const MIN_BASE64_LEN: usize = 300;

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

/// Both spellings are kept apart so each can be visited in its own pass.
#[derive(Debug, Default, Deserialize)]
struct Part {
    #[serde(default, rename = "inline_data")]
    snake: Option<InlineData>,
    #[serde(default, rename = "inlineData")]
    camel: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
struct InlineData {
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    /// The string exactly as it appeared in the response.
    pub raw: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Position in the candidate list; skipped candidates leave gaps.
    pub index: usize,
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
    pub extension: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseDiagnostics {
    pub finish_reason: Option<String>,
    pub safety_categories: Vec<String>,
}

impl ResponseDiagnostics {
    pub fn is_empty(&self) -> bool {
        self.finish_reason.is_none() && self.safety_categories.is_empty()
    }

    /// `finishReason=STOP | safety=A,B`, or `None` when nothing was reported.
    pub fn summary(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut text = format!(
            "finishReason={}",
            self.finish_reason.as_deref().unwrap_or("n/a")
        );
        if !self.safety_categories.is_empty() {
            text.push_str(&format!(" | safety={}", self.safety_categories.join(",")));
        }
        Some(text)
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(
            "finish_reason".to_string(),
            self.finish_reason
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        map.insert(
            "safety_categories".to_string(),
            Value::Array(
                self.safety_categories
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        map
    }
}

pub fn is_likely_base64_image(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    if has_data_url_prefix(value) {
        return true;
    }
    if value.len() < MIN_BASE64_LEN {
        return false;
    }
    value.bytes().all(|byte| {
        byte.is_ascii_alphanumeric() || matches!(byte, b'+' | b'/' | b'=' | b'\r' | b'\n')
    })
}

fn has_data_url_prefix(value: &str) -> bool {
    value
        .get(..5)
        .map(|prefix| prefix.eq_ignore_ascii_case("data:"))
        .unwrap_or(false)
}

/// Splits `data:<mime>;...,<payload>`. Strings that are not well-formed data
/// URIs come back unchanged with no mime type.
pub fn parse_data_url(raw: &str) -> (Option<String>, &str) {
    if !has_data_url_prefix(raw) {
        return (None, raw);
    }
    match (raw.find(';'), raw.find(',')) {
        (Some(semi), Some(comma)) if semi > 5 && comma > semi => {
            (Some(raw[5..semi].to_string()), &raw[comma + 1..])
        }
        _ => (None, raw),
    }
}

pub fn decode_base64_payload(payload: &str) -> Result<Vec<u8>> {
    let compact: String = payload
        .chars()
        .filter(|ch| !matches!(ch, '\r' | '\n' | ' ' | '\t'))
        .collect();
    BASE64
        .decode(compact.as_bytes())
        .context("image payload is not valid base64")
}

pub fn extension_for_mime(mime: Option<&str>) -> &'static str {
    let Some(mime) = mime else {
        return "png";
    };
    if mime.contains("jpeg") || mime.contains("jpg") {
        "jpg"
    } else if mime.contains("png") {
        "png"
    } else if mime.contains("webp") {
        "webp"
    } else {
        "png"
    }
}

/// All strings in `root` that look like image payloads, in discovery order
/// and without duplicates.
pub fn collect_candidates(root: &Value) -> Vec<ImageCandidate> {
    let mut out: Vec<ImageCandidate> = Vec::new();
    let mut push = |raw: &str, mime_type: Option<String>| {
        if !is_likely_base64_image(raw) || out.iter().any(|existing| existing.raw == raw) {
            return;
        }
        out.push(ImageCandidate {
            raw: raw.to_string(),
            mime_type,
        });
    };

    let typed = GenerateContentResponse::deserialize(root).unwrap_or_default();
    let typed_parts: Vec<&Part> = typed
        .candidates
        .iter()
        .filter_map(|candidate| candidate.content.as_ref())
        .flat_map(|content| content.parts.iter())
        .collect();

    let spellings: [(&str, fn(&Part) -> Option<&InlineData>); 2] =
        [("inline_data", snake_inline), ("inlineData", camel_inline)];
    for (key, pick) in spellings {
        for inline in typed_parts.iter().filter_map(|part| pick(part)) {
            if let Some(data) = inline.data.as_deref() {
                push(data, inline.mime_type.clone());
            }
        }
        let mut scanned = Vec::new();
        collect_keyed_data(root, key, &mut scanned);
        for raw in scanned {
            push(raw, find_mime_type_for_data(root, raw));
        }
    }

    let mut leaves = Vec::new();
    collect_string_leaves(root, &mut leaves);
    for raw in leaves {
        push(raw, find_mime_type_for_data(root, raw));
    }
    out
}

fn snake_inline(part: &Part) -> Option<&InlineData> {
    part.snake.as_ref()
}

fn camel_inline(part: &Part) -> Option<&InlineData> {
    part.camel.as_ref()
}

/// Decodes every candidate. Candidates that are not valid base64 are skipped.
pub fn decode_images(root: &Value) -> Vec<DecodedImage> {
    collect_candidates(root)
        .into_iter()
        .enumerate()
        .filter_map(|(index, candidate)| {
            let (data_url_mime, payload) = parse_data_url(&candidate.raw);
            let bytes = decode_base64_payload(payload).ok()?;
            let mime_type = data_url_mime.or(candidate.mime_type);
            Some(DecodedImage {
                index,
                extension: extension_for_mime(mime_type.as_deref()),
                bytes,
                mime_type,
            })
        })
        .collect()
}

/// Mime type of the `parts[*]` inline object whose `data` equals `raw`.
pub fn find_mime_type_for_data(root: &Value, raw: &str) -> Option<String> {
    let mut parts = Vec::new();
    collect_parts(root, &mut parts);
    parts.into_iter().find_map(|part| {
        let inline = part
            .get("inline_data")
            .or_else(|| part.get("inlineData"))?;
        if inline.get("data").and_then(Value::as_str) != Some(raw) {
            return None;
        }
        inline
            .get("mime_type")
            .or_else(|| inline.get("mimeType"))
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

pub fn collect_diagnostics(root: &Value) -> ResponseDiagnostics {
    let mut diagnostics = ResponseDiagnostics::default();
    walk(root, &mut |key, value| {
        if key == "finishReason" && diagnostics.finish_reason.is_none() {
            diagnostics.finish_reason = Some(match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            });
        }
        if key == "safetyRatings" {
            if let Some(rows) = value.as_array() {
                diagnostics.safety_categories.extend(
                    rows.iter()
                        .filter_map(|row| row.get("category").and_then(Value::as_str))
                        .map(str::to_string),
                );
            }
        }
    });
    diagnostics
}

/// Visits every `(key, value)` object entry depth-first.
fn walk<'a>(value: &'a Value, visit: &mut impl FnMut(&'a str, &'a Value)) {
    match value {
        Value::Object(map) => {
            for (key, row) in map {
                visit(key.as_str(), row);
                walk(row, visit);
            }
        }
        Value::Array(rows) => {
            for row in rows {
                walk(row, visit);
            }
        }
        _ => {}
    }
}

fn collect_keyed_data<'a>(value: &'a Value, key: &str, out: &mut Vec<&'a str>) {
    walk(value, &mut |entry_key, row| {
        if entry_key == key {
            if let Some(data) = row.get("data").and_then(Value::as_str) {
                out.push(data);
            }
        }
    });
}

fn collect_string_leaves<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(text) => out.push(text.as_str()),
        Value::Array(rows) => rows.iter().for_each(|row| collect_string_leaves(row, out)),
        Value::Object(map) => map.values().for_each(|row| collect_string_leaves(row, out)),
        _ => {}
    }
}

fn collect_parts<'a>(value: &'a Value, out: &mut Vec<&'a Map<String, Value>>) {
    walk(value, &mut |key, row| {
        if key == "parts" {
            if let Some(rows) = row.as_array() {
                out.extend(rows.iter().filter_map(Value::as_object));
            }
        }
    });
}
