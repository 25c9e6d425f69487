use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use geminigen_contracts::events::{payload_from, EventKind, EventPayload, EventWriter};
use geminigen_contracts::presets::PresetStore;
use geminigen_contracts::receipts::{build_receipt, write_receipt, ReceiptRequest, SavedImageRecord};
use geminigen_contracts::resolution::ResolutionSpec;
use geminigen_contracts::settings::{non_empty_env, Settings};
use serde_json::{json, Value};

use crate::extract::{collect_diagnostics, decode_images, ResponseDiagnostics};
use crate::output::{image_dimensions, image_file_name, local_stamp, resize_to_target, write_image};
use crate::request::{build_payload, endpoint_for_model, GenerateMode, SourceImage};
use crate::transport::{
    error_chain_text, reply_body_or_error, send_with_retry, ReqwestTransport, RetryPolicy,
    Transport,
};

pub const DEFAULT_PROMPT: &str =
    "A photorealistic shot of a nano banana dish in a fancy restaurant";

type EnvLookup = fn(&str) -> Option<String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImage {
    pub path: PathBuf,
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub resized: bool,
}

#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub mode: GenerateMode,
    pub saved: Vec<SavedImage>,
    pub diagnostics: ResponseDiagnostics,
    pub status: String,
    pub attempts: u32,
    pub receipt_path: Option<PathBuf>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Default)]
struct SessionState {
    status: String,
    last_response: Option<String>,
    last_saved_path: Option<PathBuf>,
}

/// Releases the busy flag on drop.
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            bail!("a request is already running");
        }
        Ok(Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Holds the state the generator panel works on and runs one request at a time.
pub struct Generator {
    settings: Settings,
    resolution: ResolutionSpec,
    presets: PresetStore,
    prompt: String,
    transport: Box<dyn Transport>,
    retry: RetryPolicy,
    events: EventWriter,
    env_lookup: EnvLookup,
    busy: AtomicBool,
    state: Mutex<SessionState>,
}

impl Generator {
    pub fn new(
        settings: Settings,
        resolution: ResolutionSpec,
        presets: PresetStore,
        events: EventWriter,
    ) -> Self {
        let generator = Self {
            settings,
            resolution,
            presets,
            prompt: DEFAULT_PROMPT.to_string(),
            transport: Box::new(ReqwestTransport::new()),
            retry: RetryPolicy::default(),
            events,
            env_lookup: non_empty_env,
            busy: AtomicBool::new(false),
            state: Mutex::new(SessionState::default()),
        };
        generator.log_event(
            EventKind::SessionStarted,
            payload_from(json!({
                "model": generator.settings.model,
                "output_dir": generator.settings.effective_output_dir().to_string_lossy(),
            })),
        );
        generator
    }

    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces environment lookups used for the API key and base URL.
    pub fn with_env_lookup(mut self, lookup: EnvLookup) -> Self {
        self.env_lookup = lookup;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn resolution(&self) -> &ResolutionSpec {
        &self.resolution
    }

    pub fn resolution_mut(&mut self) -> &mut ResolutionSpec {
        &mut self.resolution
    }

    pub fn presets(&self) -> &PresetStore {
        &self.presets
    }

    pub fn presets_mut(&mut self) -> &mut PresetStore {
        &mut self.presets
    }

    /// The current prompt, falling back to the default when blank.
    pub fn prompt(&self) -> &str {
        if self.prompt.trim().is_empty() {
            DEFAULT_PROMPT
        } else {
            &self.prompt
        }
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn status(&self) -> String {
        self.state().status.clone()
    }

    pub fn last_response(&self) -> Option<String> {
        self.state().last_response.clone()
    }

    pub fn last_saved_path(&self) -> Option<PathBuf> {
        self.state().last_saved_path.clone()
    }

    /// Sets the status line and mirrors it to the log and the event stream.
    pub fn set_status(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        if let Err(err) = self.events.status(&message) {
            tracing::warn!("failed to record status event: {err:#}");
        }
        self.state().status = message;
    }

    pub fn generate_from_prompt(&self, prompt: &str) -> Result<GenerationReport> {
        self.run(GenerateMode::TextToImage, prompt, None)
    }

    pub fn edit_image(&self, prompt: &str, image: &Path) -> Result<GenerationReport> {
        self.run(GenerateMode::EditImage, prompt, Some(image))
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn run(
        &self,
        mode: GenerateMode,
        prompt: &str,
        source: Option<&Path>,
    ) -> Result<GenerationReport> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        match self.run_request(mode, prompt, source) {
            Ok(report) => {
                self.set_status(report.status.clone());
                Ok(report)
            }
            Err(err) => {
                let error_text = error_chain_text(&err, 2048);
                tracing::error!("{} failed: {error_text}", mode.as_str());
                self.log_event(
                    EventKind::GenerationFailed,
                    payload_from(json!({
                        "mode": mode.as_str(),
                        "model": self.settings.model,
                        "error": error_text,
                    })),
                );
                self.set_status(format!("error: {err}"));
                Err(err)
            }
        }
    }

    fn run_request(
        &self,
        mode: GenerateMode,
        prompt: &str,
        source: Option<&Path>,
    ) -> Result<GenerationReport> {
        self.state().last_response = None;
        let api_key = self
            .settings
            .resolve_api_key_with(self.env_lookup)
            .ok_or_else(|| {
                anyhow!("API key missing: store one with `geminigen config set-key` or set GEMINI_API_KEY")
            })?;

        let source_image = match (mode, source) {
            (GenerateMode::EditImage, Some(path)) => Some(
                SourceImage::load(path)
                    .with_context(|| format!("could not prepare {} for editing", path.display()))?,
            ),
            (GenerateMode::EditImage, None) => bail!("edit requires a source image"),
            (GenerateMode::TextToImage, _) => None,
        };

        let endpoint = endpoint_for_model(
            &self.settings.resolve_api_base_with(self.env_lookup),
            &self.settings.model,
        );
        let body = build_payload(prompt, source_image.as_ref());
        let timeout = Duration::from_secs(self.settings.timeout_secs.max(1));

        self.set_status(match mode {
            GenerateMode::TextToImage => "requesting text-to-image generation...",
            GenerateMode::EditImage => "requesting image edit...",
        });
        self.log_event(
            EventKind::RequestStarted,
            payload_from(json!({
                "mode": mode.as_str(),
                "model": self.settings.model,
                "endpoint": endpoint,
                "prompt": prompt,
                "source_image": source_image.as_ref().map(|image| image.path.to_string_lossy().to_string()),
            })),
        );

        let started = Instant::now();
        let outcome = send_with_retry(
            self.transport.as_ref(),
            &self.retry,
            &endpoint,
            &api_key,
            &body,
            timeout,
            |notice| {
                tracing::warn!(
                    "transient failure ({}), retry {}/{} in {} ms",
                    notice.reason,
                    notice.retry,
                    notice.max_retries,
                    notice.delay.as_millis()
                );
                self.log_event(
                    EventKind::RequestRetry,
                    payload_from(json!({
                        "retry": notice.retry,
                        "max_retries": notice.max_retries,
                        "delay_ms": notice.delay.as_millis() as u64,
                        "reason": notice.reason,
                    })),
                );
            },
        );
        let attempts = outcome.attempts;
        let reply = match outcome.result {
            Ok(reply) => reply,
            Err(err) => {
                self.emit_request_failed(attempts, None, &error_chain_text(&err, 512));
                return Err(err.context(format!("no response after {attempts} attempt(s)")));
            }
        };
        let status_code = reply.status;
        self.state().last_response = Some(reply.body.clone());
        let body_text = match reply_body_or_error(reply) {
            Ok(text) => text,
            Err(err) => {
                self.emit_request_failed(attempts, Some(status_code), &err.to_string());
                return Err(err);
            }
        };
        tracing::debug!(
            "response received in {:.2}s after {attempts} attempt(s)",
            started.elapsed().as_secs_f64()
        );

        let stamp = local_stamp();
        let (saved, diagnostics, warnings) = self.save_images_from_response(&body_text, &stamp)?;
        let output_dir = self.settings.effective_output_dir();
        let mut status = format!(
            "saved {} image(s) to {}",
            saved.len(),
            output_dir.display()
        );
        if let Some(summary) = diagnostics.summary() {
            status.push_str(" | ");
            status.push_str(&summary);
        }

        let receipt_path = self.write_receipt(
            &stamp,
            mode,
            &endpoint,
            prompt,
            source,
            &body,
            &saved,
            &diagnostics,
            &warnings,
            attempts,
        );

        self.log_event(
            EventKind::GenerationFinished,
            payload_from(json!({
                "mode": mode.as_str(),
                "attempts": attempts,
                "images": saved
                    .iter()
                    .map(|image| image.path.to_string_lossy().to_string())
                    .collect::<Vec<String>>(),
                "diagnostics": diagnostics.to_map(),
                "receipt_path": receipt_path.as_ref().map(|path| path.to_string_lossy().to_string()),
            })),
        );

        Ok(GenerationReport {
            mode,
            saved,
            diagnostics,
            status,
            attempts,
            receipt_path,
            warnings,
        })
    }

    /// Mines `body` for images, writes and optionally resizes each one.
    fn save_images_from_response(
        &self,
        body: &str,
        stamp: &str,
    ) -> Result<(Vec<SavedImage>, ResponseDiagnostics, Vec<String>)> {
        if body.trim().is_empty() {
            tracing::warn!("empty response body");
            bail!("empty response");
        }
        let root: Value = serde_json::from_str(body).context("response is not valid JSON")?;
        let diagnostics = collect_diagnostics(&root);
        let images = decode_images(&root);

        let output_dir = self.settings.effective_output_dir();
        let target = self.resolution.target();
        let mut saved = Vec::new();
        let mut warnings = Vec::new();

        for image in images {
            let file_name = image_file_name(stamp, image.index, image.extension);
            let path = write_image(&output_dir, &file_name, &image.bytes)?;
            self.log_event(
                EventKind::ImageSaved,
                payload_from(json!({
                    "path": path.to_string_lossy(),
                    "mime_type": image.mime_type,
                    "bytes": image.bytes.len(),
                })),
            );

            let mut record = SavedImage {
                path,
                mime_type: image.mime_type,
                width: None,
                height: None,
                resized: false,
            };
            if self.resolution.resize_after_download {
                match resize_to_target(&record.path, target) {
                    Ok(outcome) => {
                        record.width = Some(outcome.width);
                        record.height = Some(outcome.height);
                        record.resized = outcome.resized;
                        if outcome.resized {
                            self.log_event(
                                EventKind::ImageResized,
                                payload_from(json!({
                                    "path": record.path.to_string_lossy(),
                                    "from": [outcome.original.0, outcome.original.1],
                                    "to": [outcome.width, outcome.height],
                                })),
                            );
                        }
                    }
                    Err(err) => {
                        let message = format!(
                            "resize failed for {}: {}",
                            record.path.display(),
                            error_chain_text(&err, 256)
                        );
                        tracing::warn!("{message}");
                        warnings.push(message);
                    }
                }
            } else if let Ok((width, height)) = image_dimensions(&record.path) {
                record.width = Some(width);
                record.height = Some(height);
            }

            if saved.is_empty() {
                self.state().last_saved_path = Some(record.path.clone());
            }
            saved.push(record);
        }

        if saved.is_empty() {
            tracing::warn!("no base64 image data found in response:\n{body}");
            match diagnostics.summary() {
                Some(summary) => bail!("no image data found in the response ({summary})"),
                None => bail!("no image data found in the response"),
            }
        }
        Ok((saved, diagnostics, warnings))
    }

    #[allow(clippy::too_many_arguments)]
    fn write_receipt(
        &self,
        stamp: &str,
        mode: GenerateMode,
        endpoint: &str,
        prompt: &str,
        source: Option<&Path>,
        body: &Value,
        saved: &[SavedImage],
        diagnostics: &ResponseDiagnostics,
        warnings: &[String],
        attempts: u32,
    ) -> Option<PathBuf> {
        let request = ReceiptRequest {
            mode: mode.as_str().to_string(),
            model: self.settings.model.clone(),
            endpoint: endpoint.to_string(),
            prompt: prompt.to_string(),
            source_image: source.map(|path| path.to_string_lossy().to_string()),
            attempts,
        };
        let records: Vec<SavedImageRecord> = saved
            .iter()
            .map(|image| SavedImageRecord {
                path: image.path.to_string_lossy().to_string(),
                mime_type: image.mime_type.clone(),
                width: image.width,
                height: image.height,
                resized: image.resized,
            })
            .collect();
        let receipt = build_receipt(&request, body, &records, &diagnostics.to_map(), warnings);
        let path = self
            .settings
            .effective_output_dir()
            .join(format!("receipt-{stamp}.json"));
        match write_receipt(&path, &receipt) {
            Ok(()) => Some(path),
            Err(err) => {
                tracing::warn!("failed to write receipt {}: {err:#}", path.display());
                None
            }
        }
    }

    /// Appends an event; a log that cannot be written only produces a warning.
    fn log_event(&self, kind: EventKind, fields: EventPayload) {
        if let Err(err) = self.events.emit(kind, fields) {
            tracing::warn!("{err:#}");
        }
    }

    fn emit_request_failed(&self, attempts: u32, status: Option<u16>, error: &str) {
        self.log_event(
            EventKind::RequestFailed,
            payload_from(json!({
                "attempts": attempts,
                "status": status,
                "error": error,
            })),
        );
    }
}
