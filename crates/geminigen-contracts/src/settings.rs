use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_OUTPUT_DIR: &str = "GeneratedImages";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;

/// Persisted user preferences (`settings.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            output_dir: default_output_dir(),
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Settings {
    /// Reads settings from `path`, falling back to defaults when the file is
    /// missing or malformed.
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn set_api_key(&mut self, key: &str) {
        let trimmed = key.trim();
        self.api_key = (!trimmed.is_empty()).then(|| trimmed.to_string());
    }

    pub fn clear_api_key(&mut self) {
        self.api_key = None;
    }

    pub fn set_model(&mut self, model: &str) {
        let trimmed = model.trim();
        self.model = if trimmed.is_empty() {
            default_model()
        } else {
            trimmed.to_string()
        };
    }

    pub fn set_output_dir(&mut self, dir: impl Into<PathBuf>) {
        self.output_dir = dir.into();
    }

    /// Output directory, with an empty value replaced by the default folder.
    pub fn effective_output_dir(&self) -> PathBuf {
        if self.output_dir.as_os_str().is_empty() {
            default_output_dir()
        } else {
            self.output_dir.clone()
        }
    }

    /// Stored key first, then `GEMINI_API_KEY`, then `GOOGLE_API_KEY`.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with(non_empty_env)
    }

    pub fn resolve_api_key_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| lookup("GEMINI_API_KEY"))
            .or_else(|| lookup("GOOGLE_API_KEY"))
    }

    /// `GEMINI_API_BASE` overrides the stored base URL. Trailing slashes are dropped.
    pub fn resolve_api_base(&self) -> String {
        self.resolve_api_base_with(non_empty_env)
    }

    pub fn resolve_api_base_with(&self, lookup: impl Fn(&str) -> Option<String>) -> String {
        lookup("GEMINI_API_BASE")
            .unwrap_or_else(|| self.api_base.clone())
            .trim()
            .trim_end_matches('/')
            .to_string()
    }

    /// Key with all but the last four characters masked.
    pub fn masked_api_key(&self) -> Option<String> {
        let key = self.api_key.as_deref()?;
        let count = key.chars().count();
        let visible: String = key.chars().skip(count.saturating_sub(4)).collect();
        Some(format!("{}{}", "*".repeat(count.saturating_sub(4)), visible))
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
