use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

pub const BASE_SIZES: [u32; 4] = [512, 1024, 1536, 2048];
pub const DEFAULT_BASE_SIZE: u32 = 1024;
pub const MIN_CUSTOM_EDGE: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectPreset {
    #[default]
    #[serde(rename = "1x1")]
    Square,
    #[serde(rename = "16x9")]
    Wide,
    #[serde(rename = "4x3")]
    Standard,
    #[serde(rename = "9x16")]
    Tall,
    Custom,
}

impl AspectPreset {
    pub const ALL: [AspectPreset; 5] = [
        AspectPreset::Square,
        AspectPreset::Wide,
        AspectPreset::Standard,
        AspectPreset::Tall,
        AspectPreset::Custom,
    ];

    /// Width over height. `None` for custom dimensions.
    pub fn ratio(self) -> Option<f64> {
        match self {
            AspectPreset::Square => Some(1.0),
            AspectPreset::Wide => Some(16.0 / 9.0),
            AspectPreset::Standard => Some(4.0 / 3.0),
            AspectPreset::Tall => Some(9.0 / 16.0),
            AspectPreset::Custom => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AspectPreset::Square => "1x1",
            AspectPreset::Wide => "16x9",
            AspectPreset::Standard => "4x3",
            AspectPreset::Tall => "9x16",
            AspectPreset::Custom => "custom",
        }
    }
}

impl fmt::Display for AspectPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AspectPreset {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace(':', "x");
        match normalized.as_str() {
            "1x1" | "square" => Ok(AspectPreset::Square),
            "16x9" | "wide" | "landscape" => Ok(AspectPreset::Wide),
            "4x3" => Ok(AspectPreset::Standard),
            "9x16" | "tall" | "portrait" => Ok(AspectPreset::Tall),
            "custom" => Ok(AspectPreset::Custom),
            _ => bail!("unknown aspect preset '{raw}' (expected 1x1, 16x9, 4x3, 9x16 or custom)"),
        }
    }
}

pub fn parse_base_size(raw: &str) -> anyhow::Result<u32> {
    let value: u32 = raw
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("base size must be a number, got '{raw}'"))?;
    if !BASE_SIZES.contains(&value) {
        bail!("base size must be one of 512, 1024, 1536, 2048 (got {value})");
    }
    Ok(value)
}

/// Resolution preference applied to downloaded images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSpec {
    pub aspect: AspectPreset,
    /// Length of the shorter edge for ratio presets.
    pub base_size: u32,
    pub custom_width: u32,
    pub custom_height: u32,
    pub resize_after_download: bool,
}

impl Default for ResolutionSpec {
    fn default() -> Self {
        Self {
            aspect: AspectPreset::Square,
            base_size: DEFAULT_BASE_SIZE,
            custom_width: DEFAULT_BASE_SIZE,
            custom_height: DEFAULT_BASE_SIZE,
            resize_after_download: true,
        }
    }
}

impl ResolutionSpec {
    pub fn target(&self) -> (u32, u32) {
        let Some(ratio) = self.aspect.ratio() else {
            return (
                self.custom_width.max(MIN_CUSTOM_EDGE),
                self.custom_height.max(MIN_CUSTOM_EDGE),
            );
        };
        let base = self.base_size as f64;
        if ratio >= 1.0 {
            ((base * ratio).round() as u32, self.base_size)
        } else {
            (self.base_size, (base / ratio).round() as u32)
        }
    }

    pub fn describe(&self) -> String {
        let (width, height) = self.target();
        let resize = if self.resize_after_download {
            "resize on"
        } else {
            "resize off"
        };
        match self.aspect {
            AspectPreset::Custom => format!("custom {width}x{height} ({resize})"),
            aspect => format!(
                "{aspect} base {} -> {width}x{height} ({resize})",
                self.base_size
            ),
        }
    }
}
