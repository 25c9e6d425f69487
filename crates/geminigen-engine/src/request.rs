use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, ImageReader};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateMode {
    TextToImage,
    EditImage,
}

impl GenerateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerateMode::TextToImage => "generate",
            GenerateMode::EditImage => "edit",
        }
    }
}

/// Source image for edit requests, re-encoded as PNG.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub path: PathBuf,
    pub png_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl SourceImage {
    pub fn load(path: &Path) -> Result<Self> {
        let decoded = ImageReader::open(path)
            .with_context(|| format!("failed reading {}", path.display()))?
            .with_guessed_format()
            .with_context(|| format!("failed probing image format of {}", path.display()))?
            .decode()
            .with_context(|| format!("failed decoding {}", path.display()))?;
        let mut png_bytes = Vec::new();
        decoded
            .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
            .with_context(|| format!("PNG encoding failed for {}", path.display()))?;
        if png_bytes.is_empty() {
            bail!("PNG encoding produced no bytes for {}", path.display());
        }
        Ok(Self {
            path: path.to_path_buf(),
            png_bytes,
            width: decoded.width(),
            height: decoded.height(),
        })
    }

    pub fn inline_part(&self) -> Value {
        json!({
            "inline_data": {
                "mime_type": "image/png",
                "data": BASE64.encode(&self.png_bytes),
            }
        })
    }
}

pub fn endpoint_for_model(api_base: &str, model: &str) -> String {
    let trimmed = model.trim();
    let model_path = if trimmed.starts_with("models/") {
        trimmed.to_string()
    } else {
        format!("models/{trimmed}")
    };
    format!(
        "{}/{}:generateContent",
        api_base.trim().trim_end_matches('/'),
        model_path
    )
}

/// `generateContent` body: the prompt text, then the source image when editing.
pub fn build_payload(prompt: &str, source: Option<&SourceImage>) -> Value {
    let mut parts = vec![json!({ "text": prompt })];
    if let Some(source) = source {
        parts.push(source.inline_part());
    }
    json!({
        "contents": [
            { "parts": parts }
        ]
    })
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use image::{Rgba, RgbaImage};
    use serde_json::json;

    use super::{build_payload, endpoint_for_model, SourceImage, BASE64};

    #[test]
    fn endpoint_is_templated_from_base_and_model() {
        assert_eq!(
            endpoint_for_model(
                "https://generativelanguage.googleapis.com/v1beta/",
                "gemini-2.5-flash-image-preview"
            ),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-image-preview:generateContent"
        );
        assert_eq!(
            endpoint_for_model("http://localhost:8080", "models/custom"),
            "http://localhost:8080/models/custom:generateContent"
        );
    }

    #[test]
    fn text_only_payload_has_a_single_part() {
        let payload = build_payload("a lighthouse", None);
        assert_eq!(
            payload,
            json!({"contents": [{"parts": [{"text": "a lighthouse"}]}]})
        );
    }

    #[test]
    fn edit_payload_appends_inline_png_after_text() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("source.jpg");
        let mut image = RgbaImage::new(4, 3);
        for pixel in image.pixels_mut() {
            *pixel = Rgba([10, 20, 30, 255]);
        }
        image::DynamicImage::ImageRgba8(image).to_rgb8().save(&path)?;

        let source = SourceImage::load(&path)?;
        assert_eq!((source.width, source.height), (4, 3));
        assert!(source.png_bytes.starts_with(&[0x89, b'P', b'N', b'G']));

        let payload = build_payload("make it red", Some(&source));
        let parts = payload["contents"][0]["parts"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["text"], json!("make it red"));
        assert_eq!(parts[1]["inline_data"]["mime_type"], json!("image/png"));
        let data = parts[1]["inline_data"]["data"].as_str().unwrap_or_default();
        assert_eq!(BASE64.decode(data)?, source.png_bytes);
        Ok(())
    }

    #[test]
    fn unreadable_source_image_is_an_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("broken.png");
        std::fs::write(&path, b"not an image")?;
        assert!(SourceImage::load(&path).is_err());
        assert!(SourceImage::load(&temp.path().join("missing.png")).is_err());
        Ok(())
    }
}
