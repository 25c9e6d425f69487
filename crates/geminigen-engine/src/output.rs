use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};

pub const FILE_PREFIX: &str = "gemini_gen";

/// Local-time stamp shared by every file written for one request.
pub fn local_stamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

pub fn image_file_name(stamp: &str, index: usize, extension: &str) -> String {
    format!("{FILE_PREFIX}_{stamp}_{index}.{extension}")
}

pub fn write_image(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(file_name);
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeOutcome {
    pub original: (u32, u32),
    pub width: u32,
    pub height: u32,
    pub resized: bool,
}

pub fn image_dimensions(path: &Path) -> Result<(u32, u32)> {
    let image = open_image(path)?;
    Ok((image.width(), image.height()))
}

/// Resamples the image at `path` to `target` and writes it back in the format
/// implied by its extension. Images already at the target are left untouched.
pub fn resize_to_target(path: &Path, target: (u32, u32)) -> Result<ResizeOutcome> {
    let image = open_image(path)?;
    let original = (image.width(), image.height());
    if original == target {
        return Ok(ResizeOutcome {
            original,
            width: original.0,
            height: original.1,
            resized: false,
        });
    }

    let (width, height) = target;
    let mut resized = image.resize_exact(width, height, FilterType::Triangle);
    if is_jpeg_path(path) {
        resized = DynamicImage::ImageRgb8(resized.to_rgb8());
    }
    resized
        .save(path)
        .with_context(|| format!("failed to save resized {}", path.display()))?;
    Ok(ResizeOutcome {
        original,
        width,
        height,
        resized: true,
    })
}

fn open_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .with_context(|| format!("failed reading {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed probing {}", path.display()))?
        .decode()
        .with_context(|| format!("failed decoding {}", path.display()))
}

fn is_jpeg_path(path: &Path) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "jpg" | "jpeg"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    use super::{image_dimensions, image_file_name, local_stamp, resize_to_target, write_image};

    #[test]
    fn file_names_follow_stamp_and_index() {
        assert_eq!(
            image_file_name("20260102_030405", 3, "webp"),
            "gemini_gen_20260102_030405_3.webp"
        );
        let stamp = local_stamp();
        assert_eq!(stamp.len(), 15);
        assert_eq!(stamp.as_bytes()[8], b'_');
        assert!(stamp.chars().filter(|ch| *ch != '_').all(|ch| ch.is_ascii_digit()));
    }

    #[test]
    fn write_image_creates_missing_directories() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let dir = temp.path().join("a").join("b");
        let path = write_image(&dir, "x.png", b"bytes")?;
        assert_eq!(std::fs::read(&path)?, b"bytes");
        Ok(())
    }

    #[test]
    fn resize_changes_dimensions_and_keeps_format() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("img.png");
        let mut image = RgbaImage::new(40, 20);
        for pixel in image.pixels_mut() {
            *pixel = Rgba([200, 100, 50, 255]);
        }
        image.save(&path)?;

        let outcome = resize_to_target(&path, (16, 9))?;
        assert!(outcome.resized);
        assert_eq!(outcome.original, (40, 20));
        assert_eq!(image_dimensions(&path)?, (16, 9));
        let bytes = std::fs::read(&path)?;
        assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
        Ok(())
    }

    #[test]
    fn resize_is_a_noop_at_target_size() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("img.png");
        RgbImage::from_pixel(8, 8, Rgb([1, 2, 3])).save(&path)?;
        let before = std::fs::read(&path)?;

        let outcome = resize_to_target(&path, (8, 8))?;
        assert!(!outcome.resized);
        assert_eq!(std::fs::read(&path)?, before);
        Ok(())
    }

    #[test]
    fn png_bytes_behind_jpg_extension_are_re_encoded_as_jpeg() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let png_path = temp.path().join("src.png");
        RgbaImage::from_pixel(12, 12, Rgba([9, 9, 9, 255])).save(&png_path)?;
        let jpg_path = temp.path().join("mislabelled.jpg");
        std::fs::copy(&png_path, &jpg_path)?;

        let outcome = resize_to_target(&jpg_path, (6, 6))?;
        assert!(outcome.resized);
        let bytes = std::fs::read(&jpg_path)?;
        assert!(bytes.starts_with(&[0xFF, 0xD8]));
        Ok(())
    }

    #[test]
    fn undecodable_files_report_an_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("junk.png");
        std::fs::write(&path, b"junk")?;
        assert!(resize_to_target(&path, (8, 8)).is_err());
        Ok(())
    }
}
