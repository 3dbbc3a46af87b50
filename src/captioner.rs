use crate::styles::Style;
use image::{DynamicImage, ImageFormat};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Anything that can turn a decoded image into a styled caption.
///
/// The production implementation is [`crate::models::ModelBundle`]; handlers only see
/// this trait so they can be driven without model weights.
pub trait Captioner: Send + Sync {
    fn caption(&self, image: &DynamicImage, style: Style) -> Result<Caption, CaptionError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Caption {
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: String,
}

#[derive(Debug, Error)]
pub enum CaptionError {
    #[error("Error generating caption: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error generating caption: {0}")]
    Image(#[from] image::ImageError),
    #[error("Error generating caption: {0}")]
    Tensor(#[from] candle_core::Error),
    #[error("Error generating caption: {0}")]
    Tokenizer(String),
}

/// Decodes a staged upload and captions it.
///
/// Runs inference synchronously, call it from a blocking thread.
pub fn caption_file(
    captioner: &dyn Captioner,
    path: &Path,
    style: Style,
) -> Result<(Caption, ImageInfo), CaptionError> {
    let reader = image::io::Reader::open(path)?.with_guessed_format()?;
    let format = reader.format();
    let image = reader.decode()?;

    let info = ImageInfo {
        width: image.width(),
        height: image.height(),
        format: format.map(format_name).unwrap_or_default(),
    };
    let caption = captioner.caption(&image, style)?;

    Ok((caption, info))
}

fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Png => "PNG".to_string(),
        ImageFormat::Jpeg => "JPEG".to_string(),
        ImageFormat::WebP => "WEBP".to_string(),
        ImageFormat::Bmp => "BMP".to_string(),
        other => format!("{other:?}").to_uppercase(),
    }
}

/// Trims decoded text and makes sure it ends with a period.
pub fn finish_caption(raw: &str) -> String {
    let mut caption = raw.trim().to_string();
    if !caption.ends_with('.') {
        caption.push('.');
    }
    caption
}

/// Placeholder confidence in `[0.85, 0.95]`.
///
/// This is uniform noise, not derived from the model. Clients must not treat it
/// as a calibrated probability.
pub fn placeholder_confidence<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    (0.85 + rng.gen::<f32>() * 0.1).min(0.95)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    struct Echo;

    impl Captioner for Echo {
        fn caption(&self, image: &DynamicImage, style: Style) -> Result<Caption, CaptionError> {
            Ok(Caption {
                text: finish_caption(&format!(
                    "{} {}x{}",
                    style.seed_phrase(),
                    image.width(),
                    image.height()
                )),
                confidence: 0.9,
            })
        }
    }

    #[test]
    fn appends_missing_period() {
        assert_eq!(finish_caption("  This is a cat \n"), "This is a cat.");
        assert_eq!(finish_caption("This is a cat."), "This is a cat.");
        assert_eq!(finish_caption("   "), ".");
    }

    #[test]
    fn confidence_stays_in_band() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let confidence = placeholder_confidence(&mut rng);
            assert!((0.85..=0.95).contains(&confidence), "{confidence}");
        }
    }

    #[test]
    fn captions_a_staged_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.png");
        ImageBuffer::from_pixel(12, 7, Rgb([200u8, 10, 10]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();

        let (caption, info) = caption_file(&Echo, &path, Style::Simple).unwrap();
        assert_eq!(caption.text, "This is 12x7.");
        assert_eq!(
            info,
            ImageInfo {
                width: 12,
                height: 7,
                format: "PNG".into()
            }
        );
    }

    #[test]
    fn undecodable_upload_is_a_generation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let err = caption_file(&Echo, &path, Style::Creative).unwrap_err();
        assert!(err.to_string().starts_with("Error generating caption: "));
    }
}
