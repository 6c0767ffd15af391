//! The processing step applied to each job's input.
//!
//! The worker treats the transform as opaque: a file in, a file out, any
//! error becomes the job's recorded failure. The shipped implementation is
//! grayscale conversion.

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("image transform failed: {0}")]
    Image(#[from] image::ImageError),
}

/// A file-to-file processing function run on the blocking thread pool.
pub trait Transform: Send + Sync {
    fn apply(&self, input: &Path, output: &Path) -> Result<(), TransformError>;

    /// Extension for the output object name (one output per job id).
    fn output_extension(&self) -> &'static str {
        "png"
    }
}

/// Converts any decodable image to an 8-bit single-channel grayscale PNG.
pub struct Grayscale;

impl Transform for Grayscale {
    fn apply(&self, input: &Path, output: &Path) -> Result<(), TransformError> {
        let img = image::open(input)?;
        img.grayscale().save(output)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn grayscale_produces_single_channel_png() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.png");

        RgbImage::from_pixel(4, 4, Rgb([200, 30, 90]))
            .save(&input)
            .unwrap();

        Grayscale.apply(&input, &output).unwrap();

        let result = image::open(&output).unwrap();
        assert_eq!(result.color(), image::ColorType::L8);
    }

    #[test]
    fn undecodable_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.png");
        std::fs::write(&input, b"definitely not an image").unwrap();

        assert!(Grayscale.apply(&input, &output).is_err());
    }
}
