//! Image fixtures shared by the integration tests.

use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// A small decodable RGB PNG.
pub fn rgb_png() -> Vec<u8> {
    let img = RgbImage::from_pixel(8, 8, Rgb([180, 40, 220]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .expect("encoding fixture PNG");
    buf.into_inner()
}

/// Bytes no image decoder will accept.
pub fn corrupt_png() -> Vec<u8> {
    b"this is not an image at all".to_vec()
}

/// A valid PNG comfortably above axum's built-in 2 MB body limit. Noise
/// pixels keep the encoder from compressing it back under the threshold.
#[allow(dead_code)]
pub fn oversized_png() -> Vec<u8> {
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    let mut img = RgbImage::new(1024, 1024);
    for pixel in img.pixels_mut() {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let [r, g, b, ..] = seed.to_le_bytes();
        *pixel = Rgb([r, g, b]);
    }
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .expect("encoding fixture PNG");
    buf.into_inner()
}
