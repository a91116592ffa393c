//! Generated image fixtures for face-swap tests

use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

fn encode(width: u32, height: u32, color: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        // Gradient so encoders cannot collapse the image to a single run
        Rgb([
            color[0].wrapping_add(x as u8),
            color[1].wrapping_add(y as u8),
            color[2],
        ])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).expect("encode fixture image");
    out.into_inner()
}

/// Stand-in for the scene photo whose person receives the new face.
pub fn base_png() -> Vec<u8> {
    encode(32, 24, [200, 120, 40], ImageFormat::Png)
}

/// Stand-in for the selfie supplying the face.
pub fn selfie_jpeg() -> Vec<u8> {
    encode(16, 16, [90, 60, 50], ImageFormat::Jpeg)
}

/// What fake editors hand back as the swapped result.
pub fn edited_png() -> Vec<u8> {
    encode(32, 24, [10, 200, 90], ImageFormat::Png)
}

/// Bytes that match no image signature.
pub fn not_an_image() -> Vec<u8> {
    b"this is a text file pretending to be a selfie".to_vec()
}

/// A PNG whose signature is intact but whose pixel data is cut off.
pub fn truncated_png() -> Vec<u8> {
    let mut bytes = base_png();
    bytes.truncate(48);
    bytes
}
