//! Generated test photos. Every generator takes a `seed` so that photos in
//! one batch have distinct bytes, which is what the scripted fakes key on.

#![allow(dead_code)]

use base64::Engine;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use std::io::Cursor;

fn encode_png(img: GrayImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("PNG encoding of generated image");
    bytes
}

/// Crisp high-contrast checkerboard; the real analyzer grades it excellent.
pub fn sharp_photo(seed: u8) -> Vec<u8> {
    let light = 235 - (seed % 16);
    encode_png(GrayImage::from_fn(64, 64, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            Luma([20])
        } else {
            Luma([light])
        }
    }))
}

/// Featureless near-black frame; the real analyzer grades it poor.
pub fn dark_photo(seed: u8) -> Vec<u8> {
    encode_png(GrayImage::from_pixel(48, 48, Luma([seed % 8])))
}

/// PNG signature followed by garbage; sniffs as PNG but never decodes.
pub fn corrupt_photo(seed: u8) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend(std::iter::repeat(seed).take(32));
    bytes
}

pub fn to_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// JSON body entry for one image.
pub fn image_json(bytes: &[u8], filename: &str) -> serde_json::Value {
    serde_json::json!({
        "image_base64": to_base64(bytes),
        "filename": filename,
    })
}
