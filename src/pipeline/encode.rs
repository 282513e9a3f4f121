//! Image encoding: `DynamicImage` → PNG bytes → base64 `ImageData`.
//!
//! The PNG bytes are kept around as the page's identity: the OCR stage
//! fingerprint is the hash of exactly these bytes, so encoding must be
//! deterministic for a given bitmap (it is, for the `image` PNG encoder).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Lossless PNG encoding of a rendered page.
///
/// ## Why PNG?
/// JPEG artefacts on rendered text confuse vision models, and a lossy
/// encoder would also make the OCR fingerprint depend on encoder settings.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} page → {} bytes PNG", img.width(), img.height(), buf.len());
    Ok(buf)
}

/// Wrap PNG bytes for a vision request.
///
/// `detail: "high"` lets GPT-4-class models tile the full page instead of a
/// single 512 px overview, which is what makes small print legible.
pub fn to_image_data(png: &[u8]) -> ImageData {
    ImageData::new(STANDARD.encode(png), "image/png").with_detail("high")
}
