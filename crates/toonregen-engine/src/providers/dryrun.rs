use std::io::Cursor;

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use toonregen_contracts::providers::ProviderKind;

use super::{GeneratedImage, ImageProvider, ProviderCall};

const DEFAULT_SIDE: u32 = 256;
const MAX_SIDE: u32 = 512;

/// Offline renderer standing in for either backend. Output is a PNG whose
/// colors derive from the prompt and index, sized like the source panel.
pub struct DryrunProvider {
    serves: ProviderKind,
}

impl DryrunProvider {
    pub fn new(serves: ProviderKind) -> Self {
        Self { serves }
    }
}

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, call: &ProviderCall) -> Result<GeneratedImage> {
        let (width, height) = call
            .inputs
            .images
            .first()
            .and_then(|source| image::load_from_memory(&source.bytes).ok())
            .map(|decoded| scaled_dims(decoded.width(), decoded.height()))
            .unwrap_or((DEFAULT_SIDE, DEFAULT_SIDE));
        let seed_text = format!("{}#{}", call.prompt, call.index);
        let bytes = render_placeholder_png(&seed_text, width, height)?;

        let mut metadata = Map::new();
        metadata.insert("endpoint".to_string(), json!("dryrun-native"));
        metadata.insert("serves".to_string(), json!(self.serves.as_str()));
        metadata.insert("width".to_string(), json!(width));
        metadata.insert("height".to_string(), json!(height));
        metadata.insert("inputs".to_string(), json!(call.inputs.images.len()));
        metadata.insert(
            "digest".to_string(),
            Value::String(short_digest(&seed_text)),
        );

        Ok(GeneratedImage {
            bytes,
            mime_type: "image/png".to_string(),
            metadata,
        })
    }
}

fn scaled_dims(width: u32, height: u32) -> (u32, u32) {
    let longest = width.max(height).max(1);
    if longest <= MAX_SIDE {
        return (width.max(1), height.max(1));
    }
    let scale = MAX_SIDE as f64 / longest as f64;
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

/// Two-tone diagonal stripes seeded from `seed_text`, encoded as PNG.
pub fn render_placeholder_png(seed_text: &str, width: u32, height: u32) -> Result<Vec<u8>> {
    let digest = Sha256::digest(seed_text.as_bytes());
    let base = Rgb([digest[0], digest[1], digest[2]]);
    let accent = Rgb([digest[3], digest[4], digest[5]]);
    let stripe = u32::from(digest[6] % 24) + 8;

    let mut image = RgbImage::new(width.max(1), height.max(1));
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        *pixel = if ((x + y) / stripe) % 2 == 0 { base } else { accent };
    }

    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("dryrun PNG encode failed")?;
    Ok(out.into_inner())
}

fn short_digest(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..4])
}
