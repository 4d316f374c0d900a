use image::{Rgb, RgbImage};

use super::{decode_rgb, ClassifierError};

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("Skin check failed: {0}")]
    Image(#[from] ClassifierError),
    #[error("Skin check aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuardVerdict {
    pub is_skin: bool,
    pub skin_ratio: f32,
    pub description: String,
}

/// Rejects uploads that do not look like a photo of skin before the
/// classifier sees them.
#[derive(Debug, Clone)]
pub struct SkinGuard {
    min_skin_ratio: f32,
}

impl SkinGuard {
    pub fn new(min_skin_ratio: f32) -> Self {
        Self { min_skin_ratio }
    }

    pub async fn inspect(&self, image: &[u8]) -> Result<GuardVerdict, GuardError> {
        let bytes = image.to_vec();
        let min_skin_ratio = self.min_skin_ratio;
        tokio::task::spawn_blocking(move || -> Result<GuardVerdict, GuardError> {
            let rgb = decode_rgb(&bytes)?;
            Ok(verdict(skin_ratio(&rgb), min_skin_ratio))
        })
        .await
        .map_err(|e| GuardError::Aborted(e.to_string()))?
    }
}

fn verdict(ratio: f32, min_skin_ratio: f32) -> GuardVerdict {
    GuardVerdict {
        is_skin: ratio >= min_skin_ratio,
        skin_ratio: ratio,
        description: format!(
            "only {:.0}% of the image matches skin tones (at least {:.0}% expected)",
            ratio * 100.0,
            min_skin_ratio * 100.0
        ),
    }
}

pub fn skin_ratio(rgb: &RgbImage) -> f32 {
    let total = (rgb.width() as usize * rgb.height() as usize).max(1);
    let skin = rgb.pixels().filter(|p| is_skin_tone(p)).count();
    skin as f32 / total as f32
}

// RGB skin rule for uniform daylight illumination.
fn is_skin_tone(pixel: &Rgb<u8>) -> bool {
    let [r, g, b] = pixel.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    r > 95
        && g > 40
        && b > 20
        && max - min > 15
        && r.abs_diff(g) > 15
        && r > g
        && r > b
}
