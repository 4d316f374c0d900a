use async_trait::async_trait;
use image::RgbImage;
use shared::Confidence;

use super::{decode_rgb, Classification, ClassifierError, ImageModel};

pub const POSITIVE_LABEL: &str = "Atopic Dermatitis";
pub const NEGATIVE_LABEL: &str = "Healthy Skin / Other";

/// Mean erythema index at which the positive probability saturates to 1.
const ERYTHEMA_SATURATION: f32 = 0.25;

/// Local colour-statistics model: scores the mean redness of the image.
#[derive(Clone, Default)]
pub struct ErythemaModel;

impl ErythemaModel {
    pub fn new() -> Self {
        Self
    }

    pub fn predict_sync(image: &[u8]) -> Result<Classification, ClassifierError> {
        let rgb = decode_rgb(image)?;
        let probability = positive_probability(&rgb);
        let (label, score) = if probability >= 0.5 {
            (POSITIVE_LABEL, probability)
        } else {
            (NEGATIVE_LABEL, 1.0 - probability)
        };
        Ok(Classification {
            condition: label.to_string(),
            confidence: Confidence::from_score(score),
            explanation: explain(label, score),
            raw_score: Some(score),
        })
    }
}

#[async_trait]
impl ImageModel for ErythemaModel {
    fn name(&self) -> &'static str {
        "local-erythema"
    }

    async fn predict(&self, image: &[u8]) -> Result<Classification, ClassifierError> {
        let bytes = image.to_vec();
        tokio::task::spawn_blocking(move || Self::predict_sync(&bytes))
            .await
            .map_err(|e| ClassifierError::Unavailable(e.to_string()))?
    }
}

/// Average of `max(0, r - (g + b) / 2)` over all pixels, scaled to `[0, 1]`.
pub fn erythema_index(rgb: &RgbImage) -> f32 {
    let pixels = (rgb.width() as u64 * rgb.height() as u64).max(1);
    let total: f64 = rgb
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            let redness = r as f64 - (g as f64 + b as f64) / 2.0;
            redness.max(0.0) / 255.0
        })
        .sum();
    (total / pixels as f64) as f32
}

fn positive_probability(rgb: &RgbImage) -> f32 {
    (erythema_index(rgb) / ERYTHEMA_SATURATION).clamp(0.0, 1.0)
}

fn explain(label: &str, score: f32) -> String {
    if label == POSITIVE_LABEL {
        format!(
            "The AI analysis has identified patterns consistent with {} with {:.1}% confidence.",
            label,
            score * 100.0
        )
    } else {
        format!(
            "The analysis suggests this may be {} ({:.1}% model score).",
            label,
            score * 100.0
        )
    }
}
