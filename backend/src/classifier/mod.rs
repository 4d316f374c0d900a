pub mod guard;
pub mod local;
pub mod remote;

use async_trait::async_trait;
use image::RgbImage;
use log::{info, warn};
use shared::Confidence;

use crate::config::ClassifierSettings;
use local::ErythemaModel;
use remote::VisionModel;

pub const MOCK_CONDITION: &str = "Error / Mock";

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Empty image")]
    EmptyImage,
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("Upstream returned status {0}")]
    Status(u16),
    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),
    #[error("Model unavailable: {0}")]
    Unavailable(String),
}

/// What the classifier says about one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub condition: String,
    pub confidence: Confidence,
    pub explanation: String,
    pub raw_score: Option<f32>,
}

/// A model that may fail. Implementations are wrapped by [`ClassifierAdapter`].
#[async_trait]
pub trait ImageModel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn predict(&self, image: &[u8]) -> Result<Classification, ClassifierError>;
}

/// Total classification: never fails, degraded results are labelled instead.
#[async_trait]
pub trait SkinClassifier: Send + Sync {
    async fn classify(&self, image: &[u8]) -> Classification;
}

pub struct ClassifierAdapter {
    model: Box<dyn ImageModel>,
}

impl ClassifierAdapter {
    pub fn new(model: Box<dyn ImageModel>) -> Self {
        Self { model }
    }

    /// Uses the remote vision model when an API key is configured, the local
    /// model otherwise. The choice is fixed for the lifetime of the adapter.
    pub fn from_settings(settings: &ClassifierSettings) -> Result<Self, ClassifierError> {
        match &settings.api_key {
            Some(api_key) => {
                info!("Classifier: remote vision model {}", settings.model);
                let model = VisionModel::new(
                    &settings.api_url,
                    &settings.model,
                    api_key,
                    settings.timeout_secs,
                )?;
                Ok(Self::new(Box::new(model)))
            }
            None => {
                warn!("OPENAI_API_KEY not set, classifier running on the local model");
                Ok(Self::new(Box::new(ErythemaModel::new())))
            }
        }
    }

    pub fn model_name(&self) -> &'static str {
        self.model.name()
    }

    pub fn mock_result() -> Classification {
        Classification {
            condition: MOCK_CONDITION.to_string(),
            confidence: Confidence::Low,
            explanation: "Model inference failed. Returning mock result.".to_string(),
            raw_score: Some(0.0),
        }
    }
}

#[async_trait]
impl SkinClassifier for ClassifierAdapter {
    async fn classify(&self, image: &[u8]) -> Classification {
        match self.model.predict(image).await {
            Ok(classification) => classification,
            Err(e) => {
                warn!("{} inference failed, using mock result: {}", self.model.name(), e);
                Self::mock_result()
            }
        }
    }
}

pub(crate) fn decode_rgb(image: &[u8]) -> Result<RgbImage, ClassifierError> {
    if image.is_empty() {
        return Err(ClassifierError::EmptyImage);
    }
    let decoded = image::load_from_memory(image)?.to_rgb8();
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(ClassifierError::EmptyImage);
    }
    Ok(decoded)
}
