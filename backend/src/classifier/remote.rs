use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Deserializer};
use serde_json::json;
use shared::Confidence;

use super::{Classification, ClassifierError, ImageModel};

const SYSTEM_PROMPT: &str = "You are a dermatology screening assistant. Look at the skin photo and \
decide whether it shows Atopic Dermatitis. Respond with a JSON object with exactly three keys: \
\"condition\" (\"Atopic Dermatitis\" or \"Healthy Skin / Other\"), \"confidence\" (\"low\", \
\"medium\" or \"high\") and \"explanation\" (one or two plain sentences). Output nothing else.";

/// OpenAI-compatible chat-completion vision client.
pub struct VisionModel {
    client: HttpClient,
    api_url: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// The only shape accepted from the model.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Verdict {
    condition: String,
    #[serde(deserialize_with = "deserialize_confidence")]
    confidence: Confidence,
    explanation: String,
}

// Models are inconsistent about casing ("High" vs "high").
fn deserialize_confidence<'de, D>(deserializer: D) -> Result<Confidence, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    value
        .trim()
        .parse::<Confidence>()
        .map_err(|_| serde::de::Error::custom(format!("Invalid confidence: {}", value)))
}

impl VisionModel {
    pub fn new(
        api_url: &str,
        model: &str,
        api_key: &str,
        timeout_secs: u64,
    ) -> Result<Self, ClassifierError> {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn request_body(&self, image: &[u8]) -> serde_json::Value {
        let data_url = format!("data:image/jpeg;base64,{}", STANDARD.encode(image));
        json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": "Analyze this skin image." },
                        { "type": "image_url", "image_url": { "url": data_url } }
                    ]
                }
            ]
        })
    }
}

#[async_trait]
impl ImageModel for VisionModel {
    fn name(&self) -> &'static str {
        "remote-vision"
    }

    async fn predict(&self, image: &[u8]) -> Result<Classification, ClassifierError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(image))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::Status(status.as_u16()));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::MalformedResponse(e.to_string()))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ClassifierError::MalformedResponse("No content in response".into()))?;

        parse_verdict(&content)
    }
}

fn parse_verdict(content: &str) -> Result<Classification, ClassifierError> {
    let verdict: Verdict = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| ClassifierError::MalformedResponse(e.to_string()))?;
    Ok(Classification {
        condition: verdict.condition.trim().to_string(),
        confidence: verdict.confidence,
        explanation: verdict.explanation,
        raw_score: None,
    })
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => rest
            .trim_start_matches("json")
            .trim_end_matches("```")
            .trim(),
        None => trimmed,
    }
}
