use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::{config::Config, intake::ImagePayload};

pub const UNKNOWN_ERROR: &str = "An unknown error occurred.";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("{}", .0.as_deref().unwrap_or("The model did not return an image."))]
    NoImage(Option<String>),
    #[error("Generation timed out after {} seconds.", .0.as_secs())]
    TimedOut(Duration),
    #[error("{0}")]
    Other(String),
}

impl GenerationError {
    /// Message shown to the user; the collaborator's description when there
    /// is one.
    pub fn user_message(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            message
        }
    }
}

/// Image bytes returned by the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPayload {
    pub content: Bytes,
    pub media_type: String,
}

/// Boundary to the image-generation service. One call is one request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(
        &self,
        groom: &ImagePayload,
        bride: &ImagePayload,
        directive: &str,
    ) -> Result<GeneratedPayload, GenerationError>;
}

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let serde_json::Value::String(s) = val {
                        let total = s.chars().count();
                        if total > 100 {
                            let head: String = s.chars().take(50).collect();
                            *val = serde_json::Value::String(format!(
                                "{}...[truncated {} chars]",
                                head,
                                total - 50
                            ));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn preview(data: &str) -> String {
    let total = data.chars().count();
    if total > 50 {
        format!("{}...[{} chars total]", data.chars().take(50).collect::<String>(), total)
    } else {
        data.to_string()
    }
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    fn is_demo(&self) -> bool {
        self.api_key == crate::config::DEMO_KEY
    }

    pub fn build_wedding_prompt(directive: &str) -> String {
        format!(
            "Create a single photorealistic wedding photograph of the two people in the \
            provided images. The first image is the groom and the second image is the bride. \
            Preserve each person's facial features, skin tone, hair and likeness exactly; \
            do not blend their faces. Dress the groom in an elegant wedding suit or tuxedo \
            and the bride in a beautiful wedding gown. Pose them together naturally as a \
            happy couple on their wedding day. Setting: {directive} Use professional \
            wedding photography lighting and composition, portrait orientation, no text or \
            watermarks."
        )
    }

    async fn perform_api_call(
        &self,
        groom: &ImagePayload,
        bride: &ImagePayload,
        prompt: &str,
    ) -> Result<GeneratedPayload, GenerationError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        info!("🔗 Making request to: {}", url.replace(&self.api_key, "***"));

        let request_body = json!({
            "contents": [{
                "parts": [
                    {"inlineData": {"mimeType": groom.media_type, "data": groom.base64()}},
                    {"inlineData": {"mimeType": bride.media_type, "data": bride.base64()}},
                    {"text": prompt}
                ]
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE", "TEXT"],
                "candidateCount": 1
            }
        });

        let mut logged_body = request_body.clone();
        truncate_base64_in_json(&mut logged_body);
        info!(
            "📤 Request body: {}",
            serde_json::to_string_pretty(&logged_body).unwrap_or_default()
        );

        let response = self.client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| GenerationError::Http(e.to_string().replace(&self.api_key, "***")))?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        let response_text = response.text().await
            .map_err(|e| GenerationError::Http(e.to_string()))?;

        if !status.is_success() {
            error!("❌ API Error response: {}", response_text);
            return Err(api_error(status.as_u16(), &response_text));
        }

        let truncated_response = match serde_json::from_str::<serde_json::Value>(&response_text) {
            Ok(mut json_value) => {
                truncate_base64_in_json(&mut json_value);
                serde_json::to_string(&json_value).unwrap_or_default()
            }
            Err(_) => response_text.chars().take(1000).collect(),
        };
        info!("📥 Raw Gemini API response: {}", truncated_response);

        let parsed: GeminiResponse = serde_json::from_str(&response_text)
            .map_err(|e| {
                GenerationError::Other(format!("Failed to parse the generation response: {}", e))
            })?;

        extract_first_image(&parsed)
    }

    fn generate_placeholder_image(directive: &str) -> Result<GeneratedPayload, GenerationError> {
        // Soft gradient in portrait orientation, tinted by the directive.
        let palettes = [
            ([250u8, 232, 240], [168u8, 139, 250]),
            ([254, 243, 199], [251, 146, 60]),
            ([220, 252, 231], [16, 185, 129]),
            ([224, 231, 255], [99, 102, 241]),
        ];
        let (top, bottom) = palettes[directive.len() % palettes.len()];
        let (width, height) = (320u32, 400u32);
        let img = image::RgbImage::from_fn(width, height, |_, y| {
            let t = y as f32 / (height - 1) as f32;
            let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
            image::Rgb([mix(top[0], bottom[0]), mix(top[1], bottom[1]), mix(top[2], bottom[2])])
        });

        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png)
            .map_err(|e| GenerationError::Other(format!("placeholder encoding failed: {}", e)))?;
        Ok(GeneratedPayload {
            content: Bytes::from(buf.into_inner()),
            media_type: "image/png".into(),
        })
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate(
        &self,
        groom: &ImagePayload,
        bride: &ImagePayload,
        directive: &str,
    ) -> Result<GeneratedPayload, GenerationError> {
        if self.is_demo() {
            info!("Using demo mode - no real images generated");
            let placeholder = Self::generate_placeholder_image(directive)?;
            info!("📦 Generated placeholder image ({} bytes)", placeholder.content.len());
            return Ok(placeholder);
        }

        let prompt = Self::build_wedding_prompt(directive);
        info!("💍 Generating wedding photo with setting: {}", directive);
        let result = self.perform_api_call(groom, bride, &prompt).await;
        match &result {
            Ok(image) => info!(
                "✅ Successfully generated image ({}, {} bytes)",
                image.media_type,
                image.content.len()
            ),
            Err(e) => error!("❌ Failed to generate image: {}", e),
        }
        result
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(default, rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData
    },
    Text { text: String },
    Other(serde_json::Value)
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope { error: ErrorBody }

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

fn api_error(status: u16, body: &str) -> GenerationError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_default();
    let message = if message.trim().is_empty() {
        format!("The generation service responded with status {}.", status)
    } else {
        message
    };
    GenerationError::Api { status, message }
}

fn extract_first_image(resp: &GeminiResponse) -> Result<GeneratedPayload, GenerationError> {
    let mut texts = Vec::new();
    for c in &resp.candidates {
        for p in &c.content.parts {
            match p {
                Part::Inline { inline_data } => {
                    info!(
                        "🎯 Found image data with mime type: {} ({})",
                        inline_data.mime_type,
                        preview(&inline_data.data)
                    );
                    let content = base64::engine::general_purpose::STANDARD
                        .decode(inline_data.data.trim())
                        .map_err(|e| GenerationError::Other(format!("invalid image data: {}", e)))?;
                    let media_type = sniff_media_type(&inline_data.mime_type, &content);
                    return Ok(GeneratedPayload { content: Bytes::from(content), media_type });
                }
                Part::Text { text } if !text.trim().is_empty() => {
                    texts.push(text.trim().to_string())
                }
                _ => {}
            }
        }
    }

    info!("⚠️ No inline image data found in response structure");
    let reason = resp
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.clone())
        .map(|r| format!("The request was blocked ({}).", r))
        .or_else(|| (!texts.is_empty()).then(|| texts.join(" ")))
        .or_else(|| {
            resp.candidates
                .iter()
                .find_map(|c| c.finish_reason.clone())
                .map(|r| format!("The model stopped without an image ({}).", r))
        });
    Err(GenerationError::NoImage(reason))
}

/// Prefers the format detected from the bytes over the declared type.
fn sniff_media_type(declared: &str, content: &[u8]) -> String {
    let declared = declared.trim().to_ascii_lowercase();
    match image::guess_format(content) {
        Ok(format) => format.to_mime_type().to_string(),
        Err(_) if declared.starts_with("image/") => declared,
        Err(_) => "image/png".to_string(),
    }
}
