use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;

use super::{parse_ocr_response, OcrResult};
use crate::config::LlmConfig;

/// Instruction sent alongside the image in the user message
const OCR_INSTRUCTION: &str =
    "Extract all visible text from this image. Return only the text content, no JSON formatting.";

/// Images larger than this on either side are downscaled before upload
const MAX_IMAGE_DIMENSION: u32 = 2048;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM API key not configured. Please set your API key in Settings or the config file.")]
    MissingApiKey,

    #[error("LLM Base URL not configured. Please set your base URL in Settings or the config file.")]
    MissingBaseUrl,

    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("Invalid JSON response from LLM API: {0}")]
    InvalidResponse(String),

    #[error("No response from LLM")]
    EmptyResponse,
}

impl LlmError {
    /// True for errors caused by missing settings rather than the remote call
    pub fn is_configuration(&self) -> bool {
        matches!(self, LlmError::MissingApiKey | LlmError::MissingBaseUrl)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum ChatMessage<'a> {
    System { content: &'a str },
    User { content: Vec<ContentPart> },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Blocking client for the chat completions endpoint.
#[derive(Debug, Clone)]
pub struct LlmClient {
    base_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
    timeout: Duration,
}

impl LlmClient {
    /// Build a client, failing when the key or base URL is blank.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(LlmError::MissingApiKey)?;

        let base_url = config.base_url.trim();
        if base_url.is_empty() {
            return Err(LlmError::MissingBaseUrl);
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run OCR over an uploaded image.
    pub fn extract_text(&self, bytes: &[u8], mime_type: Option<&str>) -> Result<OcrResult, LlmError> {
        let (encoded, mime_type) = encode_image(bytes, mime_type);
        let data_url = format!("data:{};base64,{}", mime_type, encoded);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage::System {
                    content: &self.system_prompt,
                },
                ChatMessage::User {
                    content: vec![
                        ContentPart::Text {
                            text: OCR_INSTRUCTION.to_string(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl { url: data_url },
                        },
                    ],
                },
            ],
            max_tokens: 1000,
            temperature: 0.1,
        };

        let url = format!("{}/chat/completions", self.base_url);
        tracing::info!(base_url = %self.base_url, model = %self.model, "Sending LLM OCR request");

        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();

        let response = agent
            .post(&url)
            .set("Content-Type", "application/json")
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(&request)
            .map_err(|e| match e {
                ureq::Error::Status(code, response) => {
                    let body = response.into_string().unwrap_or_default();
                    tracing::error!(status = code, body = %body, "LLM API returned an error");
                    LlmError::Request(format!("LLM API error: {}", code))
                }
                other => LlmError::Request(other.to_string()),
            })?;

        let chat_response: ChatResponse = response
            .into_json()
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or(LlmError::EmptyResponse)?;

        Ok(parse_ocr_response(&content))
    }
}

/// Base64-encode an upload for a data URL.
///
/// Decodable images are downscaled when oversized and re-encoded as JPEG.
/// Anything the decoder rejects is sent as-is with the client's MIME type.
fn encode_image(bytes: &[u8], mime_type: Option<&str>) -> (String, String) {
    let fallback_mime = mime_type
        .filter(|mime| !mime.trim().is_empty())
        .unwrap_or("image/jpeg")
        .to_string();

    let img = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(e) => {
            tracing::debug!(error = %e, "Sending image without re-encoding");
            return (BASE64.encode(bytes), fallback_mime);
        }
    };

    let (width, height) = img.dimensions();
    let img = if width > MAX_IMAGE_DIMENSION || height > MAX_IMAGE_DIMENSION {
        img.resize(
            MAX_IMAGE_DIMENSION,
            MAX_IMAGE_DIMENSION,
            image::imageops::FilterType::Triangle,
        )
    } else {
        img
    };

    let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Cursor::new(Vec::new());
    match rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, 90)) {
        Ok(()) => (BASE64.encode(buf.into_inner()), "image/jpeg".to_string()),
        Err(e) => {
            tracing::debug!(error = %e, "JPEG re-encode failed, sending original bytes");
            (BASE64.encode(bytes), fallback_mime)
        }
    }
}
