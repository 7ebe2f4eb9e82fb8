//! Gemini API client for text and image questions.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::BotError;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Used when an image is attached.
const VISION_MODEL: &str = "gemini-1.5-pro";
/// Used for text-only prompts.
const TEXT_MODEL: &str = "gemini-1.5-flash";

pub const GENERIC_APOLOGY: &str =
    "❌ Sorry, I encountered an error while processing your request. Please try again later.";
pub const IMAGE_APOLOGY: &str =
    "Sorry, I couldn't process the image. Please make sure it's a valid image file.";
pub const EMPTY_RESPONSE: &str = "Sorry, I couldn't generate a meaningful response.";

/// Produces one reply text for a prompt. Never fails: errors come back as
/// apology text.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, image: Option<&[u8]>) -> String;
}

pub struct GeminiClient {
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: &'static str,
    data: String,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 2048,
        }
    }
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

/// Identify an image by its magic bytes.
pub fn sniff_image_mime(data: &[u8]) -> Option<&'static str> {
    match data {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some("image/png"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        _ => None,
    }
}

fn build_request(prompt: &str, image: Option<(&'static str, &[u8])>) -> GenerateRequest {
    let mut parts = vec![Part::Text {
        text: prompt.to_string(),
    }];
    if let Some((mime_type, bytes)) = image {
        parts.push(Part::Image {
            inline_data: InlineData {
                mime_type,
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            },
        });
    }

    GenerateRequest {
        contents: vec![Content { parts }],
        generation_config: GenerationConfig::default(),
    }
}

fn model_for(has_image: bool) -> &'static str {
    if has_image { VISION_MODEL } else { TEXT_MODEL }
}

/// Concatenated text of the first candidate, `None` when there is nothing to say.
fn extract_text(body: &str) -> Result<Option<String>, BotError> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| BotError::Generation(format!("Failed to parse response: {e}")))?;

    if let Some(error) = parsed.error {
        return Err(BotError::Generation(format!("Gemini error: {}", error.message)));
    }

    let text: String = parsed
        .candidates
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    Ok(if text.trim().is_empty() { None } else { Some(text) })
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self { api_key, client })
    }

    /// One `generateContent` call. `Ok(None)` means the model returned no text.
    pub async fn generate_content(
        &self,
        prompt: &str,
        image: Option<(&'static str, &[u8])>,
    ) -> Result<Option<String>, BotError> {
        let model = model_for(image.is_some());
        info!("🤖 Sending request to {model} ({} chars)", prompt.chars().count());

        let request = build_request(prompt, image);
        let url = format!("{GEMINI_API_BASE}/{model}:generateContent?key={}", self.api_key);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| BotError::Generation(format!("HTTP error: {}", e.without_url())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BotError::Generation(format!("Failed to read response: {}", e.without_url())))?;

        debug!("Gemini response status: {status}");

        if !status.is_success() {
            return Err(BotError::Generation(format!("API error {status}: {body}")));
        }

        extract_text(&body)
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(&self, prompt: &str, image: Option<&[u8]>) -> String {
        let image = match image {
            Some(bytes) => match sniff_image_mime(bytes) {
                Some(mime) => Some((mime, bytes)),
                None => {
                    warn!("Unrecognised image data ({} bytes)", bytes.len());
                    return IMAGE_APOLOGY.to_string();
                }
            },
            None => None,
        };

        match self.generate_content(prompt, image).await {
            Ok(Some(text)) => text,
            Ok(None) => EMPTY_RESPONSE.to_string(),
            Err(e) => {
                error!("Error generating response: {e}");
                GENERIC_APOLOGY.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_image_mime() {
        assert_eq!(sniff_image_mime(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]), Some("image/jpeg"));
        assert_eq!(
            sniff_image_mime(b"\x89PNG\r\n\x1a\n\x00\x00"),
            Some("image/png")
        );
        assert_eq!(sniff_image_mime(b"GIF89a..."), Some("image/gif"));
        assert_eq!(sniff_image_mime(b"RIFF\x10\x00\x00\x00WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_image_mime(b"hello world"), None);
        assert_eq!(sniff_image_mime(&[]), None);
    }

    #[test]
    fn test_model_for_picks_vision_model_only_with_image() {
        assert_eq!(model_for(true), "gemini-1.5-pro");
        assert_eq!(model_for(false), "gemini-1.5-flash");
    }

    #[test]
    fn test_request_uses_fixed_sampling_config() {
        let request = build_request("hi", None);
        let json = serde_json::to_value(&request).unwrap();
        let config = &json["generationConfig"];
        assert_eq!(config["topK"], 40);
        assert_eq!(config["maxOutputTokens"], 2048);
        assert!((config["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert!((config["topP"].as_f64().unwrap() - 0.8).abs() < 1e-6);
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(json["contents"][0]["parts"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_request_with_image_inlines_base64() {
        let request = build_request("what is this", Some(("image/png", b"abc")));
        let json = serde_json::to_value(&request).unwrap();
        let image = &json["contents"][0]["parts"][1]["inlineData"];
        assert_eq!(image["mimeType"], "image/png");
        assert_eq!(image["data"], "YWJj");
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"world"}]}}]}"#;
        assert_eq!(extract_text(body).unwrap().as_deref(), Some("Hello world"));
    }

    #[test]
    fn test_extract_text_empty_cases() {
        for body in [
            r#"{"candidates":[]}"#,
            r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#,
            r#"{"candidates":[{"finishReason":"SAFETY"}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":"  \n"}]}}]}"#,
        ] {
            assert_eq!(extract_text(body).unwrap(), None, "body {body}");
        }
    }

    #[test]
    fn test_extract_text_api_error() {
        let body = r#"{"error":{"code":400,"message":"API key not valid"}}"#;
        let err = extract_text(body).unwrap_err();
        assert!(matches!(err, BotError::Generation(ref m) if m.contains("API key not valid")));
    }

    #[test]
    fn test_extract_text_garbage() {
        assert!(matches!(extract_text("<html>"), Err(BotError::Generation(_))));
    }

    #[tokio::test]
    async fn test_undecodable_image_yields_apology_without_request() {
        let client = GeminiClient::new("unused".into()).unwrap();
        let reply = client.generate("describe", Some(b"not an image")).await;
        assert_eq!(reply, IMAGE_APOLOGY);
    }
}
