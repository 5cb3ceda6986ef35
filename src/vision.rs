use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::init::ChatConfig;

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Content,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

const SYSTEM_INSTRUCTION: &str =
    "You are an assistant that describes charts. Explain what the chart shows, \
     name the quantities involved, and answer the user's question from the chart alone.";

const MAX_ANSWER_TOKENS: u32 = 2000;

// ============================================================================
// Visual Interpreter
// ============================================================================

/// Sends a rendered chart image plus the original question to a
/// vision-capable chat model. Read-only: never writes a file.
pub struct VisualInterpreter {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl VisualInterpreter {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        }
    }

    /// One non-streaming completion with deterministic sampling. Returns the
    /// raw completion payload exactly as the endpoint produced it.
    pub async fn interpret(
        &self,
        question: &str,
        image_path: &Path,
        model: &str,
    ) -> Result<Value> {
        let data_uri = prepare_image(image_path)?;
        let request = build_request(question, &data_uri, model);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.endpoint))
            .header("api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::inference(format!("vision endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::inference(format!(
                "vision endpoint returned {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::inference(format!("vision endpoint sent bad JSON: {}", e)))
    }
}

/// Reads and validates the chart image, returning it as a base64 data URI.
pub(crate) fn prepare_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .map_err(|e| AppError::image_read(format!("cannot read {}: {}", path.display(), e)))?;

    // Reject corrupt or non-image content before shipping it to the model
    image::load_from_memory(&bytes)
        .map_err(|e| AppError::image_read(format!("{} is not a valid image: {}", path.display(), e)))?;

    let mime = mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "image/png".to_string());

    Ok(format!("data:{};base64,{}", mime, BASE64.encode(&bytes)))
}

pub(crate) fn build_request(question: &str, data_uri: &str, model: &str) -> CompletionRequest {
    CompletionRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: Content::Text(SYSTEM_INSTRUCTION.to_string()),
            },
            ChatMessage {
                role: "user".to_string(),
                content: Content::Parts(vec![
                    ContentPart::Text {
                        text: format!("Describe this chart. The original question was: {}", question),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: data_uri.to_string(),
                        },
                    },
                ]),
            },
        ],
        temperature: 0.0,
        max_tokens: MAX_ANSWER_TOKENS,
        frequency_penalty: 0.0,
        presence_penalty: 0.0,
        stream: false,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::io::Cursor;
    use std::path::PathBuf;

    fn write_test_png() -> PathBuf {
        let path = std::env::temp_dir().join(format!("chart_{}.png", uuid::Uuid::now_v7()));
        let img = image::RgbImage::new(4, 4);
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_prepare_image_data_uri() {
        let path = write_test_png();
        let uri = prepare_image(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(uri.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_missing_image() {
        let err = prepare_image(Path::new("/missing/chart_0.png")).unwrap_err();
        assert_eq!(err.code, ErrorCode::ImageReadError);
    }

    #[test]
    fn test_corrupt_image() {
        let path = std::env::temp_dir().join(format!("bad_{}.png", uuid::Uuid::now_v7()));
        std::fs::write(&path, b"definitely not a png").unwrap();
        let err = prepare_image(&path).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert_eq!(err.code, ErrorCode::ImageReadError);
        assert!(err.message.contains("not a valid image"));
    }

    #[test]
    fn test_request_shape() {
        let request = build_request("profit for Carreterra?", "data:image/png;base64,AAAA", "gpt-4o");

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].role, "user");
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.max_tokens, MAX_ANSWER_TOKENS);
        assert!(!request.stream);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][1]["content"][1]["type"], "image_url");
        assert!(
            json["messages"][1]["content"][0]["text"]
                .as_str()
                .unwrap()
                .contains("profit for Carreterra?")
        );
    }

    #[test]
    fn test_prepare_image_writes_nothing() {
        let dir = std::env::temp_dir().join(format!("ro_{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let img = image::RgbImage::new(2, 2);
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let path = dir.join("chart.png");
        std::fs::write(&path, bytes).unwrap();

        prepare_image(&path).unwrap();

        // Interpretation is read-only: the directory still holds only the input
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
