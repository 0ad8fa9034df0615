use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model service error: {0}")]
    Api(String),
}

/// Seam for the external model endpoint.
///
/// The pipeline stages only depend on this trait, so tests drive them with
/// scripted implementations instead of a live endpoint.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Text-only completion (strategy generation, scoring).
    async fn complete(&self, system_prompt: &str, prompt: &str) -> Result<String, LlmError>;

    /// Vision completion with a base64-encoded image attached
    /// (classification, artifact detection).
    async fn complete_with_image(
        &self,
        system_prompt: &str,
        prompt: &str,
        image_base64: &str,
    ) -> Result<String, LlmError>;
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct ModelRouterClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    vision_model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

impl ModelRouterClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        vision_model: &str,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            vision_model: vision_model.to_string(),
        })
    }

    async fn chat(&self, model: &str, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model,
            messages,
            max_tokens: 2048,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Api("response contained no completion".to_string()))
    }
}

#[async_trait]
impl LanguageModel for ModelRouterClient {
    async fn complete(&self, system_prompt: &str, prompt: &str) -> Result<String, LlmError> {
        let messages = vec![
            ChatMessage {
                role: "system",
                content: serde_json::Value::String(system_prompt.to_string()),
            },
            ChatMessage {
                role: "user",
                content: serde_json::Value::String(prompt.to_string()),
            },
        ];
        self.chat(&self.model, messages).await
    }

    async fn complete_with_image(
        &self,
        system_prompt: &str,
        prompt: &str,
        image_base64: &str,
    ) -> Result<String, LlmError> {
        let user_content = serde_json::json!([
            {
                "type": "image_url",
                "image_url": { "url": format!("data:image/jpeg;base64,{image_base64}") }
            },
            { "type": "text", "text": prompt }
        ]);

        let messages = vec![
            ChatMessage {
                role: "system",
                content: serde_json::Value::String(system_prompt.to_string()),
            },
            ChatMessage {
                role: "user",
                content: user_content,
            },
        ];
        self.chat(&self.vision_model, messages).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("no JSON object found in model output")]
    NoObject,

    #[error("invalid or truncated JSON in model output: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Parse JSON out of a model reply, tolerating markdown code fences and
/// trailing prose around the object.
pub fn parse_json_response(raw: &str) -> Result<serde_json::Value, ParseError> {
    let content = strip_code_fences(raw);

    if let Ok(value) = serde_json::from_str(content) {
        return Ok(value);
    }

    let extracted = extract_first_object(content).ok_or(ParseError::NoObject)?;
    Ok(serde_json::from_str(extracted)?)
}

fn strip_code_fences(raw: &str) -> &str {
    let mut content = raw.trim();
    if let Some(rest) = content.strip_prefix("```json") {
        content = rest;
    } else if let Some(rest) = content.strip_prefix("```") {
        content = rest;
    }
    if let Some(rest) = content.strip_suffix("```") {
        content = rest;
    }
    content.trim()
}

/// Find the first complete JSON object: from the first `{` to its matching
/// `}`, skipping braces inside string literals.
fn extract_first_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;
    let mut quote = b'"';

    for (i, &c) in bytes.iter().enumerate().skip(start) {
        if escape {
            escape = false;
            continue;
        }
        if in_string {
            match c {
                b'\\' => escape = true,
                _ if c == quote => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            b'"' | b'\'' => {
                in_string = true;
                quote = c;
            }
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
