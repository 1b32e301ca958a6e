//! The OpenRouter chat-completions client.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use super::{LlmError, ValidatorClient};

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default vision model; a Gemini-Flash-class model balances cost and
/// accuracy on small marker crops.
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash";

/// Expected responses are 1-2 kB; max_tokens keeps a runaway generation
/// detectable by raw size before parsing.
const MAX_TOKENS: u32 = 2048;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Content {
    Text {
        #[serde(rename = "type")]
        kind: &'static str,
        text: String,
    },
    Image {
        #[serde(rename = "type")]
        kind: &'static str,
        image_url: ImageUrl,
    },
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
    content: String,
}

/// Live Stage-2 client.
///
/// Holds one `reqwest::Client` (connection-pooled, safe for concurrent
/// use); temperature is pinned to 0 so identical inputs validate to
/// identical outputs.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenRouterClient {
    /// Creates a client for the given credential and model.
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self, LlmError> {
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LlmError::Request)?;
        Ok(Self {
            http,
            api_key,
            model,
            timeout,
        })
    }

    fn data_url(png: &[u8]) -> String {
        format!("data:image/png;base64,{}", BASE64.encode(png))
    }
}

#[async_trait::async_trait]
impl ValidatorClient for OpenRouterClient {
    async fn validate_batch(
        &self,
        prompt: &str,
        exemplars: &[&[u8]],
        crops: &[Vec<u8>],
    ) -> Result<String, LlmError> {
        let mut content = Vec::with_capacity(1 + exemplars.len() + crops.len());
        content.push(Content::Text {
            kind: "text",
            text: prompt.to_string(),
        });
        for image in exemplars.iter().copied().chain(crops.iter().map(Vec::as_slice)) {
            content.push(Content::Image {
                kind: "image_url",
                image_url: ImageUrl {
                    url: Self::data_url(image),
                },
            });
        }

        let request = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content,
            }],
            temperature: 0.0,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .http
            .post(OPENROUTER_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout)
                } else {
                    LlmError::Request(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status(status.as_u16(), truncate(&body, 200)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::BadPayload(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::BadPayload("no choices in completion".to_string()))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
