use crate::http::build_client;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4.1".into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing api key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Option<LlmUsage>,
}

#[derive(Debug, Deserialize)]
pub struct LlmUsage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

/// Text client for the Responses API of the vision/language provider.
pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub async fn chat(&self, messages: &[LlmMessage]) -> Result<LlmResponse, LlmError> {
        let Some(key) = self.config.api_key.as_deref() else {
            return Err(LlmError::MissingApiKey);
        };

        let body = ResponsesRequest {
            model: self.config.model.clone(),
            input: messages
                .iter()
                .map(|message| InputMessage {
                    role: message.role.clone(),
                    content: vec![InputContent {
                        r#type: "input_text",
                        text: message.content.clone(),
                    }],
                })
                .collect(),
        };

        let response = self
            .http
            .post(format!(
                "{}/responses",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Http(format!("HTTP {}", response.status())));
        }

        let payload: ResponsesPayload = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
        let usage = payload.usage;
        let text = first_output_text(payload.output)
            .ok_or_else(|| LlmError::InvalidResponse("missing output_text".into()))?;

        Ok(LlmResponse { text, usage })
    }
}

fn first_output_text(output: Vec<OutputItem>) -> Option<String> {
    output
        .into_iter()
        .flat_map(|item| item.content)
        .find(|content| content.r#type == "output_text")
        .map(|content| content.text)
}

#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    input: Vec<InputMessage>,
}

#[derive(Debug, Serialize)]
struct InputMessage {
    role: String,
    content: Vec<InputContent>,
}

#[derive(Debug, Serialize)]
struct InputContent {
    r#type: &'static str,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ResponsesPayload {
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    usage: Option<LlmUsage>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    r#type: String,
    #[serde(default)]
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_without_key_fails_before_network() {
        let client = LlmClient::new(LlmConfig {
            base_url: "http://127.0.0.1:9".into(),
            api_key: None,
            model: "gpt-4.1".into(),
        });
        let err = client
            .chat(&[LlmMessage {
                role: "user".into(),
                content: "hi".into(),
            }])
            .await
            .expect_err("no key");
        assert!(matches!(err, LlmError::MissingApiKey));
    }

    #[test]
    fn picks_first_output_text_across_items() {
        let payload: ResponsesPayload = serde_json::from_value(serde_json::json!({
            "output": [
                {"type": "reasoning", "content": []},
                {"type": "message", "content": [
                    {"type": "refusal", "text": ""},
                    {"type": "output_text", "text": "{\"ok\": true}"}
                ]}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 5}
        }))
        .expect("payload");
        assert_eq!(payload.usage.as_ref().and_then(|u| u.output_tokens), Some(5));
        assert_eq!(
            first_output_text(payload.output).as_deref(),
            Some("{\"ok\": true}")
        );
    }
}
