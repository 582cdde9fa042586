//! Completion model abstraction.
//!
//! The answerer talks to a chat-style language model through the narrow
//! [`CompletionModel`] trait: an ordered list of `(role, content)` messages
//! in, one string out. [`OpenAIChatModel`] speaks the OpenAI-compatible
//! `/chat/completions` protocol; [`DisabledCompletion`] always fails so the
//! answerer falls back to its apology response.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::CompletionConfig;
use crate::error::CompletionError;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Sampling parameters for one completion call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            top_p: 1.0,
            max_tokens: 700,
        }
    }
}

impl From<&CompletionConfig> for CompletionParams {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: CompletionParams,
    ) -> Result<String, CompletionError>;
}

/// Always fails with [`CompletionError::Disabled`].
pub struct DisabledCompletion;

#[async_trait]
impl CompletionModel for DisabledCompletion {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _params: CompletionParams,
    ) -> Result<String, CompletionError> {
        Err(CompletionError::Disabled)
    }
}

/// OpenAI-compatible chat completion client.
///
/// Retries are left to the caller's deployment; a failed call maps directly
/// onto a [`CompletionError`].
pub struct OpenAIChatModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAIChatModel {
    pub fn new(config: &CompletionConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("completion.model required for OpenAI provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            model,
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
        })
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }
}

#[async_trait]
impl CompletionModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: CompletionParams,
    ) -> Result<String, CompletionError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| CompletionError::AuthMissing("OPENAI_API_KEY not set".to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "max_tokens": params.max_tokens,
        });

        let resp = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(CompletionError::AuthMissing(format!("{}: {}", status, text)));
        }
        if !status.is_success() {
            return Err(CompletionError::Transport(format!("{}: {}", status, text)));
        }

        let json: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| CompletionError::Malformed(e.to_string()))?;
        parse_chat_response(&json)
    }
}

/// Extract `choices[0].message.content`, rejecting empty answers.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, CompletionError> {
    let content = json["choices"]
        .get(0)
        .and_then(|c| c["message"]["content"].as_str())
        .map(str::trim)
        .unwrap_or_default();

    if content.is_empty() {
        return Err(CompletionError::Malformed(
            "response has no message content".to_string(),
        ));
    }
    Ok(content.to_string())
}

/// Create the configured [`CompletionModel`].
pub fn create_completion_model(
    config: &CompletionConfig,
) -> anyhow::Result<Arc<dyn CompletionModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        other => anyhow::bail!("Unknown completion provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_serialize_with_lowercase_roles() {
        let json = serde_json::to_value(vec![
            ChatMessage::system("sys"),
            ChatMessage::user("hi"),
        ])
        .unwrap();
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[1]["role"], "user");
        assert_eq!(json[1]["content"], "hi");
    }

    #[test]
    fn parses_first_choice() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "  Answer.  " } }]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "Answer.");
    }

    #[test]
    fn null_content_is_malformed() {
        let json = serde_json::json!({ "choices": [{ "message": { "content": null } }] });
        assert!(matches!(
            parse_chat_response(&json).unwrap_err(),
            CompletionError::Malformed(_)
        ));
    }

    #[test]
    fn endpoint_resolution() {
        let mut config = CompletionConfig {
            provider: "openai".to_string(),
            model: Some("gpt-4o-mini".to_string()),
            ..CompletionConfig::default()
        };
        config.url = Some("http://localhost:1234/v1/".to_string());
        let model = OpenAIChatModel::new(&config).unwrap();
        assert_eq!(model.endpoint(), "http://localhost:1234/v1/chat/completions");

        config.url = Some("http://localhost:1234".to_string());
        let model = OpenAIChatModel::new(&config).unwrap();
        assert_eq!(model.endpoint(), "http://localhost:1234/v1/chat/completions");
    }

    #[tokio::test]
    async fn disabled_fails() {
        let err = DisabledCompletion
            .complete(&[ChatMessage::user("q")], CompletionParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Disabled));
    }
}
