use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// System prompt used when a conversation does not bring its own
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "Act as a crypto trading expert. Provide concise, actionable advice based on market analysis.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Object { message: Option<String> },
    Text(String),
}

/// Response from LLM completion
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Chat-completion backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<LlmResponse>;
}

/// Client for OpenAI-compatible `/chat/completions` endpoints (GaiaNet, OpenAI, ...)
pub struct ChatClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// GET `/models`; succeeds on any 2xx
    pub async fn ping(&self) -> Result<()> {
        let mut builder = self.client.get(format!("{}/models", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                service: "llm".to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Prepend the default system prompt unless one is already present
pub fn with_system_prompt(mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    if !messages.iter().any(|m| m.role == "system") {
        messages.insert(0, ChatMessage::system(DEFAULT_SYSTEM_PROMPT));
    }
    messages
}

#[async_trait]
impl LanguageModel for ChatClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<LlmResponse> {
        let messages = with_system_prompt(messages);
        let request = ChatRequest {
            model: &self.model,
            messages: &messages,
            max_tokens,
            temperature,
        };

        info!(
            model = %self.model,
            messages = messages.len(),
            prompt_length = messages.iter().map(|m| m.content.len()).sum::<usize>(),
            "sending LLM request"
        );

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .ok()
                .and_then(|err| {
                    err.message.or_else(|| {
                        err.error.and_then(|e| match e {
                            ErrorDetail::Object { message } => message,
                            ErrorDetail::Text(text) => Some(text),
                        })
                    })
                })
                .unwrap_or(body);
            return Err(Error::Llm(format!("{} from {}: {}", status, self.model, detail)));
        }

        let chat: ChatResponse = serde_json::from_str(&body)?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Llm("response contained no choices".to_string()))?;
        let usage = chat.usage.unwrap_or_default();

        debug!(
            model = %self.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "LLM response received"
        );

        Ok(LlmResponse {
            content,
            model: chat.model.unwrap_or_else(|| self.model.clone()),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }
}

/// Pull the first JSON object out of free-form model output
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn config(base_url: String, api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            base_url,
            api_key: api_key.map(String::from),
            model: "test-model".to_string(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_system_prompt_injected() {
        let messages = with_system_prompt(vec![ChatMessage::user("hi")]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_system_prompt_preserved() {
        let messages = with_system_prompt(vec![
            ChatMessage::system("custom"),
            ChatMessage::user("hi"),
        ]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "custom");
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let client = ChatClient::new(&config("http://node/v1/".to_string(), None)).unwrap();
        assert_eq!(client.endpoint(), "http://node/v1/chat/completions");
    }

    #[test]
    fn test_extract_json() {
        let text = "Sure! Here is my decision:\n{\"action\": \"buy\", \"confidence\": 0.8}\nGood luck.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["action"], "buy");
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("} backwards {").is_none());
    }

    #[tokio::test]
    async fn test_complete_success() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer secret")
                .json_body_partial(r#"{"model": "test-model", "max_tokens": 100}"#)
                .body_contains(DEFAULT_SYSTEM_PROMPT);
            then.status(200).json_body(json!({
                "id": "chatcmpl-1",
                "model": "test-model",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "Buy SOL."}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
            }));
        });

        let client = ChatClient::new(&config(server.url("/v1"), Some("secret"))).unwrap();
        let response = client
            .complete(vec![ChatMessage::user("what now?")], 100, 0.7)
            .await
            .unwrap();

        mock.assert();
        assert_eq!(response.content, "Buy SOL.");
        assert_eq!(response.prompt_tokens, 12);
        assert_eq!(response.completion_tokens, 3);
    }

    #[tokio::test]
    async fn test_complete_error_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(401)
                .json_body(json!({"error": {"message": "invalid api key", "type": "auth"}}));
        });

        let client = ChatClient::new(&config(server.url("/v1"), None)).unwrap();
        let err = client
            .complete(vec![ChatMessage::user("hi")], 10, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Llm(_)));
        assert!(err.to_string().contains("invalid api key"));
    }

    #[tokio::test]
    async fn test_complete_no_choices() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(json!({"choices": []}));
        });

        let client = ChatClient::new(&config(server.url("/v1"), None)).unwrap();
        let err = client
            .complete(vec![ChatMessage::user("hi")], 10, 0.0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[tokio::test]
    async fn test_ping_models() {
        let server = MockServer::start();
        let models = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/models")
                .header("authorization", "Bearer gaia-key");
            then.status(200).json_body(json!({"data": []}));
        });

        let client = ChatClient::new(&config(server.url("/v1/"), Some("gaia-key"))).unwrap();
        client.ping().await.unwrap();
        models.assert();
    }

    #[tokio::test]
    async fn test_ping_failure_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/models");
            then.status(503).body("loading");
        });

        let client = ChatClient::new(&config(server.url("/v1"), None)).unwrap();
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 503, .. }));
    }
}
