//! Reply generation
//!
//! Turns an automation listener into reply text. Static listeners return
//! their template; AI listeners delegate to a chat-completions provider.

use async_trait::async_trait;
use autoreply_core::AiConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Suffix appended to every automation prompt
pub const PROMPT_SUFFIX: &str = ". Keep responses under 2 sentences.";

/// Reply generation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Reply generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Reply provider error: {0}")]
    Provider(String),

    #[error("Reply provider returned no content")]
    EmptyReply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// Input to an AI reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl ReplyRequest {
    /// Assemble the conversation sent to the provider: the automation prompt
    /// as system message, prior turns with this author, then the new text.
    pub fn build(
        model: impl Into<String>,
        prompt: &str,
        history: Vec<ChatMessage>,
        text: &str,
    ) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(format!(
            "{}{}",
            prompt.trim_end_matches('.'),
            PROMPT_SUFFIX
        )));
        messages.extend(history);
        messages.push(ChatMessage::user(text));

        Self {
            model: model.into(),
            messages,
        }
    }
}

/// External reply generation service
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, request: &ReplyRequest) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client
pub struct OpenAiReplyGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    max_tokens: u32,
}

impl OpenAiReplyGenerator {
    pub fn new(config: &AiConfig, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl ReplyGenerator for OpenAiReplyGenerator {
    async fn generate(&self, request: &ReplyRequest) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %request.model, turns = request.messages.len(), "Requesting AI reply");

        let body = CompletionRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GenerationError::Provider(format!(
                "Request failed with status: {}",
                response.status()
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Provider(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(GenerationError::EmptyReply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generator(base_url: &str) -> OpenAiReplyGenerator {
        let config = AiConfig {
            base_url: base_url.to_string(),
            api_key: "sk-test".to_string(),
            ..AiConfig::default()
        };
        OpenAiReplyGenerator::new(&config, Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_request_shape() {
        let request = ReplyRequest::build(
            "gpt-4o",
            "You are a friendly shop assistant.",
            vec![ChatMessage::user("hi"), ChatMessage::assistant("hello!")],
            "is the sale still on?",
        );

        assert_eq!(request.messages.len(), 4);
        assert_eq!(
            request.messages[0],
            ChatMessage::system("You are a friendly shop assistant. Keep responses under 2 sentences.")
        );
        assert_eq!(request.messages[3], ChatMessage::user("is the sale still on?"));
    }

    #[tokio::test]
    async fn test_generate_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "messages": [
                    { "role": "system", "content": "Be brief. Keep responses under 2 sentences." },
                    { "role": "user", "content": "price?" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": " It's $10. " } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = ReplyRequest::build("gpt-4o", "Be brief", Vec::new(), "price?");
        let reply = generator(&server.uri()).generate(&request).await.unwrap();
        assert_eq!(reply, "It's $10.");
    }

    #[tokio::test]
    async fn test_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let request = ReplyRequest::build("gpt-4o", "Be brief", Vec::new(), "price?");
        let result = generator(&server.uri()).generate(&request).await;
        assert!(matches!(result, Err(GenerationError::Provider(_))));
    }

    #[tokio::test]
    async fn test_empty_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let request = ReplyRequest::build("gpt-4o", "Be brief", Vec::new(), "price?");
        let result = generator(&server.uri()).generate(&request).await;
        assert_eq!(result, Err(GenerationError::EmptyReply));
    }
}
