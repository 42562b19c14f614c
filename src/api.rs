//! # API Module
//!
//! Client for the OpenAI-compatible chat completion endpoint (Groq by default).
//!
//! [`OpenAiGenerator`] is the production [`Generator`]: one system message, one user
//! message, a temperature and a token cap per request. Every call is bounded by the
//! configured request timeout.
//!
//! # Example
//!
//! ```no_run
//! use medirag::api::OpenAiGenerator;
//! use medirag::config::MediRagConfig;
//! use medirag::generator::{CompletionRequest, Generator};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MediRagConfig { api_key: "gsk-...".into(), ..Default::default() };
//! let generator = OpenAiGenerator::new(&config);
//! let text = generator
//!     .complete(CompletionRequest::new("Tu es un assistant.", "Bonjour", 0.2, 50))
//!     .await?;
//! println!("{text}");
//! # Ok(()) }
//! ```
use std::time::Duration;

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use tracing::{debug, error};

use crate::config::MediRagConfig;
use crate::error::GenerationError;
use crate::generator::{CompletionRequest, Generator};

/// Creates a new OpenAI API client from configuration.
pub fn create_client(config: &MediRagConfig) -> Client<OpenAIConfig> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(config.api_key.clone())
        .with_api_base(config.api_base.clone());
    debug!("Client created for {}", config.api_base);
    Client::with_config(openai_config)
}

/// Build the two-message conversation of a completion request.
#[allow(deprecated)]
fn build_messages(request: &CompletionRequest) -> Vec<ChatCompletionRequestMessage> {
    vec![
        ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
            content: ChatCompletionRequestSystemMessageContent::Text(request.system.clone()),
            name: None,
        }),
        ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Text(request.user.clone()),
            name: None,
        }),
    ]
}

/// Sends one non-streaming completion request and concatenates the returned choices.
#[allow(deprecated)]
pub async fn fetch_response(
    client: &Client<OpenAIConfig>,
    model: &str,
    request: &CompletionRequest,
) -> Result<String, GenerationError> {
    let chat_request = CreateChatCompletionRequestArgs::default()
        .max_tokens(request.max_tokens)
        .temperature(request.temperature)
        .model(model)
        .messages(build_messages(request))
        .build()?;

    debug!("Sending completion request to model {}", model);

    let response = client.chat().create(chat_request).await?;

    let mut response_string = String::new();
    response.choices.iter().for_each(|chat_choice| {
        if let Some(message_text) = chat_choice.message.content.clone() {
            response_string.push_str(&message_text);
        }
    });

    if response_string.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(response_string)
}

/// [`Generator`] backed by an OpenAI-compatible HTTP API.
#[derive(Clone)]
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(config: &MediRagConfig) -> Self {
        Self {
            client: create_client(config),
            model: config.model.clone(),
            timeout: config.request_timeout(),
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn complete(&self, request: CompletionRequest) -> Result<String, GenerationError> {
        match tokio::time::timeout(
            self.timeout,
            fetch_response(&self.client, &self.model, &request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!("Completion timed out after {:?}", self.timeout);
                Err(GenerationError::Timeout(self.timeout.as_secs()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn setup() {
        let _ = tracing_subscriber::fmt::try_init();
    }

    fn mock_config(base: String) -> MediRagConfig {
        MediRagConfig {
            api_key: "mock_api_key".to_string(),
            api_base: base,
            model: "mock_model".to_string(),
            request_timeout_secs: 5,
            ..MediRagConfig::default()
        }
    }

    fn completion_body(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "mock_model",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        })
    }

    #[test]
    fn test_build_messages() {
        let request = CompletionRequest::new("system text", "user text", 0.3, 100);
        let messages = build_messages(&request);
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::User(_)));
    }

    #[tokio::test]
    async fn test_complete_against_mock_server() {
        setup();
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .body_includes("mock_model")
                    .body_includes("Quel est son diagnostic ?");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(completion_body("Maladie de Parkinson probable."));
            })
            .await;

        let generator = OpenAiGenerator::new(&mock_config(server.base_url()));
        let answer = generator
            .complete(CompletionRequest::new(
                "Tu es un assistant médical.",
                "Quel est son diagnostic ?",
                0.3,
                100,
            ))
            .await
            .expect("completion");

        mock.assert_async().await;
        assert_eq!(answer, "Maladie de Parkinson probable.");
    }

    #[tokio::test]
    async fn test_empty_content_is_an_error() {
        setup();
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(completion_body("   "));
            })
            .await;

        let generator = OpenAiGenerator::new(&mock_config(server.base_url()));
        let result = generator
            .complete(CompletionRequest::new("s", "u", 0.2, 10))
            .await;
        assert!(matches!(result, Err(GenerationError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        setup();
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(401)
                    .header("content-type", "application/json")
                    .json_body(json!({
                        "error": { "message": "invalid api key", "type": "invalid_request_error", "param": null, "code": null }
                    }));
            })
            .await;

        let generator = OpenAiGenerator::new(&mock_config(server.base_url()));
        let result = generator
            .complete(CompletionRequest::new("s", "u", 0.2, 10))
            .await;
        assert!(matches!(result, Err(GenerationError::Api(_))));
    }
}
