//! OpenAI-compatible chat backend (works against OpenAI or any
//! OpenRouter-style compatible endpoint via a custom base URL).

use std::sync::Arc;
use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::error::{AssistantError, Result};

use super::{ChatBackend, ChatMessage, ChatRequest, ChatRole, TokenStream};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);
const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// Shows only the tail of an API key so request logs stay safe.
fn mask_key(key: &str) -> String {
    if key.len() <= 8 {
        "***".to_string()
    } else {
        format!("***{}", &key[key.len() - 4..])
    }
}

/// Chat backend over `async-openai`. Every external call is bounded by a
/// timeout; expiry is reported as a recoverable [`AssistantError::Llm`].
pub struct OpenAiBackend {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    masked_key: String,
    request_timeout: Duration,
    chunk_timeout: Duration,
}

impl OpenAiBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let masked_key = mask_key(&api_key);
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Arc::new(Client::with_config(config)),
            model: model.into(),
            masked_key,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }

    /// Points the client at an OpenAI-compatible endpoint.
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let api_key = api_key.into();
        let masked_key = mask_key(&api_key);
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        Self {
            client: Arc::new(Client::with_config(config)),
            model: model.into(),
            masked_key,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }

    /// Builds from `OPENAI_API_KEY`, with optional `OPENAI_API_BASE` and
    /// `CONGRESS_ASSISTANT_MODEL` overrides.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AssistantError::Llm("OPENAI_API_KEY not set".to_string()))?;
        let model = std::env::var("CONGRESS_ASSISTANT_MODEL")
            .unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        match std::env::var("OPENAI_API_BASE") {
            Ok(base_url) => Ok(Self::with_base_url(api_key, base_url, model)),
            Err(_) => Ok(Self::new(api_key, model)),
        }
    }

    pub fn with_timeouts(mut self, request_timeout: Duration, chunk_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self.chunk_timeout = chunk_timeout;
        self
    }

    fn build_request(
        &self,
        request: &ChatRequest,
    ) -> Result<async_openai::types::CreateChatCompletionRequest> {
        let messages = request
            .messages
            .iter()
            .map(to_api_message)
            .collect::<Result<Vec<_>>>()?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages(messages);
        if let Some(max_tokens) = request.max_tokens {
            builder.max_tokens(max_tokens);
        }
        builder
            .build()
            .map_err(|e| AssistantError::Llm(e.to_string()))
    }
}

fn to_api_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
    let message = match message.role {
        ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(message.content.clone())
            .build()
            .map_err(|e| AssistantError::Llm(e.to_string()))?
            .into(),
        ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
            .content(message.content.clone())
            .build()
            .map_err(|e| AssistantError::Llm(e.to_string()))?
            .into(),
        ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(message.content.clone())
            .build()
            .map_err(|e| AssistantError::Llm(e.to_string()))?
            .into(),
    };
    Ok(message)
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn complete(&self, request: ChatRequest) -> Result<String> {
        info!(
            model = %self.model,
            message_count = request.messages.len(),
            api_key = %self.masked_key,
            "chat completion request"
        );
        let api_request = self.build_request(&request)?;

        let response = tokio::time::timeout(
            self.request_timeout,
            self.client.chat().create(api_request),
        )
        .await
        .map_err(|_| {
            AssistantError::Llm(format!(
                "completion timed out after {:?}",
                self.request_timeout
            ))
        })?
        .map_err(|e| AssistantError::Llm(e.to_string()))?;

        if let Some(usage) = &response.usage {
            info!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completion usage"
            );
        }

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AssistantError::Llm("empty completion response".to_string()))
    }

    async fn complete_stream(&self, request: ChatRequest) -> Result<TokenStream> {
        info!(
            model = %self.model,
            message_count = request.messages.len(),
            api_key = %self.masked_key,
            "chat completion stream request"
        );
        let api_request = self.build_request(&request)?;

        let mut stream = tokio::time::timeout(
            self.request_timeout,
            self.client.chat().create_stream(api_request),
        )
        .await
        .map_err(|_| {
            AssistantError::Llm(format!(
                "stream connection timed out after {:?}",
                self.request_timeout
            ))
        })?
        .map_err(|e| AssistantError::Llm(e.to_string()))?;

        // Bounded channel: an abandoned consumer closes the receiver, the
        // send fails, and the producer task drops the network stream.
        let (tx, rx) = mpsc::channel::<Result<String>>(32);
        let chunk_timeout = self.chunk_timeout;
        tokio::spawn(async move {
            loop {
                match tokio::time::timeout(chunk_timeout, stream.next()).await {
                    Err(_) => {
                        warn!("completion stream stalled, giving up");
                        let _ = tx
                            .send(Err(AssistantError::Llm(format!(
                                "stream stalled for more than {chunk_timeout:?}"
                            ))))
                            .await;
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        warn!(error = %e, "completion stream error");
                        let _ = tx.send(Err(AssistantError::Llm(e.to_string()))).await;
                        break;
                    }
                    Ok(Some(Ok(chunk))) => {
                        let content = chunk
                            .choices
                            .first()
                            .and_then(|choice| choice.delta.content.clone())
                            .unwrap_or_default();
                        if !content.is_empty() && tx.send(Ok(content)).await.is_err() {
                            // Consumer stopped iterating.
                            break;
                        }
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}
