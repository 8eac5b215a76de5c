use async_trait::async_trait;
use llm::builder::{LLMBackend, LLMBuilder};
use llm::chat::ChatMessage;
use serde_json::{Map, Value};
use thiserror::Error;

use archbot_core::Settings;

use crate::prompt;

/// What the caller wants from a generation call. Decided by the caller,
/// never guessed from the prompt text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Design a new architecture from requirements
    Generate,
    /// Revise an existing architecture (follow-up request or rule repair)
    Adjust,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub kind: RequestKind,
    pub text: String,
}

impl GenerationRequest {
    pub fn generate(requirements: impl Into<String>) -> Self {
        GenerationRequest {
            kind: RequestKind::Generate,
            text: requirements.into(),
        }
    }

    pub fn adjust(instructions: impl Into<String>) -> Self {
        GenerationRequest {
            kind: RequestKind::Adjust,
            text: instructions.into(),
        }
    }
}

/// A model answer: either already a JSON object, or text still to be parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    Structured(Map<String, Value>),
    Raw(String),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("build LLM: {0}")]
    Build(String),
    #[error("chat: {0}")]
    Chat(String),
    #[error("LLM returned empty text")]
    EmptyResponse,
    #[error("LLM returned no text")]
    NoText,
    #[error("{0}")]
    Other(String),
}

/// The language model as seen by the validation loop.
///
/// Implementations own transport, retries and timeouts. Both calls may fail;
/// the loop decides what a failure means.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Produce an architecture for a generation or adjustment request.
    async fn generate(&self, request: &GenerationRequest) -> Result<ModelOutput, GatewayError>;

    /// Answer a rule-evaluation prompt.
    async fn evaluate(&self, prompt: &str) -> Result<ModelOutput, GatewayError>;
}

fn map_backend(provider: &str) -> Result<LLMBackend, GatewayError> {
    match provider {
        "openai" => Ok(LLMBackend::OpenAI),
        "anthropic" => Ok(LLMBackend::Anthropic),
        "google" => Ok(LLMBackend::Google),
        "ollama" => Ok(LLMBackend::Ollama),
        "groq" => Ok(LLMBackend::Groq),
        "mistral" => Ok(LLMBackend::Mistral),
        "deepseek" => Ok(LLMBackend::DeepSeek),
        other => Err(GatewayError::UnknownProvider(other.to_string())),
    }
}

/// Gateway backed by the `llm` crate, configured from `Settings`.
pub struct LlmGateway {
    settings: Settings,
}

impl LlmGateway {
    pub fn new(settings: Settings) -> Result<Self, GatewayError> {
        map_backend(&settings.provider)?;
        Ok(LlmGateway { settings })
    }

    pub fn model_name(&self) -> &str {
        &self.settings.model
    }
}

#[async_trait]
impl ModelGateway for LlmGateway {
    async fn generate(&self, request: &GenerationRequest) -> Result<ModelOutput, GatewayError> {
        let user_msg = match request.kind {
            RequestKind::Generate => prompt::generation_prompt(&request.text),
            RequestKind::Adjust => prompt::adjustment_prompt(&request.text),
        };
        tracing::info!(
            provider = %self.settings.provider,
            model = %self.settings.model,
            kind = ?request.kind,
            "requesting architecture"
        );
        let text = chat(&self.settings, &prompt::architect_system_prompt(), &user_msg).await?;
        Ok(ModelOutput::Raw(text))
    }

    async fn evaluate(&self, prompt: &str) -> Result<ModelOutput, GatewayError> {
        let text = chat(&self.settings, &prompt::evaluator_system_prompt(), prompt).await?;
        Ok(ModelOutput::Raw(text))
    }
}

async fn chat(settings: &Settings, system: &str, user_msg: &str) -> Result<String, GatewayError> {
    let backend = map_backend(&settings.provider)?;

    let mut builder = LLMBuilder::new()
        .backend(backend)
        .model(&settings.model)
        .system(system)
        .temperature(settings.temperature)
        .timeout_seconds(settings.timeout_secs);

    if !settings.api_key.is_empty() {
        builder = builder.api_key(&settings.api_key);
    }

    let llm = builder
        .build()
        .map_err(|e| GatewayError::Build(e.to_string()))?;

    let messages = vec![ChatMessage::user().content(user_msg).build()];

    let response = llm
        .chat(&messages)
        .await
        .map_err(|e| GatewayError::Chat(e.to_string()))?;

    match response.text() {
        Some(text) if !text.trim().is_empty() => {
            tracing::debug!(chars = text.len(), "LLM reply received");
            Ok(text)
        }
        Some(_) => Err(GatewayError::EmptyResponse),
        None => Err(GatewayError::NoText),
    }
}
