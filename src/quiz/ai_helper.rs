use std::time::Duration;

use async_trait::async_trait;
use chatgpt::client::ChatGPT;
use chatgpt::config::{ChatGPTEngine, ModelConfigurationBuilder};
use chatgpt::types::{ChatMessage, CompletionResponse, Role};
use log::{debug, warn};
use url::Url;

use crate::config::{Config, ProviderConfig, ProviderKind};
use crate::error::QuizError;

const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions";
const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Something that turns a prompt into a text reply.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, QuizError>;
}

/// An OpenAI-compatible chat endpoint driven through `chatgpt_rs`.
pub struct ChatGptBackend {
    name: &'static str,
    chat_gpt: ChatGPT,
}

impl ChatGptBackend {
    pub fn new(provider: &ProviderConfig, timeout: Duration, temperature: f32) -> Result<Self, QuizError> {
        let (name, engine, api_url) = match provider.kind {
            ProviderKind::Groq => ("groq", ChatGPTEngine::Custom("llama-3.3-70b-versatile"), GROQ_URL),
            ProviderKind::Gemini => ("gemini", ChatGPTEngine::Custom("gemini-1.5-flash"), GEMINI_URL),
            ProviderKind::OpenAi => ("openai", ChatGPTEngine::Gpt35Turbo, OPENAI_URL),
        };
        let unavailable = |err: String| QuizError::GenerationUnavailable(format!("{name}: {err}"));

        let api_url = Url::parse(api_url).map_err(|e| unavailable(e.to_string()))?;
        let config = ModelConfigurationBuilder::default()
            .engine(engine)
            .api_url(api_url)
            .timeout(timeout)
            .temperature(temperature)
            .build()
            .map_err(|e| unavailable(e.to_string()))?;
        let chat_gpt = ChatGPT::new_with_config(provider.api_key.clone(), config)
            .map_err(|e| unavailable(e.to_string()))?;

        Ok(Self { name, chat_gpt })
    }
}

#[async_trait]
impl CompletionBackend for ChatGptBackend {
    fn name(&self) -> &str {
        self.name
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, QuizError> {
        debug!("Sending {} prompt characters to {}", prompt.len(), self.name);
        let history = vec![
            ChatMessage {
                role: Role::System,
                content: system.to_string(),
            },
            ChatMessage {
                role: Role::User,
                content: prompt.to_string(),
            },
        ];

        let response: CompletionResponse = self
            .chat_gpt
            .send_history(&history)
            .await
            .map_err(|e| QuizError::GenerationUnavailable(format!("{}: {e}", self.name)))?;
        let content = response.message().content.clone();

        debug!("Completion from {}: {} characters", self.name, content.len());
        Ok(content)
    }
}

/// Builds a client for every configured provider, in priority order. A
/// provider whose client cannot be built is skipped.
pub fn backends_from_config(config: &Config, temperature: f32) -> Vec<Box<dyn CompletionBackend>> {
    config
        .providers
        .iter()
        .filter_map(|provider| match ChatGptBackend::new(provider, config.llm_timeout, temperature) {
            Ok(backend) => Some(Box::new(backend) as Box<dyn CompletionBackend>),
            Err(err) => {
                warn!("Skipping provider: {err}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_one_backend_per_provider_in_order() {
        let config = Config {
            providers: vec![
                ProviderConfig {
                    kind: ProviderKind::Gemini,
                    api_key: "g".to_string(),
                },
                ProviderConfig {
                    kind: ProviderKind::OpenAi,
                    api_key: "o".to_string(),
                },
            ],
            ..Config::default()
        };

        let names: Vec<_> = backends_from_config(&config, 0.7)
            .iter()
            .map(|b| b.name().to_string())
            .collect();
        assert_eq!(names, vec!["gemini", "openai"]);
    }

    #[test]
    fn no_keys_means_no_backends() {
        assert!(backends_from_config(&Config::default(), 0.7).is_empty());
    }
}
