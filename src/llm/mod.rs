pub mod cohere;
pub mod openai;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::{LlmBackend, LlmSettings, Secret};
use crate::models::DocumentType;

pub use cohere::CohereClient;
pub use openai::OpenAiClient;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn backend(&self) -> LlmBackend;

    async fn generate_text(
        &self,
        prompt: &str,
        max_output_tokens: usize,
        temperature: f32,
    ) -> Result<String>;

    async fn embed_text(&self, text: &str, document_type: DocumentType) -> Result<Vec<f32>>;
}

/// Model selection shared by every provider client.
#[derive(Clone, Debug)]
pub struct ModelSelection {
    pub generation_model: String,
    pub embedding_model: String,
    pub embedding_size: usize,
    pub input_max_characters: usize,
}

pub struct LlmProviderFactory<'a> {
    settings: &'a LlmSettings,
}

impl<'a> LlmProviderFactory<'a> {
    pub fn new(settings: &'a LlmSettings) -> Self {
        Self { settings }
    }

    pub fn generation_client(&self) -> Result<Arc<dyn LanguageModel>> {
        self.create(self.settings.generation_backend)
            .context("failed to build generation client")
    }

    pub fn embedding_client(&self) -> Result<Arc<dyn LanguageModel>> {
        self.create(self.settings.embedding_backend)
            .context("failed to build embedding client")
    }

    pub fn create(&self, backend: LlmBackend) -> Result<Arc<dyn LanguageModel>> {
        let models = ModelSelection {
            generation_model: self.settings.generation_model_id.clone(),
            embedding_model: self.settings.embedding_model_id.clone(),
            embedding_size: self.settings.embedding_model_size,
            input_max_characters: self.settings.input_max_characters,
        };

        let client: Arc<dyn LanguageModel> = match backend {
            LlmBackend::OpenAi => {
                let key = require_key(&self.settings.openai_api_key, "OPENAI_API_KEY")?;
                Arc::new(OpenAiClient::new(
                    key,
                    self.settings.openai_api_url.clone(),
                    models,
                ))
            }
            LlmBackend::Cohere => {
                let key = require_key(&self.settings.cohere_api_key, "COHERE_API_KEY")?;
                Arc::new(CohereClient::new(
                    key,
                    self.settings.cohere_api_url.clone(),
                    models,
                ))
            }
        };

        Ok(client)
    }
}

fn require_key(key: &Option<Secret>, name: &str) -> Result<Secret> {
    key.clone()
        .ok_or_else(|| anyhow::anyhow!("{name} is required for the selected backend"))
}

/// Trims and truncates to at most `max_characters` characters.
pub fn prepare_input(text: &str, max_characters: usize) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        anyhow::bail!("cannot send empty text input to the provider");
    }

    Ok(trimmed.chars().take(max_characters).collect())
}

pub(crate) fn ensure_embedding_size(vector: Vec<f32>, expected: usize) -> Result<Vec<f32>> {
    if vector.len() != expected {
        anyhow::bail!(
            "embedding has {} dimensions but EMBEDDING_MODEL_SIZE is {}",
            vector.len(),
            expected
        );
    }
    Ok(vector)
}

pub(crate) fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let message = json
            .pointer("/error/message")
            .or_else(|| json.get("error"))
            .or_else(|| json.get("message"))
            .and_then(|v| v.as_str());
        if let Some(message) = message {
            return message.to_string();
        }
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{base_env, load};

    #[test]
    fn input_is_trimmed_and_truncated_by_characters() {
        let prepared = prepare_input("  مرحبا بالعالم  ", 5).unwrap();
        assert_eq!(prepared, "مرحبا");
        assert!(prepare_input("   ", 10).is_err());
    }

    #[test]
    fn error_bodies_are_reduced_to_messages() {
        assert_eq!(
            normalize_err_body(r#"{"error":{"message":"Incorrect API key provided"}}"#),
            "Incorrect API key provided"
        );
        assert_eq!(normalize_err_body(r#"{"message":"invalid api token"}"#), "invalid api token");
        assert_eq!(normalize_err_body("  "), "<empty body>");
        assert_eq!(normalize_err_body("bad gateway"), "bad gateway");
    }

    #[test]
    fn factory_follows_configured_backends() {
        let settings = load(&base_env()).unwrap();
        let factory = LlmProviderFactory::new(&settings.llm);

        assert_eq!(factory.generation_client().unwrap().backend(), LlmBackend::OpenAi);
        assert_eq!(factory.embedding_client().unwrap().backend(), LlmBackend::Cohere);
    }

    #[test]
    fn factory_requires_backend_key() {
        let mut env = base_env();
        env.insert("EMBEDDING_BACKEND".to_string(), "OPENAI".to_string());
        env.remove("COHERE_API_KEY");
        let settings = load(&env).unwrap();

        let factory = LlmProviderFactory::new(&settings.llm);
        assert!(factory.create(LlmBackend::Cohere).is_err());
    }

    #[test]
    fn embedding_size_mismatch_is_rejected() {
        assert!(ensure_embedding_size(vec![0.1; 3], 3).is_ok());
        assert!(ensure_embedding_size(vec![0.1; 4], 3).is_err());
    }
}
