use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ensure_embedding_size, normalize_err_body, prepare_input, LanguageModel, ModelSelection};
use crate::config::{LlmBackend, Secret};
use crate::models::DocumentType;

#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: Secret,
    base_url: String,
    models: ModelSelection,
}

#[derive(Serialize)]
struct ChatReq<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResp {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbedReq<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResp {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

impl OpenAiClient {
    pub fn new(api_key: Secret, base_url: impl Into<String>, models: ModelSelection) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            models,
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key.expose()))
                .context("OPENAI_API_KEY contains characters not allowed in a header")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    fn backend(&self) -> LlmBackend {
        LlmBackend::OpenAi
    }

    async fn generate_text(
        &self,
        prompt: &str,
        max_output_tokens: usize,
        temperature: f32,
    ) -> Result<String> {
        let prompt = prepare_input(prompt, self.models.input_max_characters)?;

        tracing::debug!(model = %self.models.generation_model, "openai chat request");

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(url)
            .headers(self.headers()?)
            .json(&ChatReq {
                model: &self.models.generation_model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: &prompt,
                }],
                max_tokens: max_output_tokens,
                temperature,
            })
            .send()
            .await
            .context("failed to call openai chat completions endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "openai /chat/completions returned {status}: {}",
                normalize_err_body(&body)
            );
        }

        let response = response
            .json::<ChatResp>()
            .await
            .context("failed to decode openai chat completions response")?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("openai returned no completion choices"))
    }

    async fn embed_text(&self, text: &str, _document_type: DocumentType) -> Result<Vec<f32>> {
        let input = prepare_input(text, self.models.input_max_characters)?;

        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(url)
            .headers(self.headers()?)
            .json(&EmbedReq {
                model: &self.models.embedding_model,
                input: &input,
            })
            .send()
            .await
            .context("failed to call openai embeddings endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "openai /embeddings returned {status}: {}",
                normalize_err_body(&body)
            );
        }

        let response = response
            .json::<EmbedResp>()
            .await
            .context("failed to decode openai embeddings response")?;

        let vector = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("openai /embeddings returned empty data array"))?;

        ensure_embedding_size(vector, self.models.embedding_size)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::test_support::spawn_mock;

    fn models() -> ModelSelection {
        ModelSelection {
            generation_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_size: 3,
            input_max_characters: 16,
        }
    }

    #[tokio::test]
    async fn generate_sends_truncated_prompt_and_reads_first_choice() {
        let router = Router::new().route(
            "/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer sk-test");
                assert_eq!(body["model"], "gpt-4o-mini");
                assert_eq!(body["max_tokens"], 50);
                assert_eq!(body["messages"][0]["content"], "0123456789abcdef");
                Json(json!({
                    "choices": [{ "message": { "role": "assistant", "content": "  hi there \n" } }]
                }))
            }),
        );
        let base_url = spawn_mock(router).await;

        let client = OpenAiClient::new(Secret::new("sk-test"), base_url, models());
        let text = client
            .generate_text("0123456789abcdefXYZ", 50, 0.1)
            .await
            .unwrap();
        assert_eq!(text, "hi there");
    }

    #[tokio::test]
    async fn embed_reports_provider_error_message() {
        let router = Router::new().route(
            "/embeddings",
            post(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": { "message": "Incorrect API key provided" } })),
                )
            }),
        );
        let base_url = spawn_mock(router).await;

        let client = OpenAiClient::new(Secret::new("sk-bad"), base_url, models());
        let err = client
            .embed_text("hello", DocumentType::Query)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Incorrect API key provided"));
    }

    #[tokio::test]
    async fn embed_returns_vector_of_configured_size() {
        let router = Router::new().route(
            "/embeddings",
            post(|| async { Json(json!({ "data": [{ "embedding": [0.1, 0.2, 0.3] }] })) }),
        );
        let base_url = spawn_mock(router).await;

        let client = OpenAiClient::new(Secret::new("sk-test"), base_url, models());
        let vector = client
            .embed_text("hello", DocumentType::Document)
            .await
            .unwrap();
        assert_eq!(vector.len(), 3);
    }
}
