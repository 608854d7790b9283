use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ensure_embedding_size, normalize_err_body, prepare_input, LanguageModel, ModelSelection};
use crate::config::{LlmBackend, Secret};
use crate::models::DocumentType;

#[derive(Clone)]
pub struct CohereClient {
    client: Client,
    api_key: Secret,
    base_url: String,
    models: ModelSelection,
}

#[derive(Serialize)]
struct ChatReq<'a> {
    model: &'a str,
    message: &'a str,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResp {
    text: String,
}

#[derive(Serialize)]
struct EmbedReq<'a> {
    model: &'a str,
    texts: [&'a str; 1],
    input_type: &'static str,
}

#[derive(Deserialize)]
struct EmbedResp {
    embeddings: Vec<Vec<f32>>,
}

/// Cohere embeds documents and search queries into different spaces.
pub fn input_type(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::Document => "search_document",
        DocumentType::Query => "search_query",
    }
}

impl CohereClient {
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
                .context("COHERE_API_KEY contains characters not allowed in a header")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl LanguageModel for CohereClient {
    fn backend(&self) -> LlmBackend {
        LlmBackend::Cohere
    }

    async fn generate_text(
        &self,
        prompt: &str,
        max_output_tokens: usize,
        temperature: f32,
    ) -> Result<String> {
        let prompt = prepare_input(prompt, self.models.input_max_characters)?;

        tracing::debug!(model = %self.models.generation_model, "cohere chat request");

        let url = format!("{}/chat", self.base_url);
        let response = self
            .client
            .post(url)
            .headers(self.headers()?)
            .json(&ChatReq {
                model: &self.models.generation_model,
                message: &prompt,
                max_tokens: max_output_tokens,
                temperature,
            })
            .send()
            .await
            .context("failed to call cohere chat endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("cohere /chat returned {status}: {}", normalize_err_body(&body));
        }

        let response = response
            .json::<ChatResp>()
            .await
            .context("failed to decode cohere chat response")?;

        Ok(response.text.trim().to_string())
    }

    async fn embed_text(&self, text: &str, document_type: DocumentType) -> Result<Vec<f32>> {
        let input = prepare_input(text, self.models.input_max_characters)?;

        let url = format!("{}/embed", self.base_url);
        let response = self
            .client
            .post(url)
            .headers(self.headers()?)
            .json(&EmbedReq {
                model: &self.models.embedding_model,
                texts: [input.as_str()],
                input_type: input_type(document_type),
            })
            .send()
            .await
            .context("failed to call cohere embed endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("cohere /embed returned {status}: {}", normalize_err_body(&body));
        }

        let response = response
            .json::<EmbedResp>()
            .await
            .context("failed to decode cohere embed response")?;

        let vector = response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("cohere /embed returned empty embeddings array"))?;

        ensure_embedding_size(vector, self.models.embedding_size)
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::test_support::spawn_mock;

    fn models() -> ModelSelection {
        ModelSelection {
            generation_model: "command-r".to_string(),
            embedding_model: "embed-multilingual-light-v3.0".to_string(),
            embedding_size: 2,
            input_max_characters: 1024,
        }
    }

    #[tokio::test]
    async fn embed_passes_query_input_type() {
        let router = Router::new().route(
            "/embed",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["input_type"], "search_query");
                assert_eq!(body["texts"], json!(["what is rag?"]));
                Json(json!({ "id": "e1", "embeddings": [[0.5, -0.5]] }))
            }),
        );
        let base_url = spawn_mock(router).await;

        let client = CohereClient::new(Secret::new("co-test"), base_url, models());
        let vector = client
            .embed_text(" what is rag? ", DocumentType::Query)
            .await
            .unwrap();
        assert_eq!(vector, vec![0.5, -0.5]);
    }

    #[tokio::test]
    async fn generate_reads_text_field() {
        let router = Router::new().route(
            "/chat",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "command-r");
                Json(json!({ "text": "Retrieval-augmented generation.", "generation_id": "g1" }))
            }),
        );
        let base_url = spawn_mock(router).await;

        let client = CohereClient::new(Secret::new("co-test"), base_url, models());
        let text = client.generate_text("define rag", 20, 0.0).await.unwrap();
        assert_eq!(text, "Retrieval-augmented generation.");
    }

    #[test]
    fn document_types_map_to_cohere_input_types() {
        assert_eq!(input_type(DocumentType::Document), "search_document");
        assert_eq!(input_type(DocumentType::Query), "search_query");
    }
}
