use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::VectorStore;
use crate::config::{DistanceMethod, VectorDbBackend};
use crate::models::CollectionInfo;

#[derive(Clone)]
pub struct QdrantStore {
    client: Client,
    base_url: String,
    distance: DistanceMethod,
}

#[derive(Debug, Deserialize)]
struct QdrantEnvelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct CollectionList {
    collections: Vec<CollectionDescription>,
}

#[derive(Debug, Deserialize)]
struct CollectionDescription {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CollectionDetails {
    points_count: Option<i64>,
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    vectors: Option<VectorParams>,
}

#[derive(Debug, Deserialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

pub fn qdrant_distance(distance: DistanceMethod) -> &'static str {
    match distance {
        DistanceMethod::Cosine => "Cosine",
        DistanceMethod::Dot => "Dot",
    }
}

impl QdrantStore {
    pub fn new(base_url: impl Into<String>, distance: DistanceMethod) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            distance,
        }
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{}", self.base_url, name)
    }

    async fn fetch_details(&self, name: &str) -> Result<Option<CollectionDetails>> {
        let response = self
            .client
            .get(self.collection_url(name))
            .send()
            .await
            .context("failed to contact qdrant while reading collection")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let details = response
            .error_for_status()
            .context("qdrant collection lookup returned non-success status")?
            .json::<QdrantEnvelope<CollectionDetails>>()
            .await
            .context("failed to decode qdrant collection response")?;

        Ok(Some(details.result))
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn backend(&self) -> VectorDbBackend {
        VectorDbBackend::Qdrant
    }

    async fn connect(&self) -> Result<()> {
        self.list_collections().await?;
        tracing::info!(url = %self.base_url, "connected to qdrant");
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let url = format!("{}/collections", self.base_url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("failed to contact qdrant while listing collections")?
            .error_for_status()
            .context("qdrant list collections returned non-success status")?
            .json::<QdrantEnvelope<CollectionList>>()
            .await
            .context("failed to decode qdrant collections response")?;

        Ok(response
            .result
            .collections
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.fetch_details(name).await?.is_some())
    }

    async fn create_collection(&self, name: &str, vector_size: usize, reset: bool) -> Result<bool> {
        if reset {
            self.delete_collection(name).await?;
        }

        if self.collection_exists(name).await? {
            return Ok(false);
        }

        let payload = json!({
            "vectors": {
                "size": vector_size,
                "distance": qdrant_distance(self.distance),
            }
        });

        self.client
            .put(self.collection_url(name))
            .json(&payload)
            .send()
            .await
            .context("failed to contact qdrant while creating collection")?
            .error_for_status()
            .context("qdrant failed to create collection")?;

        tracing::info!(collection = name, vector_size, "created qdrant collection");
        Ok(true)
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let Some(details) = self.fetch_details(name).await? else {
            return Ok(CollectionInfo {
                name: name.to_string(),
                exists: false,
                vector_size: None,
                distance: None,
                record_count: None,
                indexed: None,
            });
        };

        let vectors = details.config.params.vectors;
        Ok(CollectionInfo {
            name: name.to_string(),
            exists: true,
            vector_size: vectors.as_ref().map(|v| v.size),
            distance: vectors.map(|v| v.distance.to_ascii_lowercase()),
            record_count: details.points_count,
            indexed: Some(true),
        })
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        if !self.collection_exists(name).await? {
            return Ok(false);
        }

        self.client
            .delete(self.collection_url(name))
            .send()
            .await
            .context("failed to contact qdrant while deleting collection")?
            .error_for_status()
            .context("qdrant failed to delete collection")?;

        tracing::info!(collection = name, "deleted qdrant collection");
        Ok(true)
    }

    async fn optimize_collection(&self, _name: &str) -> Result<bool> {
        // Qdrant maintains its HNSW index on its own.
        Ok(false)
    }
}
