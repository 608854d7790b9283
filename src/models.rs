use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signals::ResponseSignal;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub project_id: i64,
    pub project_uuid: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    File,
}

impl AssetType {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetType::File => "file",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "file" => Some(AssetType::File),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetConfig {
    pub original_name: String,
    pub content_type: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub asset_id: i64,
    pub asset_uuid: Uuid,
    pub asset_type: AssetType,
    pub asset_name: String,
    pub asset_size: i64,
    pub asset_config: AssetConfig,
    pub asset_project_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAsset {
    pub asset_type: AssetType,
    pub asset_name: String,
    pub asset_size: i64,
    pub asset_config: AssetConfig,
    pub asset_project_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeResponse {
    pub app_name: String,
    pub app_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub database: bool,
    pub schema_version: Option<i64>,
    pub generation_backend: String,
    pub embedding_backend: String,
    pub vector_db_backend: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub signal: ResponseSignal,
    pub file_id: String,
    pub asset_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetListResponse {
    pub signal: ResponseSignal,
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetResponse {
    pub signal: ResponseSignal,
    pub asset: Asset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub max_output_tokens: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub signal: ResponseSignal,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    #[default]
    Document,
    Query,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub text: String,
    #[serde(default)]
    pub document_type: DocumentType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub signal: ResponseSignal,
    pub size: usize,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    pub exists: bool,
    pub vector_size: Option<usize>,
    pub distance: Option<String>,
    pub record_count: Option<i64>,
    pub indexed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionResponse {
    pub signal: ResponseSignal,
    pub collection: CollectionInfo,
}

/// Outcome of a delete or optimize request; `applied` is false when there was nothing to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexActionResponse {
    pub signal: ResponseSignal,
    pub collection: String,
    pub applied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_type_rejects_unknown_db_values() {
        assert_eq!(AssetType::from_db(AssetType::File.as_str()), Some(AssetType::File));
        assert_eq!(AssetType::from_db("image"), None);
        assert_eq!(AssetType::from_db("FILE"), None);
    }
}
