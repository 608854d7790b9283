pub mod pgvector;
pub mod qdrant;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{Literal, VectorDbBackend, VectorDbSettings};
use crate::db::Database;
use crate::models::CollectionInfo;

pub use pgvector::PgVectorStore;
pub use qdrant::QdrantStore;

/// Collection management for a vector database backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend(&self) -> VectorDbBackend;

    fn backend_name(&self) -> &'static str {
        self.backend().as_str()
    }

    /// Verifies the backend is reachable and prepared for use.
    async fn connect(&self) -> Result<()>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Returns `true` if a collection was created. With `reset`, an existing
    /// collection is dropped first.
    async fn create_collection(&self, name: &str, vector_size: usize, reset: bool) -> Result<bool>;

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo>;

    /// Returns `true` if the collection existed and was removed.
    async fn delete_collection(&self, name: &str) -> Result<bool>;

    /// Returns `true` if an index was built.
    async fn optimize_collection(&self, name: &str) -> Result<bool>;
}

pub fn collection_name(vector_size: usize, project_id: i64) -> String {
    format!("collection_{}_{}", vector_size, project_id)
}

pub fn create_vector_store(
    settings: &VectorDbSettings,
    db: &Database,
) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match settings.backend {
        VectorDbBackend::Qdrant => {
            Arc::new(QdrantStore::new(settings.url.clone(), settings.distance_method))
        }
        VectorDbBackend::PgVector => Arc::new(PgVectorStore::new(
            db.pool().clone(),
            settings.distance_method,
            settings.pgvec_index_threshold,
        )),
    };

    tracing::info!(backend = store.backend_name(), "vector store selected");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{base_env, load};

    #[test]
    fn collection_names_include_vector_size() {
        assert_eq!(collection_name(384, 7), "collection_384_7");
    }

    #[tokio::test]
    async fn factory_follows_configured_backend() {
        let mut env = base_env();
        let settings = load(&env).unwrap();
        let db = Database::connect_lazy(&settings.database);
        let store = create_vector_store(&settings.vector_db, &db).unwrap();
        assert_eq!(store.backend(), VectorDbBackend::PgVector);

        env.insert("VECTOR_DB_BACKEND".to_string(), "QDRANT".to_string());
        let settings = load(&env).unwrap();
        let store = create_vector_store(&settings.vector_db, &db).unwrap();
        assert_eq!(store.backend_name(), "QDRANT");
    }
}
