use serde::{Deserialize, Serialize};

/// Machine-readable outcome carried in every API response body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSignal {
    #[serde(rename = "file_validated_successfully")]
    FileValidatedSuccess,
    FileTypeNotSupported,
    FileSizeExceeded,
    FileUploadSuccess,
    FileUploadFailed,
    #[serde(rename = "not_found_files")]
    NoFilesError,
    #[serde(rename = "no_file_found_with_this_id")]
    FileIdError,
    ProjectNotFound,
    InvalidProjectId,
    VectordbCollectionRetrieved,
    VectordbCollectionDeleted,
    VectordbCollectionOptimized,
    VectordbError,
    GenerationSuccess,
    GenerationFailed,
    EmbeddingSuccess,
    EmbeddingFailed,
    InputEmpty,
    InvalidGenerationParameters,
}

impl ResponseSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseSignal::FileValidatedSuccess => "file_validated_successfully",
            ResponseSignal::FileTypeNotSupported => "file_type_not_supported",
            ResponseSignal::FileSizeExceeded => "file_size_exceeded",
            ResponseSignal::FileUploadSuccess => "file_upload_success",
            ResponseSignal::FileUploadFailed => "file_upload_failed",
            ResponseSignal::NoFilesError => "not_found_files",
            ResponseSignal::FileIdError => "no_file_found_with_this_id",
            ResponseSignal::ProjectNotFound => "project_not_found",
            ResponseSignal::InvalidProjectId => "invalid_project_id",
            ResponseSignal::VectordbCollectionRetrieved => "vectordb_collection_retrieved",
            ResponseSignal::VectordbCollectionDeleted => "vectordb_collection_deleted",
            ResponseSignal::VectordbCollectionOptimized => "vectordb_collection_optimized",
            ResponseSignal::VectordbError => "vectordb_error",
            ResponseSignal::GenerationSuccess => "generation_success",
            ResponseSignal::GenerationFailed => "generation_failed",
            ResponseSignal::EmbeddingSuccess => "embedding_success",
            ResponseSignal::EmbeddingFailed => "embedding_failed",
            ResponseSignal::InputEmpty => "input_empty",
            ResponseSignal::InvalidGenerationParameters => "invalid_generation_parameters",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_names_match_as_str() {
        for signal in [
            ResponseSignal::FileValidatedSuccess,
            ResponseSignal::FileSizeExceeded,
            ResponseSignal::FileUploadFailed,
            ResponseSignal::NoFilesError,
            ResponseSignal::FileIdError,
            ResponseSignal::VectordbCollectionRetrieved,
            ResponseSignal::InputEmpty,
            ResponseSignal::InvalidProjectId,
            ResponseSignal::InvalidGenerationParameters,
        ] {
            let json = serde_json::to_value(signal).unwrap();
            assert_eq!(json.as_str(), Some(signal.as_str()));
        }
    }
}
