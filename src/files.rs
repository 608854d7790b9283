use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

use crate::config::FileSettings;
use crate::signals::ResponseSignal;

const RANDOM_PREFIX_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload exceeds the {limit} byte limit")]
    SizeExceeded { limit: u64 },
    #[error("failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    pub fn signal(&self) -> ResponseSignal {
        match self {
            UploadError::SizeExceeded { .. } => ResponseSignal::FileSizeExceeded,
            UploadError::Io(_) => ResponseSignal::FileUploadFailed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    /// Stored file name, unique within the project directory.
    pub file_id: String,
    pub size: u64,
    pub sha256: String,
}

/// Checks an upload's declared metadata before any bytes are written.
pub fn validate_file(
    settings: &FileSettings,
    content_type: Option<&str>,
    declared_size: Option<u64>,
) -> Result<ResponseSignal, ResponseSignal> {
    match content_type {
        Some(content_type) if settings.is_allowed_type(content_type) => {}
        _ => return Err(ResponseSignal::FileTypeNotSupported),
    }

    if let Some(size) = declared_size {
        if size > settings.max_size_bytes() {
            return Err(ResponseSignal::FileSizeExceeded);
        }
    }

    Ok(ResponseSignal::FileValidatedSuccess)
}

pub fn clean_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        .collect();

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

pub fn project_dir(settings: &FileSettings, project_id: i64) -> PathBuf {
    settings.files_dir.join(project_id.to_string())
}

fn random_prefix() -> String {
    Uuid::new_v4().simple().to_string()[..RANDOM_PREFIX_LEN].to_string()
}

/// Picks `{random}_{clean_name}` inside `dir`, retrying until the name is unused.
pub async fn unique_file_path(dir: &Path, original_name: &str) -> std::io::Result<(PathBuf, String)> {
    let clean = clean_file_name(original_name);
    loop {
        let file_id = format!("{}_{}", random_prefix(), clean);
        let path = dir.join(&file_id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok((path, file_id));
        }
    }
}

/// Streams an upload to disk, enforcing the size limit as bytes arrive.
pub struct UploadWriter {
    file: BufWriter<File>,
    path: PathBuf,
    file_id: String,
    hasher: Sha256,
    written: u64,
    max_bytes: u64,
}

impl UploadWriter {
    pub async fn create(
        settings: &FileSettings,
        project_id: i64,
        original_name: &str,
    ) -> Result<Self, UploadError> {
        let dir = project_dir(settings, project_id);
        tokio::fs::create_dir_all(&dir).await?;

        let (path, file_id) = unique_file_path(&dir, original_name).await?;
        let file = File::create(&path).await?;

        Ok(Self {
            file: BufWriter::with_capacity(settings.default_chunk_size, file),
            path,
            file_id,
            hasher: Sha256::new(),
            written: 0,
            max_bytes: settings.max_size_bytes(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Rejects the chunk without writing it if it would cross the limit.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        let next = self.written + chunk.len() as u64;
        if next > self.max_bytes {
            return Err(UploadError::SizeExceeded {
                limit: self.max_bytes,
            });
        }

        self.file.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.written = next;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<StoredFile, UploadError> {
        if let Err(err) = self.file.flush().await {
            self.abort().await;
            return Err(err.into());
        }

        tracing::debug!(path = %self.path.display(), bytes = self.written, "upload stored");
        Ok(StoredFile {
            path: self.path,
            file_id: self.file_id,
            size: self.written,
            sha256: format!("{:x}", self.hasher.finalize()),
        })
    }

    /// Drops the partial file. Removal errors are logged, not returned.
    pub async fn abort(self) {
        let Self { file, path, .. } = self;
        drop(file);
        discard(&path).await;
    }
}

/// Removes a stored upload that will not be recorded. Removal errors are
/// logged, not returned.
pub async fn discard(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), "failed to remove unrecorded upload: {}", err);
    }
}
