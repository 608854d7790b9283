use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;

const MEGABYTE: u64 = 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting {key}")]
    Missing { key: &'static str },

    #[error("{key}={value:?} is not one of [{}]", .allowed.join(", "))]
    InvalidLiteral {
        key: &'static str,
        value: String,
        allowed: Vec<&'static str>,
    },

    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{key}={value:?} could not be parsed: {reason}")]
    Parse {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read env file {path}: {reason}")]
    EnvFile { path: String, reason: String },
}

impl ConfigError {
    pub fn key(&self) -> Option<&'static str> {
        match self {
            ConfigError::Missing { key }
            | ConfigError::InvalidLiteral { key, .. }
            | ConfigError::Invalid { key, .. }
            | ConfigError::Parse { key, .. } => Some(*key),
            ConfigError::EnvFile { .. } => None,
        }
    }
}

/// A setting whose accepted values form a closed set of literals.
pub trait Literal: Copy + Sized + 'static {
    const VARIANTS: &'static [Self];

    fn as_str(self) -> &'static str;

    fn allowed() -> Vec<&'static str> {
        Self::VARIANTS.iter().map(|v| v.as_str()).collect()
    }

    /// Exact, case-sensitive match after trimming surrounding whitespace.
    fn parse_literal(key: &'static str, raw: &str) -> Result<Self, ConfigError> {
        let value = raw.trim();
        Self::VARIANTS
            .iter()
            .copied()
            .find(|variant| variant.as_str() == value)
            .ok_or_else(|| ConfigError::InvalidLiteral {
                key,
                value: value.to_string(),
                allowed: Self::allowed(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LlmBackend {
    #[serde(rename = "COHERE")]
    Cohere,
    #[serde(rename = "OPENAI")]
    OpenAi,
}

impl Literal for LlmBackend {
    const VARIANTS: &'static [Self] = &[LlmBackend::Cohere, LlmBackend::OpenAi];

    fn as_str(self) -> &'static str {
        match self {
            LlmBackend::Cohere => "COHERE",
            LlmBackend::OpenAi => "OPENAI",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VectorDbBackend {
    #[serde(rename = "QDRANT")]
    Qdrant,
    #[serde(rename = "PGVECTOR")]
    PgVector,
}

impl Literal for VectorDbBackend {
    const VARIANTS: &'static [Self] = &[VectorDbBackend::Qdrant, VectorDbBackend::PgVector];

    fn as_str(self) -> &'static str {
        match self {
            VectorDbBackend::Qdrant => "QDRANT",
            VectorDbBackend::PgVector => "PGVECTOR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMethod {
    Cosine,
    Dot,
}

impl Literal for DistanceMethod {
    const VARIANTS: &'static [Self] = &[DistanceMethod::Cosine, DistanceMethod::Dot];

    fn as_str(self) -> &'static str {
        match self {
            DistanceMethod::Cosine => "cosine",
            DistanceMethod::Dot => "dot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Literal for LogFormat {
    const VARIANTS: &'static [Self] = &[LogFormat::Text, LogFormat::Json];

    fn as_str(self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        }
    }
}

/// Credential value. `Debug` never prints the contents.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn preview(&self) -> String {
        let n = self.0.chars().count().min(4);
        let head: String = self.0.chars().take(n).collect();
        format!("{}...({} chars)", head, self.0.chars().count())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

#[derive(Clone, Debug)]
pub struct AppIdentity {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug)]
pub struct FileSettings {
    pub allowed_types: Vec<String>,
    /// Upper bound for a single upload, in megabytes.
    pub max_size_mb: u64,
    max_size_bytes: u64,
    /// Write buffer size used while streaming an upload to disk, in bytes.
    pub default_chunk_size: usize,
    pub files_dir: PathBuf,
}

impl FileSettings {
    /// Fails when the megabyte limit does not fit in bytes.
    pub fn new(
        allowed_types: Vec<String>,
        max_size_mb: u64,
        default_chunk_size: usize,
        files_dir: PathBuf,
    ) -> Result<Self, ConfigError> {
        let max_size_bytes = max_size_mb
            .checked_mul(MEGABYTE)
            .ok_or_else(|| ConfigError::Invalid {
                key: "FILE_MAX_SIZE",
                value: max_size_mb.to_string(),
                reason: "too large to express in bytes".to_string(),
            })?;

        Ok(Self {
            allowed_types,
            max_size_mb,
            max_size_bytes,
            default_chunk_size,
            files_dir,
        })
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub fn is_allowed_type(&self, content_type: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.allowed_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&essence))
    }
}

#[derive(Clone, Debug)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub max_connections: u32,
}

impl DatabaseSettings {
    pub fn redacted_url(&self) -> String {
        format!(
            "postgres://{}:***@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }
}

#[derive(Clone, Debug)]
pub struct LlmSettings {
    pub generation_backend: LlmBackend,
    pub embedding_backend: LlmBackend,
    pub openai_api_key: Option<Secret>,
    pub openai_api_url: String,
    pub cohere_api_key: Option<Secret>,
    pub cohere_api_url: String,
    pub generation_model_literal: Vec<String>,
    pub generation_model_id: String,
    pub embedding_model_id: String,
    pub embedding_model_size: usize,
    pub input_max_characters: usize,
    pub generation_max_tokens: usize,
    pub generation_temperature: f32,
}

#[derive(Clone, Debug)]
pub struct VectorDbSettings {
    pub backend_literal: Vec<VectorDbBackend>,
    pub backend: VectorDbBackend,
    pub url: String,
    pub distance_method: DistanceMethod,
    pub pgvec_index_threshold: i64,
}

#[derive(Clone, Debug)]
pub struct LocaleSettings {
    pub primary_lang: String,
    pub default_lang: String,
}

#[derive(Clone, Debug)]
pub struct ServerSettings {
    pub host: IpAddr,
    pub port: u16,
    pub workers: usize,
}

impl ServerSettings {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Clone, Debug)]
pub struct LoggingSettings {
    pub filter: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub app: AppIdentity,
    pub files: FileSettings,
    pub database: DatabaseSettings,
    pub llm: LlmSettings,
    pub vector_db: VectorDbSettings,
    pub locale: LocaleSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Merges `.env` from the working directory (without overriding the
    /// process environment) and loads from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(err) if err.not_found() => {}
            Err(err) => {
                return Err(ConfigError::EnvFile {
                    path: ".env".to_string(),
                    reason: err.to_string(),
                })
            }
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads from a specific env file. Process environment variables take
    /// precedence over entries in the file.
    pub fn from_env_file(path: &Path) -> Result<Self, ConfigError> {
        let entries = read_env_file(path)?;
        Self::from_lookup(|key| env::var(key).ok().or_else(|| entries.get(key).cloned()))
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let src = Source { lookup };

        let app = AppIdentity {
            name: src.string_or("APP_NAME", "mini-rag"),
            version: src.string_or("APP_VERSION", env!("CARGO_PKG_VERSION")),
        };

        let files = load_files(&src)?;
        let database = load_database(&src)?;
        let llm = load_llm(&src)?;
        let vector_db = load_vector_db(&src)?;

        let locale = LocaleSettings {
            primary_lang: src.lang("PRIMARY_LANG")?,
            default_lang: src.lang("DEFAULT_LANG")?,
        };

        let host_raw = src.string_or("SERVER_HOST", "0.0.0.0");
        let host = IpAddr::from_str(&host_raw).map_err(|e| ConfigError::Parse {
            key: "SERVER_HOST",
            value: host_raw.clone(),
            reason: e.to_string(),
        })?;
        let server = ServerSettings {
            host,
            port: src.parse_or(&["SERVER_PORT"], 8000u16)?,
            workers: src.positive_or(&["SERVER_WORKERS"], 4usize)?,
        };

        let logging = LoggingSettings {
            filter: src.string_or("RUST_LOG", "info"),
            format: src.literal_or("LOG_FORMAT", LogFormat::Text)?,
        };

        Ok(Self {
            app,
            files,
            database,
            llm,
            vector_db,
            locale,
            server,
            logging,
        })
    }

    pub fn log_summary(&self) {
        fn preview_opt(secret: &Option<Secret>) -> String {
            match secret {
                Some(s) if !s.expose().is_empty() => s.preview(),
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!(
            app = %self.app.name,
            version = %self.app.version,
            "config loaded"
        );
        tracing::info!("  database: {}", self.database.redacted_url());
        tracing::info!(
            "  generation: {} ({})",
            self.llm.generation_backend.as_str(),
            self.llm.generation_model_id
        );
        tracing::info!(
            "  embedding: {} ({}, size {})",
            self.llm.embedding_backend.as_str(),
            self.llm.embedding_model_id,
            self.llm.embedding_model_size
        );
        tracing::info!("  OPENAI_API_KEY: {}", preview_opt(&self.llm.openai_api_key));
        tracing::info!("  COHERE_API_KEY: {}", preview_opt(&self.llm.cohere_api_key));
        tracing::info!(
            "  vector db: {} (distance {})",
            self.vector_db.backend.as_str(),
            self.vector_db.distance_method.as_str()
        );
        tracing::info!(
            "  server: {} workers={}",
            self.server.bind_addr(),
            self.server.workers
        );
    }

    /// Redacted view for `minirag config check`.
    pub fn summary(&self) -> serde_json::Value {
        let secret_state = |s: &Option<Secret>| if s.is_some() { "<set>" } else { "<not set>" };

        json!({
            "app": { "name": self.app.name, "version": self.app.version },
            "files": {
                "allowed_types": self.files.allowed_types,
                "max_size_mb": self.files.max_size_mb,
                "default_chunk_size": self.files.default_chunk_size,
                "files_dir": self.files.files_dir.display().to_string(),
            },
            "database": {
                "url": self.database.redacted_url(),
                "max_connections": self.database.max_connections,
            },
            "llm": {
                "generation_backend": self.llm.generation_backend,
                "embedding_backend": self.llm.embedding_backend,
                "generation_model_id": self.llm.generation_model_id,
                "embedding_model_id": self.llm.embedding_model_id,
                "embedding_model_size": self.llm.embedding_model_size,
                "openai_api_key": secret_state(&self.llm.openai_api_key),
                "cohere_api_key": secret_state(&self.llm.cohere_api_key),
                "input_max_characters": self.llm.input_max_characters,
                "generation_max_tokens": self.llm.generation_max_tokens,
                "generation_temperature": self.llm.generation_temperature,
            },
            "vector_db": {
                "backend": self.vector_db.backend,
                "url": self.vector_db.url,
                "distance_method": self.vector_db.distance_method,
                "pgvec_index_threshold": self.vector_db.pgvec_index_threshold,
            },
            "locale": {
                "primary_lang": self.locale.primary_lang,
                "default_lang": self.locale.default_lang,
            },
            "server": {
                "bind": self.server.bind_addr().to_string(),
                "workers": self.server.workers,
            },
        })
    }
}

/// Parses a dotenv-format file into key/value pairs without touching the
/// process environment.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let env_file_err = |reason: String| ConfigError::EnvFile {
        path: path.display().to_string(),
        reason,
    };

    let mut entries = HashMap::new();
    for item in dotenvy::from_path_iter(path).map_err(|e| env_file_err(e.to_string()))? {
        let (key, value) = item.map_err(|e| env_file_err(e.to_string()))?;
        entries.insert(key, value);
    }
    Ok(entries)
}

fn load_files<F>(src: &Source<F>) -> Result<FileSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let allowed_types = src
        .list_or("FILE_ALLOWED_TYPES", &["text/plain", "application/pdf"])?
        .into_iter()
        .map(|t| t.to_ascii_lowercase())
        .collect::<Vec<_>>();
    if allowed_types.is_empty() {
        return Err(ConfigError::Invalid {
            key: "FILE_ALLOWED_TYPES",
            value: "[]".to_string(),
            reason: "at least one content type must be allowed".to_string(),
        });
    }

    let max_size_mb: u64 = src.positive_or(&["FILE_MAX_SIZE"], 10)?;
    let chunk_keys = ["FILE_DEFAULT_CHUNK_SIZE", "FILE_DEFAULT_CHUNCK_SIZE"];
    let default_chunk_size: usize = src.positive_or(&chunk_keys, 512_000)?;

    let files = FileSettings::new(
        allowed_types,
        max_size_mb,
        default_chunk_size,
        PathBuf::from(src.string_or("FILES_DIR", "./assets/files")),
    )?;

    if default_chunk_size as u64 > files.max_size_bytes() {
        return Err(ConfigError::Invalid {
            key: src.present_key(&chunk_keys).unwrap_or(chunk_keys[0]),
            value: default_chunk_size.to_string(),
            reason: format!("exceeds FILE_MAX_SIZE of {} MB", max_size_mb),
        });
    }

    Ok(files)
}

fn load_database<F>(src: &Source<F>) -> Result<DatabaseSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(DatabaseSettings {
        username: src.required("POSTGRES_USERNAME")?,
        password: Secret::new(src.required("POSTGRES_PASSWORD")?),
        host: src.string_or("POSTGRES_HOST", "localhost"),
        port: src.parse_or(&["POSTGRES_PORT"], 5432u16)?,
        database: src.required("POSTGRES_MAIN_DATABASE")?,
        max_connections: src.positive_or(&["POSTGRES_MAX_CONNECTIONS"], 10u32)?,
    })
}

fn load_llm<F>(src: &Source<F>) -> Result<LlmSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let generation_backend: LlmBackend = src.literal("GENERATION_BACKEND")?;
    let embedding_backend: LlmBackend = src.literal("EMBEDDING_BACKEND")?;
    let uses = |backend: LlmBackend| generation_backend == backend || embedding_backend == backend;

    let openai_api_key = if uses(LlmBackend::OpenAi) {
        Some(Secret::new(src.required("OPENAI_API_KEY")?))
    } else {
        src.optional("OPENAI_API_KEY").map(Secret::new)
    };
    let cohere_api_key = if uses(LlmBackend::Cohere) {
        Some(Secret::new(src.required("COHERE_API_KEY")?))
    } else {
        src.optional("COHERE_API_KEY").map(Secret::new)
    };

    let generation_model_literal = src.list_or("GENERATION_MODEL_ID_LITERAL", &[])?;
    let generation_model_id = src.required("GENERATION_MODEL_ID")?;
    if !generation_model_literal.is_empty()
        && !generation_model_literal.contains(&generation_model_id)
    {
        return Err(ConfigError::Invalid {
            key: "GENERATION_MODEL_ID",
            value: generation_model_id,
            reason: format!(
                "not listed in GENERATION_MODEL_ID_LITERAL [{}]",
                generation_model_literal.join(", ")
            ),
        });
    }

    let temperature_keys = [
        "GENERATION_DEFAULT_TEMPERATURE",
        "GENERATION_DAFAULT_TEMPERATURE",
    ];
    let generation_temperature: f32 = src.parse_or(&temperature_keys, 0.1)?;
    if !(0.0..=2.0).contains(&generation_temperature) {
        return Err(ConfigError::Invalid {
            key: src.present_key(&temperature_keys).unwrap_or(temperature_keys[0]),
            value: generation_temperature.to_string(),
            reason: "temperature must be between 0.0 and 2.0".to_string(),
        });
    }

    Ok(LlmSettings {
        generation_backend,
        embedding_backend,
        openai_api_key,
        openai_api_url: src.string_or("OPENAI_API_URL", "https://api.openai.com/v1"),
        cohere_api_key,
        cohere_api_url: src.string_or("COHERE_API_URL", "https://api.cohere.ai/v1"),
        generation_model_literal,
        generation_model_id,
        embedding_model_id: src.required("EMBEDDING_MODEL_ID")?,
        embedding_model_size: src.required_positive("EMBEDDING_MODEL_SIZE")?,
        input_max_characters: src.positive_or(
            &["INPUT_DEFAULT_MAX_CHARACTERS", "INPUT_DAFAULT_MAX_CHARACTERS"],
            1024usize,
        )?,
        generation_max_tokens: src.positive_or(
            &["GENERATION_DEFAULT_MAX_TOKENS", "GENERATION_DAFAULT_MAX_TOKENS"],
            200usize,
        )?,
        generation_temperature,
    })
}

fn load_vector_db<F>(src: &Source<F>) -> Result<VectorDbSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let backend_literal = src
        .list_or("VECTOR_DB_BACKEND_LITERAL", &["QDRANT", "PGVECTOR"])?
        .iter()
        .map(|raw| VectorDbBackend::parse_literal("VECTOR_DB_BACKEND_LITERAL", raw))
        .collect::<Result<Vec<_>, _>>()?;

    let backend: VectorDbBackend = src.literal("VECTOR_DB_BACKEND")?;
    if !backend_literal.contains(&backend) {
        return Err(ConfigError::InvalidLiteral {
            key: "VECTOR_DB_BACKEND",
            value: backend.as_str().to_string(),
            allowed: backend_literal.iter().map(|b| b.as_str()).collect(),
        });
    }

    Ok(VectorDbSettings {
        backend_literal,
        backend,
        url: src.string_or("VECTOR_DB_URL", "http://127.0.0.1:6333"),
        distance_method: src.literal_or("VECTOR_DB_DISTANCE_METHOD", DistanceMethod::Cosine)?,
        pgvec_index_threshold: src.positive_or(&["VECTOR_DB_PGVEC_INDEX_THRESHOLD"], 100i64)?,
    })
}

struct Source<F> {
    lookup: F,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// First key with a non-blank value, in priority order.
    fn raw(&self, keys: &[&'static str]) -> Option<(&'static str, String)> {
        keys.iter().copied().find_map(|key| {
            (self.lookup)(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (key, v))
        })
    }

    fn present_key(&self, keys: &[&'static str]) -> Option<&'static str> {
        self.raw(keys).map(|(key, _)| key)
    }

    fn optional(&self, key: &'static str) -> Option<String> {
        self.raw(&[key]).map(|(_, v)| v)
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing { key })
    }

    fn string_or(&self, key: &'static str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, keys: &[&'static str], default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.raw(keys) {
            Some((key, value)) => parse_value(key, &value),
            None => Ok(default),
        }
    }

    fn positive_or<T>(&self, keys: &[&'static str], default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default + fmt::Display,
        T::Err: fmt::Display,
    {
        let value = self.parse_or(keys, default)?;
        ensure_positive(self.present_key(keys).unwrap_or(keys[0]), value)
    }

    fn required_positive<T>(&self, key: &'static str) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default + fmt::Display,
        T::Err: fmt::Display,
    {
        let raw = self.required(key)?;
        ensure_positive(key, parse_value(key, &raw)?)
    }

    fn literal<T: Literal>(&self, key: &'static str) -> Result<T, ConfigError> {
        let raw = self.required(key)?;
        T::parse_literal(key, &raw)
    }

    fn literal_or<T: Literal>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            Some(raw) => T::parse_literal(key, &raw),
            None => Ok(default),
        }
    }

    /// Accepts a JSON array of strings or a comma-separated list.
    fn list_or(&self, key: &'static str, default: &[&str]) -> Result<Vec<String>, ConfigError> {
        let Some(raw) = self.optional(key) else {
            return Ok(default.iter().map(|s| s.to_string()).collect());
        };

        let items: Vec<String> = if raw.starts_with('[') {
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            })?
        } else {
            raw.split(',').map(str::to_string).collect()
        };

        Ok(items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    fn lang(&self, key: &'static str) -> Result<String, ConfigError> {
        let value = self.string_or(key, "en");
        if value.len() != 2 || !value.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Invalid {
                key,
                value,
                reason: "expected a two-letter language code".to_string(),
            });
        }
        Ok(value.to_ascii_lowercase())
    }
}

fn parse_value<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::Parse {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn ensure_positive<T>(key: &'static str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + Default + fmt::Display,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn base_env() -> HashMap<String, String> {
        [
            ("APP_NAME", "mini-rag"),
            ("APP_VERSION", "0.1"),
            ("FILE_ALLOWED_TYPES", r#"["text/plain", "application/pdf"]"#),
            ("FILE_MAX_SIZE", "10"),
            ("FILE_DEFAULT_CHUNK_SIZE", "512000"),
            ("POSTGRES_USERNAME", "postgres"),
            ("POSTGRES_PASSWORD", "hunter2"),
            ("POSTGRES_HOST", "pgvector"),
            ("POSTGRES_PORT", "5432"),
            ("POSTGRES_MAIN_DATABASE", "minirag"),
            ("GENERATION_BACKEND", "OPENAI"),
            ("EMBEDDING_BACKEND", "COHERE"),
            ("OPENAI_API_KEY", "sk-test-key"),
            ("COHERE_API_KEY", "co-test-key"),
            ("GENERATION_MODEL_ID_LITERAL", r#"["gpt-4o-mini", "gpt-4o"]"#),
            ("GENERATION_MODEL_ID", "gpt-4o-mini"),
            ("EMBEDDING_MODEL_ID", "embed-multilingual-light-v3.0"),
            ("EMBEDDING_MODEL_SIZE", "384"),
            ("VECTOR_DB_BACKEND", "PGVECTOR"),
            ("VECTOR_DB_DISTANCE_METHOD", "cosine"),
            ("PRIMARY_LANG", "ar"),
            ("DEFAULT_LANG", "en"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    pub(crate) fn load(env: &HashMap<String, String>) -> Result<Settings, ConfigError> {
        Settings::from_lookup(|key| env.get(key).cloned())
    }

    fn load_with(overrides: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let mut env = base_env();
        for (k, v) in overrides {
            env.insert(k.to_string(), v.to_string());
        }
        load(&env)
    }

    #[test]
    fn loads_template_values_with_server_defaults() {
        let settings = load(&base_env()).unwrap();

        assert_eq!(settings.llm.generation_backend, LlmBackend::OpenAi);
        assert_eq!(settings.llm.embedding_backend, LlmBackend::Cohere);
        assert_eq!(settings.vector_db.backend, VectorDbBackend::PgVector);
        assert_eq!(settings.server.bind_addr().to_string(), "0.0.0.0:8000");
        assert_eq!(settings.server.workers, 4);
        assert_eq!(settings.files.max_size_bytes(), 10 * 1024 * 1024);
        assert_eq!(settings.files.default_chunk_size, 512_000);
        assert_eq!(settings.locale.primary_lang, "ar");
        assert_eq!(settings.logging.format, LogFormat::Text);
    }

    #[test]
    fn rejects_generation_backend_outside_literal_set() {
        let err = load_with(&[("GENERATION_BACKEND", "ANTHROPIC")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidLiteral {
                key: "GENERATION_BACKEND",
                value: "ANTHROPIC".to_string(),
                allowed: vec!["COHERE", "OPENAI"],
            }
        );
    }

    #[test]
    fn literal_match_is_case_sensitive() {
        let err = load_with(&[("EMBEDDING_BACKEND", "openai")]).unwrap_err();
        assert_eq!(err.key(), Some("EMBEDDING_BACKEND"));
    }

    #[test]
    fn rejects_vector_db_backend_outside_literal_set() {
        let err = load_with(&[("VECTOR_DB_BACKEND", "MILVUS")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLiteral { key: "VECTOR_DB_BACKEND", .. }));
    }

    #[test]
    fn backend_must_be_listed_in_backend_literal() {
        let err = load_with(&[("VECTOR_DB_BACKEND_LITERAL", "QDRANT")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidLiteral {
                key: "VECTOR_DB_BACKEND",
                value: "PGVECTOR".to_string(),
                allowed: vec!["QDRANT"],
            }
        );
    }

    #[test]
    fn backend_literal_entries_are_validated() {
        let err = load_with(&[("VECTOR_DB_BACKEND_LITERAL", r#"["QDRANT", "CHROMA"]"#)])
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidLiteral { key: "VECTOR_DB_BACKEND_LITERAL", .. }
        ));
    }

    #[test]
    fn selected_backend_requires_its_api_key() {
        let mut env = base_env();
        env.remove("COHERE_API_KEY");
        let err = load(&env).unwrap_err();
        assert_eq!(err, ConfigError::Missing { key: "COHERE_API_KEY" });

        env.insert("EMBEDDING_BACKEND".to_string(), "OPENAI".to_string());
        let settings = load(&env).unwrap();
        assert!(settings.llm.cohere_api_key.is_none());
    }

    #[test]
    fn chunk_size_is_bounded_by_max_file_size() {
        let err = load_with(&[("FILE_MAX_SIZE", "1"), ("FILE_DEFAULT_CHUNK_SIZE", "2000000")])
            .unwrap_err();
        assert_eq!(err.key(), Some("FILE_DEFAULT_CHUNK_SIZE"));

        let ok = load_with(&[("FILE_MAX_SIZE", "1"), ("FILE_DEFAULT_CHUNK_SIZE", "4096")]).unwrap();
        assert_eq!(ok.files.default_chunk_size, 4096);
    }

    #[test]
    fn legacy_chunk_size_key_is_accepted() {
        let mut env = base_env();
        env.remove("FILE_DEFAULT_CHUNK_SIZE");
        env.insert("FILE_DEFAULT_CHUNCK_SIZE".to_string(), "65536".to_string());
        let settings = load(&env).unwrap();
        assert_eq!(settings.files.default_chunk_size, 65_536);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let err = load_with(&[("FILE_MAX_SIZE", "0")]).unwrap_err();
        assert_eq!(err.key(), Some("FILE_MAX_SIZE"));

        let err = load_with(&[("SERVER_WORKERS", "0")]).unwrap_err();
        assert_eq!(err.key(), Some("SERVER_WORKERS"));
    }

    #[test]
    fn allowed_types_accept_comma_lists() {
        let settings = load_with(&[("FILE_ALLOWED_TYPES", "text/plain, Application/PDF")]).unwrap();
        assert_eq!(settings.files.allowed_types, vec!["text/plain", "application/pdf"]);
        assert!(settings.files.is_allowed_type("application/pdf; charset=binary"));
        assert!(!settings.files.is_allowed_type("image/png"));
    }

    #[test]
    fn malformed_json_list_is_a_parse_error() {
        let err = load_with(&[("FILE_ALLOWED_TYPES", r#"["text/plain""#)]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { key: "FILE_ALLOWED_TYPES", .. }));
    }

    #[test]
    fn generation_model_must_be_in_literal_list() {
        let err = load_with(&[("GENERATION_MODEL_ID", "gpt-3.5-turbo")]).unwrap_err();
        assert_eq!(err.key(), Some("GENERATION_MODEL_ID"));
    }

    #[test]
    fn temperature_range_is_enforced() {
        let err = load_with(&[("GENERATION_DEFAULT_TEMPERATURE", "3.5")]).unwrap_err();
        assert_eq!(err.key(), Some("GENERATION_DEFAULT_TEMPERATURE"));

        let settings = load_with(&[("GENERATION_DAFAULT_TEMPERATURE", "0.7")]).unwrap();
        assert!((settings.llm.generation_temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn non_numeric_port_is_a_parse_error() {
        let err = load_with(&[("POSTGRES_PORT", "five")]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { key: "POSTGRES_PORT", .. }));
    }

    #[test]
    fn secrets_are_redacted() {
        let settings = load(&base_env()).unwrap();
        let debug = format!("{:?}", settings.database);
        assert!(!debug.contains("hunter2"));
        assert!(!settings.database.redacted_url().contains("hunter2"));

        let summary = settings.summary().to_string();
        assert!(!summary.contains("sk-test-key"));
        assert!(summary.contains("PGVECTOR"));
    }

    #[test]
    fn env_file_values_are_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let contents = base_env()
            .into_iter()
            .map(|(k, v)| format!("{k}='{v}'"))
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&path, contents).unwrap();

        let settings = Settings::from_env_file(&path).unwrap();
        assert_eq!(settings.llm.embedding_model_size, 384);
    }

    #[test]
    fn shipped_template_parses_and_loads_once_secrets_are_filled() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env.example");
        let mut entries = read_env_file(&path).unwrap();

        assert_eq!(
            entries.get("FILE_ALLOWED_TYPES").map(String::as_str),
            Some(r#"["text/plain", "application/pdf"]"#)
        );

        for (key, value) in [
            ("POSTGRES_PASSWORD", "hunter2"),
            ("OPENAI_API_KEY", "sk-test-key"),
            ("COHERE_API_KEY", "co-test-key"),
        ] {
            entries.insert(key.to_string(), value.to_string());
        }

        let settings = load(&entries).unwrap();
        assert_eq!(settings.files.allowed_types, vec!["text/plain", "application/pdf"]);
        assert_eq!(settings.llm.generation_model_literal, vec!["gpt-4o-mini", "gpt-4o"]);
        assert_eq!(
            settings.vector_db.backend_literal,
            vec![VectorDbBackend::Qdrant, VectorDbBackend::PgVector]
        );
    }

    #[test]
    fn malformed_env_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "FILE_ALLOWED_TYPES=[\"text/plain\", \"application/pdf\"]\n").unwrap();

        let err = Settings::from_env_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::EnvFile { .. }));
    }

    #[test]
    fn oversized_file_limit_is_rejected_instead_of_overflowing() {
        let err = load_with(&[("FILE_MAX_SIZE", "18000000000000")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FILE_MAX_SIZE", .. }));
    }
}
