use crate::error::{SyncError, SyncResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Extensions accepted when no `[ingest].extensions` list is configured.
pub const DEFAULT_EXTENSIONS: [&str; 7] = ["pdf", "docx", "txt", "md", "html", "csv", "json"];

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Folder kept in sync with the index.
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,
    /// Holds `signatures.json` and `processing.log`.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            documents_dir: default_documents_dir(),
            state_dir: default_state_dir(),
        }
    }
}

impl PathsConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join("signatures.json")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.state_dir.join("processing.log")
    }
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("./data/documents")
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("./data/processed")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `sqlite` (persistent) or `memory` (lost on exit).
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_index_path(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_index_path() -> PathBuf {
    PathBuf::from("./data/vector_store/index.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    docsync_core::chunk::DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    docsync_core::chunk::DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Files per sub-batch.
    #[serde(default = "default_batch_size_ingest")]
    pub batch_size: usize,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// Lowercase extensions without the leading dot.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size_ingest(),
            max_file_size_mb: default_max_file_size_mb(),
            extensions: default_extensions(),
            exclude_globs: Vec::new(),
        }
    }
}

impl IngestConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

fn default_batch_size_ingest() -> usize {
    5
}
fn default_max_file_size_mb() -> u64 {
    100
}
fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// `queue` coalesces events that arrive while busy; `drop` discards them.
    #[serde(default = "default_on_busy")]
    pub on_busy: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_ms: default_cooldown_ms(),
            queue_capacity: default_queue_capacity(),
            on_busy: default_on_busy(),
        }
    }
}

impl WatcherConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

fn default_true() -> bool {
    true
}
fn default_cooldown_ms() -> u64 {
    2000
}
fn default_queue_capacity() -> usize {
    256
}
fn default_on_busy() -> String {
    "queue".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    /// Configured dimensionality, falling back to 384 for the hash provider.
    pub fn resolved_dims(&self) -> Option<usize> {
        match (self.dims, self.provider.as_str()) {
            (Some(d), _) => Some(d),
            (None, "hash") => Some(384),
            _ => None,
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Also append log lines to this file.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            file: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Read, parse and validate the TOML file at `path`. Every failure is
/// [`SyncError::Config`], which is fatal.
pub fn load_config(path: &Path) -> SyncResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SyncError::Config(format!("Failed to read config file: {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&content).map_err(|e| {
        SyncError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> SyncResult<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        return Err(SyncError::Config(format!("chunking.chunk_size must be > 0")));
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        return Err(SyncError::Config(format!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        )));
    }

    // Validate ingest
    if config.ingest.batch_size == 0 {
        return Err(SyncError::Config(format!("ingest.batch_size must be > 0")));
    }
    if config.ingest.extensions.is_empty() {
        return Err(SyncError::Config(format!("ingest.extensions must not be empty")));
    }

    // Validate watcher
    if config.watcher.queue_capacity == 0 {
        return Err(SyncError::Config(format!("watcher.queue_capacity must be > 0")));
    }
    match config.watcher.on_busy.as_str() {
        "queue" | "drop" => {}
        other => return Err(SyncError::Config(format!(
            "Unknown watcher.on_busy policy: '{}'. Must be queue or drop.",
            other
        ))),
    }

    match config.index.backend.as_str() {
        "sqlite" | "memory" => {}
        other => return Err(SyncError::Config(format!(
            "Unknown index backend: '{}'. Must be sqlite or memory.",
            other
        ))),
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "hash" => {}
        "openai" | "ollama" | "local" => {
            if config.embedding.model.is_none() {
                return Err(SyncError::Config(format!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                )));
            }
        }
        other => return Err(SyncError::Config(format!(
            "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
            other
        ))),
    }
    match config.embedding.resolved_dims() {
        Some(0) | None => return Err(SyncError::Config(format!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        ))),
        Some(_) => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("docsync.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let (_dir, path) = write_config("");
        let config = load_config(&path).unwrap();
        assert_eq!(config.chunking.chunk_size, 1024);
        assert_eq!(config.chunking.chunk_overlap, 128);
        assert_eq!(config.ingest.batch_size, 5);
        assert_eq!(config.watcher.cooldown(), Duration::from_secs(2));
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        assert_eq!(config.embedding.resolved_dims(), Some(384));
        assert_eq!(config.ingest.extensions.len(), 7);
        assert_eq!(
            config.paths.ledger_path(),
            PathBuf::from("./data/processed/signatures.json")
        );
    }

    #[test]
    fn test_overrides() {
        let (_dir, path) = write_config(
            r#"
            [paths]
            documents_dir = "/srv/docs"

            [chunking]
            chunk_size = 200
            chunk_overlap = 20

            [watcher]
            on_busy = "drop"
            cooldown_ms = 50
            "#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.paths.documents_dir, PathBuf::from("/srv/docs"));
        assert_eq!(config.chunking.chunk_size, 200);
        assert_eq!(config.watcher.on_busy, "drop");
        assert_eq!(config.watcher.cooldown(), Duration::from_millis(50));
    }

    #[test]
    fn test_rejects_overlap_not_below_size() {
        let (_dir, path) = write_config("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let (_dir, path) = write_config("[embedding]\nprovider = \"magic\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_remote_provider_requires_model() {
        let (_dir, path) = write_config("[embedding]\nprovider = \"openai\"\ndims = 1536\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
