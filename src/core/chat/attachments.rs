use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// One file as received from the HTTP layer, before storage.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub filename: String,
    pub storage_path: PathBuf,
    pub size: u64,
}

/// Where uploaded bytes land. The orchestrator only sees the stored name,
/// path and size.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn store(&self, original_name: &str, data: &[u8]) -> Result<StoredFile>;
}

/// Extracts text from a stored file. Failures are per-file; the orchestrator
/// annotates them inline instead of aborting the request.
#[async_trait]
pub trait FileParser: Send + Sync {
    async fn parse(&self, path: &Path, mime_type: &str, original_name: &str) -> Result<String>;
}

pub struct LocalDiskStorage {
    root: PathBuf,
}

impl LocalDiskStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl FileStorage for LocalDiskStorage {
    async fn store(&self, original_name: &str, data: &[u8]) -> Result<StoredFile> {
        fs::create_dir_all(&self.root).await?;

        // Keep only the basename; an upload name must not traverse out of
        // the uploads directory.
        let base = Path::new(original_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload");
        let filename = format!("{}-{}", uuid::Uuid::new_v4().simple(), base);
        let storage_path = self.root.join(&filename);

        fs::write(&storage_path, data).await?;
        Ok(StoredFile {
            filename,
            storage_path,
            size: data.len() as u64,
        })
    }
}

const PARSE_MAX_BYTES: usize = 256 * 1024;

/// Plain-text extraction for text-like mime types. Everything else is an
/// unsupported-type error surfaced as the file's inline error block.
pub struct TextFileParser;

fn is_text_like(mime_type: &str) -> bool {
    mime_type.starts_with("text/")
        || matches!(
            mime_type,
            "application/json" | "application/xml" | "application/csv" | "application/x-yaml"
        )
}

#[async_trait]
impl FileParser for TextFileParser {
    async fn parse(&self, path: &Path, mime_type: &str, original_name: &str) -> Result<String> {
        if !is_text_like(mime_type) {
            return Err(anyhow!(
                "Unsupported file type for {}: {}",
                original_name,
                mime_type
            ));
        }
        let bytes = fs::read(path).await?;
        let text = String::from_utf8_lossy(&bytes[..bytes.len().min(PARSE_MAX_BYTES)]);
        Ok(text.into_owned())
    }
}
