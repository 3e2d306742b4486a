// Local artifact storage for downloaded images and sandbox files
// Author: kelexine (https://github.com/kelexine)

use crate::config::StorageConfig;
use crate::error::{ProxyError, Result};
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info};

/// Detected image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFormat {
    pub mime_type: &'static str,
    pub extension: &'static str,
}

/// Detect an image format from its magic bytes.
pub fn detect_image_format(data: &[u8]) -> Option<ImageFormat> {
    let format = |mime_type, extension| Some(ImageFormat { mime_type, extension });

    if data.starts_with(b"\xFF\xD8\xFF") {
        format("image/jpeg", "jpg")
    } else if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        format("image/png", "png")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        format("image/gif", "gif")
    } else if data.len() >= 12 && data.starts_with(b"RIFF") && data[8..12] == *b"WEBP" {
        format("image/webp", "webp")
    } else {
        None
    }
}

/// Content type for a stored image, derived from its extension.
pub fn image_content_type(name: &str) -> &'static str {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

/// Filesystem-backed store. Every persisted artifact gets a public URL under
/// `{public_base_url}/images/` or `{public_base_url}/files/`.
#[derive(Debug)]
pub struct FileStore {
    images_dir: PathBuf,
    files_dir: PathBuf,
    public_base_url: String,
    counter: AtomicU64,
}

impl FileStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            images_dir: PathBuf::from(&config.images_dir),
            files_dir: PathBuf::from(&config.files_dir),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    /// Store an image, returning its public URL.
    pub async fn persist_image(&self, bytes: &[u8]) -> Result<String> {
        let extension = detect_image_format(bytes)
            .map(|f| f.extension)
            .unwrap_or("png");
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "image_{}_{}.{}",
            Local::now().format("%Y%m%d%H%M%S"),
            seq,
            extension
        );
        write(&self.images_dir, &name, bytes).await?;
        info!("Stored image {} ({} bytes)", name, bytes.len());
        Ok(format!("{}/images/{}", self.public_base_url, name))
    }

    /// Store a file under `name`, returning its public URL.
    pub async fn persist_file(&self, name: &str, bytes: &[u8]) -> Result<String> {
        validate_name(name)?;
        write(&self.files_dir, name, bytes).await?;
        info!("Stored file {} ({} bytes)", name, bytes.len());
        Ok(format!(
            "{}/files/{}",
            self.public_base_url,
            urlencoding::encode(name)
        ))
    }

    /// Read a stored image. `None` when it does not exist.
    pub async fn open_image(&self, name: &str) -> Result<Option<Vec<u8>>> {
        read(&self.images_dir, name).await
    }

    /// Read a stored file. `None` when it does not exist.
    pub async fn open_file(&self, name: &str) -> Result<Option<Vec<u8>>> {
        read(&self.files_dir, name).await
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(ProxyError::Storage(format!("invalid file name: {:?}", name)));
    }
    Ok(())
}

async fn write(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| ProxyError::Storage(format!("cannot create {}: {}", dir.display(), e)))?;
    fs::write(dir.join(name), bytes)
        .await
        .map_err(|e| ProxyError::Storage(format!("cannot write {}: {}", name, e)))
}

async fn read(dir: &Path, name: &str) -> Result<Option<Vec<u8>>> {
    validate_name(name)?;
    match fs::read(dir.join(name)).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Stored artifact {} not found", name);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
