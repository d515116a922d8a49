//! Local file storage for uploaded documents.
//!
//! Uploaded files are copied under the configured storage root with a
//! generated name (`<uuid>.<ext>`); that relative name is the document's
//! `file_ref`. References that would escape the root are rejected.

use anyhow::{bail, Context, Result};
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use crate::extract::ExtractError;

#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy `source` into storage and return its new `file_ref`.
    pub async fn put_file(&self, source: &Path) -> Result<String> {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        let file_ref = format!("{}{}", Uuid::new_v4(), ext);

        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create storage root: {}", self.root.display()))?;
        tokio::fs::copy(source, self.root.join(&file_ref))
            .await
            .with_context(|| format!("Failed to copy {} into storage", source.display()))?;

        Ok(file_ref)
    }

    /// Read a stored file's bytes.
    pub async fn read(&self, file_ref: &str) -> Result<Vec<u8>, ExtractError> {
        let path = self.resolve(file_ref).map_err(|e| {
            ExtractError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                e.to_string(),
            ))
        })?;
        Ok(tokio::fs::read(path).await?)
    }

    /// Remove a stored file. A missing file is not an error.
    pub async fn remove(&self, file_ref: &str) -> Result<()> {
        let path = self.resolve(file_ref)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    fn resolve(&self, file_ref: &str) -> Result<PathBuf> {
        let rel = Path::new(file_ref);
        if file_ref.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            bail!("invalid file reference: {}", file_ref);
        }
        Ok(self.root.join(rel))
    }
}
