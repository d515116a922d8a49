//! Document lifecycle: upload, processing, and deletion.
//!
//! ```text
//! PENDING ──process()──▶ PROCESSING ──ok──▶ READY (is_indexed)
//!                            │
//!                            └──error──▶ FAILED
//! ```
//!
//! `process()` may start from `PENDING`, `FAILED`, or `READY` with
//! `is_indexed = false`. The move into `PROCESSING` is a compare-and-swap
//! in the store, so two concurrent calls for one document cannot both
//! proceed; the loser gets [`ProcessError::ProcessingConflict`].
//!
//! The pipeline is extract → chunk → embed every chunk → swap the chunk
//! set and mark `READY` in one atomic store write. Until that write the
//! previous chunk set stays visible to retrieval. On any error the
//! document is marked `FAILED` with zero chunks and the error is returned.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingIndexer;
use crate::error::ProcessError;
use crate::extract::{content_type_for, extract_text, ExtractError};
use crate::models::{Document, DocumentUpdate};
use crate::storage::FileStorage;
use crate::store::{ProcessingClaim, Store};

/// Metadata key holding a document's content type.
pub const CONTENT_TYPE_KEY: &str = "content_type";
/// Metadata key holding the uploaded file's original name.
pub const ORIGINAL_NAME_KEY: &str = "original_name";

pub struct DocumentProcessor {
    store: Arc<dyn Store>,
    files: FileStorage,
    indexer: EmbeddingIndexer,
    chunking: ChunkingConfig,
}

impl DocumentProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        files: FileStorage,
        indexer: EmbeddingIndexer,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            store,
            files,
            indexer,
            chunking,
        }
    }

    /// Chunk, embed, and index a document. Returns the `READY` document.
    pub async fn process(&self, document_id: &str) -> Result<Document, ProcessError> {
        let doc = match self.store.begin_processing(document_id).await? {
            ProcessingClaim::Claimed(doc) => doc,
            ProcessingClaim::NotFound => return Err(ProcessError::NotFound(document_id.into())),
            ProcessingClaim::Conflict(reason) => {
                tracing::warn!(document_id, %reason, "process request rejected");
                return Err(ProcessError::ProcessingConflict {
                    id: document_id.to_string(),
                    reason,
                });
            }
        };
        tracing::info!(
            document_id,
            tenant_id = doc.tenant_id,
            "document status set to PROCESSING"
        );

        match self.index_document(&doc).await {
            Ok(ready) => {
                tracing::info!(
                    document_id,
                    chunks = ready.chunk_count,
                    "document processed"
                );
                Ok(ready)
            }
            Err(e) => {
                tracing::error!(document_id, error = %e, "document processing failed");
                if let Err(mark_err) = self
                    .store
                    .replace_chunks(document_id, &[], &DocumentUpdate::failed())
                    .await
                {
                    tracing::error!(
                        document_id,
                        error = %mark_err,
                        "failed to mark document FAILED"
                    );
                }
                Err(e)
            }
        }
    }

    async fn index_document(&self, doc: &Document) -> Result<Document, ProcessError> {
        let content_type = doc
            .metadata_value(CONTENT_TYPE_KEY)
            .or_else(|| content_type_for(&doc.file_ref))
            .ok_or_else(|| ExtractError::UnsupportedContentType(doc.file_ref.clone()))?
            .to_string();

        let bytes = self.files.read(&doc.file_ref).await?;
        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, &content_type))
            .await
            .map_err(|e| ExtractError::Io(std::io::Error::other(e.to_string())))??;

        let mut chunks = chunk_text(
            &doc.id,
            &text,
            self.chunking.max_tokens,
            self.chunking.overlap_tokens,
        );
        if chunks.is_empty() {
            return Err(ExtractError::Empty.into());
        }
        tracing::debug!(document_id = %doc.id, chunks = chunks.len(), "document chunked");

        self.indexer.index_chunks(&mut chunks).await?;

        let update = DocumentUpdate::ready(chunks.len() as i64, chrono::Utc::now().timestamp());
        self.store
            .replace_chunks(&doc.id, &chunks, &update)
            .await?;

        let mut ready = doc.clone();
        update.apply(&mut ready);
        Ok(ready)
    }
}

/// Tenant-scoped document management on top of the store and file storage.
pub struct DocumentLibrary {
    store: Arc<dyn Store>,
    files: FileStorage,
}

impl DocumentLibrary {
    pub fn new(store: Arc<dyn Store>, files: FileStorage) -> Self {
        Self { store, files }
    }

    /// Copy `source` into storage and register a `PENDING` document.
    pub async fn upload(
        &self,
        tenant_id: i64,
        owner_id: i64,
        source: &Path,
        title: Option<String>,
    ) -> Result<Document> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let content_type = match content_type_for(&file_name) {
            Some(ct) => ct,
            None => bail!("unsupported file type: {}", source.display()),
        };

        let file_ref = self.files.put_file(source).await?;

        let mut metadata = BTreeMap::new();
        metadata.insert(CONTENT_TYPE_KEY.to_string(), content_type.to_string());
        metadata.insert(ORIGINAL_NAME_KEY.to_string(), file_name.clone());

        let title = title.unwrap_or_else(|| {
            Path::new(&file_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&file_name)
                .to_string()
        });
        let doc = Document::new_pending(tenant_id, owner_id, title, file_ref, Some(metadata));

        if let Err(e) = self.store.insert_document(&doc).await {
            let _ = self.files.remove(&doc.file_ref).await;
            return Err(e);
        }

        tracing::info!(
            document_id = %doc.id,
            tenant_id,
            content_type,
            "document uploaded"
        );
        Ok(doc)
    }

    /// Fetch a document if it belongs to `tenant_id`.
    pub async fn get(&self, tenant_id: i64, id: &str) -> Result<Option<Document>> {
        Ok(self
            .store
            .get_document(id)
            .await?
            .filter(|d| d.tenant_id == tenant_id))
    }

    pub async fn list(&self, tenant_id: i64) -> Result<Vec<Document>> {
        self.store.list_documents(tenant_id).await
    }

    /// Delete a document, its chunks, and its stored file.
    pub async fn delete(&self, tenant_id: i64, id: &str) -> Result<bool> {
        let doc = match self.get(tenant_id, id).await? {
            Some(d) => d,
            None => return Ok(false),
        };
        let removed = self.store.delete_document(&doc.id).await?;
        if removed {
            self.files.remove(&doc.file_ref).await?;
            tracing::info!(document_id = %doc.id, tenant_id, "document deleted");
        }
        Ok(removed)
    }
}
