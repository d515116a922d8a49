//! Storage abstraction for the document pipeline and insight history.
//!
//! The [`Store`] trait is the persistence contract the core relies on:
//! chunk writes, status transitions, tenant-scoped similarity queries,
//! and the conversation/insight tables read by the synthesizer.
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`begin_processing`](Store::begin_processing) | Compare-and-swap a document into `PROCESSING` |
//! | [`replace_chunks`](Store::replace_chunks) | Swap a document's chunk set and status together |
//! | [`query_similar`](Store::query_similar) | Top-N chunks by cosine similarity, one tenant |
//! | [`recent_conversations`](Store::recent_conversations) | Newest transcripts first |
//!
//! Two backends ship with the crate: [`memory::InMemoryStore`] and
//! [`SqliteStore`](crate::sqlite_store::SqliteStore).

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::ConflictReason;
use crate::models::{
    AiInsight, Conversation, Document, DocumentChunk, DocumentUpdate, ModelConfig, SimilarChunk,
};

/// Outcome of [`Store::begin_processing`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingClaim {
    /// The document is now `PROCESSING` and owned by the caller.
    Claimed(Document),
    NotFound,
    Conflict(ConflictReason),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_document(&self, doc: &Document) -> Result<()>;

    /// Fetch a document by ID regardless of tenant.
    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Documents owned by `tenant_id`, newest first.
    async fn list_documents(&self, tenant_id: i64) -> Result<Vec<Document>>;

    /// Delete a document and, by cascade, its chunks. Returns whether a
    /// row was removed.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    /// Atomically move a document into `PROCESSING`.
    ///
    /// Succeeds from `PENDING`, `FAILED`, or `READY` with
    /// `is_indexed = false`. The status check and the write happen as
    /// one step, so two concurrent callers cannot both claim it.
    async fn begin_processing(&self, id: &str) -> Result<ProcessingClaim>;

    async fn update_document_status(&self, id: &str, update: &DocumentUpdate) -> Result<()>;

    /// Remove every chunk of a document. Returns the number removed.
    async fn delete_chunks(&self, document_id: &str) -> Result<u64>;

    async fn insert_chunks(&self, document_id: &str, chunks: &[DocumentChunk]) -> Result<()>;

    /// Replace a document's chunk set and apply `update` in one step.
    ///
    /// The default composes the three primitive writes without
    /// atomicity; both bundled stores override it with an atomic version.
    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[DocumentChunk],
        update: &DocumentUpdate,
    ) -> Result<()> {
        self.delete_chunks(document_id).await?;
        self.insert_chunks(document_id, chunks).await?;
        self.update_document_status(document_id, update).await
    }

    /// Chunks of a document in `chunk_index` order.
    async fn list_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>>;

    /// The `limit` embedded chunks most similar to `vector` among
    /// documents owned by `tenant_id`, most similar first. No threshold
    /// is applied here.
    async fn query_similar(
        &self,
        tenant_id: i64,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarChunk>>;

    async fn record_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Up to `limit` conversations for a tenant, newest first.
    async fn recent_conversations(&self, tenant_id: i64, limit: usize)
        -> Result<Vec<Conversation>>;

    /// The tenant's model configuration, if one exists and is active.
    async fn active_model_config(&self, tenant_id: i64) -> Result<Option<ModelConfig>>;

    /// Insert or replace the tenant's model configuration.
    async fn upsert_model_config(&self, config: &ModelConfig) -> Result<()>;

    async fn insert_insight(&self, insight: &AiInsight) -> Result<()>;

    /// Up to `limit` insights for a tenant, newest first.
    async fn list_insights(&self, tenant_id: i64, limit: usize) -> Result<Vec<AiInsight>>;
}

/// Sort by similarity descending and keep the first `limit`.
///
/// The sort is stable, so equal scores keep their input order.
pub(crate) fn rank_and_truncate(candidates: &mut Vec<SimilarChunk>, limit: usize) {
    candidates.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(limit);
}
