//! In-memory [`Store`] implementation for tests and embedding in other hosts.
//!
//! State lives in `HashMap`s and `Vec`s behind `parking_lot::RwLock`.
//! When a method needs both, the documents lock is taken before the
//! chunks lock. Similarity search is brute-force cosine over every
//! embedded chunk of the tenant's documents.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::embedding::cosine_similarity;
use crate::error::ConflictReason;
use crate::models::{
    AiInsight, Conversation, Document, DocumentChunk, DocumentStatus, DocumentUpdate, ModelConfig,
    SimilarChunk,
};

use super::{rank_and_truncate, ProcessingClaim, Store};

#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    chunks: RwLock<HashMap<String, Vec<DocumentChunk>>>,
    conversations: RwLock<Vec<Conversation>>,
    model_configs: RwLock<HashMap<i64, ModelConfig>>,
    insights: RwLock<Vec<AiInsight>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_chunks(
    existing: &[DocumentChunk],
    document_id: &str,
    chunks: &[DocumentChunk],
) -> Result<()> {
    for c in chunks {
        if c.document_id != document_id {
            bail!("chunk {} belongs to document {}", c.id, c.document_id);
        }
        if existing
            .iter()
            .chain(chunks.iter().take_while(|o| o.id != c.id))
            .any(|o| o.chunk_index == c.chunk_index)
        {
            bail!(
                "duplicate chunk_index {} for document {}",
                c.chunk_index,
                document_id
            );
        }
    }
    Ok(())
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let mut docs = self.docs.write();
        if docs.contains_key(&doc.id) {
            bail!("document {} already exists", doc.id);
        }
        docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().get(id).cloned())
    }

    async fn list_documents(&self, tenant_id: i64) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .docs
            .read()
            .values()
            .filter(|d| d.tenant_id == tenant_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut docs = self.docs.write();
        let mut chunks = self.chunks.write();
        chunks.remove(id);
        Ok(docs.remove(id).is_some())
    }

    async fn begin_processing(&self, id: &str) -> Result<ProcessingClaim> {
        let mut docs = self.docs.write();
        let doc = match docs.get_mut(id) {
            Some(d) => d,
            None => return Ok(ProcessingClaim::NotFound),
        };
        if let Some(reason) = ConflictReason::from_state(doc.status, doc.is_indexed) {
            return Ok(ProcessingClaim::Conflict(reason));
        }
        DocumentUpdate {
            status: Some(DocumentStatus::Processing),
            ..Default::default()
        }
        .apply(doc);
        Ok(ProcessingClaim::Claimed(doc.clone()))
    }

    async fn update_document_status(&self, id: &str, update: &DocumentUpdate) -> Result<()> {
        let mut docs = self.docs.write();
        match docs.get_mut(id) {
            Some(doc) => {
                update.apply(doc);
                Ok(())
            }
            None => bail!("document {} not found", id),
        }
    }

    async fn delete_chunks(&self, document_id: &str) -> Result<u64> {
        let removed = self.chunks.write().remove(document_id);
        Ok(removed.map(|v| v.len() as u64).unwrap_or(0))
    }

    async fn insert_chunks(&self, document_id: &str, chunks: &[DocumentChunk]) -> Result<()> {
        let docs = self.docs.read();
        if !docs.contains_key(document_id) {
            bail!("document {} not found", document_id);
        }
        let mut stored = self.chunks.write();
        let entry = stored.entry(document_id.to_string()).or_default();
        check_chunks(entry, document_id, chunks)?;
        entry.extend_from_slice(chunks);
        Ok(())
    }

    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[DocumentChunk],
        update: &DocumentUpdate,
    ) -> Result<()> {
        let mut docs = self.docs.write();
        let mut stored = self.chunks.write();
        let doc = match docs.get_mut(document_id) {
            Some(d) => d,
            None => bail!("document {} not found", document_id),
        };
        check_chunks(&[], document_id, chunks)?;
        if chunks.is_empty() {
            stored.remove(document_id);
        } else {
            stored.insert(document_id.to_string(), chunks.to_vec());
        }
        update.apply(doc);
        Ok(())
    }

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let mut chunks = self
            .chunks
            .read()
            .get(document_id)
            .cloned()
            .unwrap_or_default();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn query_similar(
        &self,
        tenant_id: i64,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarChunk>> {
        let docs = self.docs.read();
        let guard = self.chunks.read();
        let stored: &HashMap<String, Vec<DocumentChunk>> = &guard;

        let mut candidates: Vec<SimilarChunk> = docs
            .values()
            .filter(|d| d.tenant_id == tenant_id)
            .flat_map(|doc| {
                stored
                    .get(&doc.id)
                    .into_iter()
                    .flatten()
                    .filter_map(move |chunk| {
                        let embedding = chunk.embedding.as_deref()?;
                        Some(SimilarChunk {
                            chunk: chunk.clone(),
                            document_title: doc.title.clone(),
                            similarity: cosine_similarity(vector, embedding),
                        })
                    })
            })
            .collect();

        rank_and_truncate(&mut candidates, limit);
        Ok(candidates)
    }

    async fn record_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.conversations.write().push(conversation.clone());
        Ok(())
    }

    async fn recent_conversations(
        &self,
        tenant_id: i64,
        limit: usize,
    ) -> Result<Vec<Conversation>> {
        let mut out: Vec<Conversation> = self
            .conversations
            .read()
            .iter()
            .rev()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect();
        // Insertion order breaks ties between equal timestamps.
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn active_model_config(&self, tenant_id: i64) -> Result<Option<ModelConfig>> {
        Ok(self
            .model_configs
            .read()
            .get(&tenant_id)
            .filter(|c| c.is_active)
            .cloned())
    }

    async fn upsert_model_config(&self, config: &ModelConfig) -> Result<()> {
        self.model_configs
            .write()
            .insert(config.tenant_id, config.clone());
        Ok(())
    }

    async fn insert_insight(&self, insight: &AiInsight) -> Result<()> {
        self.insights.write().push(insight.clone());
        Ok(())
    }

    async fn list_insights(&self, tenant_id: i64, limit: usize) -> Result<Vec<AiInsight>> {
        let mut out: Vec<AiInsight> = self
            .insights
            .read()
            .iter()
            .rev()
            .filter(|i| i.tenant_id == tenant_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
        out.truncate(limit);
        Ok(out)
    }
}
