//! SQLite-backed [`Store`] implementation.
//!
//! Embeddings live in `document_chunks.embedding` as little-endian `f32`
//! BLOBs (see [`vec_to_blob`]). Similarity search loads the tenant's
//! embedded chunks and ranks them with brute-force cosine similarity.
//!
//! [`replace_chunks`](Store::replace_chunks) runs the delete, the inserts,
//! and the status update in one transaction, so readers see either the
//! old chunk set or the new one and never an empty gap.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::ConflictReason;
use crate::models::{
    AiInsight, ChatMessage, Conversation, Document, DocumentChunk, DocumentUpdate, InsightData,
    ModelConfig, Role, SimilarChunk,
};
use crate::store::{rank_and_truncate, ProcessingClaim, Store};

const DOCUMENT_COLUMNS: &str = "id, tenant_id, owner_id, title, status, chunk_count, is_indexed, \
     file_ref, metadata_json, processed_at, created_at, updated_at";

const CHUNK_COLUMNS: &str =
    "id, document_id, chunk_index, content, hash, token_count, embedding, created_at, updated_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    let metadata_json: Option<String> = row.get("metadata_json");
    let metadata = match metadata_json {
        Some(raw) => Some(
            serde_json::from_str::<BTreeMap<String, String>>(&raw)
                .context("Invalid document metadata JSON")?,
        ),
        None => None,
    };

    Ok(Document {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        status: status.parse()?,
        chunk_count: row.get("chunk_count"),
        is_indexed: row.get("is_indexed"),
        file_ref: row.get("file_ref"),
        metadata,
        processed_at: row.get("processed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_chunk(row: &SqliteRow) -> DocumentChunk {
    let embedding: Option<Vec<u8>> = row.get("embedding");
    DocumentChunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        hash: row.get("hash"),
        token_count: row.get("token_count"),
        embedding: embedding.map(|blob| blob_to_vec(&blob)),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn status_update<'q>(
    id: &'q str,
    update: &'q DocumentUpdate,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    sqlx::query(
        r#"
        UPDATE documents SET
            status = COALESCE(?, status),
            is_indexed = COALESCE(?, is_indexed),
            chunk_count = COALESCE(?, chunk_count),
            processed_at = COALESCE(?, processed_at),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(update.status.map(|s| s.as_str()))
    .bind(update.is_indexed)
    .bind(update.chunk_count)
    .bind(update.processed_at)
    .bind(chrono::Utc::now().timestamp())
    .bind(id)
}

fn chunk_insert(chunk: &DocumentChunk) -> sqlx::query::Query<'_, Sqlite, SqliteArguments<'_>> {
    sqlx::query(
        r#"
        INSERT INTO document_chunks (id, document_id, chunk_index, content, hash,
                                     token_count, embedding, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&chunk.id)
    .bind(&chunk.document_id)
    .bind(chunk.chunk_index)
    .bind(&chunk.content)
    .bind(&chunk.hash)
    .bind(chunk.token_count)
    .bind(chunk.embedding.as_deref().map(vec_to_blob))
    .bind(chunk.created_at)
    .bind(chunk.updated_at)
}

fn ensure_owned(document_id: &str, chunks: &[DocumentChunk]) -> Result<()> {
    if let Some(c) = chunks.iter().find(|c| c.document_id != document_id) {
        bail!("chunk {} belongs to document {}", c.id, c.document_id);
    }
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let metadata_json = doc
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, tenant_id, owner_id, title, status, chunk_count,
                                   is_indexed, file_ref, metadata_json, processed_at,
                                   created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(doc.tenant_id)
        .bind(doc.owner_id)
        .bind(&doc.title)
        .bind(doc.status.as_str())
        .bind(doc.chunk_count)
        .bind(doc.is_indexed)
        .bind(&doc.file_ref)
        .bind(metadata_json)
        .bind(doc.processed_at)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn list_documents(&self, tenant_id: i64) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE tenant_id = ? ORDER BY created_at DESC, id ASC",
            DOCUMENT_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn begin_processing(&self, id: &str) -> Result<ProcessingClaim> {
        let result = sqlx::query(
            r#"
            UPDATE documents SET status = 'PROCESSING', updated_at = ?
            WHERE id = ?
              AND status != 'PROCESSING'
              AND NOT (status = 'READY' AND is_indexed = 1)
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        let doc = match self.get_document(id).await? {
            Some(d) => d,
            None => return Ok(ProcessingClaim::NotFound),
        };

        if result.rows_affected() == 1 {
            return Ok(ProcessingClaim::Claimed(doc));
        }

        // Lost the race or the state forbids it; report what we saw.
        let reason = ConflictReason::from_state(doc.status, doc.is_indexed)
            .unwrap_or(ConflictReason::AlreadyProcessing);
        Ok(ProcessingClaim::Conflict(reason))
    }

    async fn update_document_status(&self, id: &str, update: &DocumentUpdate) -> Result<()> {
        let result = status_update(id, update).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            bail!("document {} not found", id);
        }
        Ok(())
    }

    async fn delete_chunks(&self, document_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_chunks(&self, document_id: &str, chunks: &[DocumentChunk]) -> Result<()> {
        ensure_owned(document_id, chunks)?;
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            chunk_insert(chunk).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[DocumentChunk],
        update: &DocumentUpdate,
    ) -> Result<()> {
        ensure_owned(document_id, chunks)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            chunk_insert(chunk).execute(&mut *tx).await?;
        }

        let result = status_update(document_id, update).execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            bail!("document {} not found", document_id);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM document_chunks WHERE document_id = ? ORDER BY chunk_index ASC",
            CHUNK_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn query_similar(
        &self,
        tenant_id: i64,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.content, c.hash, c.token_count,
                   c.embedding, c.created_at, c.updated_at, d.title AS document_title
            FROM document_chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.tenant_id = ? AND c.embedding IS NOT NULL
            ORDER BY c.document_id, c.chunk_index
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<SimilarChunk> = rows
            .iter()
            .map(|row| {
                let chunk = row_to_chunk(row);
                let similarity = chunk
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(vector, e))
                    .unwrap_or(0.0);
                SimilarChunk {
                    chunk,
                    document_title: row.get("document_title"),
                    similarity,
                }
            })
            .collect();

        rank_and_truncate(&mut candidates, limit);
        Ok(candidates)
    }

    async fn record_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO conversations (id, tenant_id, mode, created_at) VALUES (?, ?, ?, ?)")
            .bind(&conversation.id)
            .bind(conversation.tenant_id)
            .bind(&conversation.mode)
            .bind(conversation.created_at)
            .execute(&mut *tx)
            .await?;

        for (position, message) in conversation.messages.iter().enumerate() {
            sqlx::query(
                "INSERT INTO conversation_messages (conversation_id, position, role, content) VALUES (?, ?, ?, ?)",
            )
            .bind(&conversation.id)
            .bind(position as i64)
            .bind(message.role.as_str())
            .bind(&message.content)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn recent_conversations(
        &self,
        tenant_id: i64,
        limit: usize,
    ) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, mode, created_at FROM conversations
            WHERE tenant_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(tenant_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let message_rows = sqlx::query(
                "SELECT role, content FROM conversation_messages WHERE conversation_id = ? ORDER BY position ASC",
            )
            .bind(&id)
            .fetch_all(&self.pool)
            .await?;

            let messages = message_rows
                .iter()
                .map(|m| {
                    let role: String = m.get("role");
                    Ok(ChatMessage {
                        role: role.parse::<Role>()?,
                        content: m.get("content"),
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            conversations.push(Conversation {
                id,
                tenant_id: row.get("tenant_id"),
                mode: row.get("mode"),
                messages,
                created_at: row.get("created_at"),
            });
        }

        Ok(conversations)
    }

    async fn active_model_config(&self, tenant_id: i64) -> Result<Option<ModelConfig>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, chat_model, is_active, updated_at FROM model_configs WHERE tenant_id = ? AND is_active = 1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ModelConfig {
            id: r.get("id"),
            tenant_id: r.get("tenant_id"),
            chat_model: r.get("chat_model"),
            is_active: r.get("is_active"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn upsert_model_config(&self, config: &ModelConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO model_configs (id, tenant_id, chat_model, is_active, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id) DO UPDATE SET
                chat_model = excluded.chat_model,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&config.id)
        .bind(config.tenant_id)
        .bind(&config.chat_model)
        .bind(config.is_active)
        .bind(config.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_insight(&self, insight: &AiInsight) -> Result<()> {
        let insights_json = serde_json::to_string(&insight.insights_data)?;
        sqlx::query(
            r#"
            INSERT INTO ai_insights (id, tenant_id, insights_json, model_id,
                                     generated_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&insight.id)
        .bind(insight.tenant_id)
        .bind(insights_json)
        .bind(&insight.model_id)
        .bind(insight.generated_at)
        .bind(insight.created_at)
        .bind(insight.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_insights(&self, tenant_id: i64, limit: usize) -> Result<Vec<AiInsight>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, insights_json, model_id, generated_at, created_at, updated_at
            FROM ai_insights
            WHERE tenant_id = ?
            ORDER BY generated_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(tenant_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                let raw: String = r.get("insights_json");
                let insights_data: InsightData =
                    serde_json::from_str(&raw).context("Invalid stored insight JSON")?;
                Ok(AiInsight {
                    id: r.get("id"),
                    tenant_id: r.get("tenant_id"),
                    insights_data,
                    model_id: r.get("model_id"),
                    generated_at: r.get("generated_at"),
                    created_at: r.get("created_at"),
                    updated_at: r.get("updated_at"),
                })
            })
            .collect()
    }
}
