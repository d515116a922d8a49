//! Core data models used throughout the gateway and the retrieval pipeline.
//!
//! Timestamps are Unix seconds (`i64`), matching how they are stored in
//! SQLite.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Processing state of an uploaded [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Ready => "READY",
            DocumentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "PENDING" => Ok(DocumentStatus::Pending),
            "PROCESSING" => Ok(DocumentStatus::Processing),
            "READY" => Ok(DocumentStatus::Ready),
            "FAILED" => Ok(DocumentStatus::Failed),
            other => anyhow::bail!("unknown document status: {}", other),
        }
    }
}

/// An uploaded document owned by one tenant.
///
/// `is_indexed` implies `status == Ready`, and `chunk_count` equals the
/// number of persisted chunks whenever the document is at rest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub tenant_id: i64,
    pub owner_id: i64,
    pub title: String,
    pub status: DocumentStatus,
    pub chunk_count: i64,
    pub is_indexed: bool,
    /// Key of the source file relative to the storage root.
    pub file_ref: String,
    pub metadata: Option<BTreeMap<String, String>>,
    pub processed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    /// A freshly uploaded document in `PENDING` state.
    pub fn new_pending(
        tenant_id: i64,
        owner_id: i64,
        title: impl Into<String>,
        file_ref: impl Into<String>,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id,
            owner_id,
            title: title.into(),
            status: DocumentStatus::Pending,
            chunk_count: 0,
            is_indexed: false,
            file_ref: file_ref.into(),
            metadata,
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .map(String::as_str)
    }
}

/// Field changes applied to a document by the lifecycle controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentUpdate {
    pub status: Option<DocumentStatus>,
    pub is_indexed: Option<bool>,
    pub chunk_count: Option<i64>,
    pub processed_at: Option<i64>,
}

impl DocumentUpdate {
    pub fn ready(chunk_count: i64, processed_at: i64) -> Self {
        Self {
            status: Some(DocumentStatus::Ready),
            is_indexed: Some(true),
            chunk_count: Some(chunk_count),
            processed_at: Some(processed_at),
        }
    }

    pub fn failed() -> Self {
        Self {
            status: Some(DocumentStatus::Failed),
            is_indexed: Some(false),
            chunk_count: Some(0),
            processed_at: None,
        }
    }

    pub fn apply(&self, doc: &mut Document) {
        if let Some(status) = self.status {
            doc.status = status;
        }
        if let Some(indexed) = self.is_indexed {
            doc.is_indexed = indexed;
        }
        if let Some(count) = self.chunk_count {
            doc.chunk_count = count;
        }
        if self.processed_at.is_some() {
            doc.processed_at = self.processed_at;
        }
        doc.updated_at = chrono::Utc::now().timestamp();
    }
}

/// A bounded segment of a document's text, with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    /// SHA-256 of `content`, hex encoded.
    pub hash: String,
    pub token_count: i64,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A stored chunk paired with its similarity to a query vector.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarChunk {
    pub chunk: DocumentChunk,
    pub document_title: String,
    pub similarity: f64,
}

/// Chat message roles accepted by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => anyhow::bail!("unknown message role: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
    pub model: String,
    pub tokens_used: u64,
}

/// A recorded exchange between a visitor and the assistant.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub tenant_id: i64,
    /// Free-form origin label, e.g. `"rag"`.
    pub mode: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: i64,
}

impl Conversation {
    pub fn new(tenant_id: i64, mode: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id,
            mode: mode.into(),
            messages,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Per-tenant model selection used by insight synthesis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelConfig {
    pub id: String,
    pub tenant_id: i64,
    pub chat_model: String,
    pub is_active: bool,
    pub updated_at: i64,
}

/// Structured summary of recent conversations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightData {
    pub themes: Vec<String>,
    pub sentiment: String,
    pub actions: Vec<String>,
}

/// A persisted insight row. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiInsight {
    pub id: String,
    pub tenant_id: i64,
    pub insights_data: InsightData,
    /// `None` when synthesis fell back to a static placeholder.
    pub model_id: Option<String>,
    pub generated_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AiInsight {
    pub fn new(tenant_id: i64, model_id: Option<String>, insights_data: InsightData) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id,
            insights_data,
            model_id,
            generated_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Ready,
            DocumentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DocumentStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn test_failed_update_clears_index() {
        let mut doc = Document::new_pending(1, 2, "t", "f.txt", None);
        DocumentUpdate::ready(3, 100).apply(&mut doc);
        assert!(doc.is_indexed);
        assert_eq!(doc.chunk_count, 3);
        DocumentUpdate::failed().apply(&mut doc);
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert!(!doc.is_indexed);
        assert_eq!(doc.chunk_count, 0);
        assert_eq!(doc.processed_at, Some(100));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let msg = ChatMessage::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
    }
}
