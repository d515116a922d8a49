//! Similarity retrieval and retrieval-augmented answering.
//!
//! [`RetrievalEngine::find_similar_chunks`] ranks a tenant's stored chunks
//! against a query vector and keeps only those strictly above the
//! relevance floor (`retrieval.min_similarity`, default 0.4), most similar
//! first, capped at `limit`.
//!
//! [`RagAssistant`] is the caller layer on top: it embeds a question,
//! retrieves context, and asks the chat models in configured order,
//! falling through to the next model on provider errors. An open circuit
//! stops the chain at once since the breaker is shared by every model.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::models::{ChatMessage, ChatResponse, Conversation, SimilarChunk};
use crate::sanitize::sanitize_pii;
use crate::store::{rank_and_truncate, Store};

/// Conversation mode recorded for RAG exchanges.
pub const RAG_MODE: &str = "rag";

pub struct RetrievalEngine {
    store: Arc<dyn Store>,
    min_similarity: f64,
}

impl RetrievalEngine {
    pub fn new(store: Arc<dyn Store>, min_similarity: f64) -> Self {
        Self {
            store,
            min_similarity,
        }
    }

    pub fn min_similarity(&self) -> f64 {
        self.min_similarity
    }

    pub async fn find_similar_chunks(
        &self,
        tenant_id: i64,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarChunk>> {
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut hits = self.store.query_similar(tenant_id, query, limit).await?;
        hits.retain(|h| h.similarity > self.min_similarity);
        rank_and_truncate(&mut hits, limit);

        tracing::debug!(
            tenant_id,
            hits = hits.len(),
            min_similarity = self.min_similarity,
            "similar chunks retrieved"
        );
        Ok(hits)
    }
}

/// Answer produced by [`RagAssistant::ask`].
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub model: String,
    pub sources: Vec<SimilarChunk>,
    pub conversation_id: String,
}

pub struct RagAssistant {
    gateway: Arc<Gateway>,
    store: Arc<dyn Store>,
    retrieval: RetrievalEngine,
    chat_models: Vec<String>,
    embedding_model: String,
    limit: usize,
}

impl RagAssistant {
    pub fn new(gateway: Arc<Gateway>, store: Arc<dyn Store>, config: &Config) -> Self {
        Self {
            retrieval: RetrievalEngine::new(store.clone(), config.retrieval.min_similarity),
            gateway,
            store,
            chat_models: config.models.chat.clone(),
            embedding_model: config.models.primary_embedding().to_string(),
            limit: config.retrieval.limit,
        }
    }

    /// Embed `query` and return the matching chunks.
    ///
    /// An embedding with an unexpected shape yields no results.
    pub async fn search(
        &self,
        tenant_id: i64,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SimilarChunk>> {
        if query.trim().is_empty() {
            return Err(GatewayError::Validation("query must not be empty".into()).into());
        }
        let embedding = self.gateway.embed(&self.embedding_model, query).await?;
        if embedding.embedding.is_empty() {
            tracing::warn!(tenant_id, "query embedding empty, returning no context");
            return Ok(Vec::new());
        }
        self.retrieval
            .find_similar_chunks(tenant_id, &embedding.embedding, limit.unwrap_or(self.limit))
            .await
    }

    /// Answer a question from the tenant's indexed documents and record
    /// the exchange for later insight synthesis.
    pub async fn ask(&self, tenant_id: i64, question: &str) -> Result<RagAnswer> {
        let sources = self.search(tenant_id, question, None).await?;
        let messages = vec![
            ChatMessage::system(build_system_prompt(&sources)),
            ChatMessage::user(question),
        ];

        let response = self.chat_with_fallback(&messages).await?;

        let conversation = Conversation::new(
            tenant_id,
            RAG_MODE,
            vec![
                ChatMessage::user(sanitize_pii(question)),
                ChatMessage::assistant(response.content.clone()),
            ],
        );
        if let Err(e) = self.store.record_conversation(&conversation).await {
            tracing::warn!(tenant_id, error = %e, "failed to record conversation");
        }

        tracing::info!(
            tenant_id,
            model = %response.model,
            sources = sources.len(),
            "question answered"
        );
        Ok(RagAnswer {
            answer: response.content,
            model: response.model,
            sources,
            conversation_id: conversation.id,
        })
    }

    /// Try each chat model in order until one answers.
    pub async fn chat_with_fallback(
        &self,
        messages: &[ChatMessage],
    ) -> Result<ChatResponse, GatewayError> {
        let mut last_err = None;
        for model in &self.chat_models {
            match self.gateway.chat(model, messages).await {
                Ok(response) => return Ok(response),
                Err(e @ (GatewayError::ServiceUnavailable
                    | GatewayError::Validation(_)
                    | GatewayError::MissingCredentials(_))) => {
                    return Err(e)
                }
                Err(e) => {
                    tracing::warn!(model = %model, error = %e, "chat model failed, trying next");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| GatewayError::Validation("no chat models configured".into())))
    }
}

fn build_system_prompt(sources: &[SimilarChunk]) -> String {
    if sources.is_empty() {
        return "You are a helpful assistant for this site. No relevant documents were found \
                for the question. Say so briefly and answer only if you are confident."
            .to_string();
    }

    let mut prompt = String::from(
        "You are a helpful assistant for this site. Answer using only the context \
         excerpts below. If they do not contain the answer, say you don't know.\n\nContext:\n",
    );
    for (i, hit) in sources.iter().enumerate() {
        prompt.push_str(&format!(
            "\n[{}] {} (relevance {:.2})\n{}\n",
            i + 1,
            hit.document_title,
            hit.similarity,
            hit.chunk.content
        ));
    }
    prompt
}
