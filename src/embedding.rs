//! Chunk embedding and vector utilities.
//!
//! [`EmbeddingIndexer`] obtains one embedding per chunk through
//! [`Gateway::embed`], using a single model so that every stored vector
//! and every query vector share one vector space. A failure on any chunk
//! aborts the batch: a chunk is never persisted without a usable vector.
//!
//! Vectors are stored in SQLite as little-endian `f32` BLOBs:
//! - [`vec_to_blob`] / [`blob_to_vec`] convert between the two forms
//! - [`cosine_similarity`] ranks stored vectors against a query

use std::sync::Arc;

use crate::error::ProcessError;
use crate::gateway::Gateway;
use crate::models::DocumentChunk;

pub struct EmbeddingIndexer {
    gateway: Arc<Gateway>,
    model: String,
    dims: usize,
}

impl EmbeddingIndexer {
    pub fn new(gateway: Arc<Gateway>, model: impl Into<String>, dims: usize) -> Self {
        Self {
            gateway,
            model: model.into(),
            dims,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Fill in `embedding` on every chunk, in order.
    ///
    /// Stops at the first failing chunk; earlier chunks keep their vectors
    /// but the caller must not persist a partial batch.
    pub async fn index_chunks(&self, chunks: &mut [DocumentChunk]) -> Result<(), ProcessError> {
        for chunk in chunks.iter_mut() {
            let response = match self.gateway.embed(&self.model, &chunk.content).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(
                        document_id = %chunk.document_id,
                        chunk_index = chunk.chunk_index,
                        error = %e,
                        "embedding failed"
                    );
                    return Err(e.into());
                }
            };

            if let Err(message) = self.validate(&response.embedding) {
                return Err(ProcessError::Indexing {
                    chunk_index: chunk.chunk_index,
                    message,
                });
            }
            chunk.embedding = Some(response.embedding);
        }

        tracing::debug!(chunks = chunks.len(), model = %self.model, "chunks embedded");
        Ok(())
    }

    fn validate(&self, embedding: &[f32]) -> Result<(), String> {
        if embedding.is_empty() {
            return Err("provider returned an empty embedding".to_string());
        }
        if embedding.len() != self.dims {
            return Err(format!(
                "expected {} dimensions, got {}",
                self.dims,
                embedding.len()
            ));
        }
        Ok(())
    }
}

/// Encode a float vector as a little-endian byte BLOB.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`, i.e. `1 - cosine distance`.
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different
/// lengths. Accumulates in `f64`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}
