//! Error taxonomy for the gateway and the document pipeline.
//!
//! Storage, config, and CLI code use `anyhow`; the types here are the
//! errors callers are expected to match on.

use thiserror::Error;

use crate::extract::ExtractError;
use crate::models::DocumentStatus;

/// Errors raised by [`Gateway`](crate::gateway::Gateway) operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed input, rejected before any network call.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The circuit breaker is open; no provider call was attempted.
    #[error("LLM service temporarily unavailable (circuit open)")]
    ServiceUnavailable,

    /// A single attempt exceeded the configured deadline.
    #[error("provider call timed out after {0} ms")]
    Timeout(u64),

    /// No API key is available, so no request can be authenticated.
    #[error("provider credentials not configured: {0}")]
    MissingCredentials(String),

    /// Transport or response failure reported by the provider.
    ///
    /// `status` is `None` for network-level failures.
    #[error("provider error{}: {message}", http_suffix(.status))]
    Provider {
        status: Option<u16>,
        message: String,
    },
}

fn http_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl GatewayError {
    pub fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        GatewayError::Provider {
            status,
            message: message.into(),
        }
    }

    /// Whether another attempt may succeed.
    ///
    /// Timeouts, network failures, HTTP 429 and 5xx retry. Other 4xx
    /// responses, validation failures, missing credentials, and an open
    /// circuit do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Timeout(_) => true,
            GatewayError::Provider { status: None, .. } => true,
            GatewayError::Provider {
                status: Some(code), ..
            } => *code == 429 || *code >= 500,
            GatewayError::Validation(_)
            | GatewayError::MissingCredentials(_)
            | GatewayError::ServiceUnavailable => false,
        }
    }
}

/// Errors raised by [`DocumentProcessor::process`](crate::lifecycle::DocumentProcessor::process).
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("document {0} not found")]
    NotFound(String),

    /// The document is already being processed, or is already indexed.
    #[error("document {id} cannot be processed: {reason}")]
    ProcessingConflict { id: String, reason: ConflictReason },

    #[error("text extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    #[error("indexing failed at chunk {chunk_index}: {message}")]
    Indexing { chunk_index: i64, message: String },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Why a processing request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    AlreadyProcessing,
    AlreadyIndexed,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictReason::AlreadyProcessing => write!(f, "already being processed"),
            ConflictReason::AlreadyIndexed => write!(f, "already processed"),
        }
    }
}

impl ConflictReason {
    /// Classify the current state of a document that refused a processing claim.
    pub fn from_state(status: DocumentStatus, is_indexed: bool) -> Option<Self> {
        match status {
            DocumentStatus::Processing => Some(ConflictReason::AlreadyProcessing),
            DocumentStatus::Ready if is_indexed => Some(ConflictReason::AlreadyIndexed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GatewayError::Timeout(10).is_retryable());
        assert!(GatewayError::provider(None, "connection reset").is_retryable());
        assert!(GatewayError::provider(Some(429), "slow down").is_retryable());
        assert!(GatewayError::provider(Some(503), "overloaded").is_retryable());
        assert!(!GatewayError::provider(Some(401), "bad key").is_retryable());
        assert!(!GatewayError::ServiceUnavailable.is_retryable());
        assert!(!GatewayError::Validation("empty".into()).is_retryable());
    }

    #[test]
    fn test_provider_display_includes_status() {
        let err = GatewayError::provider(Some(502), "bad gateway");
        assert_eq!(err.to_string(), "provider error (HTTP 502): bad gateway");
        let err = GatewayError::provider(None, "dns");
        assert_eq!(err.to_string(), "provider error: dns");
    }

    #[test]
    fn test_conflict_reason_from_state() {
        assert_eq!(
            ConflictReason::from_state(DocumentStatus::Processing, false),
            Some(ConflictReason::AlreadyProcessing)
        );
        assert_eq!(
            ConflictReason::from_state(DocumentStatus::Ready, true),
            Some(ConflictReason::AlreadyIndexed)
        );
        assert_eq!(ConflictReason::from_state(DocumentStatus::Ready, false), None);
        assert_eq!(ConflictReason::from_state(DocumentStatus::Failed, false), None);
    }
}
