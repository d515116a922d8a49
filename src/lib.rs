//! # RAG Gateway
//!
//! A resilient LLM gateway and document retrieval pipeline for
//! multi-tenant retrieval-augmented generation.
//!
//! Every call to the model provider passes through one gateway that
//! sanitizes input, fails fast behind a circuit breaker, retries transient
//! errors with backoff, and bounds each attempt with a deadline. Uploaded
//! documents are extracted, chunked, embedded, and stored per tenant so
//! questions can be answered from the most similar excerpts. Recorded
//! conversations feed a periodic insight synthesizer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────────┐   ┌───────────────┐
//! │  Upload  │──▶│   Lifecycle    │──▶│    SQLite     │
//! │  (file)  │   │ Extract+Chunk  │   │ chunks+vector │
//! └──────────┘   │    +Embed      │   └───────┬───────┘
//!                └───────┬────────┘           │
//!                        ▼                    ▼
//!                ┌────────────────┐   ┌───────────────┐
//!                │    Gateway     │◀──│   Retrieval   │
//!                │ breaker/retry/ │   │   + Insights  │
//!                │   deadline     │   └───────────────┘
//!                └───────┬────────┘
//!                        ▼
//!                   LLM provider
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rgw init                          # create database and storage root
//! rgw upload ./handbook.pdf         # register a PENDING document
//! rgw process <document-id>         # extract, chunk, embed, index
//! rgw ask "How long do refunds take?"
//! rgw insights generate
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`sanitize`] | Input cleanup, injection sentinel, PII redaction |
//! | [`resilience`] | Per-attempt deadline and retry with backoff |
//! | [`breaker`] | Circuit breaker shared by every provider call |
//! | [`provider`] | HTTP transport to the model provider |
//! | [`gateway`] | Chat and embedding entry point |
//! | [`chunk`] | Paragraph-aware text chunking |
//! | [`extract`] | Text extraction for txt, md, pdf, docx |
//! | [`embedding`] | Chunk embedding and vector helpers |
//! | [`lifecycle`] | Upload, processing, and deletion of documents |
//! | [`retrieval`] | Similarity search and RAG answering |
//! | [`insight`] | Conversation insight synthesis |
//! | [`store`] | Persistence trait and in-memory backend |
//! | [`sqlite_store`] | SQLite backend |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod breaker;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod insight;
pub mod lifecycle;
pub mod migrate;
pub mod models;
pub mod provider;
pub mod resilience;
pub mod retrieval;
pub mod sanitize;
pub mod sqlite_store;
pub mod storage;
pub mod store;
