//! Idempotent schema creation.
//!
//! Every statement is `CREATE ... IF NOT EXISTS`, so running migrations
//! on an existing database is a no-op.

use anyhow::Result;
use sqlx::SqlitePool;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        tenant_id INTEGER NOT NULL,
        owner_id INTEGER NOT NULL,
        title TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'PENDING',
        chunk_count INTEGER NOT NULL DEFAULT 0,
        is_indexed INTEGER NOT NULL DEFAULT 0,
        file_ref TEXT NOT NULL,
        metadata_json TEXT,
        processed_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        CHECK (is_indexed = 0 OR status = 'READY')
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS document_chunks (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        chunk_index INTEGER NOT NULL,
        content TEXT NOT NULL,
        hash TEXT NOT NULL,
        token_count INTEGER NOT NULL,
        embedding BLOB,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE(document_id, chunk_index)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        tenant_id INTEGER NOT NULL,
        mode TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversation_messages (
        conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        PRIMARY KEY (conversation_id, position)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS model_configs (
        id TEXT PRIMARY KEY,
        tenant_id INTEGER NOT NULL UNIQUE,
        chat_model TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_insights (
        id TEXT PRIMARY KEY,
        tenant_id INTEGER NOT NULL,
        insights_json TEXT NOT NULL,
        model_id TEXT,
        generated_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_documents_tenant ON documents(tenant_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON document_chunks(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_conversations_tenant ON conversations(tenant_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_insights_tenant ON ai_insights(tenant_id, generated_at DESC)",
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!(statements = SCHEMA.len(), "schema migrations applied");
    Ok(())
}
