mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use common::{keyword_vector, paragraphs, simple_gateway, Pipeline, ScriptedTransport, DIMS};
use rag_gateway::config::parse_config;
use rag_gateway::db::connect_path;
use rag_gateway::embedding::cosine_similarity;
use rag_gateway::error::{ConflictReason, GatewayError, ProcessError};
use rag_gateway::extract::ExtractError;
use rag_gateway::migrate::run_migrations;
use rag_gateway::models::{DocumentStatus, DocumentUpdate, Role};
use rag_gateway::retrieval::{RagAssistant, RetrievalEngine, RAG_MODE};
use rag_gateway::sqlite_store::SqliteStore;
use rag_gateway::store::memory::InMemoryStore;
use rag_gateway::store::{ProcessingClaim, Store};

/// The same pipeline over both bundled stores.
async fn pipelines(transport: &Arc<ScriptedTransport>) -> Vec<Pipeline> {
    let gateway = simple_gateway(transport.clone());

    let sql_tmp = TempDir::new().unwrap();
    let pool = connect_path(&sql_tmp.path().join("data/rgw.sqlite"))
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();

    vec![
        Pipeline::new(
            Arc::new(InMemoryStore::default()),
            gateway.clone(),
            TempDir::new().unwrap(),
        ),
        Pipeline::new(Arc::new(SqliteStore::new(pool)), gateway, sql_tmp),
    ]
}

async fn mark_stale(p: &Pipeline, id: &str) {
    p.store
        .update_document_status(
            id,
            &DocumentUpdate {
                is_indexed: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
}

async fn file_ref(p: &Pipeline, id: &str) -> String {
    p.store.get_document(id).await.unwrap().unwrap().file_ref
}

#[tokio::test]
async fn test_process_indexes_document() {
    let transport = Arc::new(ScriptedTransport::new());
    for p in pipelines(&transport).await {
        let id = p
            .upload(1, "policies.md", &paragraphs(&["refunds", "shipping", "careers"]))
            .await;
        let pending = p.store.get_document(&id).await.unwrap().unwrap();
        assert_eq!(pending.status, DocumentStatus::Pending);
        assert_eq!(pending.title, "policies");

        let ready = p.processor.process(&id).await.unwrap();
        assert_eq!(ready.status, DocumentStatus::Ready);
        assert!(ready.is_indexed);
        assert_eq!(ready.chunk_count, 3);
        assert!(ready.processed_at.is_some());

        let stored = p.store.get_document(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Ready);
        assert_eq!(stored.chunk_count, 3);

        let chunks = p.store.list_chunks(&id).await.unwrap();
        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as i64);
            assert_eq!(chunk.embedding.as_ref().map(Vec::len), Some(DIMS));
            assert_eq!(chunk.hash.len(), 64);
        }
        assert!(chunks[1].content.contains("shipping"));
    }
}

#[tokio::test]
async fn test_reprocess_replaces_chunk_set() {
    let transport = Arc::new(ScriptedTransport::new());
    for p in pipelines(&transport).await {
        let id = p
            .upload(1, "faq.txt", &paragraphs(&["refunds", "shipping", "careers"]))
            .await;
        p.processor.process(&id).await.unwrap();
        let old_ids: Vec<String> = p
            .store
            .list_chunks(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(old_ids.len(), 3);

        mark_stale(&p, &id).await;
        p.rewrite_stored(&file_ref(&p, &id).await, &paragraphs(&["refunds", "careers"]));

        let ready = p.processor.process(&id).await.unwrap();
        assert_eq!(ready.chunk_count, 2);

        let chunks = p.store.list_chunks(&id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| !old_ids.contains(&c.id)));
        assert_eq!(
            p.store.get_document(&id).await.unwrap().unwrap().chunk_count,
            2
        );
    }
}

#[tokio::test]
async fn test_process_rejects_conflicts() {
    let transport = Arc::new(ScriptedTransport::new());
    for p in pipelines(&transport).await {
        let id = p.upload(1, "a.md", &paragraphs(&["refunds"])).await;

        assert!(matches!(
            p.store.begin_processing(&id).await.unwrap(),
            ProcessingClaim::Claimed(_)
        ));
        let err = p.processor.process(&id).await.unwrap_err();
        assert!(matches!(
            err,
            ProcessError::ProcessingConflict {
                reason: ConflictReason::AlreadyProcessing,
                ..
            }
        ));

        // Recover the claim through the failure path, then index.
        p.store
            .update_document_status(&id, &DocumentUpdate::failed())
            .await
            .unwrap();
        p.processor.process(&id).await.unwrap();

        let err = p.processor.process(&id).await.unwrap_err();
        assert!(matches!(
            err,
            ProcessError::ProcessingConflict {
                reason: ConflictReason::AlreadyIndexed,
                ..
            }
        ));

        assert!(matches!(
            p.processor.process("missing").await,
            Err(ProcessError::NotFound(_))
        ));
    }
}

#[tokio::test]
async fn test_concurrent_process_single_winner() {
    let transport = Arc::new(ScriptedTransport::new().with_delay(Duration::from_millis(20)));
    let gateway = simple_gateway(transport.clone());
    let p = Pipeline::new(
        Arc::new(InMemoryStore::default()),
        gateway,
        TempDir::new().unwrap(),
    );
    let id = p.upload(1, "a.md", &paragraphs(&["refunds", "shipping"])).await;

    let (a, b) = tokio::join!(p.processor.process(&id), p.processor.process(&id));
    let ok = [&a, &b].iter().filter(|r| r.is_ok()).count();
    let conflicts = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(ProcessError::ProcessingConflict { .. })))
        .count();
    assert_eq!((ok, conflicts), (1, 1));
    assert_eq!(transport.embed_calls(), 2);
}

#[tokio::test]
async fn test_failure_marks_failed_with_no_chunks() {
    let transport = Arc::new(ScriptedTransport::with_embedder(|text| {
        if text.contains("careers") {
            Err(GatewayError::provider(Some(400), "rejected input"))
        } else {
            Ok(keyword_vector(text))
        }
    }));
    for p in pipelines(&transport).await {
        let id = p.upload(1, "a.md", &paragraphs(&["refunds", "shipping"])).await;
        p.processor.process(&id).await.unwrap();
        assert_eq!(p.store.list_chunks(&id).await.unwrap().len(), 2);

        mark_stale(&p, &id).await;
        p.rewrite_stored(
            &file_ref(&p, &id).await,
            &paragraphs(&["refunds", "careers", "shipping"]),
        );

        let err = p.processor.process(&id).await.unwrap_err();
        assert!(matches!(err, ProcessError::Gateway(GatewayError::Provider { .. })));

        let doc = p.store.get_document(&id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert!(!doc.is_indexed);
        assert_eq!(doc.chunk_count, 0);
        assert!(p.store.list_chunks(&id).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_wrong_dimensions_fail_indexing() {
    let transport = Arc::new(ScriptedTransport::with_embedder(|_| Ok(vec![0.5, 0.5])));
    for p in pipelines(&transport).await {
        let id = p.upload(1, "a.md", &paragraphs(&["refunds"])).await;

        let err = p.processor.process(&id).await.unwrap_err();
        assert!(matches!(err, ProcessError::Indexing { chunk_index: 0, .. }));
        let doc = p.store.get_document(&id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
    }
}

#[tokio::test]
async fn test_blank_document_fails_extraction() {
    let transport = Arc::new(ScriptedTransport::new());
    for p in pipelines(&transport).await {
        let id = p.upload(1, "blank.txt", "  \n\n \n").await;

        let err = p.processor.process(&id).await.unwrap_err();
        assert!(matches!(err, ProcessError::Extraction(ExtractError::Empty)));
        let doc = p.store.get_document(&id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(transport.embed_calls(), 0);
    }
}

#[tokio::test]
async fn test_upload_rejects_unsupported_type() {
    let transport = Arc::new(ScriptedTransport::new());
    let p = Pipeline::new(
        Arc::new(InMemoryStore::default()),
        simple_gateway(transport),
        TempDir::new().unwrap(),
    );
    let source = p.tmp.path().join("image.png");
    std::fs::write(&source, [0u8, 1, 2]).unwrap();

    assert!(p.library.upload(1, 1, &source, None).await.is_err());
    assert!(p.library.list(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_retrieval_threshold_order_and_tenant_scope() {
    let transport = Arc::new(ScriptedTransport::new());
    for p in pipelines(&transport).await {
        let a = p
            .upload(1, "a.md", &paragraphs(&["refunds", "shipping", "careers"]))
            .await;
        let b = p
            .upload(1, "b.md", &paragraphs(&["refunds and shipping"]))
            .await;
        let other = p.upload(2, "c.md", &paragraphs(&["refunds"])).await;
        for id in [&a, &b, &other] {
            p.processor.process(id).await.unwrap();
        }

        let engine = RetrievalEngine::new(p.store.clone(), 0.4);
        let hits = engine
            .find_similar_chunks(1, &[1.0, 0.0, 0.0], 5)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.document_id, a);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].chunk.document_id, b);
        assert!((hits[1].similarity - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-4);
        assert!(hits.iter().all(|h| h.similarity > 0.4));
        assert_eq!(hits[0].document_title, "a");

        let limited = engine
            .find_similar_chunks(1, &[1.0, 0.0, 0.0], 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        let strict = RetrievalEngine::new(p.store.clone(), 0.9);
        assert_eq!(
            strict
                .find_similar_chunks(1, &[1.0, 0.0, 0.0], 5)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(engine.find_similar_chunks(1, &[], 5).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_similarity_equal_to_threshold_is_excluded() {
    let transport = Arc::new(ScriptedTransport::new());
    for p in pipelines(&transport).await {
        let id = p.upload(1, "refunds.md", &paragraphs(&["refunds"])).await;
        p.processor.process(&id).await.unwrap();

        let query = [0.4f32, 0.84f32.sqrt(), 0.0];
        let boundary = cosine_similarity(&query, &[1.0, 0.0, 0.0]);
        assert!((boundary - 0.4).abs() < 1e-6);

        let at_boundary = RetrievalEngine::new(p.store.clone(), boundary);
        assert!(at_boundary
            .find_similar_chunks(1, &query, 5)
            .await
            .unwrap()
            .is_empty());

        let just_below = RetrievalEngine::new(p.store.clone(), boundary - 1e-9);
        let hits = just_below.find_similar_chunks(1, &query, 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].similarity, boundary);
    }
}

fn assistant_config() -> rag_gateway::config::Config {
    parse_config(
        r#"
[db]
path = "unused.sqlite"

[models]
chat = ["chat-model"]
embedding = ["embed-model"]

[embedding]
dims = 3
"#,
    )
    .unwrap()
}

#[tokio::test]
async fn test_ask_answers_and_records_redacted_conversation() {
    let transport = Arc::new(ScriptedTransport::new());
    for p in pipelines(&transport).await {
        let id = p
            .upload(1, "handbook.md", &paragraphs(&["refunds", "careers"]))
            .await;
        p.processor.process(&id).await.unwrap();

        let assistant = RagAssistant::new(
            simple_gateway(transport.clone()),
            p.store.clone(),
            &assistant_config(),
        );

        let hits = assistant.search(1, "refund policy", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].similarity > 0.999);

        let answer = assistant
            .ask(1, "Can jane@example.com get a refund?")
            .await
            .unwrap();
        assert_eq!(answer.answer, "ok");
        assert_eq!(answer.sources.len(), 1);

        let (model, sent) = transport.last_chat();
        assert_eq!(model, "chat-model");
        assert_eq!(sent[0].role, Role::System);
        assert!(sent[0].content.contains("[1] handbook"));
        assert!(sent[0].content.contains("refunds"));

        let conversations = p.store.recent_conversations(1, 10).await.unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].id, answer.conversation_id);
        assert_eq!(conversations[0].mode, RAG_MODE);
        assert_eq!(
            conversations[0].messages[0].content,
            "Can [EMAIL] get a refund?"
        );
        assert_eq!(conversations[0].messages[1].role, Role::Assistant);

        assert!(matches!(
            assistant.search(1, "   ", None).await,
            Err(e) if e.downcast_ref::<GatewayError>().is_some()
        ));
    }
}

#[tokio::test]
async fn test_delete_removes_document_chunks_and_file() {
    let transport = Arc::new(ScriptedTransport::new());
    for p in pipelines(&transport).await {
        let id = p.upload(1, "a.md", &paragraphs(&["refunds"])).await;
        p.processor.process(&id).await.unwrap();
        let stored = p.files.root().join(file_ref(&p, &id).await);
        assert!(stored.exists());

        assert!(!p.library.delete(2, &id).await.unwrap());
        assert!(p.library.delete(1, &id).await.unwrap());

        assert!(p.store.get_document(&id).await.unwrap().is_none());
        assert!(p.store.list_chunks(&id).await.unwrap().is_empty());
        assert!(!stored.exists());
        assert!(!p.library.delete(1, &id).await.unwrap());
    }
}
