//! End-to-end tests for the playbook manager over a temporary data directory

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use playbook_memory::error::{PlaybookError, Result as PbResult};
use playbook_memory::index::SearchHit;
use playbook_memory::{
    ContrastiveQuery, EmbeddingProvider, ExecutionRecord, FileStore, HashEmbedder, ListFilter,
    ManagerConfig, NoopEmbedder, Outcome, Playbook, PlaybookManager, PruneOptions, Reflection,
    SearchIndex, SearchMode, SearchQuery, SqliteSearchIndex, Status, Store,
};

fn open(dir: &TempDir, embedder: Arc<dyn EmbeddingProvider>) -> PlaybookManager {
    let config = ManagerConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    PlaybookManager::open(config, embedder).unwrap()
}

fn lexical_manager(dir: &TempDir) -> PlaybookManager {
    open(dir, Arc::new(NoopEmbedder))
}

fn playbook(name: &str, description: &str) -> Playbook {
    Playbook::new(name, description).with_step("check status").with_step("apply fix")
}

async fn record(manager: &PlaybookManager, id: &str, outcome: Outcome) -> PbResult<Option<playbook_memory::Transition>> {
    let mut rec = ExecutionRecord::new(id, outcome);
    manager.record_execution(&mut rec).await
}

/// Embedder that can be switched into a failing state
struct FlakyEmbedder {
    failing: AtomicBool,
}

impl FlakyEmbedder {
    fn new(failing: bool) -> Self {
        Self {
            failing: AtomicBool::new(failing),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed(&self, _text: &str) -> PbResult<Vec<f32>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PlaybookError::embedding_msg("provider unavailable"));
        }
        Ok(vec![1.0, 0.0, 0.0, 0.0])
    }

    fn name(&self) -> &str {
        "flaky"
    }

    fn dimensions(&self) -> usize {
        4
    }
}

/// SQLite index whose `remove` can be made to fail
struct RemoveFailingIndex {
    inner: SqliteSearchIndex,
    fail_remove: AtomicBool,
}

impl SearchIndex for RemoveFailingIndex {
    fn index(&self, pb: &Playbook) -> PbResult<()> {
        self.inner.index(pb)
    }

    fn remove(&self, id: &str) -> PbResult<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(PlaybookError::index(
                format!("remove playbook {}", id),
                "database is locked",
            ));
        }
        self.inner.remove(id)
    }

    fn search(&self, query: &SearchQuery) -> PbResult<Vec<SearchHit>> {
        self.inner.search(query)
    }

    fn reindex(&self, corpus: &[Playbook]) -> PbResult<()> {
        self.inner.reindex(corpus)
    }

    fn close(&self) -> PbResult<()> {
        self.inner.close()
    }
}

#[tokio::test]
async fn test_create_assigns_identity_and_version() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let mut pb = playbook("Deploy Service", "Roll out a new build").with_tags(vec!["k8s", "k8s", "ci"]);
    manager.create(&mut pb).await?;

    assert!(!pb.id.is_empty());
    assert_eq!(pb.slug, "deploy-service");
    assert_eq!(pb.version, 1);
    assert_eq!(pb.status, Status::Draft);
    assert_eq!(pb.tags, vec!["k8s", "ci"]);
    assert_eq!(pb.confidence, 0.0);

    let stored = manager.get(&pb.id).await?;
    assert_eq!(stored.name, "Deploy Service");
    assert_eq!(stored.version, 1);

    manager.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_create_rejects_invalid_playbook() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let mut no_steps = Playbook::new("Empty", "no steps at all");
    let err = manager.create(&mut no_steps).await.unwrap_err();
    assert!(matches!(err, PlaybookError::Validation(_)));
    assert!(manager.list(&ListFilter::all()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_update_bumps_version_and_keeps_counters() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let mut pb = playbook("Rotate keys", "rotate credentials");
    manager.create(&mut pb).await?;
    record(&manager, &pb.id, Outcome::Success).await?;

    // stale local copy: counters must come from the store
    pb.description = "rotate credentials safely".to_string();
    pb.success_count = 99;
    manager.update(&mut pb).await?;

    let stored = manager.get(&pb.id).await?;
    assert_eq!(stored.version, 3);
    assert_eq!(stored.success_count, 1);
    assert_eq!(stored.description, "rotate credentials safely");

    let mut again = stored.clone();
    manager.update(&mut again).await?;
    assert_eq!(manager.get(&pb.id).await?.version, 4);
    Ok(())
}

#[tokio::test]
async fn test_update_missing_playbook_is_not_found() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let mut ghost = playbook("Ghost", "");
    ghost.id = "does-not-exist".to_string();
    let err = manager.update(&mut ghost).await.unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
async fn test_promotion_on_third_success() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let mut pb = playbook("Restart pods", "");
    manager.create(&mut pb).await?;

    assert!(record(&manager, &pb.id, Outcome::Success).await?.is_none());
    assert!(record(&manager, &pb.id, Outcome::Success).await?.is_none());
    let transition = record(&manager, &pb.id, Outcome::Success).await?.expect("promotion");
    assert_eq!(transition.from, Status::Draft);
    assert_eq!(transition.to, Status::Active);

    let stored = manager.get(&pb.id).await?;
    assert_eq!(stored.status, Status::Active);
    assert_eq!(stored.success_count, 3);
    assert_eq!(stored.version, 4);
    assert!(stored.last_used_at.is_some());
    assert!(stored.confidence > 0.0);

    // already active: nothing further fires
    assert!(record(&manager, &pb.id, Outcome::Success).await?.is_none());
    assert_eq!(manager.get(&pb.id).await?.status, Status::Active);
    Ok(())
}

#[tokio::test]
async fn test_deprecation_needs_five_executions() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let mut pb = playbook("Force push", "");
    pb.status = Status::Active;
    manager.create(&mut pb).await?;

    assert!(record(&manager, &pb.id, Outcome::Success).await?.is_none());
    for _ in 0..3 {
        assert!(record(&manager, &pb.id, Outcome::Failure).await?.is_none());
    }
    assert_eq!(manager.get(&pb.id).await?.status, Status::Active);

    let transition = record(&manager, &pb.id, Outcome::Failure).await?.expect("deprecation");
    assert_eq!(transition.to, Status::Deprecated);
    assert_eq!(manager.get(&pb.id).await?.status, Status::Deprecated);
    Ok(())
}

#[tokio::test]
async fn test_drafts_are_never_deprecated() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let mut pb = playbook("Untested idea", "");
    manager.create(&mut pb).await?;
    for _ in 0..6 {
        assert!(record(&manager, &pb.id, Outcome::Failure).await?.is_none());
    }
    assert_eq!(manager.get(&pb.id).await?.status, Status::Draft);
    Ok(())
}

#[tokio::test]
async fn test_execution_history() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let mut pb = playbook("Backup database", "");
    manager.create(&mut pb).await?;

    let mut rec = ExecutionRecord::new(&pb.id, Outcome::Partial);
    rec.task_context = "nightly backup".to_string();
    manager.record_execution(&mut rec).await?;
    assert!(!rec.id.is_empty());
    assert_eq!(rec.playbook_version, 1);

    let fetched = manager.get_execution(&pb.id, &rec.id).await?;
    assert_eq!(fetched.task_context, "nightly backup");
    assert_eq!(fetched.outcome, Outcome::Partial);
    assert_eq!(manager.list_executions(&pb.id, 10).await?.len(), 1);

    let err = record(&manager, "missing", Outcome::Success).await.unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
async fn test_delete_cascades() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let mut pb = playbook("Drain node", "drain kubernetes node");
    manager.create(&mut pb).await?;
    record(&manager, &pb.id, Outcome::Success).await?;

    manager.delete(&pb.id).await?;
    assert!(manager.get(&pb.id).await.unwrap_err().is_not_found());
    assert!(manager.list_executions(&pb.id, 0).await?.is_empty());
    assert!(manager.search(SearchQuery::new("drain")).await?.is_empty());

    // idempotent
    manager.delete(&pb.id).await?;
    Ok(())
}

#[tokio::test]
async fn test_search_confidence_weight_reorders() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let mut strong_match = playbook("Deploy service", "deploy deploy quickly");
    strong_match.success_count = 1;
    strong_match.failure_count = 9;
    manager.create(&mut strong_match).await?;

    let mut weak_match = playbook("Rollback release", "revert the release then deploy the previous build again");
    weak_match.success_count = 10;
    weak_match.failure_count = 1;
    manager.create(&mut weak_match).await?;

    for i in 0..4 {
        let mut filler = playbook(&format!("Unrelated {}", i), "rotate certificates");
        manager.create(&mut filler).await?;
    }

    let by_relevance = manager.search(SearchQuery::new("deploy")).await?;
    assert_eq!(by_relevance.len(), 2);
    assert_eq!(by_relevance[0].playbook.id, strong_match.id);

    let by_confidence = manager
        .search(SearchQuery::new("deploy").with_confidence_weight(1.0))
        .await?;
    assert_eq!(by_confidence[0].playbook.id, weak_match.id);
    assert!(by_confidence[0].score >= by_confidence[1].score);
    Ok(())
}

#[tokio::test]
async fn test_search_filters_and_limit() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    for (name, category) in [("Deploy api", "ops"), ("Deploy web", "ops"), ("Deploy docs", "docs")] {
        let mut pb = playbook(name, "deploy steps").with_category(category);
        manager.create(&mut pb).await?;
    }

    let ops = manager.search(SearchQuery::new("deploy").with_category("ops")).await?;
    assert_eq!(ops.len(), 2);
    assert!(ops.iter().all(|r| r.playbook.category == "ops"));

    let limited = manager.search(SearchQuery::new("deploy").with_limit(1)).await?;
    assert_eq!(limited.len(), 1);

    let active = manager.search(SearchQuery::new("deploy").with_status(Status::Active)).await?;
    assert!(active.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_hybrid_search_with_hash_embeddings() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = open(&dir, Arc::new(HashEmbedder::default()));

    let mut pb = playbook("Renew TLS certificate", "renew expiring certificates on the ingress");
    manager.create(&mut pb).await?;
    assert_eq!(pb.embedding.len(), 384);

    let vector = manager
        .search(SearchQuery::new("renew certificate").with_mode(SearchMode::Vector))
        .await?;
    assert_eq!(vector[0].playbook.id, pb.id);

    let hybrid = manager.search(SearchQuery::new("renew certificate")).await?;
    assert_eq!(hybrid[0].playbook.id, pb.id);
    assert!(hybrid[0].score > 0.0);
    Ok(())
}

#[tokio::test]
async fn test_embedding_failure_aborts_create() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = open(&dir, Arc::new(FlakyEmbedder::new(true)));

    let mut pb = playbook("Scale cluster", "");
    let err = manager.create(&mut pb).await.unwrap_err();
    assert!(matches!(err, PlaybookError::Embedding { .. }));
    assert!(manager.list(&ListFilter::all()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_search_degrades_to_lexical_when_embedding_fails() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let embedder = Arc::new(FlakyEmbedder::new(false));
    let manager = open(&dir, embedder.clone());

    let mut pb = playbook("Scale cluster", "add worker nodes");
    manager.create(&mut pb).await?;

    embedder.failing.store(true, Ordering::SeqCst);
    let results = manager.search(SearchQuery::new("worker nodes")).await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].playbook.id, pb.id);
    Ok(())
}

#[tokio::test]
async fn test_contrastive_split() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    for (name, successes, failures) in [
        ("Restart outage service", 10, 1),
        ("Force push outage fix", 1, 9),
        ("Wait out the outage", 10, 5),
    ] {
        let mut pb = playbook(name, "handle an outage");
        pb.success_count = successes;
        pb.failure_count = failures;
        manager.create(&mut pb).await?;
    }

    let results = manager
        .search_with_context(ContrastiveQuery::new(SearchQuery::new("outage")))
        .await?;
    assert_eq!(results.positive.len(), 1);
    assert_eq!(results.negative.len(), 1);
    assert!(results.neutral.is_empty());
    assert_eq!(results.positive[0].playbook.name, "Restart outage service");
    assert_eq!(results.negative[0].playbook.name, "Force push outage fix");

    let with_neutral = manager
        .search_with_context(ContrastiveQuery::new(SearchQuery::new("outage")).with_neutral())
        .await?;
    assert_eq!(with_neutral.neutral.len(), 1);
    assert_eq!(with_neutral.neutral[0].playbook.name, "Wait out the outage");

    let md = results.to_prompt_context();
    assert!(md.contains("### Proven Approaches (Follow These)"));
    assert!(md.contains("### Failed Approaches (Avoid These)"));
    assert!(!md.contains("Wait out the outage"));
    Ok(())
}

#[tokio::test]
async fn test_auto_reflect_adds_lessons() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let config = ManagerConfig {
        data_dir: dir.path().to_path_buf(),
        auto_reflect: true,
        ..Default::default()
    };
    let manager = PlaybookManager::open(config, Arc::new(NoopEmbedder))?;

    let mut pb = playbook("Migrate schema", "");
    manager.create(&mut pb).await?;

    let reflection = Reflection {
        improvements: vec!["take a snapshot first".to_string(), "lock writes".to_string()],
        should_update: true,
        ..Default::default()
    };
    let mut rec = ExecutionRecord::new(&pb.id, Outcome::Failure).with_reflection(reflection.clone());
    manager.record_execution(&mut rec).await?;

    let stored = manager.get(&pb.id).await?;
    assert_eq!(stored.lessons.len(), 2);
    assert_eq!(stored.lessons[0].content, "take a snapshot first");
    assert_eq!(stored.failure_count, 1);

    // not applied when the reflection does not ask for it
    let mut quiet = ExecutionRecord::new(&pb.id, Outcome::Success).with_reflection(Reflection {
        should_update: false,
        ..reflection
    });
    manager.record_execution(&mut quiet).await?;
    assert_eq!(manager.get(&pb.id).await?.lessons.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_prune_archives_deprecated_and_stale() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let mut deprecated = playbook("Legacy deploy", "deploy the old way");
    deprecated.status = Status::Deprecated;
    manager.create(&mut deprecated).await?;

    let mut stale = playbook("Stale deploy", "deploy via ftp");
    manager.create(&mut stale).await?;
    let store = FileStore::open(dir.path())?;
    let mut aged = store.get_playbook(&stale.id)?;
    aged.last_used_at = Some(Utc::now() - Duration::days(200));
    store.save_playbook(&aged)?;

    let mut fresh = playbook("Fresh deploy", "deploy with helm");
    manager.create(&mut fresh).await?;

    let dry = manager
        .prune(PruneOptions {
            dry_run: true,
            ..Default::default()
        })
        .await?;
    assert!(dry.dry_run);
    assert_eq!(dry.archived.len(), 2);
    assert!(dry.archived.contains(&deprecated.id));
    assert!(dry.archived.contains(&stale.id));
    assert_eq!(manager.get(&deprecated.id).await?.status, Status::Deprecated);

    let real = manager.prune(PruneOptions::default()).await?;
    assert_eq!(real.archived.len(), 2);
    assert_eq!(manager.get(&stale.id).await?.status, Status::Archived);

    let visible = manager.list(&ListFilter::default()).await?;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, fresh.id);

    let hits = manager.search(SearchQuery::new("deploy")).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].playbook.id, fresh.id);

    // archived playbooks are not pruned twice
    assert!(manager.prune(PruneOptions::default()).await?.archived.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_archived_status_is_terminal() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let mut pb = playbook("Old runbook", "");
    pb.status = Status::Deprecated;
    manager.create(&mut pb).await?;
    manager.prune(PruneOptions::default()).await?;

    let mut revived = manager.get(&pb.id).await?;
    revived.status = Status::Active;
    let err = manager.update(&mut revived).await.unwrap_err();
    assert!(matches!(err, PlaybookError::Validation(_)));

    let mut fresh = playbook("New runbook", "");
    manager.create(&mut fresh).await?;
    let mut archive = manager.get(&fresh.id).await?;
    archive.status = Status::Archived;
    assert!(matches!(
        manager.update(&mut archive).await.unwrap_err(),
        PlaybookError::Validation(_)
    ));

    let mut born_archived = playbook("Born archived", "");
    born_archived.status = Status::Archived;
    assert!(manager.create(&mut born_archived).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_stats() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let mut a = playbook("A", "").with_category("ops");
    manager.create(&mut a).await?;
    let mut b = playbook("B", "").with_category("ops");
    b.status = Status::Deprecated;
    manager.create(&mut b).await?;
    let mut c = playbook("C", "").with_category("docs");
    manager.create(&mut c).await?;

    record(&manager, &a.id, Outcome::Success).await?;
    record(&manager, &a.id, Outcome::Failure).await?;
    manager.prune(PruneOptions::default()).await?;

    let stats = manager.stats().await?;
    assert_eq!(stats.total, 3);
    assert_eq!(stats.archived, 1);
    assert_eq!(stats.by_category.get("ops"), Some(&2));
    assert_eq!(stats.by_category.get("docs"), Some(&1));
    assert_eq!(stats.by_status.get("draft"), Some(&2));
    assert_eq!(stats.by_status.get("archived"), Some(&1));
    assert_eq!(stats.total_executions, 2);
    assert!(stats.avg_confidence >= 0.0 && stats.avg_confidence <= 1.0);
    Ok(())
}

#[tokio::test]
async fn test_reindex_restores_search() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    {
        let manager = lexical_manager(&dir);
        let mut pb = playbook("Purge cache", "purge the cdn cache");
        manager.create(&mut pb).await?;
        manager.close().await?;
    }

    std::fs::remove_dir_all(dir.path().join("index"))?;

    let manager = lexical_manager(&dir);
    assert!(manager.search(SearchQuery::new("purge")).await?.is_empty());
    assert_eq!(manager.reindex().await?, 1);
    let hits = manager.search(SearchQuery::new("purge")).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].playbook.name, "Purge cache");
    Ok(())
}

#[tokio::test]
async fn test_reopen_keeps_data() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let id = {
        let manager = lexical_manager(&dir);
        let mut pb = playbook("Persisted", "survives restarts");
        manager.create(&mut pb).await?;
        manager.close().await?;
        pb.id
    };

    let manager = lexical_manager(&dir);
    assert_eq!(manager.get(&id).await?.name, "Persisted");
    assert_eq!(manager.search(SearchQuery::new("restarts")).await?.len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_records_keep_every_outcome() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = Arc::new(lexical_manager(&dir));

    let mut pb = playbook("Hot path", "");
    pb.status = Status::Active;
    manager.create(&mut pb).await?;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let manager = manager.clone();
        let id = pb.id.clone();
        handles.push(tokio::spawn(async move {
            let mut rec = ExecutionRecord::new(id, Outcome::Success);
            manager.record_execution(&mut rec).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let stored = manager.get(&pb.id).await?;
    assert_eq!(manager.list_executions(&pb.id, 0).await?.len(), 20);
    assert_eq!(stored.success_count, 20);
    assert_eq!(stored.version, 21);
    Ok(())
}

#[tokio::test]
async fn test_create_rejects_existing_id() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let mut pb = playbook("Original", "");
    manager.create(&mut pb).await?;
    record(&manager, &pb.id, Outcome::Success).await?;

    let mut clash = playbook("Impostor", "");
    clash.id = pb.id.clone();
    let err = manager.create(&mut clash).await.unwrap_err();
    assert!(matches!(err, PlaybookError::Validation(_)));

    let stored = manager.get(&pb.id).await?;
    assert_eq!(stored.name, "Original");
    assert_eq!(stored.version, 2);
    assert_eq!(stored.success_count, 1);

    // a fresh caller-chosen id is fine
    let mut named = playbook("Named", "");
    named.id = "named-playbook".to_string();
    manager.create(&mut named).await?;
    assert_eq!(manager.get("named-playbook").await?.version, 1);
    Ok(())
}

#[tokio::test]
async fn test_embedding_failure_aborts_update() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let embedder = Arc::new(FlakyEmbedder::new(false));
    let manager = open(&dir, embedder.clone());

    let mut pb = playbook("Scale cluster", "add worker nodes");
    manager.create(&mut pb).await?;

    embedder.failing.store(true, Ordering::SeqCst);
    let mut edited = manager.get(&pb.id).await?;
    edited.description = "remove worker nodes".to_string();
    let err = manager.update(&mut edited).await.unwrap_err();
    assert!(matches!(err, PlaybookError::Embedding { .. }));

    let stored = manager.get(&pb.id).await?;
    assert_eq!(stored.version, 1);
    assert_eq!(stored.description, "add worker nodes");
    Ok(())
}

#[tokio::test]
async fn test_delete_reports_index_failure_and_reindex_recovers() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let index = Arc::new(RemoveFailingIndex {
        inner: SqliteSearchIndex::in_memory(0)?,
        fail_remove: AtomicBool::new(false),
    });
    let config = ManagerConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let manager = PlaybookManager::with_components(
        config,
        Arc::new(FileStore::open(dir.path())?),
        index.clone(),
        Arc::new(NoopEmbedder),
    );

    let mut doomed = playbook("Drain node", "drain kubernetes node");
    manager.create(&mut doomed).await?;
    let mut kept = playbook("Cordon node", "cordon kubernetes node");
    manager.create(&mut kept).await?;

    index.fail_remove.store(true, Ordering::SeqCst);
    let err = manager.delete(&doomed.id).await.unwrap_err();
    assert!(matches!(err, PlaybookError::Index { .. }));

    // the store deletion stands; the stale index entry is dropped on hydration
    assert!(manager.get(&doomed.id).await.unwrap_err().is_not_found());
    let hits = manager.search(SearchQuery::new("node")).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].playbook.id, kept.id);

    index.fail_remove.store(false, Ordering::SeqCst);
    assert_eq!(manager.reindex().await?, 1);
    let hits = manager.search(SearchQuery::new("node")).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].playbook.id, kept.id);

    // retrying the delete clears the index entry too
    manager.delete(&doomed.id).await?;
    Ok(())
}

#[tokio::test]
async fn test_get_ignores_stray_temp_file() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let mut pb = playbook("Flush queue", "");
    manager.create(&mut pb).await?;
    std::fs::write(
        dir.path().join("playbooks").join(".tmp-interrupted"),
        format!("{{\"id\":\"{}\",\"name\":\"Fl", pb.id),
    )?;

    let stored = manager.get(&pb.id).await?;
    assert_eq!(stored.name, "Flush queue");
    assert_eq!(stored.version, 1);
    assert_eq!(manager.list(&ListFilter::all()).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_deprecated_cannot_be_reactivated() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let mut pb = playbook("Shaky fix", "");
    pb.status = Status::Deprecated;
    manager.create(&mut pb).await?;

    let mut revived = manager.get(&pb.id).await?;
    revived.status = Status::Active;
    let err = manager.update(&mut revived).await.unwrap_err();
    assert!(matches!(err, PlaybookError::Validation(_)));

    // edits that keep the status are allowed
    let mut edited = manager.get(&pb.id).await?;
    edited.description = "kept for reference".to_string();
    manager.update(&mut edited).await?;
    let stored = manager.get(&pb.id).await?;
    assert_eq!(stored.status, Status::Deprecated);
    assert_eq!(stored.version, 2);
    Ok(())
}

#[tokio::test]
async fn test_prune_keeps_legacy_never_used_playbook() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let manager = lexical_manager(&dir);

    let now = Utc::now().to_rfc3339();
    let doc = serde_json::json!({
        "id": "legacy",
        "name": "Legacy runbook",
        "steps": [{"order": 1, "action": "check"}],
        "version": 3,
        "success_count": 10,
        "failure_count": 0,
        "confidence": 0.83,
        "status": "active",
        "created_at": now,
        "updated_at": now,
        "last_used_at": "0001-01-01T00:00:00Z"
    });
    std::fs::write(dir.path().join("playbooks").join("legacy.json"), doc.to_string())?;

    let result = manager
        .prune(PruneOptions {
            dry_run: true,
            ..Default::default()
        })
        .await?;
    assert!(result.archived.is_empty());
    assert_eq!(manager.get("legacy").await?.last_used_at, None);
    Ok(())
}
