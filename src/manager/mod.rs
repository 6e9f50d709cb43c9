//! Playbook manager
//!
//! Entry point tying the store, search index and embedding provider
//! together. The store is authoritative; the index is kept in sync on a
//! best-effort basis and can always be rebuilt with [`PlaybookManager::reindex`].

pub mod context;
pub mod contrastive;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_DATA_DIR, DEFAULT_MAX_AGE_DAYS, DEFAULT_MIN_CONFIDENCE};
use crate::embeddings::{text_for_playbook, EmbeddingProvider};
use crate::error::{PlaybookError, Result};
use crate::index::{SearchIndex, SearchMode, SearchQuery, SqliteSearchIndex};
use crate::playbook::lifecycle::DEFAULT_DEPRECATION_THRESHOLD;
use crate::playbook::{
    apply_composite_score, slugify, ExecutionRecord, Lesson, LifecycleAutomaton, ListFilter, Playbook,
    Reflection, SearchResult, Status, Transition,
};
use crate::storage::{FileStore, Store};

pub use contrastive::{ContrastiveQuery, ContrastiveResults};

/// Index database location relative to the data directory
const INDEX_DB_PATH: &str = "index/playbooks.db";

/// Manager settings
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub data_dir: PathBuf,
    /// Apply reflections marked `should_update` right after recording
    pub auto_reflect: bool,
    /// Age after which an unused playbook is prunable
    pub max_age: Duration,
    /// Confidence below which an old playbook is prunable
    pub min_confidence: f64,
    /// Success rate below which an active playbook is deprecated
    pub deprecation_threshold: f64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            auto_reflect: false,
            max_age: Duration::days(DEFAULT_MAX_AGE_DAYS),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            deprecation_threshold: DEFAULT_DEPRECATION_THRESHOLD,
        }
    }
}

/// Options for [`PlaybookManager::prune`]
#[derive(Debug, Clone, Default)]
pub struct PruneOptions {
    /// Zero means the manager's configured max age
    pub max_age: Duration,
    /// Zero means the manager's configured minimum confidence
    pub min_confidence: f64,
    /// Report matches without archiving anything
    pub dry_run: bool,
}

/// Ids archived (or, in a dry run, that would be archived)
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneResult {
    pub archived: Vec<String>,
    pub dry_run: bool,
}

/// Aggregate statistics over every stored playbook, archived included
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub total: usize,
    pub archived: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub total_executions: u64,
    pub avg_confidence: f64,
}

/// Procedural memory for agents
///
/// Safe to share across tasks. Mutations are serialized so every
/// read-modify-write of a playbook sees the previous one's result.
pub struct PlaybookManager {
    store: Arc<dyn Store>,
    index: Arc<dyn SearchIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    lifecycle: LifecycleAutomaton,
    config: ManagerConfig,
    write_lock: Mutex<()>,
}

impl PlaybookManager {
    /// Open the file store and SQLite index under `config.data_dir`
    pub fn open(config: ManagerConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let store = FileStore::open(&config.data_dir)?;
        let index = SqliteSearchIndex::open(config.data_dir.join(INDEX_DB_PATH), embedder.dimensions())?;
        info!(
            "Opened playbook memory at {} (embeddings: {})",
            config.data_dir.display(),
            embedder.name()
        );
        Ok(Self::with_components(config, Arc::new(store), Arc::new(index), embedder))
    }

    /// Assemble a manager from explicit components
    pub fn with_components(
        config: ManagerConfig,
        store: Arc<dyn Store>,
        index: Arc<dyn SearchIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let lifecycle = LifecycleAutomaton::new(config.deprecation_threshold);
        Self {
            store,
            index,
            embedder,
            lifecycle,
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Release the search index
    pub async fn close(&self) -> Result<()> {
        self.index.close()
    }

    /// Create a playbook: assigns identity, version 1 and stats, embeds, then persists
    ///
    /// An embedding failure aborts before anything is written.
    pub async fn create(&self, pb: &mut Playbook) -> Result<()> {
        pb.validate()?;
        if pb.is_archived() {
            return Err(PlaybookError::Validation("cannot create an archived playbook".to_string()));
        }

        let _guard = self.write_lock.lock().await;
        if pb.id.is_empty() {
            pb.id = uuid::Uuid::new_v4().to_string();
        } else {
            match self.store.get_playbook(&pb.id) {
                Ok(_) => {
                    return Err(PlaybookError::Validation(format!(
                        "playbook {} already exists",
                        pb.id
                    )))
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        if pb.slug.is_empty() {
            pb.slug = slugify(&pb.name);
        }
        pb.dedup_tags();
        pb.version = 1;

        let now = Utc::now();
        pb.created_at = now;
        pb.update_stats();
        pb.updated_at = now;

        self.embed_playbook(pb).await?;
        self.store.save_playbook(pb)?;
        self.index.index(pb)?;

        info!("Created playbook {} ({})", pb.id, pb.name);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Playbook> {
        self.store.get_playbook(id)
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<Playbook>> {
        self.store.list_playbooks(filter)
    }

    /// Save edits to an existing playbook, bumping its version
    ///
    /// Identity, creation time, outcome counters and last use always come
    /// from the stored copy. Archived and deprecated playbooks cannot
    /// change status.
    pub async fn update(&self, pb: &mut Playbook) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.update_locked(pb).await
    }

    async fn update_locked(&self, pb: &mut Playbook) -> Result<()> {
        pb.validate()?;
        let stored = self.store.get_playbook(&pb.id)?;
        if stored.is_archived() != pb.is_archived() {
            return Err(PlaybookError::Validation(format!(
                "playbook {}: archived status can only change through pruning",
                pb.id
            )));
        }
        if stored.status == Status::Deprecated && pb.status != Status::Deprecated {
            return Err(PlaybookError::Validation(format!(
                "playbook {}: deprecated playbooks cannot be reactivated",
                pb.id
            )));
        }

        pb.created_at = stored.created_at;
        pb.success_count = stored.success_count;
        pb.failure_count = stored.failure_count;
        pb.last_used_at = stored.last_used_at;
        if pb.slug.is_empty() {
            pb.slug = slugify(&pb.name);
        }
        pb.dedup_tags();
        pb.version = stored.version + 1;
        pb.update_stats();
        pb.updated_at = Utc::now();

        self.embed_playbook(pb).await?;
        self.store.save_playbook(pb)?;
        self.sync_index(pb)?;

        debug!("Updated playbook {} to v{}", pb.id, pb.version);
        Ok(())
    }

    /// Delete a playbook and its executions, then drop it from the index
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store.delete_playbook(id)?;
        self.index.remove(id)?;
        info!("Deleted playbook {}", id);
        Ok(())
    }

    /// Ranked search hydrated with full playbooks
    ///
    /// An embedding failure degrades the query to lexical-only.
    pub async fn search(&self, mut query: SearchQuery) -> Result<Vec<SearchResult>> {
        if query.embedding.is_empty() && !query.text.trim().is_empty() && query.mode != SearchMode::Lexical {
            match self.embedder.embed(&query.text).await {
                Ok(embedding) => query.embedding = embedding,
                Err(e) => {
                    warn!("Query embedding failed, falling back to bm25: {}", e);
                    query.mode = SearchMode::Lexical;
                }
            }
        }

        let hits = self.index.search(&query)?;
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.store.get_playbook(&hit.id) {
                Ok(playbook) => results.push(SearchResult {
                    playbook,
                    score: hit.score,
                }),
                Err(e) if e.is_not_found() => debug!("Dropping stale index hit {}", hit.id),
                Err(e) => return Err(e),
            }
        }

        apply_composite_score(&mut results, query.confidence_weight);
        Ok(results)
    }

    /// Record an execution and update the playbook's track record
    ///
    /// Returns the lifecycle transition, if one fired.
    pub async fn record_execution(&self, rec: &mut ExecutionRecord) -> Result<Option<Transition>> {
        let _guard = self.write_lock.lock().await;
        let mut pb = self.store.get_playbook(&rec.playbook_id)?;

        if rec.id.is_empty() {
            rec.id = uuid::Uuid::new_v4().to_string();
        }
        if rec.playbook_version == 0 {
            rec.playbook_version = pb.version;
        }
        self.store.save_execution(rec)?;

        if rec.outcome.counts_as_success() {
            pb.success_count += 1;
        } else {
            pb.failure_count += 1;
        }
        pb.last_used_at = Some(rec.completed_at);
        pb.version += 1;
        pb.update_stats();
        pb.updated_at = Utc::now();
        let transition = self.lifecycle.advance(&mut pb);

        self.store.save_playbook(&pb)?;
        self.sync_index(&pb)?;
        debug!(
            "Recorded {} execution {} for playbook {} (confidence: {:.3})",
            rec.outcome, rec.id, pb.id, pb.confidence
        );

        if self.config.auto_reflect {
            if let Some(reflection) = rec.reflection.as_ref().filter(|r| r.should_update) {
                if let Err(e) = self.apply_reflection_locked(&rec.playbook_id, reflection).await {
                    warn!("Auto-reflect failed for playbook {}: {}", rec.playbook_id, e);
                }
            }
        }

        Ok(transition)
    }

    pub async fn list_executions(&self, playbook_id: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        self.store.list_executions(playbook_id, limit)
    }

    pub async fn get_execution(&self, playbook_id: &str, execution_id: &str) -> Result<ExecutionRecord> {
        self.store.get_execution(playbook_id, execution_id)
    }

    /// Turn each suggested improvement into a lesson and save the playbook
    pub async fn apply_reflection(&self, playbook_id: &str, reflection: &Reflection) -> Result<Playbook> {
        let _guard = self.write_lock.lock().await;
        self.apply_reflection_locked(playbook_id, reflection).await
    }

    async fn apply_reflection_locked(&self, playbook_id: &str, reflection: &Reflection) -> Result<Playbook> {
        let mut pb = self.store.get_playbook(playbook_id)?;
        for improvement in &reflection.improvements {
            pb.lessons.push(Lesson::from_reflection(improvement.clone()));
        }
        self.update_locked(&mut pb).await?;
        info!(
            "Applied reflection to playbook {}: {} lessons added",
            pb.id,
            reflection.improvements.len()
        );
        Ok(pb)
    }

    /// Archive stale, low-confidence and deprecated playbooks
    pub async fn prune(&self, opts: PruneOptions) -> Result<PruneResult> {
        let max_age = if opts.max_age.is_zero() {
            self.config.max_age
        } else {
            opts.max_age
        };
        let min_confidence = if opts.min_confidence == 0.0 {
            self.config.min_confidence
        } else {
            opts.min_confidence
        };
        let now = Utc::now();
        let cutoff = now - max_age;

        let _guard = self.write_lock.lock().await;
        let mut result = PruneResult {
            archived: Vec::new(),
            dry_run: opts.dry_run,
        };

        for mut pb in self.store.list_playbooks(&ListFilter::all())? {
            if pb.is_archived() || !is_prunable(&pb, cutoff, min_confidence) {
                continue;
            }

            result.archived.push(pb.id.clone());
            if opts.dry_run {
                continue;
            }

            pb.status = Status::Archived;
            pb.updated_at = now;
            self.store.save_playbook(&pb)?;
            self.index.remove(&pb.id)?;
        }

        info!(
            "Prune{}: {} playbooks archived",
            if opts.dry_run { " (dry run)" } else { "" },
            result.archived.len()
        );
        Ok(result)
    }

    /// Rebuild index entries for every non-archived playbook
    ///
    /// Additive: entries for playbooks no longer in the store are kept.
    pub async fn reindex(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let playbooks = self.store.list_playbooks(&ListFilter::default())?;
        self.index.reindex(&playbooks)?;
        info!("Reindexed {} playbooks", playbooks.len());
        Ok(playbooks.len())
    }

    pub async fn stats(&self) -> Result<Stats> {
        let playbooks = self.store.list_playbooks(&ListFilter::all())?;

        let mut stats = Stats {
            total: playbooks.len(),
            ..Default::default()
        };
        let mut total_confidence = 0.0;
        for pb in &playbooks {
            if pb.is_archived() {
                stats.archived += 1;
            }
            if !pb.category.is_empty() {
                *stats.by_category.entry(pb.category.clone()).or_default() += 1;
            }
            *stats.by_status.entry(pb.status.to_string()).or_default() += 1;
            stats.total_executions += pb.total_executions() as u64;
            total_confidence += pb.confidence;
        }
        if !playbooks.is_empty() {
            stats.avg_confidence = total_confidence / playbooks.len() as f64;
        }
        Ok(stats)
    }

    async fn embed_playbook(&self, pb: &mut Playbook) -> Result<()> {
        pb.embedding = self.embedder.embed(&text_for_playbook(pb)).await?;
        Ok(())
    }

    /// Archived playbooks are never searchable
    fn sync_index(&self, pb: &Playbook) -> Result<()> {
        if pb.is_archived() {
            self.index.remove(&pb.id)
        } else {
            self.index.index(pb)
        }
    }
}

/// A playbook is prunable when any of these holds:
/// (a) confidence below `min_confidence` and not updated since `cutoff`,
/// (b) last used before `cutoff`,
/// (c) never used, created before `cutoff` and below `min_confidence`,
/// (d) deprecated.
fn is_prunable(pb: &Playbook, cutoff: DateTime<Utc>, min_confidence: f64) -> bool {
    let low_confidence = pb.confidence < min_confidence;

    if pb.status == Status::Deprecated {
        return true;
    }
    if low_confidence && pb.updated_at < cutoff {
        return true;
    }
    match pb.last_used_at {
        Some(last_used) => last_used < cutoff,
        None => low_confidence && pb.created_at < cutoff,
    }
}
