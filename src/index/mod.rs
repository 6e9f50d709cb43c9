//! Search index over playbooks
//!
//! The index is derived data: it holds a projection of each playbook
//! (free text, filter fields, embedding) and answers ranked queries with
//! bare ids. Hydration back to full playbooks is the manager's job.

pub mod sqlite;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{PlaybookError, Result};
use crate::playbook::{Playbook, Status};

pub use sqlite::SqliteSearchIndex;

/// Number of hits returned when a query leaves `limit` at 0
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Query strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Lexical match, augmented with nearest neighbours when available
    #[default]
    Hybrid,
    /// BM25 full-text only
    #[serde(rename = "bm25", alias = "lexical")]
    Lexical,
    /// Nearest neighbours; falls back to lexical without vectors
    Vector,
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchMode::Hybrid => write!(f, "hybrid"),
            SearchMode::Lexical => write!(f, "bm25"),
            SearchMode::Vector => write!(f, "vector"),
        }
    }
}

impl FromStr for SearchMode {
    type Err = PlaybookError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "hybrid" => Ok(SearchMode::Hybrid),
            "bm25" | "lexical" => Ok(SearchMode::Lexical),
            "vector" => Ok(SearchMode::Vector),
            other => Err(PlaybookError::Validation(format!("unknown search mode: {}", other))),
        }
    }
}

/// A ranked search request
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: String,
    pub mode: SearchMode,
    pub category: Option<String>,
    pub status: Option<Status>,
    /// Hits scoring below this are dropped; 0 disables the floor
    pub min_score: f64,
    /// 0 means [`DEFAULT_SEARCH_LIMIT`]
    pub limit: usize,
    /// Precomputed query embedding; the manager fills this in when empty
    pub embedding: Vec<f32>,
    /// Blend of relevance and confidence in [0, 1]; applied by the manager
    pub confidence_weight: f64,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_confidence_weight(mut self, weight: f64) -> Self {
        self.confidence_weight = weight;
        self
    }

    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_SEARCH_LIMIT
        } else {
            self.limit
        }
    }
}

/// A raw index hit; higher scores are better
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
}

/// The indexed projection of a playbook
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tags: String,
    pub steps: String,
    pub lessons: String,
    pub category: String,
    pub status: Status,
    pub confidence: f64,
    pub success_rate: f64,
    pub embedding: Vec<f32>,
}

impl From<&Playbook> for IndexDocument {
    fn from(pb: &Playbook) -> Self {
        Self {
            id: pb.id.clone(),
            name: pb.name.clone(),
            description: pb.description.clone(),
            tags: pb.tags.join(" "),
            steps: pb.steps.iter().map(|s| s.action.as_str()).collect::<Vec<_>>().join(" "),
            lessons: pb.lessons.iter().map(|l| l.content.as_str()).collect::<Vec<_>>().join(" "),
            category: pb.category.clone(),
            status: pb.status,
            confidence: pb.confidence,
            success_rate: pb.success_rate,
            embedding: pb.embedding.clone(),
        }
    }
}

/// Ranked retrieval over indexed playbooks
pub trait SearchIndex: Send + Sync {
    /// Add or replace the document for `pb`
    fn index(&self, pb: &Playbook) -> Result<()>;

    /// Drop the document for `id`; absent ids are not an error
    fn remove(&self, id: &str) -> Result<()>;

    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>>;

    /// Upsert every playbook in one batch; documents not in `corpus` are kept
    fn reindex(&self, corpus: &[Playbook]) -> Result<()>;

    /// Release resources; later calls fail
    fn close(&self) -> Result<()>;
}
