//! Contrastive search
//!
//! Splits search results into proven (high confidence) and failed (low
//! confidence) approaches so an agent can see both what to follow and
//! what to avoid.

use serde::Serialize;

use super::PlaybookManager;
use crate::error::Result;
use crate::index::SearchQuery;
use crate::playbook::SearchResult;

pub const DEFAULT_POSITIVE_MIN_CONFIDENCE: f64 = 0.5;
pub const DEFAULT_NEGATIVE_MAX_CONFIDENCE: f64 = 0.3;

/// The underlying search runs this many times wider than the caller's limit
const CANDIDATE_MULTIPLIER: usize = 3;

/// A search plus the thresholds used to split its results
#[derive(Debug, Clone, Default)]
pub struct ContrastiveQuery {
    pub query: SearchQuery,
    /// Minimum confidence for the positive group; `None` uses the default
    pub positive_min_confidence: Option<f64>,
    /// Maximum confidence for the negative group; `None` uses the default
    pub negative_max_confidence: Option<f64>,
    pub include_neutral: bool,
}

impl ContrastiveQuery {
    pub fn new(query: SearchQuery) -> Self {
        Self {
            query,
            ..Default::default()
        }
    }

    pub fn with_neutral(mut self) -> Self {
        self.include_neutral = true;
        self
    }
}

/// Results grouped by playbook confidence
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContrastiveResults {
    pub query: String,
    pub positive: Vec<SearchResult>,
    pub negative: Vec<SearchResult>,
    /// Only filled when neutral results were requested
    pub neutral: Vec<SearchResult>,
}

impl ContrastiveResults {
    pub fn is_empty(&self) -> bool {
        self.positive.is_empty() && self.negative.is_empty() && self.neutral.is_empty()
    }
}

/// Classify `results` by their playbook's confidence, keeping rank order
/// inside each group and at most `limit` per group
pub fn split_by_confidence(
    query: &str,
    results: Vec<SearchResult>,
    positive_min: f64,
    negative_max: f64,
    include_neutral: bool,
    limit: usize,
) -> ContrastiveResults {
    let mut split = ContrastiveResults {
        query: query.to_string(),
        ..Default::default()
    };

    for result in results {
        let confidence = result.playbook.confidence;
        if confidence >= positive_min {
            split.positive.push(result);
        } else if confidence <= negative_max {
            split.negative.push(result);
        } else if include_neutral {
            split.neutral.push(result);
        }
    }

    split.positive.truncate(limit);
    split.negative.truncate(limit);
    split.neutral.truncate(limit);
    split
}

impl PlaybookManager {
    /// Search and split the results into proven, failed and neutral groups
    ///
    /// Classification uses playbook confidence, never the search score.
    pub async fn search_with_context(&self, cq: ContrastiveQuery) -> Result<ContrastiveResults> {
        let limit = cq.query.effective_limit();
        let mut query = cq.query;
        query.limit = limit * CANDIDATE_MULTIPLIER;
        query.min_score = 0.0;

        let text = query.text.clone();
        let results = self.search(query).await?;

        Ok(split_by_confidence(
            &text,
            results,
            cq.positive_min_confidence.unwrap_or(DEFAULT_POSITIVE_MIN_CONFIDENCE),
            cq.negative_max_confidence.unwrap_or(DEFAULT_NEGATIVE_MAX_CONFIDENCE),
            cq.include_neutral,
            limit,
        ))
    }
}
