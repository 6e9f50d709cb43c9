//! Playbook data model
//!
//! A playbook is a learned procedure an agent can follow: ordered steps,
//! accumulated lessons, and an execution track record from which the
//! success rate and Wilson confidence are derived.
//!
//! Field names are the on-disk schema; do not rename them.

pub mod lifecycle;
pub mod scoring;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{PlaybookError, Result};

pub use lifecycle::{LifecycleAutomaton, Transition};
pub use scoring::{apply_composite_score, normalize_score, wilson_confidence};

/// Lifecycle state of a playbook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Draft,
    Active,
    Deprecated,
    /// Terminal; reached only through pruning
    Archived,
}

impl Status {
    pub const ALL: [Status; 4] = [Status::Active, Status::Draft, Status::Deprecated, Status::Archived];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::Active => "active",
            Status::Deprecated => "deprecated",
            Status::Archived => "archived",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Status {
    type Err = PlaybookError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(Status::Draft),
            "active" => Ok(Status::Active),
            "deprecated" => Ok(Status::Deprecated),
            "archived" => Ok(Status::Archived),
            other => Err(PlaybookError::Validation(format!("unknown status: {}", other))),
        }
    }
}

/// Result of an execution (whole run or single step)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Partial,
    Failure,
}

impl Outcome {
    /// Partial runs count as successes for the outcome counters
    pub fn counts_as_success(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::Partial)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Partial => write!(f, "partial"),
            Outcome::Failure => write!(f, "failure"),
        }
    }
}

impl FromStr for Outcome {
    type Err = PlaybookError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "success" => Ok(Outcome::Success),
            "partial" => Ok(Outcome::Partial),
            "failure" => Ok(Outcome::Failure),
            other => Err(PlaybookError::Validation(format!("unknown outcome: {}", other))),
        }
    }
}

/// A learned procedure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub success_count: u32,
    #[serde(default)]
    pub failure_count: u32,
    /// Derived by `update_stats`
    #[serde(default)]
    pub success_rate: f64,
    /// Derived by `update_stats`
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: String,
}

impl Playbook {
    /// Start a draft playbook; id, slug and timestamps are assigned on create
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    /// Append a step, numbering it after the current last step
    pub fn with_step(mut self, action: impl Into<String>) -> Self {
        let order = self.steps.len() as u32 + 1;
        self.steps.push(Step::new(order, action));
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            self.add_tag(tag);
        }
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Add a tag unless already present; first-insertion order is kept
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !tag.is_empty() && !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    /// Collapse duplicate tags, keeping the first occurrence of each
    pub fn dedup_tags(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.tags.retain(|t| !t.is_empty() && seen.insert(t.clone()));
    }

    pub fn total_executions(&self) -> u32 {
        self.success_count + self.failure_count
    }

    pub fn is_archived(&self) -> bool {
        self.status == Status::Archived
    }

    /// Structural checks applied on create and update
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PlaybookError::Validation("name is required".to_string()));
        }
        if self.steps.is_empty() {
            return Err(PlaybookError::Validation("at least one step is required".to_string()));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.action.trim().is_empty() {
                return Err(PlaybookError::Validation(format!("step {}: action is required", i + 1)));
            }
        }
        Ok(())
    }
}

/// A single action within a playbook
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub order: u32,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tool_args: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

impl Step {
    pub fn new(order: u32, action: impl Into<String>) -> Self {
        Self {
            order,
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }
}

/// One run of a playbook; append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    #[serde(default)]
    pub id: String,
    pub playbook_id: String,
    /// Playbook version at the time of the run
    #[serde(default, rename = "playbook_ver")]
    pub playbook_version: u32,
    #[serde(default)]
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub outcome: Outcome,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    #[serde(default)]
    pub task_context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection: Option<Reflection>,
}

impl ExecutionRecord {
    /// A run that started and finished now
    pub fn new(playbook_id: impl Into<String>, outcome: Outcome) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            playbook_id: playbook_id.into(),
            playbook_version: 0,
            agent_id: String::new(),
            started_at: now,
            completed_at: now,
            outcome,
            step_results: Vec::new(),
            task_context: String::new(),
            reflection: None,
        }
    }

    pub fn with_reflection(mut self, reflection: Reflection) -> Self {
        self.reflection = Some(reflection);
        self
    }
}

/// Outcome of a single step inside an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_order: u32,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Free-form, e.g. `"1.5s"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// An agent's analysis of an execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    #[serde(default)]
    pub what_worked: Vec<String>,
    #[serde(default)]
    pub what_failed: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub should_update: bool,
}

/// Confidence assigned to lessons generated from a reflection
pub const REFLECTION_LESSON_CONFIDENCE: f64 = 0.5;

/// Accumulated wisdom attached to a playbook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub learned_from: String,
    pub learned_at: DateTime<Utc>,
    #[serde(default)]
    pub applies: String,
    #[serde(default)]
    pub confidence: f64,
}

impl Lesson {
    /// Lesson derived from one reflection improvement
    pub fn from_reflection(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            learned_from: "reflection".to_string(),
            learned_at: Utc::now(),
            applies: "general".to_string(),
            confidence: REFLECTION_LESSON_CONFIDENCE,
        }
    }
}

/// Criteria for listing playbooks
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<Status>,
    pub category: Option<String>,
    /// Every tag listed here must be present
    pub tags: Vec<String>,
    /// 0 means unlimited
    pub limit: usize,
    pub include_archived: bool,
}

impl ListFilter {
    pub fn all() -> Self {
        Self {
            include_archived: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, pb: &Playbook) -> bool {
        match self.status {
            Some(status) if pb.status != status => return false,
            None if pb.is_archived() && !self.include_archived => return false,
            _ => {}
        }
        if let Some(ref category) = self.category {
            if !category.is_empty() && &pb.category != category {
                return false;
            }
        }
        self.tags.iter().all(|required| pb.tags.contains(required))
    }
}

/// A search hit hydrated with its full playbook
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub playbook: Playbook,
    pub score: f64,
}

static NON_ALPHANUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// Convert a name to a URL-safe slug
pub fn slugify(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    NON_ALPHANUMERIC
        .replace_all(&lower, "-")
        .trim_matches('-')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Deploy Service"), "deploy-service");
        assert_eq!(slugify("  Fix: flaky CI!! "), "fix-flaky-ci");
        assert_eq!(slugify("a--b__c"), "a-b-c");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn test_validate() {
        let ok = Playbook::new("Deploy", "").with_step("build");
        assert!(ok.validate().is_ok());

        let no_name = Playbook::new("  ", "").with_step("build");
        assert!(matches!(no_name.validate(), Err(PlaybookError::Validation(_))));

        let no_steps = Playbook::new("Deploy", "");
        assert!(matches!(no_steps.validate(), Err(PlaybookError::Validation(_))));

        let empty_action = Playbook::new("Deploy", "").with_step("build").with_step(" ");
        let err = empty_action.validate().unwrap_err();
        assert!(err.to_string().contains("step 2"));
    }

    #[test]
    fn test_tags_keep_insertion_order_without_duplicates() {
        let mut pb = Playbook::new("x", "").with_tags(["rust", "ci", "rust", "deploy"]);
        assert_eq!(pb.tags, vec!["rust", "ci", "deploy"]);

        pb.tags.push("ci".to_string());
        pb.dedup_tags();
        assert_eq!(pb.tags, vec!["rust", "ci", "deploy"]);
    }

    #[test]
    fn test_status_roundtrip_and_parse() {
        let json = serde_json::to_string(&Status::Deprecated).unwrap();
        assert_eq!(json, "\"deprecated\"");
        assert_eq!("Active".parse::<Status>().unwrap(), Status::Active);
        assert!("retired".parse::<Status>().is_err());
    }

    #[test]
    fn test_list_filter_archived_handling() {
        let mut archived = Playbook::new("old", "").with_category("ops");
        archived.status = Status::Archived;
        let active = Playbook {
            status: Status::Active,
            ..Playbook::new("new", "").with_category("ops").with_tags(["k8s"])
        };

        let default = ListFilter::default();
        assert!(!default.matches(&archived));
        assert!(default.matches(&active));

        assert!(ListFilter::all().matches(&archived));

        let only_archived = ListFilter { status: Some(Status::Archived), ..Default::default() };
        assert!(only_archived.matches(&archived));
        assert!(!only_archived.matches(&active));

        let tagged = ListFilter { tags: vec!["k8s".into()], category: Some("ops".into()), ..Default::default() };
        assert!(tagged.matches(&active));
        let wrong_cat = ListFilter { category: Some("dev".into()), ..Default::default() };
        assert!(!wrong_cat.matches(&active));
    }

    #[test]
    fn test_outcome_counts() {
        assert!(Outcome::Success.counts_as_success());
        assert!(Outcome::Partial.counts_as_success());
        assert!(!Outcome::Failure.counts_as_success());
        assert_eq!("Partial".parse::<Outcome>().unwrap(), Outcome::Partial);
        assert!("meh".parse::<Outcome>().is_err());
    }

    #[test]
    fn test_execution_record_json_keys() {
        let doc = r#"{
            "id": "e1",
            "playbook_id": "p1",
            "playbook_ver": 4,
            "agent_id": "",
            "started_at": "2025-01-02T03:04:05Z",
            "completed_at": "2025-01-02T03:04:07Z",
            "outcome": "partial",
            "step_results": [{"step_order": 1, "outcome": "success", "duration": "1.5s"}],
            "task_context": "deploy"
        }"#;
        let rec: ExecutionRecord = serde_json::from_str(doc).unwrap();
        assert_eq!(rec.playbook_version, 4);
        assert_eq!(rec.step_results[0].duration.as_deref(), Some("1.5s"));

        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["playbook_ver"], 4);
        assert!(value.get("playbook_version").is_none());
        assert_eq!(value["step_results"][0]["duration"], "1.5s");
    }

    #[test]
    fn test_reflection_lesson_defaults() {
        let lesson = Lesson::from_reflection("cache the build");
        assert_eq!(lesson.learned_from, "reflection");
        assert_eq!(lesson.applies, "general");
        assert_eq!(lesson.confidence, REFLECTION_LESSON_CONFIDENCE);
        assert!(!lesson.id.is_empty());
    }
}
