//! Persistent store for playbooks and execution records
//!
//! The store is the source of truth; the search index is derived from it
//! and can be rebuilt at any time.

pub mod file;

use crate::error::Result;
use crate::playbook::{ExecutionRecord, ListFilter, Playbook};

pub use file::FileStore;

/// Durable storage of playbooks and their executions
///
/// Implementations must be safe to share across threads. Every write is
/// all-or-nothing: a reader sees either the previous or the new document.
pub trait Store: Send + Sync {
    /// Insert or replace a playbook
    fn save_playbook(&self, pb: &Playbook) -> Result<()>;

    /// Load a playbook; `NotFound` if absent
    fn get_playbook(&self, id: &str) -> Result<Playbook>;

    /// Matching playbooks, highest confidence first
    fn list_playbooks(&self, filter: &ListFilter) -> Result<Vec<Playbook>>;

    /// Remove a playbook and all of its executions; absent ids are not an error
    fn delete_playbook(&self, id: &str) -> Result<()>;

    fn save_execution(&self, rec: &ExecutionRecord) -> Result<()>;

    /// Load one execution; `NotFound` if absent
    fn get_execution(&self, playbook_id: &str, execution_id: &str) -> Result<ExecutionRecord>;

    /// Executions of a playbook, newest first; `limit` 0 means all
    fn list_executions(&self, playbook_id: &str, limit: usize) -> Result<Vec<ExecutionRecord>>;
}
