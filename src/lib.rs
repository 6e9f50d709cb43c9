//! Playbook Memory - procedural memory for AI agents
//!
//! Agents store reusable procedures ("playbooks"), record how each run
//! went, and retrieve the right procedure for a new task:
//! - Wilson lower-bound confidence from success/failure counts
//! - Lifecycle automaton (draft -> active -> deprecated -> archived)
//! - Hybrid BM25 + vector search over a SQLite FTS5 index
//! - Contrastive retrieval of proven vs. failed approaches
//! - Crash-safe JSON file store
//!
//! # Example
//!
//! ```ignore
//! use playbook_memory::{HashEmbedder, ManagerConfig, Playbook, PlaybookManager, SearchQuery};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = PlaybookManager::open(ManagerConfig::default(), Arc::new(HashEmbedder::default()))?;
//!     let mut pb = Playbook::new("Rotate TLS certs", "Renew and roll out certificates")
//!         .with_step("Request new certificate")
//!         .with_step("Reload ingress");
//!     manager.create(&mut pb).await?;
//!     let hits = manager.search(SearchQuery::new("renew certificate")).await?;
//!     println!("{} hits", hits.len());
//!     manager.close().await?;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod error;
pub mod playbook;
pub mod storage;
pub mod embeddings;
pub mod index;
pub mod manager;
pub mod config;
pub mod cli;

// Re-export commonly used types for convenience
pub use error::{PlaybookError, Result};

pub use playbook::{
    ExecutionRecord,
    Lesson,
    LifecycleAutomaton,
    ListFilter,
    Outcome,
    Playbook,
    Reflection,
    SearchResult,
    Status,
    Step,
    StepResult,
    Transition,
    wilson_confidence,
};

pub use storage::{FileStore, Store};

pub use index::{SearchIndex, SearchMode, SearchQuery, SqliteSearchIndex};

pub use embeddings::{EmbeddingProvider, HashEmbedder, NoopEmbedder};

pub use manager::{
    ContrastiveQuery,
    ContrastiveResults,
    ManagerConfig,
    PlaybookManager,
    PruneOptions,
    PruneResult,
    Stats,
};

pub use config::Config;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Procedural memory for AI agents", NAME, VERSION)
}
