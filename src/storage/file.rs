//! File-per-entity store
//!
//! Layout under the data directory:
//!
//! ```text
//! playbooks/<id>.json
//! executions/<playbook_id>/<execution_id>.json
//! ```
//!
//! Every document is written to a `.tmp-<uuid>` sibling first and renamed
//! into place, so a crash never leaves a half-written document behind.

use chrono::Datelike;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use super::Store;
use crate::error::{PlaybookError, Result};
use crate::playbook::{ExecutionRecord, ListFilter, Playbook, Status};

const PLAYBOOKS_DIR: &str = "playbooks";
const EXECUTIONS_DIR: &str = "executions";
const TEMP_PREFIX: &str = ".tmp-";

/// JSON documents on the local filesystem
pub struct FileStore {
    data_dir: PathBuf,
    lock: RwLock<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `data_dir`
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        for dir in [data_dir.join(PLAYBOOKS_DIR), data_dir.join(EXECUTIONS_DIR)] {
            fs::create_dir_all(&dir)
                .map_err(|e| PlaybookError::storage(format!("create directory {}", dir.display()), e))?;
        }
        Ok(Self {
            data_dir,
            lock: RwLock::new(()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn playbooks_dir(&self) -> PathBuf {
        self.data_dir.join(PLAYBOOKS_DIR)
    }

    fn playbook_path(&self, id: &str) -> PathBuf {
        self.playbooks_dir().join(format!("{}.json", id))
    }

    fn execution_dir(&self, playbook_id: &str) -> PathBuf {
        self.data_dir.join(EXECUTIONS_DIR).join(playbook_id)
    }

    fn execution_path(&self, playbook_id: &str, execution_id: &str) -> PathBuf {
        self.execution_dir(playbook_id).join(format!("{}.json", execution_id))
    }
}

/// Ids become file names, so they must stay inside their directory
fn check_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() || id.starts_with('.') || id.contains(['/', '\\']) {
        return Err(PlaybookError::Validation(format!("invalid {} id: {:?}", kind, id)));
    }
    Ok(())
}

/// Decode a playbook document, honouring legacy encodings
///
/// Older documents carry a boolean `archived` flag instead of the status,
/// and store "never used" as the zero time `0001-01-01T00:00:00Z`.
fn decode_playbook(data: &[u8]) -> serde_json::Result<Playbook> {
    let mut value: serde_json::Value = serde_json::from_slice(data)?;
    let mut legacy_archived = false;
    if let Some(obj) = value.as_object_mut() {
        if let Some(flag) = obj.remove("archived") {
            legacy_archived = flag.as_bool().unwrap_or(false);
        }
    }
    let mut pb: Playbook = serde_json::from_value(value)?;
    if legacy_archived {
        pb.status = Status::Archived;
    }
    if pb.last_used_at.is_some_and(|t| t.year() <= 1) {
        pb.last_used_at = None;
    }
    Ok(pb)
}

/// Write `value` as pretty JSON via temp file + rename
fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| PlaybookError::storage(format!("encode {}", path.display()), e))?;

    let dir = path
        .parent()
        .ok_or_else(|| PlaybookError::Validation(format!("no parent directory for {}", path.display())))?;
    let tmp = dir.join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));

    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(PlaybookError::storage(format!("write {}", path.display()), e));
    }
    Ok(())
}

fn read_document<T: DeserializeOwned>(
    path: &Path,
    kind: &'static str,
    id: &str,
    decode: impl Fn(&[u8]) -> serde_json::Result<T>,
) -> Result<T> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(PlaybookError::not_found(kind, id)),
        Err(e) => return Err(PlaybookError::storage(format!("read {} {}", kind, id), e)),
    };
    decode(&data).map_err(|e| PlaybookError::storage(format!("decode {} {}", kind, id), e))
}

/// Decode every `*.json` document in `dir`, skipping unreadable ones
fn read_all<T>(dir: &Path, decode: impl Fn(&[u8]) -> serde_json::Result<T>) -> Result<Vec<T>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PlaybookError::storage(format!("read directory {}", dir.display()), e)),
    };

    let mut docs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let decoded = fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|data| decode(&data).map_err(|e| e.to_string()));
        match decoded {
            Ok(doc) => docs.push(doc),
            Err(e) => warn!("Skipping unreadable document {}: {}", path.display(), e),
        }
    }
    Ok(docs)
}

impl Store for FileStore {
    fn save_playbook(&self, pb: &Playbook) -> Result<()> {
        check_id("playbook", &pb.id)?;
        let _guard = self.write_guard();
        atomic_write_json(&self.playbook_path(&pb.id), pb)?;
        debug!("Saved playbook {} (v{})", pb.id, pb.version);
        Ok(())
    }

    fn get_playbook(&self, id: &str) -> Result<Playbook> {
        check_id("playbook", id)?;
        let _guard = self.read_guard();
        read_document(&self.playbook_path(id), "playbook", id, decode_playbook)
    }

    fn list_playbooks(&self, filter: &ListFilter) -> Result<Vec<Playbook>> {
        let _guard = self.read_guard();
        let mut playbooks: Vec<Playbook> = read_all(&self.playbooks_dir(), decode_playbook)?
            .into_iter()
            .filter(|pb| filter.matches(pb))
            .collect();

        playbooks.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if filter.limit > 0 {
            playbooks.truncate(filter.limit);
        }
        Ok(playbooks)
    }

    fn delete_playbook(&self, id: &str) -> Result<()> {
        check_id("playbook", id)?;
        let _guard = self.write_guard();

        match fs::remove_file(self.playbook_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(PlaybookError::storage(format!("delete playbook {}", id), e)),
        }
        match fs::remove_dir_all(self.execution_dir(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(PlaybookError::storage(format!("delete executions of {}", id), e)),
        }
        Ok(())
    }

    fn save_execution(&self, rec: &ExecutionRecord) -> Result<()> {
        check_id("playbook", &rec.playbook_id)?;
        check_id("execution", &rec.id)?;
        let _guard = self.write_guard();

        let dir = self.execution_dir(&rec.playbook_id);
        fs::create_dir_all(&dir)
            .map_err(|e| PlaybookError::storage(format!("create directory {}", dir.display()), e))?;
        atomic_write_json(&self.execution_path(&rec.playbook_id, &rec.id), rec)
    }

    fn get_execution(&self, playbook_id: &str, execution_id: &str) -> Result<ExecutionRecord> {
        check_id("playbook", playbook_id)?;
        check_id("execution", execution_id)?;
        let _guard = self.read_guard();
        read_document(
            &self.execution_path(playbook_id, execution_id),
            "execution",
            execution_id,
            |data| serde_json::from_slice(data),
        )
    }

    fn list_executions(&self, playbook_id: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        check_id("playbook", playbook_id)?;
        let _guard = self.read_guard();

        let mut records: Vec<ExecutionRecord> =
            read_all(&self.execution_dir(playbook_id), |data| serde_json::from_slice(data))?;
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if limit > 0 {
            records.truncate(limit);
        }
        Ok(records)
    }
}
