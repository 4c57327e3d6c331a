//! Durable, keyed storage of finished allocation results.
//!
//! One record per job, written once and read many times. Records are never
//! updated in place; the janitor removes them once they are older than the
//! configured retention.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::data::AllocationResult;
use crate::error::StoreError;
use crate::jobs::JobId;

/// Persisted record format version.
const RECORD_VERSION: u32 = 1;

/// Keyed store the job workers hand their results to.
pub trait ResultStore: Send + Sync {
    /// Stores the result of `id` atomically; readers see all of it or nothing.
    fn put(&self, id: JobId, result: &AllocationResult) -> Result<(), StoreError>;

    fn get(&self, id: JobId) -> Result<Option<AllocationResult>, StoreError>;

    fn contains(&self, id: JobId) -> Result<bool, StoreError>;

    /// Removes records stored more than `age` ago and returns how many went.
    fn purge_older_than(&self, age: Duration) -> Result<usize, StoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredResult {
    version: u32,
    job_id: JobId,
    result: AllocationResult,
}

/// One JSON file per job under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn record_path(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl ResultStore for FileStore {
    fn put(&self, id: JobId, result: &AllocationResult) -> Result<(), StoreError> {
        let path = self.record_path(id);
        let tmp_path = path.with_extension("json.tmp");
        let record = StoredResult {
            version: RECORD_VERSION,
            job_id: id,
            result: result.clone(),
        };
        let content = serde_json::to_vec(&record)?;

        // write to temp, then rename over the final name
        fs::write(&tmp_path, &content).map_err(io_error(&tmp_path))?;
        fs::rename(&tmp_path, &path).map_err(io_error(&path))?;

        debug!("Stored result of job {} at {}", id, path.display());
        Ok(())
    }

    fn get(&self, id: JobId) -> Result<Option<AllocationResult>, StoreError> {
        let path = self.record_path(id);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let record: StoredResult =
            serde_json::from_slice(&content).map_err(|e| StoreError::Corrupt {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        if record.version != RECORD_VERSION || record.job_id != id {
            return Err(StoreError::Corrupt {
                path,
                detail: format!(
                    "record version {} for job {}, expected version {} for job {}",
                    record.version, record.job_id, RECORD_VERSION, id
                ),
            });
        }
        Ok(Some(record.result))
    }

    fn contains(&self, id: JobId) -> Result<bool, StoreError> {
        let path = self.record_path(id);
        path.try_exists().map_err(io_error(&path))
    }

    fn purge_older_than(&self, age: Duration) -> Result<usize, StoreError> {
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir).map_err(io_error(&self.dir))? {
            let entry = entry.map_err(io_error(&self.dir))?;
            let path = entry.path();
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!("Skipping {} during purge: {}", path.display(), e);
                    continue;
                }
            };
            let expired = now
                .duration_since(modified)
                .map(|elapsed| elapsed > age)
                .unwrap_or(false);
            if expired {
                fs::remove_file(&path).map_err(io_error(&path))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// In-process store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<JobId, (SystemTime, AllocationResult)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for MemoryStore {
    fn put(&self, id: JobId, result: &AllocationResult) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, (SystemTime::now(), result.clone()));
        Ok(())
    }

    fn get(&self, id: JobId) -> Result<Option<AllocationResult>, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(&id).map(|(_, result)| result.clone()))
    }

    fn contains(&self, id: JobId) -> Result<bool, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.contains_key(&id))
    }

    fn purge_older_than(&self, age: Duration) -> Result<usize, StoreError> {
        let now = SystemTime::now();
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|_, (stored_at, _)| {
            now.duration_since(*stored_at)
                .map(|elapsed| elapsed <= age)
                .unwrap_or(true)
        });
        Ok(before - records.len())
    }
}
