//! Persistence boundary for reconciled entities.
//!
//! The reconciler loads everything once at startup and afterwards only hands
//! batches of new or extended records to [`Store::persist`]. Batches are
//! upserts: a record whose key is already stored replaces the stored copy.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::models::{Course, Department, Entry, Professor, Term};

/// A completed unit of crawl work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Checkpoint {
    /// Course and professor listing for one department in one term.
    Listing { department_id: u32, term_id: u32 },
    /// Entry history of one professor.
    History { professor_id: u64 },
}

/// Every stored record, or a batch of records to store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub departments: Vec<Department>,
    #[serde(default)]
    pub terms: Vec<Term>,
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub professors: Vec<Professor>,
    #[serde(default)]
    pub entries: Vec<Entry>,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.departments.is_empty()
            && self.terms.is_empty()
            && self.courses.is_empty()
            && self.professors.is_empty()
            && self.entries.is_empty()
            && self.checkpoints.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.departments.len()
            + self.terms.len()
            + self.courses.len()
            + self.professors.len()
            + self.entries.len()
            + self.checkpoints.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a valid snapshot")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode snapshot")]
    Encode(#[source] serde_json::Error),
}

/// Backing store consumed by the reconciler.
#[async_trait]
pub trait Store: Send + Sync {
    /// Everything stored so far. Called once, before any persist.
    async fn load_all(&self) -> Result<Snapshot, StoreError>;

    /// Upsert a batch of records.
    async fn persist(&self, batch: Snapshot) -> Result<(), StoreError>;

    /// Make every persisted batch durable. Called at shutdown.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

type EntryKey = (u64, u32, u32);

/// Keyed view of a snapshot so that upserts are cheap.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    departments: BTreeMap<u32, Department>,
    terms: BTreeMap<u32, Term>,
    courses: BTreeMap<u64, Course>,
    professors: BTreeMap<u64, Professor>,
    entries: BTreeMap<EntryKey, Entry>,
    checkpoints: BTreeSet<Checkpoint>,
}

impl StoreState {
    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut state = Self::default();
        state.apply(snapshot);
        state
    }

    /// Upsert `batch`; later records win.
    pub(crate) fn apply(&mut self, batch: Snapshot) {
        self.departments
            .extend(batch.departments.into_iter().map(|d| (d.id, d)));
        self.terms.extend(batch.terms.into_iter().map(|t| (t.id, t)));
        self.courses.extend(batch.courses.into_iter().map(|c| (c.id, c)));
        self.professors
            .extend(batch.professors.into_iter().map(|p| (p.id, p)));
        self.entries.extend(
            batch
                .entries
                .into_iter()
                .map(|e| ((e.course_id, e.term_id, e.crn), e)),
        );
        self.checkpoints.extend(batch.checkpoints);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.departments.is_empty()
            && self.terms.is_empty()
            && self.courses.is_empty()
            && self.professors.is_empty()
            && self.entries.is_empty()
            && self.checkpoints.is_empty()
    }

    pub(crate) fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            departments: self.departments.values().cloned().collect(),
            terms: self.terms.values().cloned().collect(),
            courses: self.courses.values().cloned().collect(),
            professors: self.professors.values().cloned().collect(),
            entries: self.entries.values().cloned().collect(),
            checkpoints: self.checkpoints.iter().copied().collect(),
        }
    }
}

/// In-process store, for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    batches: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that starts out holding `snapshot`.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            state: Mutex::new(StoreState::from_snapshot(snapshot)),
            batches: AtomicUsize::new(0),
        }
    }

    /// Number of `persist` calls so far.
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::Relaxed)
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.to_snapshot()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_all(&self) -> Result<Snapshot, StoreError> {
        Ok(self.snapshot().await)
    }

    async fn persist(&self, batch: Snapshot) -> Result<(), StoreError> {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.state.lock().await.apply(batch);
        Ok(())
    }
}

/// Writes are coalesced: at most one file write per interval, plus one on close.
const DEFAULT_WRITE_INTERVAL: Duration = Duration::from_secs(5);

struct JsonState {
    data: StoreState,
    dirty: bool,
    last_write: Option<Instant>,
}

/// Single-file JSON store. Each write goes to a temporary sibling file that is
/// renamed over the snapshot, so a crash never leaves a torn file behind.
pub struct JsonStore {
    path: PathBuf,
    write_interval: Duration,
    state: Mutex<JsonState>,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_interval: DEFAULT_WRITE_INTERVAL,
            state: Mutex::new(JsonState {
                data: StoreState::default(),
                dirty: false,
                last_write: None,
            }),
        }
    }

    /// `Duration::ZERO` writes on every persist.
    pub fn with_write_interval(mut self, interval: Duration) -> Self {
        self.write_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, state: &mut JsonState) -> Result<(), StoreError> {
        let snapshot = state.data.to_snapshot();
        let bytes = serde_json::to_vec(&snapshot).map_err(StoreError::Encode)?;

        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        tokio::fs::write(&temp, &bytes).await.map_err(write_err)?;
        tokio::fs::rename(&temp, &self.path).await.map_err(write_err)?;

        state.dirty = false;
        state.last_write = Some(Instant::now());
        debug!(
            path = %self.path.display(),
            bytes = bytes.len(),
            records = snapshot.record_count(),
            "Snapshot written"
        );
        Ok(())
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn load_all(&self) -> Result<Snapshot, StoreError> {
        let snapshot = match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                serde_json::from_slice::<Snapshot>(&bytes).map_err(|source| StoreError::Decode {
                    path: self.path.clone(),
                    source,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No snapshot found, starting empty");
                Snapshot::default()
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let mut state = self.state.lock().await;
        state.data = StoreState::from_snapshot(snapshot);
        Ok(state.data.to_snapshot())
    }

    async fn persist(&self, batch: Snapshot) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.data.apply(batch);
        state.dirty = true;

        let due = state
            .last_write
            .is_none_or(|at| at.elapsed() >= self.write_interval);
        if due {
            self.write(&mut state).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.dirty {
            self.write(&mut state).await?;
        }
        Ok(())
    }
}
