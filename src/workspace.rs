//! On-disk workspace cache.
//!
//! Every source gets its own cache entry under `workspace.cache_dir`, keyed by
//! the source name plus a short hash of its type, location and ref:
//!
//! ```text
//! <cache_dir>/
//!   munin-3f2a9c0d1e4b/
//!     lock          advisory lock held for fetch + read
//!     state.json    last fetched revision
//!     tree/         checkout or extracted archive
//! ```
//!
//! Changing a source's location or ref yields a fresh entry, so stale trees
//! are never reused for a different origin.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{SourceConfig, SourceKind};
use crate::error::FetchError;

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "lock";
const TREE_DIR: &str = "tree";

/// Fetch state persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchState {
    pub source: String,
    pub kind: String,
    pub location: String,
    pub reference: Option<String>,
    pub revision: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Exclusive advisory lock on one cache entry, released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
    path: PathBuf,
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

/// A source materialized on disk at a specific revision.
#[derive(Debug)]
pub struct Workspace {
    pub source: String,
    pub kind: SourceKind,
    /// Root of the checkout, extraction or referenced directory.
    pub root: PathBuf,
    /// Directory the discoverer walks (`root` joined with the source path).
    pub plugin_root: PathBuf,
    pub revision: Option<String>,
    _lock: WorkspaceLock,
}

impl Workspace {
    pub fn new(
        source: &SourceConfig,
        root: PathBuf,
        revision: Option<String>,
        lock: WorkspaceLock,
    ) -> Self {
        let plugin_root = match source.subpath() {
            Some(sub) => root.join(sub),
            None => root.clone(),
        };
        Self {
            source: source.name.clone(),
            kind: source.kind,
            root,
            plugin_root,
            revision,
            _lock: lock,
        }
    }
}

/// Keyed cache of workspaces.
#[derive(Debug, Clone)]
pub struct WorkspaceCache {
    root: PathBuf,
}

impl WorkspaceCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, source: &SourceConfig) -> PathBuf {
        let key = format!(
            "{}\n{}\n{}",
            source.kind,
            source.location,
            source.reference.as_deref().unwrap_or("")
        );
        self.root
            .join(format!("{}-{}", source.name, short_hash(&key)))
    }

    pub fn tree_dir(&self, source: &SourceConfig) -> PathBuf {
        self.entry_dir(source).join(TREE_DIR)
    }

    /// Take the exclusive lock for a source, waiting if another run holds it.
    ///
    /// Blocks the calling thread; call from a blocking context.
    pub fn lock(&self, source: &SourceConfig) -> Result<WorkspaceLock, FetchError> {
        let dir = self.entry_dir(source);
        fs::create_dir_all(&dir)?;
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| FetchError::Lock {
                path: path.clone(),
                source: e,
            })?;

        if file.try_lock_exclusive().is_err() {
            info!(
                "Workspace for '{}' is locked by another run, waiting",
                source.name
            );
            file.lock_exclusive().map_err(|e| FetchError::Lock {
                path: path.clone(),
                source: e,
            })?;
        }
        debug!(path = %path.display(), "Workspace locked");
        Ok(WorkspaceLock { file, path })
    }

    pub fn load_state(&self, source: &SourceConfig) -> Option<FetchState> {
        let path = self.entry_dir(source).join(STATE_FILE);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                debug!("Ignoring unreadable state {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save_state(&self, source: &SourceConfig, revision: Option<String>) -> Result<(), FetchError> {
        let state = FetchState {
            source: source.name.clone(),
            kind: source.kind.to_string(),
            location: source.location.clone(),
            reference: source.reference.clone(),
            revision,
            fetched_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| FetchError::Io(std::io::Error::other(e)))?;
        let dir = self.entry_dir(source);
        fs::create_dir_all(&dir)?;
        let tmp = dir.join(format!("{}.tmp", STATE_FILE));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, dir.join(STATE_FILE))?;
        Ok(())
    }

    /// Reuse the last fetched tree without touching the network.
    pub fn reuse(&self, source: &SourceConfig, lock: WorkspaceLock) -> Result<Workspace, FetchError> {
        let tree = self.tree_dir(source);
        let state = self.load_state(source);
        match state {
            Some(state) if tree.is_dir() => Ok(Workspace::new(source, tree, state.revision, lock)),
            _ => Err(FetchError::NotCached {
                name: source.name.clone(),
            }),
        }
    }
}

pub(crate) fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(&hasher.finalize()[..6])
}
