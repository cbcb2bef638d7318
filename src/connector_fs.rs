//! Local directory source.
//!
//! Directory sources are read in place: nothing is copied into the workspace
//! cache and the revision is always `None`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::config::{SourceConfig, SourceKind};
use crate::error::FetchError;
use crate::traits::{FetchContext, Materialized, SourceFetcher};

pub struct DirectoryFetcher;

impl DirectoryFetcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DirectoryFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceFetcher for DirectoryFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Directory
    }

    fn description(&self) -> &str {
        "Read plugins from a local directory in place"
    }

    fn uses_cache(&self) -> bool {
        false
    }

    async fn fetch(
        &self,
        _ctx: &FetchContext,
        source: &SourceConfig,
        _tree: &Path,
    ) -> Result<Materialized, FetchError> {
        let root = PathBuf::from(&source.location);
        if !root.is_dir() {
            return Err(FetchError::MissingDirectory { path: root });
        }
        Ok(Materialized {
            root,
            revision: None,
        })
    }
}
