//! Extension trait for source fetchers.
//!
//! Each source type (`git`, `archive`, `directory`) is served by a
//! [`SourceFetcher`]. The pipeline looks fetchers up by kind in a
//! [`FetcherRegistry`], so a custom fetcher can replace a built-in one (for
//! example in tests or for a mirrored transport).
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            FetcherRegistry               │
//! │  ┌─────────┐ ┌─────────┐ ┌────────────┐  │
//! │  │  Git    │ │ Archive │ │ Directory  │  │
//! │  └─────────┘ └─────────┘ └────────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!     fetch_workspace() → Workspace
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{FetchConfig, SourceConfig, SourceKind};
use crate::error::FetchError;
use crate::retry::RetryPolicy;

// ═══════════════════════════════════════════════════════════════════════
// Fetcher Trait
// ═══════════════════════════════════════════════════════════════════════

/// Limits and previous state handed to a fetcher for one source.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub max_archive_bytes: u64,
    pub max_unpacked_bytes: u64,
    /// Revision recorded by the last successful fetch, if any.
    pub previous_revision: Option<String>,
}

impl FetchContext {
    pub fn from_config(config: &FetchConfig, previous_revision: Option<String>) -> Self {
        Self {
            retry: RetryPolicy::from_config(config),
            timeout: Duration::from_secs(config.timeout_secs),
            max_archive_bytes: config.max_archive_bytes,
            max_unpacked_bytes: config.max_unpacked_bytes,
            previous_revision,
        }
    }
}

/// Result of a successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    /// Root of the materialized tree.
    pub root: PathBuf,
    pub revision: Option<String>,
}

/// Materializes one kind of source on disk.
///
/// # Lifecycle
///
/// 1. The fetcher is registered via [`FetcherRegistry::register`].
/// 2. The pipeline takes the workspace lock for a source.
/// 3. [`fetch`](SourceFetcher::fetch) brings `tree` up to date (or, for
///    directory sources, points at the configured path instead).
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Source type served by this fetcher.
    fn kind(&self) -> SourceKind;

    /// One-line description used by `gallery sources`.
    fn description(&self) -> &str;

    /// Whether fetched trees live in the workspace cache.
    ///
    /// Directory sources are referenced in place and return `false`.
    fn uses_cache(&self) -> bool {
        true
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        source: &SourceConfig,
        tree: &Path,
    ) -> Result<Materialized, FetchError>;
}

// ═══════════════════════════════════════════════════════════════════════
// FetcherRegistry
// ═══════════════════════════════════════════════════════════════════════

/// Registry of fetchers, one per source kind.
pub struct FetcherRegistry {
    fetchers: Vec<Box<dyn SourceFetcher>>,
}

impl Default for FetcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FetcherRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            fetchers: Vec::new(),
        }
    }

    /// Create a registry with the git, archive and directory fetchers.
    pub fn with_builtins(config: &FetchConfig) -> Result<Self> {
        use crate::connector_archive::ArchiveFetcher;
        use crate::connector_fs::DirectoryFetcher;
        use crate::connector_git::GitFetcher;

        let mut registry = Self::new();
        registry.register(Box::new(GitFetcher::new()));
        registry.register(Box::new(ArchiveFetcher::new(config)?));
        registry.register(Box::new(DirectoryFetcher::new()));
        Ok(registry)
    }

    /// Register a fetcher, replacing any fetcher of the same kind.
    pub fn register(&mut self, fetcher: Box<dyn SourceFetcher>) {
        self.fetchers.retain(|f| f.kind() != fetcher.kind());
        self.fetchers.push(fetcher);
    }

    pub fn get(&self, kind: SourceKind) -> Option<&dyn SourceFetcher> {
        self.fetchers
            .iter()
            .find(|f| f.kind() == kind)
            .map(|f| f.as_ref())
    }

    pub fn fetchers(&self) -> &[Box<dyn SourceFetcher>] {
        &self.fetchers
    }
}
