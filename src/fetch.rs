//! Source fetching: turn a configured source into a locked [`Workspace`].
//!
//! ```text
//! SourceConfig ──► lock cache entry ──► fetcher.fetch() ──► save state ──► Workspace
//!                        │
//!                        └── --skip-fetch: reuse last tree (NotCached if none)
//! ```

use std::io;
use tracing::{debug, info};

use crate::config::{FetchConfig, SourceConfig};
use crate::error::FetchError;
use crate::traits::{FetchContext, FetcherRegistry};
use crate::workspace::{Workspace, WorkspaceCache, WorkspaceLock};

/// Materialize one source, holding its workspace lock for the caller.
pub async fn fetch_workspace(
    registry: &FetcherRegistry,
    cache: &WorkspaceCache,
    source: &SourceConfig,
    config: &FetchConfig,
    skip_fetch: bool,
) -> Result<Workspace, FetchError> {
    let fetcher = registry
        .get(source.kind)
        .ok_or_else(|| FetchError::Unsupported {
            kind: source.kind.to_string(),
        })?;

    let lock = take_lock(cache, source).await?;
    let ctx = FetchContext::from_config(config, cache.load_state(source).and_then(|s| s.revision));

    if !fetcher.uses_cache() {
        let out = fetcher.fetch(&ctx, source, &cache.tree_dir(source)).await?;
        debug!(source = %source.name, root = %out.root.display(), "Using directory in place");
        return Ok(Workspace::new(source, out.root, out.revision, lock));
    }

    if skip_fetch {
        info!("Reusing cached workspace for '{}'", source.name);
        return cache.reuse(source, lock);
    }

    let tree = cache.tree_dir(source);
    info!("Fetching '{}' ({}) from {}", source.name, source.kind, source.location);
    let out = fetcher.fetch(&ctx, source, &tree).await?;
    cache.save_state(source, out.revision.clone())?;
    info!(
        "Fetched '{}' at {}",
        source.name,
        out.revision.as_deref().unwrap_or("unknown revision")
    );
    Ok(Workspace::new(source, out.root, out.revision, lock))
}

async fn take_lock(cache: &WorkspaceCache, source: &SourceConfig) -> Result<WorkspaceLock, FetchError> {
    let cache = cache.clone();
    let source = source.clone();
    tokio::task::spawn_blocking(move || cache.lock(&source))
        .await
        .map_err(|e| FetchError::Io(io::Error::other(e)))?
}
