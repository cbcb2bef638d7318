//! Integration tests for the fetcher extension trait.
//!
//! These tests prove that a custom fetcher registered in place of a
//! built-in one works end-to-end through the workspace cache and the
//! discovery/normalization pass.

use async_trait::async_trait;
use plugin_gallery::config::{Config, SourceConfig, SourceKind};
use plugin_gallery::error::FetchError;
use plugin_gallery::fetch::fetch_workspace;
use plugin_gallery::normalize::Normalizer;
use plugin_gallery::pipeline::scan_workspace;
use plugin_gallery::traits::{FetchContext, FetcherRegistry, Materialized, SourceFetcher};
use plugin_gallery::workspace::WorkspaceCache;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

// ─── Test Fetcher ───────────────────────────────────────────────────

/// Writes a fixed set of plugin files instead of downloading an archive.
struct InMemoryFetcher {
    files: Vec<(String, String)>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SourceFetcher for InMemoryFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Archive
    }

    fn description(&self) -> &str {
        "In-memory test fetcher"
    }

    async fn fetch(
        &self,
        _ctx: &FetchContext,
        _source: &SourceConfig,
        tree: &Path,
    ) -> Result<Materialized, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for (relative, body) in &self.files {
            let path = tree.join(relative);
            fs::create_dir_all(path.parent().unwrap_or(tree))?;
            fs::write(path, body)?;
        }
        Ok(Materialized {
            root: tree.to_path_buf(),
            revision: Some("in-memory-1".to_string()),
        })
    }
}

fn source() -> SourceConfig {
    SourceConfig {
        name: "mirror".to_string(),
        kind: SourceKind::Archive,
        location: "memory://plugins".to_string(),
        reference: None,
        path: "plugins".to_string(),
        shallow: false,
        strip_components: 1,
    }
}

fn registry(calls: Arc<AtomicUsize>) -> FetcherRegistry {
    let mut registry = FetcherRegistry::with_builtins(&Config::minimal().fetch).unwrap();
    registry.register(Box::new(InMemoryFetcher {
        files: vec![
            (
                "plugins/node.d/df".to_string(),
                "#!/bin/sh\n# =head1 NAME\n#\n# df - Plugin to monitor disk usage\n#\n# =cut\necho 'graph_category disk'\n".to_string(),
            ),
            ("plugins/node.d/README".to_string(), "readme\n".to_string()),
            ("docs/index.md".to_string(), "# docs\n".to_string()),
        ],
        calls,
    }));
    registry
}

#[tokio::test]
async fn test_custom_fetcher_replaces_builtin() {
    let registry = registry(Arc::new(AtomicUsize::new(0)));
    assert_eq!(registry.fetchers().len(), 3);
    assert_eq!(
        registry.get(SourceKind::Archive).unwrap().description(),
        "In-memory test fetcher"
    );
}

#[tokio::test]
async fn test_custom_fetcher_through_scan() {
    let tmp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = registry(calls.clone());
    let cache = WorkspaceCache::new(tmp.path().join("cache"));
    let config = Config::minimal();

    let workspace = fetch_workspace(&registry, &cache, &source(), &config.fetch, false)
        .await
        .unwrap();
    assert_eq!(workspace.revision.as_deref(), Some("in-memory-1"));
    assert_eq!(workspace.plugin_root, cache.tree_dir(&source()).join("plugins"));

    let records = scan_workspace(
        &workspace,
        &config.discovery,
        &Normalizer::new(&config.normalize),
    )
    .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].identity.to_string(), "mirror/node.d/df");
    assert_eq!(records[0].summary.as_deref(), Some("monitor disk usage"));
    assert!(records[0].categories.contains("disk"));
    drop(workspace);

    // Cached tree is reused without calling the fetcher again
    let reused = fetch_workspace(&registry, &cache, &source(), &config.fetch, true)
        .await
        .unwrap();
    assert_eq!(reused.revision.as_deref(), Some("in-memory-1"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
