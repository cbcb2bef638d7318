use anyhow::Result;
use std::path::Path;

use crate::config::{Config, SourceConfig, SourceKind};
use crate::workspace::WorkspaceCache;

/// What the workspace cache knows about a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    /// Directory source, read in place.
    InPlace { exists: bool },
    Cached { revision: Option<String>, fetched_at: String },
    NotFetched,
}

pub fn cache_state(cache: &WorkspaceCache, source: &SourceConfig) -> CacheState {
    if source.kind == SourceKind::Directory {
        return CacheState::InPlace {
            exists: Path::new(&source.location).is_dir(),
        };
    }
    match cache.load_state(source) {
        Some(state) if cache.tree_dir(source).is_dir() => CacheState::Cached {
            revision: state.revision,
            fetched_at: state.fetched_at.format("%Y-%m-%d %H:%M").to_string(),
        },
        _ => CacheState::NotFetched,
    }
}

pub fn list_sources(config: &Config) -> Result<()> {
    let cache = WorkspaceCache::new(&config.workspace.cache_dir);

    if config.sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!(
        "{:<16} {:<10} {:<12} {:<14} LOCATION",
        "SOURCE", "TYPE", "CACHE", "REVISION"
    );
    for source in &config.sources {
        let (status, revision) = match cache_state(&cache, source) {
            CacheState::InPlace { exists: true } => ("IN PLACE".to_string(), "-".to_string()),
            CacheState::InPlace { exists: false } => ("MISSING".to_string(), "-".to_string()),
            CacheState::Cached {
                revision,
                fetched_at,
            } => (
                fetched_at,
                revision
                    .map(|r| r.chars().take(12).collect())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            CacheState::NotFetched => ("NOT FETCHED".to_string(), "-".to_string()),
        };
        let location = match &source.reference {
            Some(reference) => format!("{} ({})", source.location, reference),
            None => source.location.clone(),
        };
        println!(
            "{:<16} {:<10} {:<12} {:<14} {}",
            source.name,
            source.kind.as_str(),
            status,
            revision,
            location
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn source(kind: SourceKind, location: &str) -> SourceConfig {
        SourceConfig {
            name: "s".to_string(),
            kind,
            location: location.to_string(),
            reference: Some("master".to_string()),
            path: ".".to_string(),
            shallow: false,
            strip_components: 1,
        }
    }

    #[test]
    fn test_cache_states() {
        let tmp = TempDir::new().unwrap();
        let cache = WorkspaceCache::new(tmp.path().join("cache"));

        let dir = source(SourceKind::Directory, &tmp.path().display().to_string());
        assert_eq!(cache_state(&cache, &dir), CacheState::InPlace { exists: true });

        let git = source(SourceKind::Git, "https://example.org/plugins.git");
        assert_eq!(cache_state(&cache, &git), CacheState::NotFetched);

        fs::create_dir_all(cache.tree_dir(&git)).unwrap();
        cache.save_state(&git, Some("abc123".to_string())).unwrap();
        match cache_state(&cache, &git) {
            CacheState::Cached { revision, .. } => assert_eq!(revision.as_deref(), Some("abc123")),
            other => panic!("unexpected state {:?}", other),
        }
    }
}
