//! Error types for the collection pipeline.
//!
//! Fetch failures are contained per source, export failures end the run.
//! Missing documentation fields are not errors at all; they are recorded on
//! the plugin record (see [`crate::models::MissingDetail`]).

use std::path::PathBuf;
use thiserror::Error;

/// A source could not be materialized into a workspace.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network failure while fetching {location}: {message}")]
    Network { location: String, message: String },

    #[error("authentication failed for {location}: {message}")]
    Authentication { location: String, message: String },

    #[error("reference '{reference}' not found in {location}")]
    MissingReference { location: String, reference: String },

    #[error("corrupt archive {location}: {message}")]
    CorruptArchive { location: String, message: String },

    #[error("archive {location} exceeds the size limit of {limit} bytes")]
    ArchiveTooLarge { location: String, limit: u64 },

    #[error("archive entry escapes the extraction root: {entry}")]
    PathTraversal { entry: String },

    #[error("source directory does not exist: {path}")]
    MissingDirectory { path: PathBuf },

    #[error("no cached workspace for source '{name}' (run without --skip-fetch first)")]
    NotCached { name: String },

    #[error("failed to lock workspace {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("git command failed ({command}): {message}")]
    Git { command: String, message: String },

    #[error("no fetcher registered for source type '{kind}'")]
    Unsupported { kind: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Network { .. })
    }
}

/// A directory subtree the discoverer could not read.
#[derive(Debug, Error)]
#[error("skipping unreadable path {}: {message}", path.display())]
pub struct DiscoveryWarning {
    pub path: PathBuf,
    pub message: String,
}

/// The exporter could not write the content tree.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to publish {}: {source}", path.display())]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_errors_are_transient() {
        let network = FetchError::Network {
            location: "https://example.org/a.tar.gz".to_string(),
            message: "connection reset".to_string(),
        };
        let missing = FetchError::MissingReference {
            location: "https://example.org/repo.git".to_string(),
            reference: "nope".to_string(),
        };
        assert!(network.is_transient());
        assert!(!missing.is_transient());
    }

    #[test]
    fn test_messages_name_the_location() {
        let err = FetchError::ArchiveTooLarge {
            location: "plugins.tar.gz".to_string(),
            limit: 10,
        };
        assert_eq!(
            err.to_string(),
            "archive plugins.tar.gz exceeds the size limit of 10 bytes"
        );
    }
}
