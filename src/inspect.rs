//! Plugin inspection without a build.
//!
//! Runs the header parser and normalizer on local files and prints the
//! resulting records as JSON. Used by `gallery inspect` to check a plugin's
//! documentation before it is committed to a source repository.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::discover;
use crate::graphs::find_example_graphs;
use crate::header;
use crate::models::PluginRecord;
use crate::normalize::{FileFacts, Normalizer};

/// Repository name reported for inspected files.
pub const LOCAL_REPOSITORY: &str = "local";

/// Parse and normalize each file.
pub fn inspect_files(config: &Config, paths: &[impl AsRef<Path>]) -> Result<Vec<PluginRecord>> {
    let normalizer = Normalizer::new(&config.normalize);
    let mut records = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let content =
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let candidate = discover::single_file(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        let facts = FileFacts {
            example_graphs: find_example_graphs(path, &candidate.name),
            changed_timestamp: None,
        };
        records.push(normalizer.normalize(
            LOCAL_REPOSITORY,
            &candidate,
            &header::parse_bytes(&content),
            facts,
        ));
    }
    Ok(records)
}

/// Print the records of the given files as a JSON array on stdout.
pub fn run_inspect(config: &Config, paths: &[impl AsRef<Path>]) -> Result<()> {
    let records = inspect_files(config, paths)?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
