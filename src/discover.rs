//! Plugin discovery inside a workspace.
//!
//! Walks the plugin root in file-name order and yields [`CandidateFile`]s
//! lazily. The walk is restartable: every call to [`Discoverer::iter`] starts
//! a fresh traversal over the same tree.
//!
//! A file is a candidate when it is executable, carries the `.in` template
//! suffix, is a C/C++ source, or starts with a `#!` shebang. Binary files
//! (a NUL byte within the first 8 KiB) never are. Symlinks are neither
//! followed nor reported.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::DiscoveryConfig;
use crate::error::DiscoveryWarning;
use crate::models::CandidateFile;

/// Directory names that never contain plugins.
const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "t",
    "test",
    "tests",
    "doc",
    "docs",
    "example-graphs",
    "node.d.debug",
];

const SNIFF_BYTES: u64 = 8 * 1024;

pub struct Discoverer {
    root: PathBuf,
    excludes: GlobSet,
}

impl Discoverer {
    pub fn new(root: impl Into<PathBuf>, config: &DiscoveryConfig) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            excludes: build_globset(&config.exclude_globs)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a new walk over the plugin root.
    pub fn iter(&self) -> Candidates<'_> {
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
            .into_iter();
        Candidates {
            discoverer: self,
            walker,
        }
    }

    fn relative(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn is_excluded_dir(&self, entry: &DirEntry, relative: &str) -> bool {
        let name = entry.file_name().to_string_lossy();
        EXCLUDED_DIRS.contains(&name.as_ref()) || self.excludes.is_match(relative)
    }

    fn classify(&self, entry: &DirEntry, relative: String) -> Result<Option<CandidateFile>, DiscoveryWarning> {
        let path = entry.path();
        let warning = |e: std::io::Error| DiscoveryWarning {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        let metadata = entry.metadata().map_err(|e| warning(e.into()))?;
        let executable = is_executable(&metadata);

        let file_name = entry.file_name().to_string_lossy().to_string();
        let (name, language_hint, template) = split_name(&file_name);

        let mut head = Vec::new();
        File::open(path)
            .and_then(|f| f.take(SNIFF_BYTES).read_to_end(&mut head))
            .map_err(warning)?;

        let shebang = head.starts_with(b"#!");
        if !(executable || template || language_hint.is_some() || shebang) {
            return Ok(None);
        }
        if head.contains(&0) {
            debug!("Skipping binary file {}", relative);
            return Ok(None);
        }

        Ok(Some(CandidateFile {
            path: path.to_path_buf(),
            relative_path: relative,
            name,
            executable,
            language_hint,
        }))
    }
}

/// Lazy iterator over the candidates of one walk.
pub struct Candidates<'a> {
    discoverer: &'a Discoverer,
    walker: walkdir::IntoIter,
}

impl Iterator for Candidates<'_> {
    type Item = CandidateFile;

    fn next(&mut self) -> Option<CandidateFile> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let warning = DiscoveryWarning {
                        path: e
                            .path()
                            .map(Path::to_path_buf)
                            .unwrap_or_else(|| self.discoverer.root.clone()),
                        message: e.to_string(),
                    };
                    warn!("{}", warning);
                    continue;
                }
            };

            if entry.depth() == 0 {
                continue;
            }

            let relative = self.discoverer.relative(entry.path());
            let file_type = entry.file_type();
            if file_type.is_dir() {
                if self.discoverer.is_excluded_dir(&entry, &relative) {
                    debug!("Skipping directory {}", relative);
                    self.walker.skip_current_dir();
                }
                continue;
            }
            if !file_type.is_file() || self.discoverer.excludes.is_match(&relative) {
                continue;
            }

            match self.discoverer.classify(&entry, relative) {
                Ok(Some(candidate)) => return Some(candidate),
                Ok(None) => {}
                Err(warning) => warn!("{}", warning),
            }
        }
    }
}

/// Describe a single file outside any walk, without the candidate heuristics.
pub fn single_file(path: &Path) -> std::io::Result<CandidateFile> {
    let metadata = std::fs::metadata(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let (name, language_hint, _) = split_name(&file_name);
    Ok(CandidateFile {
        path: path.to_path_buf(),
        relative_path: file_name,
        name,
        executable: is_executable(&metadata),
        language_hint,
    })
}

/// Split a file name into plugin name, language hint and template flag.
fn split_name(file_name: &str) -> (String, Option<String>, bool) {
    if let Some(stem) = file_name.strip_suffix(".in") {
        return (stem.to_string(), None, true);
    }
    if let Some(stem) = file_name.strip_suffix(".cpp") {
        return (stem.to_string(), Some("cpp".to_string()), false);
    }
    if let Some(stem) = file_name.strip_suffix(".c") {
        return (stem.to_string(), Some("c".to_string()), false);
    }
    (file_name.to_string(), None, false)
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
