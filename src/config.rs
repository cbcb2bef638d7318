//! TOML configuration for the gallery generator.
//!
//! A configuration file names the workspace cache, the content output
//! directory, fetch limits, discovery excludes and the ordered list of
//! plugin sources:
//!
//! ```toml
//! [workspace]
//! cache_dir = "./build/cache"
//!
//! [output]
//! dir = "./build/hugo/content"
//!
//! [[sources]]
//! name = "munin"
//! type = "git"
//! location = "https://github.com/munin-monitoring/munin.git"
//! ref = "master"
//! path = "plugins"
//!
//! [labels.repositories]
//! munin = "Munin (master)"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    /// Human-readable term names, keyed by taxonomy dimension then term.
    #[serde(default)]
    pub labels: BTreeMap<String, BTreeMap<String, String>>,
    /// Optional TOML file with additional labels (inline labels win).
    #[serde(default)]
    pub labels_path: Option<PathBuf>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./build/cache")
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    /// Copy each plugin's source file next to its content page.
    #[serde(default = "default_true")]
    pub copy_sources: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            copy_sources: true,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./build/hugo/content")
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_archive_bytes")]
    pub max_archive_bytes: u64,
    #[serde(default = "default_max_unpacked_bytes")]
    pub max_unpacked_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            timeout_secs: default_timeout_secs(),
            max_archive_bytes: default_max_archive_bytes(),
            max_unpacked_bytes: default_max_unpacked_bytes(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_archive_bytes() -> u64 {
    256 * 1024 * 1024
}
fn default_max_unpacked_bytes() -> u64 {
    1024 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DiscoveryConfig {
    /// Extra globs (relative to the plugin root) that never yield plugins.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NormalizeConfig {
    /// Extra category synonyms; entries here replace built-in ones.
    #[serde(default)]
    pub category_synonyms: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Git,
    Archive,
    Directory,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Git => "git",
            SourceKind::Archive => "archive",
            SourceKind::Directory => "directory",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured plugin origin.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// Git URL, archive URL/path, or local directory.
    pub location: String,
    /// Branch or tag (git).
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    /// Plugin-bearing subdirectory inside the fetched tree.
    #[serde(default = "default_source_path")]
    pub path: String,
    #[serde(default)]
    pub shallow: bool,
    /// Leading path components dropped from archive entries.
    #[serde(default = "default_strip_components")]
    pub strip_components: usize,
}

fn default_source_path() -> String {
    ".".to_string()
}

fn default_strip_components() -> usize {
    1
}

impl SourceConfig {
    /// The plugin subdirectory, or `None` when the whole tree is scanned.
    ///
    /// `.` components and redundant slashes are dropped, so `./plugins/`
    /// and `plugins` name the same directory.
    pub fn subpath(&self) -> Option<String> {
        let normalized = self
            .path
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .collect::<Vec<_>>()
            .join("/");
        if normalized.is_empty() {
            None
        } else {
            Some(normalized)
        }
    }
}

impl Config {
    /// A configuration without sources, used by commands that never fetch.
    pub fn minimal() -> Self {
        Self {
            workspace: WorkspaceConfig::default(),
            output: OutputConfig::default(),
            fetch: FetchConfig::default(),
            discovery: DiscoveryConfig::default(),
            normalize: NormalizeConfig::default(),
            labels: BTreeMap::new(),
            labels_path: None,
            sources: Vec::new(),
        }
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Relative paths are resolved against the config file's directory
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.workspace.cache_dir = resolve(base, &config.workspace.cache_dir);
    config.output.dir = resolve(base, &config.output.dir);
    for source in &mut config.sources {
        let is_local_archive = source.kind == SourceKind::Archive
            && !source.location.contains("://");
        if source.kind == SourceKind::Directory || is_local_archive {
            source.location = resolve(base, Path::new(&source.location))
                .to_string_lossy()
                .to_string();
        }
    }

    if let Some(labels_path) = config.labels_path.clone() {
        let labels_path = resolve(base, &labels_path);
        merge_label_file(&mut config, &labels_path)?;
    }

    validate(&config)?;
    Ok(config)
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn merge_label_file(config: &mut Config, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read labels file: {}", path.display()))?;
    let extra: BTreeMap<String, BTreeMap<String, String>> = toml::from_str(&content)
        .with_context(|| format!("Failed to parse labels file: {}", path.display()))?;

    for (dimension, terms) in extra {
        let target = config.labels.entry(dimension).or_default();
        for (term, label) in terms {
            target.entry(term).or_insert(label);
        }
    }
    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    if config.fetch.concurrency == 0 {
        bail!("fetch.concurrency must be >= 1");
    }
    if config.fetch.max_archive_bytes == 0 {
        bail!("fetch.max_archive_bytes must be > 0");
    }
    if config.fetch.max_unpacked_bytes == 0 {
        bail!("fetch.max_unpacked_bytes must be > 0");
    }

    let mut seen = HashSet::new();
    for source in &config.sources {
        let starts_alphanumeric = source
            .name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric());
        if !starts_alphanumeric
            || !source
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            bail!(
                "Invalid source name '{}': start with a letter or digit, then use only \
                 letters, digits, '.', '_' and '-'",
                source.name
            );
        }
        if !seen.insert(source.name.as_str()) {
            bail!("Duplicate source name: '{}'", source.name);
        }
        if source.location.trim().is_empty() {
            bail!("sources.{}: location must not be empty", source.name);
        }
        if source.kind == SourceKind::Git && source.reference.is_none() {
            bail!("sources.{}: git sources require a 'ref'", source.name);
        }
        if source.path.split('/').any(|c| c == "..") {
            bail!("sources.{}: path must stay inside the source tree", source.name);
        }
    }

    Ok(())
}
