//! Core data models used throughout the gallery pipeline.
//!
//! These types represent the candidate files, plugin records and example
//! graphs that flow from discovery through normalization to the exporter.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Stable identity of a plugin: the source it came from plus its path
/// relative to that source's plugin root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PluginIdentity {
    pub repository: String,
    pub path: String,
}

impl PluginIdentity {
    pub fn new(repository: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for PluginIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repository, self.path)
    }
}

impl Serialize for PluginIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A file inside a workspace that looks like a plugin implementation.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: PathBuf,
    /// Slash-separated path relative to the plugin root.
    pub relative_path: String,
    /// File name without build suffixes such as `.in`.
    pub name: String,
    pub executable: bool,
    /// Language implied by the file name (`.c`, `.cpp`).
    pub language_hint: Option<String>,
}

/// A field that could not be extracted for a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDetail {
    Documentation,
    Name,
    Summary,
    Description,
    Configuration,
    Author,
    License,
    LicenseSpdx,
    Category,
    Capabilities,
    Family,
    ImplementationLanguage,
}

impl MissingDetail {
    pub const ALL: [MissingDetail; 12] = [
        MissingDetail::Documentation,
        MissingDetail::Name,
        MissingDetail::Summary,
        MissingDetail::Description,
        MissingDetail::Configuration,
        MissingDetail::Author,
        MissingDetail::License,
        MissingDetail::LicenseSpdx,
        MissingDetail::Category,
        MissingDetail::Capabilities,
        MissingDetail::Family,
        MissingDetail::ImplementationLanguage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MissingDetail::Documentation => "documentation",
            MissingDetail::Name => "name",
            MissingDetail::Summary => "summary",
            MissingDetail::Description => "description",
            MissingDetail::Configuration => "configuration",
            MissingDetail::Author => "author",
            MissingDetail::License => "license",
            MissingDetail::LicenseSpdx => "license_spdx",
            MissingDetail::Category => "category",
            MissingDetail::Capabilities => "capabilities",
            MissingDetail::Family => "family",
            MissingDetail::ImplementationLanguage => "implementation_language",
        }
    }
}

impl fmt::Display for MissingDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An example graph image shipped alongside a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExampleGraph {
    /// `day`, `week`, `month`, `year` or a number.
    pub key: String,
    pub file_name: String,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Canonical, normalized description of one plugin.
///
/// Every field is always serialized; absent values appear as `null` or an
/// empty list so that metadata dumps can be diffed field by field.
#[derive(Debug, Clone, Serialize)]
pub struct PluginRecord {
    pub identity: PluginIdentity,
    pub name: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    /// Full documentation rendered as markdown.
    pub documentation: Option<String>,
    pub configuration: Option<String>,
    pub implementation_language: Option<String>,
    /// SPDX identifier when known, otherwise the free-text license.
    pub license: Option<String>,
    pub license_text: Option<String>,
    pub license_spdx: Option<String>,
    pub authors: Vec<String>,
    pub family: Option<String>,
    pub categories: BTreeSet<String>,
    pub unexpected_categories: BTreeSet<String>,
    pub capabilities: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
    pub has_example_graphs: bool,
    pub example_graphs: Vec<ExampleGraph>,
    pub source_repository: String,
    pub relative_path: String,
    pub changed_timestamp: Option<DateTime<Utc>>,
    pub indexing_content: Option<String>,
    pub missing_details: BTreeSet<MissingDetail>,
    /// Absolute path of the plugin file inside its workspace.
    #[serde(skip)]
    pub source_file: PathBuf,
}

impl PluginRecord {
    pub fn is_documented(&self) -> bool {
        !self.missing_details.contains(&MissingDetail::Documentation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display_and_order() {
        let a = PluginIdentity::new("munin", "node.d.linux/cpu");
        let b = PluginIdentity::new("munin-2.0", "node.d.linux/cpu");
        assert_eq!(a.to_string(), "munin/node.d.linux/cpu");
        assert!(a < b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            "\"munin/node.d.linux/cpu\""
        );
    }

    #[test]
    fn test_missing_detail_serializes_snake_case() {
        let json = serde_json::to_string(&MissingDetail::LicenseSpdx).unwrap();
        assert_eq!(json, "\"license_spdx\"");
        for detail in MissingDetail::ALL {
            assert_eq!(
                serde_json::to_string(&detail).unwrap(),
                format!("\"{}\"", detail.as_str())
            );
        }
    }
}
