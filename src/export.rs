//! Export the collection as Hugo content.
//!
//! The tree is assembled in a staging directory next to the output and
//! swapped into place only after every file has been written, so a failed
//! run never leaves a half-written site behind.
//!
//! ```text
//! <output>/
//! ├── plugins/<repository>/<relative_path>/
//! │   ├── index.md          JSON front matter + documentation
//! │   ├── source            copy of the plugin file
//! │   └── <key>.png         example graphs
//! ├── taxonomies/<dimension>.json
//! ├── <dimension>/<term>/_index.md   label pages
//! ├── metadata.json
//! └── statistics.json
//! ```

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::aggregate::{slugify, Collection, TaxonomyDimension};
use crate::config::Config;
use crate::error::ExportError;
use crate::models::{ExampleGraph, PluginRecord};

pub const MISSING_DOCUMENTATION: &str = "Sadly there is no documentation for this plugin.";

/// Content written for a single plugin page.
#[derive(Serialize)]
struct FrontMatter<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    summary: Option<&'a str>,
    plugin: String,
    repositories: [&'a str; 1],
    documentation_status: [&'a str; 1],
    categories: Vec<&'a str>,
    unexpected_categories: Vec<&'a str>,
    keywords: Vec<&'a str>,
    authors: &'a [String],
    licenses: Vec<&'a str>,
    license_spdx: Option<&'a str>,
    families: Vec<&'a str>,
    capabilities: Vec<&'a str>,
    implementation_languages: Vec<&'a str>,
    missing_details: Vec<&'static str>,
    has_example_graphs: bool,
    example_graphs: &'a [ExampleGraph],
    indexing_content: Option<&'a str>,
}

#[derive(Serialize)]
struct LabelFrontMatter<'a> {
    title: &'a str,
}

/// What an export run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub output_dir: PathBuf,
    pub plugins: usize,
    pub taxonomies: usize,
    pub label_pages: usize,
}

pub struct Exporter {
    output_dir: PathBuf,
    copy_sources: bool,
    labels: BTreeMap<String, BTreeMap<String, String>>,
}

impl Exporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            copy_sources: true,
            labels: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &Config, output_override: Option<&Path>) -> Self {
        Self {
            output_dir: output_override
                .map(Path::to_path_buf)
                .unwrap_or_else(|| config.output.dir.clone()),
            copy_sources: config.output.copy_sources,
            labels: config.labels.clone(),
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_copy_sources(mut self, copy_sources: bool) -> Self {
        self.copy_sources = copy_sources;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write the whole content tree and publish it.
    pub fn export(&self, collection: &Collection) -> Result<ExportSummary, ExportError> {
        let staging = sibling(&self.output_dir, "staging");
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| write_error(&staging, e))?;
        }
        create_dir(&staging)?;

        let summary = match self.write_tree(&staging, collection) {
            Ok(summary) => summary,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        if let Err(e) = publish(&staging, &self.output_dir) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
        info!(
            "Published {} plugins to {}",
            summary.plugins,
            self.output_dir.display()
        );
        Ok(summary)
    }

    fn write_tree(&self, root: &Path, collection: &Collection) -> Result<ExportSummary, ExportError> {
        for record in collection.records() {
            self.write_plugin(root, record)?;
        }

        let listing_dir = root.join("taxonomies");
        create_dir(&listing_dir)?;
        for dimension in TaxonomyDimension::ALL {
            let listing: BTreeMap<&str, Vec<String>> = collection
                .index(dimension)
                .iter()
                .map(|(term, members)| {
                    let mut ids: Vec<String> = members.iter().map(|id| id.to_string()).collect();
                    ids.sort();
                    (term.as_str(), ids)
                })
                .collect();
            write_json(
                &listing_dir.join(format!("{}.json", dimension.key())),
                &listing,
                dimension.key(),
            )?;
        }

        let label_pages = self.write_label_pages(root, collection)?;

        let records: Vec<&PluginRecord> = collection.records().collect();
        write_json(&root.join("metadata.json"), &records, "metadata")?;
        write_json(
            &root.join("statistics.json"),
            &collection.statistics(),
            "statistics",
        )?;

        Ok(ExportSummary {
            output_dir: self.output_dir.clone(),
            plugins: collection.len(),
            taxonomies: TaxonomyDimension::ALL.len(),
            label_pages,
        })
    }

    fn write_plugin(&self, root: &Path, record: &PluginRecord) -> Result<(), ExportError> {
        let dir = root
            .join("plugins")
            .join(&record.source_repository)
            .join(&record.relative_path);
        create_dir(&dir)?;

        let front = front_matter(record);
        let front = serde_json::to_string_pretty(&front).map_err(|source| ExportError::Serialize {
            what: format!("front matter of {}", record.identity),
            source,
        })?;

        let mut page = front;
        page.push_str("\n\n");
        page.push_str(record.documentation.as_deref().unwrap_or(MISSING_DOCUMENTATION));
        page.push('\n');

        if self.copy_sources {
            copy_file(&record.source_file, &dir.join("source"))?;
            page.push_str(&format!(
                "\n{{{{< collapse title=\"Source Code\" >}}}}\n{{{{< code lang=\"{}\" file=\"/plugins/{}/source\" >}}}}\n{{{{< /collapse >}}}}\n",
                highlight_language(record.implementation_language.as_deref()),
                record.identity
            ));
        }
        write_file(&dir.join("index.md"), page.as_bytes())?;

        for graph in &record.example_graphs {
            copy_file(&graph.path, &dir.join(&graph.file_name))?;
        }
        debug!(plugin = %record.identity, "Wrote content page");
        Ok(())
    }

    fn write_label_pages(&self, root: &Path, collection: &Collection) -> Result<usize, ExportError> {
        let mut written = 0;
        for (key, terms) in &self.labels {
            let Some(dimension) = TaxonomyDimension::from_key(key) else {
                warn!("Ignoring labels for unknown taxonomy '{}'", key);
                continue;
            };
            let index = collection.index(dimension);
            let mut slugs: HashMap<String, &str> = HashMap::new();
            for (term, label) in terms {
                if !index.contains_key(term) {
                    debug!("No plugins for {} '{}', skipping its label", key, term);
                    continue;
                }
                let slug = slugify(term);
                if let Some(taken) = slugs.get(&slug) {
                    warn!(
                        "Label for {} '{}' shares the page '{}' with '{}', skipping it",
                        key, term, slug, taken
                    );
                    continue;
                }
                let dir = root.join(key).join(&slug);
                slugs.insert(slug, term.as_str());
                create_dir(&dir)?;
                let front = serde_json::to_string_pretty(&LabelFrontMatter { title: label })
                    .map_err(|source| ExportError::Serialize {
                        what: format!("label for {} '{}'", key, term),
                        source,
                    })?;
                write_file(&dir.join("_index.md"), format!("{}\n", front).as_bytes())?;
                written += 1;
            }
        }
        Ok(written)
    }
}

fn front_matter(record: &PluginRecord) -> FrontMatter<'_> {
    FrontMatter {
        title: &record.name,
        date: record.changed_timestamp.map(|ts| ts.to_rfc3339()),
        summary: record.summary.as_deref(),
        plugin: record.identity.to_string(),
        repositories: [record.source_repository.as_str()],
        documentation_status: [if record.is_documented() {
            "documented"
        } else {
            "missing documentation"
        }],
        categories: record.categories.iter().map(String::as_str).collect(),
        unexpected_categories: record.unexpected_categories.iter().map(String::as_str).collect(),
        keywords: record.keywords.iter().map(String::as_str).collect(),
        authors: &record.authors,
        licenses: record.license.iter().map(String::as_str).collect(),
        license_spdx: record.license_spdx.as_deref(),
        families: record.family.iter().map(String::as_str).collect(),
        capabilities: record.capabilities.iter().map(String::as_str).collect(),
        implementation_languages: record
            .implementation_language
            .iter()
            .map(String::as_str)
            .collect(),
        missing_details: record.missing_details.iter().map(|d| d.as_str()).collect(),
        has_example_graphs: record.has_example_graphs,
        example_graphs: &record.example_graphs,
        indexing_content: record.indexing_content.as_deref(),
    }
}

/// Syntax highlighter name for the source shortcode.
fn highlight_language(language: Option<&str>) -> &str {
    match language {
        Some("python2" | "python3") => "python",
        Some("sh" | "ksh" | "zsh") => "bash",
        Some(other) => other,
        None => "text",
    }
}

/// Replace `output` with `staging`, keeping the old tree until the swap
/// has happened.
fn publish(staging: &Path, output: &Path) -> Result<(), ExportError> {
    let backup = sibling(output, "old");
    if backup.exists() {
        fs::remove_dir_all(&backup).map_err(|source| publish_error(&backup, source))?;
    }
    let had_output = output.exists();
    if had_output {
        fs::rename(output, &backup).map_err(|source| publish_error(output, source))?;
    }
    if let Err(source) = fs::rename(staging, output) {
        if had_output {
            let _ = fs::rename(&backup, output);
        }
        return Err(publish_error(output, source));
    }
    if had_output {
        if let Err(e) = fs::remove_dir_all(&backup) {
            warn!("Could not remove previous output {}: {}", backup.display(), e);
        }
    }
    Ok(())
}

/// `<parent>/.<name>.<suffix>`, on the same filesystem as `path`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "content".to_string());
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{}.{}", name, suffix))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T, what: &str) -> Result<(), ExportError> {
    let mut json = serde_json::to_string_pretty(value).map_err(|source| ExportError::Serialize {
        what: what.to_string(),
        source,
    })?;
    json.push('\n');
    write_file(path, json.as_bytes())
}

fn create_dir(path: &Path) -> Result<(), ExportError> {
    fs::create_dir_all(path).map_err(|e| write_error(path, e))
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), ExportError> {
    fs::write(path, contents).map_err(|e| write_error(path, e))
}

fn copy_file(from: &Path, to: &Path) -> Result<(), ExportError> {
    fs::copy(from, to).map(|_| ()).map_err(|e| write_error(to, e))
}

fn write_error(path: &Path, source: std::io::Error) -> ExportError {
    ExportError::Write {
        path: path.to_path_buf(),
        source,
    }
}

fn publish_error(path: &Path, source: std::io::Error) -> ExportError {
    ExportError::Publish {
        path: path.to_path_buf(),
        source,
    }
}
