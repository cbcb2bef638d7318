//! Build pipeline orchestration.
//!
//! Coordinates the full build: fetch → discover → parse → normalize for each
//! source, then aggregate and export once every source has finished.
//!
//! ```text
//!            ┌─ source A: fetch ─► discover/parse/normalize ─┐
//! semaphore ─┼─ source B: fetch ─► discover/parse/normalize ─┼─► Collection ─► Exporter
//!            └─ source C: fetch ─► discover/parse/normalize ─┘     (barrier)
//! ```
//!
//! A failing source is reported and contributes nothing; the others are
//! still exported. Ctrl-C stops new sources from starting and ends the run
//! without publishing.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::aggregate::Collection;
use crate::config::{Config, DiscoveryConfig, SourceConfig, SourceKind};
use crate::connector_git;
use crate::discover::Discoverer;
use crate::error::DiscoveryWarning;
use crate::export::{ExportSummary, Exporter};
use crate::fetch::fetch_workspace;
use crate::graphs::find_example_graphs;
use crate::header::{self, RawHeader};
use crate::models::{CandidateFile, PluginRecord};
use crate::normalize::{FileFacts, Normalizer};
use crate::progress::{format_number, BuildProgressEvent, BuildProgressReporter};
use crate::traits::FetcherRegistry;
use crate::workspace::{Workspace, WorkspaceCache};

/// Options of `gallery build`.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Reuse cached workspaces instead of fetching.
    pub skip_fetch: bool,
    /// Overrides `output.dir`.
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Ok,
    Failed(String),
    /// Not started because the run was cancelled.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub name: String,
    pub kind: SourceKind,
    pub revision: Option<String>,
    pub plugins: usize,
    pub status: SourceStatus,
}

/// Overall result of a build, mapped to the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// Some sources failed; the rest was published.
    Partial,
    /// Interrupted; nothing was published.
    Cancelled,
    /// Every source failed; nothing was published.
    Failed,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::Failed => 1,
            RunOutcome::Partial => 2,
            RunOutcome::Cancelled => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub sources: Vec<SourceReport>,
    pub plugins: usize,
    pub export: Option<ExportSummary>,
    pub outcome: RunOutcome,
}

/// Flag set by Ctrl-C; checked before each source starts.
pub fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight sources without publishing");
            handler_flag.store(true, Ordering::SeqCst);
        }
    });
    flag
}

/// Run a full build. Export failures and unusable configuration are errors;
/// source failures are part of the summary.
pub async fn run_build(
    config: &Config,
    options: &BuildOptions,
    progress: Arc<dyn BuildProgressReporter>,
    cancel: Arc<AtomicBool>,
) -> Result<RunSummary> {
    let registry = Arc::new(FetcherRegistry::with_builtins(&config.fetch)?);
    let cache = WorkspaceCache::new(&config.workspace.cache_dir);
    let normalizer = Arc::new(Normalizer::new(&config.normalize));
    let semaphore = Arc::new(Semaphore::new(config.fetch.concurrency));

    let mut handles = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        let task = SourceTask {
            source: source.clone(),
            registry: registry.clone(),
            cache: cache.clone(),
            config: config.clone(),
            normalizer: normalizer.clone(),
            progress: progress.clone(),
            skip_fetch: options.skip_fetch,
        };
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            if cancel.load(Ordering::SeqCst) {
                return (task.report(None, 0, SourceStatus::Skipped), Vec::new());
            }
            task.run().await
        }));
    }

    let mut reports = Vec::with_capacity(handles.len());
    let mut records: Vec<PluginRecord> = Vec::new();
    for (handle, source) in handles.into_iter().zip(&config.sources) {
        match handle.await {
            Ok((report, source_records)) => {
                reports.push(report);
                records.extend(source_records);
            }
            Err(e) => {
                error!("Task for source '{}' panicked: {}", source.name, e);
                reports.push(SourceReport {
                    name: source.name.clone(),
                    kind: source.kind,
                    revision: None,
                    plugins: 0,
                    status: SourceStatus::Failed(e.to_string()),
                });
            }
        }
    }

    let failed = reports
        .iter()
        .filter(|r| matches!(r.status, SourceStatus::Failed(_)))
        .count();

    if cancel.load(Ordering::SeqCst) {
        return Ok(RunSummary {
            sources: reports,
            plugins: records.len(),
            export: None,
            outcome: RunOutcome::Cancelled,
        });
    }
    if !reports.is_empty() && failed == reports.len() {
        error!("Every source failed, keeping the previous output");
        return Ok(RunSummary {
            sources: reports,
            plugins: 0,
            export: None,
            outcome: RunOutcome::Failed,
        });
    }

    let collection = Collection::build(records);
    collection.verify().context("Taxonomy indexes are inconsistent")?;
    if collection.is_empty() {
        warn!("No plugins found in any source");
    }

    progress.report(BuildProgressEvent::Exporting {
        plugins: collection.len() as u64,
    });
    let plugins = collection.len();
    let exporter = Exporter::from_config(config, options.output.as_deref());
    let export = tokio::task::spawn_blocking(move || exporter.export(&collection))
        .await
        .context("Export task panicked")?
        .context("Failed to export gallery content")?;

    Ok(RunSummary {
        sources: reports,
        plugins,
        export: Some(export),
        outcome: if failed > 0 {
            RunOutcome::Partial
        } else {
            RunOutcome::Success
        },
    })
}

/// Everything one source task needs, owned so it can move into a task.
struct SourceTask {
    source: SourceConfig,
    registry: Arc<FetcherRegistry>,
    cache: WorkspaceCache,
    config: Config,
    normalizer: Arc<Normalizer>,
    progress: Arc<dyn BuildProgressReporter>,
    skip_fetch: bool,
}

impl SourceTask {
    async fn run(self) -> (SourceReport, Vec<PluginRecord>) {
        let name = self.source.name.clone();
        self.progress.report(BuildProgressEvent::Fetching {
            source: name.clone(),
        });

        let workspace = match fetch_workspace(
            &self.registry,
            &self.cache,
            &self.source,
            &self.config.fetch,
            self.skip_fetch,
        )
        .await
        {
            Ok(ws) => ws,
            Err(e) => return self.fail(None, e.to_string()),
        };

        self.progress.report(BuildProgressEvent::Scanning {
            source: name.clone(),
        });
        let revision = workspace.revision.clone();
        let discovery = self.config.discovery.clone();
        let normalizer = self.normalizer.clone();
        let scanned = tokio::task::spawn_blocking(move || {
            scan_workspace(&workspace, &discovery, &normalizer)
        })
        .await;

        match scanned {
            Ok(Ok(records)) => {
                info!("Source '{}': {} plugins", name, records.len());
                self.progress.report(BuildProgressEvent::Scanned {
                    source: name,
                    plugins: records.len() as u64,
                });
                (
                    self.report(revision, records.len(), SourceStatus::Ok),
                    records,
                )
            }
            Ok(Err(e)) => self.fail(revision, format!("{:#}", e)),
            Err(e) => self.fail(revision, format!("scan task panicked: {}", e)),
        }
    }

    fn fail(&self, revision: Option<String>, message: String) -> (SourceReport, Vec<PluginRecord>) {
        error!("Source '{}' failed: {}", self.source.name, message);
        self.progress.report(BuildProgressEvent::Failed {
            source: self.source.name.clone(),
            error: message.clone(),
        });
        (
            self.report(revision, 0, SourceStatus::Failed(message)),
            Vec::new(),
        )
    }

    fn report(&self, revision: Option<String>, plugins: usize, status: SourceStatus) -> SourceReport {
        SourceReport {
            name: self.source.name.clone(),
            kind: self.source.kind,
            revision,
            plugins,
            status,
        }
    }
}

/// Discover, parse and normalize every plugin of a locked workspace.
///
/// Blocking; the workspace lock is held until this returns.
pub fn scan_workspace(
    workspace: &Workspace,
    discovery: &DiscoveryConfig,
    normalizer: &Normalizer,
) -> Result<Vec<PluginRecord>> {
    if !workspace.plugin_root.is_dir() {
        bail!(
            "plugin path {} does not exist in source '{}'",
            workspace.plugin_root.display(),
            workspace.source
        );
    }

    let prefix = workspace
        .plugin_root
        .strip_prefix(&workspace.root)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .filter(|p| !p.is_empty());

    let timestamps = match workspace.kind {
        SourceKind::Git => connector_git::commit_timestamps(&workspace.root, prefix.as_deref())
            .unwrap_or_else(|e| {
                warn!("No commit timestamps for '{}': {}", workspace.source, e);
                HashMap::new()
            }),
        _ => HashMap::new(),
    };

    let discoverer = Discoverer::new(&workspace.plugin_root, discovery)?;
    let mut records = Vec::new();
    for candidate in discoverer.iter() {
        let header = read_header(&candidate);

        let repo_path = match &prefix {
            Some(prefix) => format!("{}/{}", prefix, candidate.relative_path),
            None => candidate.relative_path.clone(),
        };
        let facts = FileFacts {
            example_graphs: find_example_graphs(&candidate.path, &candidate.name),
            changed_timestamp: timestamps.get(&repo_path).copied(),
        };
        debug!(plugin = %candidate.relative_path, "Parsed plugin header");
        records.push(normalizer.normalize(&workspace.source, &candidate, &header, facts));
    }
    Ok(records)
}

/// Parse the header of a discovered file.
///
/// A file that can no longer be read still yields a record: its header is
/// empty, so every detail ends up missing.
fn read_header(candidate: &CandidateFile) -> RawHeader {
    match fs::read(&candidate.path) {
        Ok(content) => header::parse_bytes(&content),
        Err(e) => {
            let warning = DiscoveryWarning {
                path: candidate.path.clone(),
                message: e.to_string(),
            };
            warn!("{}", warning);
            header::parse_bytes(&[])
        }
    }
}

/// Print the run summary to stdout.
pub fn print_summary(summary: &RunSummary) {
    println!("build");
    for report in &summary.sources {
        let status = match &report.status {
            SourceStatus::Ok => "ok".to_string(),
            SourceStatus::Failed(message) => format!("FAILED: {}", message),
            SourceStatus::Skipped => "skipped".to_string(),
        };
        println!(
            "  {:<16} {:<10} {:>8} plugins  {}",
            report.name,
            report.kind.as_str(),
            format_number(report.plugins as u64),
            status
        );
        if let Some(revision) = &report.revision {
            println!("  {:<16} revision {}", "", revision);
        }
    }
    println!("  plugins: {}", format_number(summary.plugins as u64));
    if let Some(export) = &summary.export {
        println!("  output: {}", export.output_dir.display());
        println!("  label pages: {}", export.label_pages);
    }
    let outcome = match summary.outcome {
        RunOutcome::Success => "ok",
        RunOutcome::Partial => "partial (some sources failed)",
        RunOutcome::Cancelled => "cancelled (nothing published)",
        RunOutcome::Failed => "failed (nothing published)",
    };
    println!("{}", outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NormalizeConfig;
    use crate::models::MissingDetail;
    use crate::progress::NoProgress;
    use tempfile::TempDir;

    fn directory_config(tmp: &TempDir, names: &[&str]) -> Config {
        let mut config = Config::minimal();
        config.workspace.cache_dir = tmp.path().join("cache");
        config.output.dir = tmp.path().join("content");
        for name in names {
            let dir = tmp.path().join(name);
            fs::create_dir_all(&dir).unwrap();
            config.sources.push(SourceConfig {
                name: name.to_string(),
                kind: SourceKind::Directory,
                location: dir.display().to_string(),
                reference: None,
                path: ".".to_string(),
                shallow: false,
                strip_components: 1,
            });
        }
        config
    }

    #[tokio::test]
    async fn test_build_two_directory_sources() {
        let tmp = TempDir::new().unwrap();
        let config = directory_config(&tmp, &["a", "b"]);
        fs::write(tmp.path().join("a/cpu"), "#!/bin/sh\n").unwrap();
        fs::write(tmp.path().join("b/cpu"), "#!/bin/sh\n").unwrap();
        fs::write(tmp.path().join("b/README"), "not a plugin\n").unwrap();

        let summary = run_build(
            &config,
            &BuildOptions::default(),
            Arc::new(NoProgress),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Success);
        assert_eq!(summary.plugins, 2);
        assert!(tmp.path().join("content/plugins/a/cpu/index.md").is_file());
        assert!(tmp.path().join("content/plugins/b/cpu/index.md").is_file());
    }

    #[tokio::test]
    async fn test_missing_directory_fails_only_that_source() {
        let tmp = TempDir::new().unwrap();
        let mut config = directory_config(&tmp, &["a"]);
        fs::write(tmp.path().join("a/cpu"), "#!/bin/sh\n").unwrap();
        let mut missing = config.sources[0].clone();
        missing.name = "gone".to_string();
        missing.location = tmp.path().join("gone").display().to_string();
        config.sources.push(missing);

        let summary = run_build(
            &config,
            &BuildOptions::default(),
            Arc::new(NoProgress),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Partial);
        assert_eq!(summary.outcome.exit_code(), 2);
        assert!(matches!(summary.sources[1].status, SourceStatus::Failed(_)));
        assert_eq!(summary.plugins, 1);
    }

    #[tokio::test]
    async fn test_all_sources_failed_publishes_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut config = directory_config(&tmp, &[]);
        config.sources.push(SourceConfig {
            name: "gone".to_string(),
            kind: SourceKind::Directory,
            location: tmp.path().join("gone").display().to_string(),
            reference: None,
            path: ".".to_string(),
            shallow: false,
            strip_components: 1,
        });

        let summary = run_build(
            &config,
            &BuildOptions::default(),
            Arc::new(NoProgress),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();
        assert_eq!(summary.outcome, RunOutcome::Failed);
        assert!(!tmp.path().join("content").exists());
    }

    #[tokio::test]
    async fn test_cancelled_run_publishes_nothing() {
        let tmp = TempDir::new().unwrap();
        let config = directory_config(&tmp, &["a"]);
        fs::write(tmp.path().join("a/cpu"), "#!/bin/sh\n").unwrap();

        let summary = run_build(
            &config,
            &BuildOptions::default(),
            Arc::new(NoProgress),
            Arc::new(AtomicBool::new(true)),
        )
        .await
        .unwrap();
        assert_eq!(summary.outcome, RunOutcome::Cancelled);
        assert_eq!(summary.outcome.exit_code(), 3);
        assert_eq!(summary.sources[0].status, SourceStatus::Skipped);
        assert!(!tmp.path().join("content").exists());
    }

    #[tokio::test]
    async fn test_no_plugins_is_success() {
        let tmp = TempDir::new().unwrap();
        let config = directory_config(&tmp, &["empty"]);
        let summary = run_build(
            &config,
            &BuildOptions::default(),
            Arc::new(NoProgress),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();
        assert_eq!(summary.outcome, RunOutcome::Success);
        assert_eq!(summary.plugins, 0);
        assert!(tmp.path().join("content/metadata.json").is_file());
    }

    #[test]
    fn test_unreadable_candidate_still_yields_record() {
        let tmp = TempDir::new().unwrap();
        let candidate = CandidateFile {
            path: tmp.path().join("node.d/vanished"),
            relative_path: "node.d/vanished".to_string(),
            name: "vanished".to_string(),
            executable: true,
            language_hint: None,
        };

        let header = read_header(&candidate);
        assert_eq!(header, RawHeader::default());

        let record = Normalizer::new(&NormalizeConfig::default()).normalize(
            "local",
            &candidate,
            &header,
            FileFacts::default(),
        );
        assert_eq!(record.name, "vanished");
        assert_eq!(record.identity.to_string(), "local/node.d/vanished");
        for detail in [
            MissingDetail::Documentation,
            MissingDetail::Summary,
            MissingDetail::License,
            MissingDetail::Author,
            MissingDetail::Category,
        ] {
            assert!(record.missing_details.contains(&detail), "{:?}", detail);
        }
    }
}
