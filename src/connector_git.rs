//! Git source fetcher.
//!
//! Clones the configured branch or tag into the workspace cache on first use
//! and updates it in place afterwards:
//!
//! 1. Clone with `--single-branch --branch <ref>` (plus `--depth 1` for
//!    shallow sources) if the tree has no `.git` directory.
//! 2. Otherwise `git fetch origin <ref>`, `git reset --hard FETCH_HEAD` and
//!    `git clean -ffdx`.
//! 3. Record `HEAD` as the workspace revision.
//!
//! Only file content at `HEAD` is read, so shallow history is fine. The
//! per-file commit timestamps used for content dates degrade to the single
//! shallow commit in that case.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::process::{Command, Output};
use tracing::{debug, info};

use crate::config::{SourceConfig, SourceKind};
use crate::error::FetchError;
use crate::retry::with_retry;
use crate::traits::{FetchContext, Materialized, SourceFetcher};

pub struct GitFetcher;

impl GitFetcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Git
    }

    fn description(&self) -> &str {
        "Clone or update a git branch"
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        source: &SourceConfig,
        tree: &Path,
    ) -> Result<Materialized, FetchError> {
        let what = format!("git fetch of '{}'", source.name);
        let revision = with_retry(ctx.retry, &what, || {
            let source = source.clone();
            let tree = tree.to_path_buf();
            async move {
                tokio::task::spawn_blocking(move || sync_repository(&source, &tree))
                    .await
                    .map_err(|e| FetchError::Io(std::io::Error::other(e)))?
            }
        })
        .await?;

        Ok(Materialized {
            root: tree.to_path_buf(),
            revision: Some(revision),
        })
    }
}

/// Clone or update `tree` and return the checked-out `HEAD` sha.
pub fn sync_repository(source: &SourceConfig, tree: &Path) -> Result<String, FetchError> {
    let reference = source.reference.as_deref().unwrap_or("HEAD");

    if tree.join(".git").exists() {
        info!("Updating '{}' ({})", source.name, reference);
        git_update(source, tree, reference)?;
    } else {
        if tree.exists() {
            // Leftover from an interrupted clone
            std::fs::remove_dir_all(tree)?;
        }
        info!("Cloning '{}' ({})", source.name, reference);
        git_clone(source, tree, reference)?;
    }

    git_head_sha(tree)
}

fn git_clone(source: &SourceConfig, dest: &Path, reference: &str) -> Result<(), FetchError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut cmd = git();
    cmd.args(["clone", "--quiet", "--single-branch", "--branch", reference]);
    if source.shallow {
        cmd.args(["--depth", "1"]);
    }
    cmd.arg(&source.location);
    cmd.arg(dest);

    let output = run(cmd, "git clone")?;
    if !output.status.success() {
        // Do not leave a half-written checkout behind for the next run
        let _ = std::fs::remove_dir_all(dest);
        return Err(classify_failure(source, reference, "git clone", &output));
    }
    Ok(())
}

fn git_update(source: &SourceConfig, repo_dir: &Path, reference: &str) -> Result<(), FetchError> {
    let mut fetch = git();
    fetch.args(["fetch", "--quiet", "origin", reference]);
    if source.shallow {
        fetch.args(["--depth", "1"]);
    }
    fetch.current_dir(repo_dir);
    let output = run(fetch, "git fetch")?;
    if !output.status.success() {
        return Err(classify_failure(source, reference, "git fetch", &output));
    }

    let mut reset = git();
    reset
        .args(["reset", "--quiet", "--hard", "FETCH_HEAD"])
        .current_dir(repo_dir);
    let output = run(reset, "git reset")?;
    if !output.status.success() {
        return Err(classify_failure(source, reference, "git reset", &output));
    }

    let mut clean = git();
    clean.args(["clean", "--quiet", "-ffdx"]).current_dir(repo_dir);
    let output = run(clean, "git clean")?;
    if !output.status.success() {
        return Err(classify_failure(source, reference, "git clean", &output));
    }

    Ok(())
}

fn git_head_sha(repo_dir: &Path) -> Result<String, FetchError> {
    let mut cmd = git();
    cmd.args(["rev-parse", "HEAD"]).current_dir(repo_dir);
    let output = run(cmd, "git rev-parse")?;
    if !output.status.success() {
        return Err(FetchError::Git {
            command: "git rev-parse HEAD".to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Last commit time of every file below `subpath`, keyed by repository-relative path.
///
/// Uses a single `git log --name-only` pass; the first (newest) commit that
/// touches a path wins.
pub fn commit_timestamps(
    repo_dir: &Path,
    subpath: Option<&str>,
) -> Result<HashMap<String, DateTime<Utc>>, FetchError> {
    let mut cmd = git();
    cmd.args([
        "-c",
        "core.quotePath=false",
        "log",
        "--no-merges",
        "--format=format:%x1e%ct",
        "--name-only",
        "--",
    ]);
    cmd.arg(subpath.unwrap_or("."));
    cmd.current_dir(repo_dir);

    let output = run(cmd, "git log")?;
    if !output.status.success() {
        return Err(FetchError::Git {
            command: "git log".to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let timestamps = parse_name_only_log(&String::from_utf8_lossy(&output.stdout));
    debug!(
        "Collected commit timestamps for {} files in {}",
        timestamps.len(),
        repo_dir.display()
    );
    Ok(timestamps)
}

fn parse_name_only_log(log: &str) -> HashMap<String, DateTime<Utc>> {
    let mut timestamps = HashMap::new();
    for record in log.split('\u{1e}') {
        let mut lines = record.lines().map(str::trim).filter(|l| !l.is_empty());
        let Some(ts) = lines.next().and_then(|l| l.parse::<i64>().ok()) else {
            continue;
        };
        let Some(when) = Utc.timestamp_opt(ts, 0).single() else {
            continue;
        };
        for file in lines {
            timestamps.entry(file.to_string()).or_insert(when);
        }
    }
    timestamps
}

fn git() -> Command {
    let mut cmd = Command::new("git");
    // Fail instead of prompting for credentials
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.env("GIT_ASKPASS", "true");
    cmd
}

fn run(mut cmd: Command, name: &str) -> Result<Output, FetchError> {
    cmd.output().map_err(|e| FetchError::Git {
        command: name.to_string(),
        message: format!("failed to execute git ({}). Is git installed?", e),
    })
}

fn classify_failure(source: &SourceConfig, reference: &str, command: &str, output: &Output) -> FetchError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    classify_stderr(&source.location, reference, command, stderr)
}

fn classify_stderr(location: &str, reference: &str, command: &str, stderr: String) -> FetchError {
    let lower = stderr.to_lowercase();
    if lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("permission denied (publickey")
        || lower.contains("terminal prompts disabled")
    {
        FetchError::Authentication {
            location: location.to_string(),
            message: stderr,
        }
    } else if lower.contains("remote branch")
        || lower.contains("couldn't find remote ref")
        || lower.contains("not found in upstream")
    {
        FetchError::MissingReference {
            location: location.to_string(),
            reference: reference.to_string(),
        }
    } else if lower.contains("could not resolve host")
        || lower.contains("connection timed out")
        || lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("early eof")
        || lower.contains("the remote end hung up")
        || lower.contains("unable to access")
    {
        FetchError::Network {
            location: location.to_string(),
            message: stderr,
        }
    } else {
        FetchError::Git {
            command: command.to_string(),
            message: stderr,
        }
    }
}
