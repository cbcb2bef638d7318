//! Archive source fetcher.
//!
//! Downloads a tarball or zip archive (or reads a local one), then unpacks
//! the configured plugin subdirectory into the workspace cache.
//!
//! # Safety bounds
//!
//! - Downloads stop at `fetch.max_archive_bytes`.
//! - Unpacked content stops at `fetch.max_unpacked_bytes`.
//! - Entries with absolute paths or `..` components reject the archive.
//! - Symlinks and hard links whose target leaves the extraction root reject
//!   the archive; links that stay inside are skipped, never created.
//!
//! # Formats
//!
//! The format is sniffed from the first bytes: gzip-compressed tar, zip, or
//! plain tar. GitHub-style archives wrap everything in one top-level
//! directory, which `strip_components = 1` (the default) removes.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::{FetchConfig, SourceConfig, SourceKind};
use crate::error::FetchError;
use crate::retry::with_retry;
use crate::traits::{FetchContext, Materialized, SourceFetcher};

const DOWNLOAD_FILE: &str = "archive.download";

pub struct ArchiveFetcher {
    client: reqwest::Client,
}

impl ArchiveFetcher {
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("plugin-gallery/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for ArchiveFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Archive
    }

    fn description(&self) -> &str {
        "Download and unpack a tar or zip archive"
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        source: &SourceConfig,
        tree: &Path,
    ) -> Result<Materialized, FetchError> {
        let entry_dir = tree
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&entry_dir)?;

        let (archive_path, downloaded) = match remote_url(&source.location) {
            Some(url) => {
                let dest = entry_dir.join(DOWNLOAD_FILE);
                let what = format!("download of '{}'", source.name);
                with_retry(ctx.retry, &what, || {
                    download(&self.client, url, &dest, ctx.max_archive_bytes)
                })
                .await?;
                (dest, true)
            }
            None => {
                let path = local_path(&source.location);
                let size = fs::metadata(&path)
                    .map_err(|e| FetchError::CorruptArchive {
                        location: source.location.clone(),
                        message: e.to_string(),
                    })?
                    .len();
                if size > ctx.max_archive_bytes {
                    return Err(FetchError::ArchiveTooLarge {
                        location: source.location.clone(),
                        limit: ctx.max_archive_bytes,
                    });
                }
                (path, false)
            }
        };

        let hash_path = archive_path.clone();
        let revision = tokio::task::spawn_blocking(move || sha256_file(&hash_path))
            .await
            .map_err(|e| FetchError::Io(io::Error::other(e)))??;

        if ctx.previous_revision.as_deref() == Some(revision.as_str()) && tree.is_dir() {
            info!("Archive for '{}' unchanged, reusing extracted tree", source.name);
        } else {
            let job = ExtractJob {
                location: source.location.clone(),
                archive: archive_path.clone(),
                tree: tree.to_path_buf(),
                strip_components: source.strip_components,
                subpath: source.subpath(),
                max_unpacked_bytes: ctx.max_unpacked_bytes,
            };
            tokio::task::spawn_blocking(move || job.run())
                .await
                .map_err(|e| FetchError::Io(io::Error::other(e)))??;
        }

        if downloaded {
            let _ = fs::remove_file(&archive_path);
        }

        Ok(Materialized {
            root: tree.to_path_buf(),
            revision: Some(revision),
        })
    }
}

fn remote_url(location: &str) -> Option<&str> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Some(location)
    } else {
        None
    }
}

fn local_path(location: &str) -> PathBuf {
    PathBuf::from(location.strip_prefix("file://").unwrap_or(location))
}

async fn download(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    max_bytes: u64,
) -> Result<(), FetchError> {
    info!("Downloading {}", url);
    let network = |e: reqwest::Error| FetchError::Network {
        location: url.to_string(),
        message: e.to_string(),
    };

    let mut response = client.get(url).send().await.map_err(network)?;
    let status = response.status();
    if !status.is_success() {
        return Err(match status.as_u16() {
            401 | 403 => FetchError::Authentication {
                location: url.to_string(),
                message: format!("HTTP {}", status),
            },
            404 => FetchError::MissingReference {
                location: url.to_string(),
                reference: url.to_string(),
            },
            429 => FetchError::Network {
                location: url.to_string(),
                message: format!("HTTP {}", status),
            },
            _ if status.is_server_error() => FetchError::Network {
                location: url.to_string(),
                message: format!("HTTP {}", status),
            },
            _ => FetchError::CorruptArchive {
                location: url.to_string(),
                message: format!("unexpected HTTP status {}", status),
            },
        });
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(FetchError::ArchiveTooLarge {
                location: url.to_string(),
                limit: max_bytes,
            });
        }
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut downloaded: u64 = 0;
    while let Some(chunk) = response.chunk().await.map_err(network)? {
        downloaded += chunk.len() as u64;
        if downloaded > max_bytes {
            drop(file);
            let _ = tokio::fs::remove_file(dest).await;
            return Err(FetchError::ArchiveTooLarge {
                location: url.to_string(),
                limit: max_bytes,
            });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    debug!("Download complete: {} bytes", downloaded);
    Ok(())
}

fn sha256_file(path: &Path) -> Result<String, FetchError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    TarGz,
    Tar,
    Zip,
}

fn sniff_format(path: &Path) -> Result<ArchiveFormat, FetchError> {
    let mut head = [0u8; 4];
    let mut file = File::open(path)?;
    let n = file.read(&mut head)?;
    Ok(match &head[..n] {
        [0x1f, 0x8b, ..] => ArchiveFormat::TarGz,
        [b'P', b'K', 0x03, 0x04] | [b'P', b'K', 0x05, 0x06] => ArchiveFormat::Zip,
        _ => ArchiveFormat::Tar,
    })
}

/// Unpacks one archive into a fresh directory, then swaps it into place.
struct ExtractJob {
    location: String,
    archive: PathBuf,
    tree: PathBuf,
    strip_components: usize,
    subpath: Option<String>,
    max_unpacked_bytes: u64,
}

impl ExtractJob {
    fn run(&self) -> Result<(), FetchError> {
        let staging = self.tree.with_extension("new");
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let result = match sniff_format(&self.archive)? {
            ArchiveFormat::TarGz => {
                let file = File::open(&self.archive)?;
                self.unpack_tar(GzDecoder::new(file), &staging)
            }
            ArchiveFormat::Tar => self.unpack_tar(File::open(&self.archive)?, &staging),
            ArchiveFormat::Zip => self.unpack_zip(&staging),
        };

        if let Err(e) = result {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        if self.tree.exists() {
            let old = self.tree.with_extension("old");
            if old.exists() {
                fs::remove_dir_all(&old)?;
            }
            fs::rename(&self.tree, &old)?;
            fs::rename(&staging, &self.tree)?;
            fs::remove_dir_all(&old)?;
        } else {
            fs::rename(&staging, &self.tree)?;
        }
        Ok(())
    }

    fn corrupt(&self, e: impl ToString) -> FetchError {
        FetchError::CorruptArchive {
            location: self.location.clone(),
            message: e.to_string(),
        }
    }

    fn unpack_tar<R: Read>(&self, reader: R, dest: &Path) -> Result<(), FetchError> {
        let mut archive = tar::Archive::new(reader);
        let mut budget = self.max_unpacked_bytes;
        let mut files = 0usize;

        for entry in archive.entries().map_err(|e| self.corrupt(e))? {
            let mut entry = entry.map_err(|e| self.corrupt(e))?;
            let raw = entry.path().map_err(|e| self.corrupt(e))?.into_owned();
            let Some(relative) = target_path(&raw, self.strip_components, self.subpath.as_deref())?
            else {
                continue;
            };

            let entry_type = entry.header().entry_type();
            if entry_type.is_dir() {
                fs::create_dir_all(dest.join(&relative))?;
            } else if entry_type.is_symlink() || entry_type.is_hard_link() {
                let link = entry
                    .link_name()
                    .map_err(|e| self.corrupt(e))?
                    .map(|l| l.into_owned())
                    .unwrap_or_default();
                check_link(&relative, &link, entry_type.is_hard_link(), self.strip_components)?;
                debug!("Skipping link {}", relative.display());
            } else if entry_type.is_file() {
                let mode = entry.header().mode().ok();
                budget = self.write_file(&mut entry, dest, &relative, mode, budget)?;
                files += 1;
            }
        }

        debug!("Unpacked {} files from {}", files, self.location);
        Ok(())
    }

    fn unpack_zip(&self, dest: &Path) -> Result<(), FetchError> {
        let file = File::open(&self.archive)?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| self.corrupt(e))?;
        let mut budget = self.max_unpacked_bytes;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(|e| self.corrupt(e))?;
            let raw = PathBuf::from(entry.name());
            if entry.enclosed_name().is_none() {
                return Err(FetchError::PathTraversal {
                    entry: entry.name().to_string(),
                });
            }
            let Some(relative) = target_path(&raw, self.strip_components, self.subpath.as_deref())?
            else {
                continue;
            };

            let mode = entry.unix_mode();
            let is_symlink = mode.map(|m| m & 0o170000 == 0o120000).unwrap_or(false);
            if entry.is_dir() {
                fs::create_dir_all(dest.join(&relative))?;
            } else if is_symlink {
                let mut target = String::new();
                (&mut entry)
                    .take(4096)
                    .read_to_string(&mut target)
                    .map_err(|e| self.corrupt(e))?;
                check_link(&relative, Path::new(&target), false, self.strip_components)?;
                debug!("Skipping link {}", relative.display());
            } else {
                budget = self.write_file(&mut entry, dest, &relative, mode, budget)?;
            }
        }
        Ok(())
    }

    /// Copy one entry, charging its size against the remaining budget.
    fn write_file<R: Read>(
        &self,
        reader: &mut R,
        dest: &Path,
        relative: &Path,
        mode: Option<u32>,
        budget: u64,
    ) -> Result<u64, FetchError> {
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        let written = io::copy(&mut reader.take(budget.saturating_add(1)), &mut out)
            .map_err(|e| self.corrupt(e))?;
        if written > budget {
            return Err(FetchError::ArchiveTooLarge {
                location: self.location.clone(),
                limit: self.max_unpacked_bytes,
            });
        }
        out.flush()?;
        set_mode(&target, mode)?;
        Ok(budget - written)
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

/// Map an archive entry path to its location inside the extraction root.
///
/// Returns `Ok(None)` for entries that are stripped away or lie outside the
/// plugin subdirectory.
fn target_path(
    raw: &Path,
    strip_components: usize,
    subpath: Option<&str>,
) -> Result<Option<PathBuf>, FetchError> {
    let mut parts = Vec::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(FetchError::PathTraversal {
                    entry: raw.display().to_string(),
                });
            }
        }
    }

    if parts.len() <= strip_components {
        return Ok(None);
    }
    let relative: PathBuf = parts[strip_components..].iter().collect();

    if let Some(sub) = subpath {
        if !relative.starts_with(sub) {
            return Ok(None);
        }
    }
    Ok(Some(relative))
}

/// Reject links whose target resolves outside the extraction root.
///
/// Symlink targets are relative to the link's directory; hard link targets
/// are archive paths and get the same component stripping as entries.
fn check_link(
    relative: &Path,
    target: &Path,
    hard_link: bool,
    strip_components: usize,
) -> Result<(), FetchError> {
    let escape = || FetchError::PathTraversal {
        entry: format!("{} -> {}", relative.display(), target.display()),
    };
    if target.is_absolute() {
        return Err(escape());
    }

    let mut depth: isize = if hard_link {
        -(strip_components as isize)
    } else {
        relative.components().count() as isize - 1
    };
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(escape());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }
    if depth < 0 || (hard_link && depth == 0) {
        return Err(escape());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn append_file(builder: &mut tar::Builder<impl Write>, path: &str, body: &[u8], mode: u32) {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(mode);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, path, body).unwrap();
    }

    /// Append an entry with a raw, unvalidated name.
    fn append_raw(
        builder: &mut tar::Builder<impl Write>,
        name: &str,
        entry_type: tar::EntryType,
        link: &str,
        body: &[u8],
    ) {
        let mut header = tar::Header::new_old();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(entry_type);
        {
            let old = header.as_old_mut();
            old.name[..name.len()].copy_from_slice(name.as_bytes());
            old.linkname[..link.len()].copy_from_slice(link.as_bytes());
        }
        header.set_cksum();
        builder.append(&header, body).unwrap();
    }

    fn write_tar_gz(dir: &Path, build: impl FnOnce(&mut tar::Builder<GzEncoder<File>>)) -> PathBuf {
        let path = dir.join("plugins.tar.gz");
        let file = File::create(&path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        build(&mut builder);
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    fn job(archive: PathBuf, tree: PathBuf, max: u64) -> ExtractJob {
        ExtractJob {
            location: archive.display().to_string(),
            archive,
            tree,
            strip_components: 1,
            subpath: Some("plugins".to_string()),
            max_unpacked_bytes: max,
        }
    }

    #[test]
    fn test_target_path_strips_and_filters() {
        let p = target_path(Path::new("contrib-master/plugins/apache/apache_x"), 1, Some("plugins"))
            .unwrap();
        assert_eq!(p, Some(PathBuf::from("plugins/apache/apache_x")));
        assert_eq!(
            target_path(Path::new("contrib-master/README.md"), 1, Some("plugins")).unwrap(),
            None
        );
        assert_eq!(target_path(Path::new("contrib-master/"), 1, None).unwrap(), None);
        assert!(target_path(Path::new("a/../../etc/passwd"), 1, None).is_err());
        assert!(target_path(Path::new("/etc/passwd"), 0, None).is_err());
    }

    #[test]
    fn test_check_link() {
        let rel = Path::new("plugins/apache/link");
        assert!(check_link(rel, Path::new("apache_x"), false, 1).is_ok());
        assert!(check_link(rel, Path::new("../../README"), false, 1).is_ok());
        assert!(check_link(rel, Path::new("../../../etc/passwd"), false, 1).is_err());
        assert!(check_link(rel, Path::new("/etc/passwd"), false, 1).is_err());
        assert!(check_link(rel, Path::new("top/plugins/x"), true, 1).is_ok());
        assert!(check_link(rel, Path::new("x"), true, 1).is_err());
    }

    #[test]
    fn test_extracts_subpath_and_keeps_exec_bit() {
        let tmp = TempDir::new().unwrap();
        let archive = write_tar_gz(tmp.path(), |b| {
            append_file(b, "contrib-master/README.md", b"readme", 0o644);
            append_file(b, "contrib-master/plugins/disk/df_x", b"#!/bin/sh\n", 0o755);
        });
        let tree = tmp.path().join("cache/tree");
        job(archive, tree.clone(), 1024).run().unwrap();

        assert!(tree.join("plugins/disk/df_x").is_file());
        assert!(!tree.join("README.md").exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(tree.join("plugins/disk/df_x"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn test_rejects_parent_dir_entries() {
        let tmp = TempDir::new().unwrap();
        let archive = write_tar_gz(tmp.path(), |b| {
            append_raw(b, "top/plugins/../../../evil", tar::EntryType::Regular, "", b"x");
        });
        let tree = tmp.path().join("cache/tree");
        let err = job(archive, tree.clone(), 1024).run().unwrap_err();
        assert!(matches!(err, FetchError::PathTraversal { .. }));
        assert!(!tree.exists());
        assert!(!tmp.path().join("evil").exists());
    }

    #[test]
    fn test_rejects_escaping_symlink() {
        let tmp = TempDir::new().unwrap();
        let archive = write_tar_gz(tmp.path(), |b| {
            append_raw(b, "top/plugins/passwd", tar::EntryType::Symlink, "/etc/passwd", b"");
        });
        let err = job(archive, tmp.path().join("cache/tree"), 1024)
            .run()
            .unwrap_err();
        assert!(matches!(err, FetchError::PathTraversal { .. }));
    }

    #[test]
    fn test_unpacked_size_bound() {
        let tmp = TempDir::new().unwrap();
        let archive = write_tar_gz(tmp.path(), |b| {
            append_file(b, "top/plugins/big", &vec![b'a'; 4096], 0o644);
        });
        let err = job(archive, tmp.path().join("cache/tree"), 1000)
            .run()
            .unwrap_err();
        assert!(matches!(err, FetchError::ArchiveTooLarge { .. }));
    }

    #[test]
    fn test_failed_extraction_keeps_previous_tree() {
        let tmp = TempDir::new().unwrap();
        let tree = tmp.path().join("cache/tree");
        fs::create_dir_all(tree.join("plugins")).unwrap();
        fs::write(tree.join("plugins/old"), "old").unwrap();

        let archive = tmp.path().join("broken.tar.gz");
        fs::write(&archive, [0x1f, 0x8b, 0x00, 0x01, 0x02]).unwrap();
        assert!(job(archive, tree.clone(), 1024).run().is_err());
        assert!(tree.join("plugins/old").exists());
    }

    #[test]
    fn test_zip_archive() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("plugins.zip");
        {
            let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
            let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
            writer.start_file("repo-main/plugins/ping_", options).unwrap();
            writer.write_all(b"#!/bin/sh\n").unwrap();
            writer.finish().unwrap();
        }
        let tree = tmp.path().join("cache/tree");
        job(path, tree.clone(), 1024).run().unwrap();
        assert!(tree.join("plugins/ping_").is_file());
    }

    #[tokio::test]
    async fn test_fetch_local_archive_and_reuse_revision() {
        let tmp = TempDir::new().unwrap();
        let archive = write_tar_gz(tmp.path(), |b| {
            append_file(b, "top/plugins/load", b"#!/bin/sh\n", 0o755);
        });
        let source = SourceConfig {
            name: "local".to_string(),
            kind: SourceKind::Archive,
            location: archive.display().to_string(),
            reference: None,
            path: "plugins".to_string(),
            shallow: false,
            strip_components: 1,
        };
        let fetcher = ArchiveFetcher::new(&FetchConfig::default()).unwrap();
        let tree = tmp.path().join("cache/tree");

        let ctx = FetchContext::from_config(&FetchConfig::default(), None);
        let first = fetcher.fetch(&ctx, &source, &tree).await.unwrap();
        assert!(tree.join("plugins/load").exists());

        // Same revision and an existing tree: nothing is re-extracted
        fs::write(tree.join("plugins/marker"), "kept").unwrap();
        let ctx = FetchContext::from_config(&FetchConfig::default(), first.revision.clone());
        let second = fetcher.fetch(&ctx, &source, &tree).await.unwrap();
        assert_eq!(first.revision, second.revision);
        assert!(tree.join("plugins/marker").exists());
        assert!(archive.exists());
    }

    #[tokio::test]
    async fn test_fetch_with_dot_prefixed_path() {
        let tmp = TempDir::new().unwrap();
        let archive = write_tar_gz(tmp.path(), |b| {
            append_file(b, "top/plugins/load", b"#!/bin/sh\n", 0o755);
        });
        let source = SourceConfig {
            name: "local".to_string(),
            kind: SourceKind::Archive,
            location: archive.display().to_string(),
            reference: None,
            path: "./plugins/".to_string(),
            shallow: false,
            strip_components: 1,
        };
        let fetcher = ArchiveFetcher::new(&FetchConfig::default()).unwrap();
        let tree = tmp.path().join("cache/tree");

        let ctx = FetchContext::from_config(&FetchConfig::default(), None);
        fetcher.fetch(&ctx, &source, &tree).await.unwrap();
        assert!(tree.join("plugins/load").is_file());
    }
}
