use plugin_gallery::config::load_config;
use plugin_gallery::pipeline::{run_build, BuildOptions, RunOutcome, RunSummary, SourceStatus};
use plugin_gallery::progress::NoProgress;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::TempDir;

const FOO_BAR: &str = r#"#!/bin/sh
# -*- sh -*-
# SPDX-License-Identifier: GPL-3.0-or-later

: << =cut

=head1 NAME

foo_bar_ - monitor the rising amount of foo in bar

=head1 CONFIGURATION

No configuration needed.

=head1 AUTHOR

Jane Doe

=head1 LICENSE

GPLv2

=head1 MAGIC MARKERS

 #%# family=auto
 #%# capabilities=autoconf suggest

=cut

echo "graph_category db"
"#;

const UNDOCUMENTED: &str = "#!/usr/bin/perl\nprint \"graph_title Nothing\\n\";\n";

fn write(root: &Path, relative: &str, body: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn write_tarball(path: &Path, files: &[(&str, &str)]) {
    let file = fs::File::create(path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o755);
        builder
            .append_data(&mut header, name, body.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Two directory sources and a local release tarball.
fn setup(extra_sources: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();

    write(root, "munin/plugins/node.d.linux/foo_bar_", FOO_BAR);
    write(root, "munin/plugins/node.d/nothing", UNDOCUMENTED);
    write(root, "contrib/plugins/node.d.linux/foo_bar_", FOO_BAR);
    write(root, "contrib/plugins/README.md", "# not a plugin\n");
    write_tarball(
        &root.join("munin-2.0.tar.gz"),
        &[
            ("munin-2.0/plugins/node.d/cpu.in", "#!@@GOODSH@@\necho 'graph_category system'\n"),
            ("munin-2.0/README", "readme\n"),
        ],
    );

    let config = format!(
        r#"
[workspace]
cache_dir = "cache"

[output]
dir = "content"

[fetch]
max_retries = 1
retry_base_delay_ms = 1
timeout_secs = 5

[labels.repositories]
munin = "Munin (master)"

[[sources]]
name = "munin"
type = "directory"
location = "munin"
path = "plugins"

[[sources]]
name = "contrib"
type = "directory"
location = "contrib"
path = "plugins"

[[sources]]
name = "munin-2.0"
type = "archive"
location = "munin-2.0.tar.gz"
path = "plugins"
{}
"#,
        extra_sources
    );
    let config_path = root.join("gallery.toml");
    fs::write(&config_path, config).unwrap();
    (tmp, config_path)
}

async fn build(config_path: &Path) -> RunSummary {
    let config = load_config(config_path).unwrap();
    run_build(
        &config,
        &BuildOptions::default(),
        Arc::new(NoProgress),
        Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap()
}

fn metadata(content: &Path) -> Vec<Value> {
    serde_json::from_str(&fs::read_to_string(content.join("metadata.json")).unwrap()).unwrap()
}

fn record<'a>(records: &'a [Value], identity: &str) -> &'a Value {
    records
        .iter()
        .find(|r| r["identity"] == identity)
        .unwrap_or_else(|| panic!("no record {}", identity))
}

fn missing(record: &Value) -> Vec<String> {
    record["missing_details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d.as_str().unwrap().to_string())
        .collect()
}

fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            (
                e.path().strip_prefix(dir).unwrap().to_path_buf(),
                fs::read(e.path()).unwrap(),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_build_exports_every_source() {
    let (tmp, config_path) = setup("");
    let summary = build(&config_path).await;
    assert_eq!(summary.outcome, RunOutcome::Success);
    assert_eq!(summary.plugins, 4);

    let content = tmp.path().join("content");
    let records = metadata(&content);
    let ids: Vec<&str> = records.iter().map(|r| r["identity"].as_str().unwrap()).collect();
    assert_eq!(
        ids,
        vec![
            "contrib/node.d.linux/foo_bar_",
            "munin/node.d.linux/foo_bar_",
            "munin/node.d/nothing",
            "munin-2.0/node.d/cpu.in",
        ]
    );
    assert!(content.join("plugins/munin-2.0/node.d/cpu.in/index.md").is_file());
    assert!(content.join("repositories/munin/_index.md").is_file());

    let cpu = record(&records, "munin-2.0/node.d/cpu.in");
    assert_eq!(cpu["name"], "cpu");
    assert_eq!(cpu["implementation_language"], "sh");
}

#[tokio::test]
async fn test_license_precedence_scenario() {
    let (tmp, config_path) = setup("");
    build(&config_path).await;

    let records = metadata(&tmp.path().join("content"));
    let foo = record(&records, "munin/node.d.linux/foo_bar_");
    assert_eq!(foo["name"], "foo_bar_");
    assert_eq!(foo["summary"], "monitor the rising amount of foo in bar");
    assert_eq!(foo["license"], "GPL-3.0-or-later");
    assert_eq!(foo["license_spdx"], "GPL-3.0-or-later");
    assert_eq!(foo["license_text"], "GPLv2");
    assert_eq!(foo["family"], "auto");
    assert_eq!(foo["categories"], serde_json::json!(["db"]));
    assert_eq!(foo["keywords"], serde_json::json!(["linux"]));
    let missing = missing(foo);
    assert!(!missing.contains(&"license".to_string()));
    assert!(!missing.contains(&"summary".to_string()));
}

#[tokio::test]
async fn test_undocumented_plugin_scenario() {
    let (tmp, config_path) = setup("");
    build(&config_path).await;

    let content = tmp.path().join("content");
    let records = metadata(&content);
    let nothing = record(&records, "munin/node.d/nothing");
    assert_eq!(nothing["name"], "nothing");
    assert!(nothing["documentation"].is_null());
    let missing = missing(nothing);
    for detail in ["documentation", "summary", "license", "author", "category"] {
        assert!(missing.contains(&detail.to_string()), "{}", detail);
    }

    let page = fs::read_to_string(content.join("plugins/munin/node.d/nothing/index.md")).unwrap();
    assert!(page.contains("Sadly there is no documentation for this plugin."));
}

#[tokio::test]
async fn test_same_path_in_two_sources() {
    let (tmp, config_path) = setup("");
    build(&config_path).await;

    let records = metadata(&tmp.path().join("content"));
    let a = record(&records, "munin/node.d.linux/foo_bar_");
    let b = record(&records, "contrib/node.d.linux/foo_bar_");
    assert_eq!(a["relative_path"], b["relative_path"]);
    assert_ne!(a["source_repository"], b["source_repository"]);
}

#[tokio::test]
async fn test_rebuild_is_byte_identical() {
    let (tmp, config_path) = setup("");
    build(&config_path).await;
    let first = snapshot(&tmp.path().join("content"));

    let config = load_config(&config_path).unwrap();
    let summary = run_build(
        &config,
        &BuildOptions {
            skip_fetch: true,
            output: None,
        },
        Arc::new(NoProgress),
        Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap();
    assert_eq!(summary.outcome, RunOutcome::Success);
    let second = snapshot(&tmp.path().join("content"));

    assert_eq!(first.keys().collect::<Vec<_>>(), second.keys().collect::<Vec<_>>());
    assert!(first == second, "content changed between identical runs");
}

#[tokio::test]
async fn test_failing_archive_leaves_other_sources() {
    let (tmp, config_path) = setup(
        r#"
[[sources]]
name = "unreachable"
type = "archive"
location = "http://127.0.0.1:1/plugins.tar.gz"
"#,
    );
    let summary = build(&config_path).await;
    assert_eq!(summary.outcome, RunOutcome::Partial);
    assert_eq!(summary.outcome.exit_code(), 2);

    let failed = summary
        .sources
        .iter()
        .find(|s| s.name == "unreachable")
        .unwrap();
    assert!(matches!(failed.status, SourceStatus::Failed(_)));

    let records = metadata(&tmp.path().join("content"));
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r["source_repository"] != "unreachable"));
}

#[tokio::test]
async fn test_taxonomy_listings_match_records() {
    let (tmp, config_path) = setup("");
    build(&config_path).await;

    let content = tmp.path().join("content");
    let records = metadata(&content);
    let fields = [
        ("categories", "categories"),
        ("keywords", "keywords"),
        ("authors", "authors"),
        ("licenses", "license"),
        ("implementation_languages", "implementation_language"),
        ("repositories", "source_repository"),
        ("missing_details", "missing_details"),
        ("capabilities", "capabilities"),
        ("families", "family"),
    ];

    for (listing_name, field) in fields {
        let listing: BTreeMap<String, Vec<String>> = serde_json::from_str(
            &fs::read_to_string(content.join(format!("taxonomies/{}.json", listing_name))).unwrap(),
        )
        .unwrap();

        let declares = |record: &Value, term: &str| match &record[field] {
            Value::Array(values) => values.iter().any(|v| v == term),
            Value::String(value) => value == term,
            _ => false,
        };

        for (term, ids) in &listing {
            let mut sorted = ids.clone();
            sorted.sort();
            assert_eq!(&sorted, ids, "{} '{}' is not sorted", listing_name, term);
            for id in ids {
                assert!(declares(record(&records, id), term), "{} {} {}", listing_name, term, id);
            }
        }
        for r in &records {
            let terms: Vec<String> = match &r[field] {
                Value::Array(values) => values.iter().map(|v| v.as_str().unwrap().to_string()).collect(),
                Value::String(value) => vec![value.clone()],
                _ => Vec::new(),
            };
            let id = r["identity"].as_str().unwrap().to_string();
            for term in terms {
                assert!(
                    listing.get(&term).is_some_and(|ids| ids.contains(&id)),
                    "{} {} {}",
                    listing_name,
                    term,
                    id
                );
            }
        }
    }
}
