use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn gallery_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("gallery");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let plugins = root.join("repo/plugins/node.d.linux");
    fs::create_dir_all(&plugins).unwrap();
    fs::write(
        plugins.join("load"),
        "#!/bin/sh\n\n: <<=cut\n\n=head1 NAME\n\nload - Plugin to monitor the load average\n\n=head1 AUTHOR\n\nJane Doe\n\n=head1 LICENSE\n\nGPLv2\n\n=head1 MAGIC MARKERS\n\n #%# family=auto\n #%# capabilities=autoconf\n\n=cut\n\necho 'graph_category system'\n",
    )
    .unwrap();
    fs::write(plugins.join("uptime"), "#!/usr/bin/env python3\nprint('uptime.value 1')\n").unwrap();
    fs::write(plugins.join("notes.txt"), "not a plugin\n").unwrap();

    let config_content = r#"[workspace]
cache_dir = "cache"

[output]
dir = "content"

[[sources]]
name = "local"
type = "directory"
location = "repo"
path = "plugins"
"#;

    let config_path = root.join("gallery.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_gallery(config_path: &Path, args: &[&str]) -> (String, String, Option<i32>) {
    let binary = gallery_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run gallery binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code())
}

#[test]
fn test_build_exports_content() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, code) = run_gallery(&config_path, &["build", "--progress", "off"]);
    assert_eq!(code, Some(0), "build failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("plugins: 2"));
    assert!(stdout.contains("ok"));

    let content = tmp.path().join("content");
    assert!(content.join("plugins/local/node.d.linux/load/index.md").is_file());
    assert!(content.join("plugins/local/node.d.linux/uptime/source").is_file());
    assert!(!content.join("plugins/local/node.d.linux/notes.txt").exists());
    assert!(content.join("taxonomies/categories.json").is_file());
}

#[test]
fn test_build_with_output_override() {
    let (tmp, config_path) = setup_test_env();
    let out = tmp.path().join("elsewhere");

    let (_, stderr, code) = run_gallery(
        &config_path,
        &["build", "--progress", "off", "--output", out.to_str().unwrap()],
    );
    assert_eq!(code, Some(0), "stderr={}", stderr);
    assert!(out.join("metadata.json").is_file());
    assert!(!tmp.path().join("content").exists());
}

#[test]
fn test_build_missing_source_exits_partial() {
    let (tmp, config_path) = setup_test_env();
    let mut config = fs::read_to_string(&config_path).unwrap();
    config.push_str("\n[[sources]]\nname = \"gone\"\ntype = \"directory\"\nlocation = \"does-not-exist\"\n");
    fs::write(&config_path, config).unwrap();

    let (stdout, _, code) = run_gallery(&config_path, &["build", "--progress", "off"]);
    assert_eq!(code, Some(2));
    assert!(stdout.contains("FAILED"));
    assert!(tmp.path().join("content/metadata.json").is_file());
}

#[test]
fn test_skip_fetch_without_cache_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::write(
        &config_path,
        "[[sources]]\nname = \"remote\"\ntype = \"archive\"\nlocation = \"https://example.invalid/p.tar.gz\"\n",
    )
    .unwrap();

    let (stdout, _, code) = run_gallery(&config_path, &["build", "--skip-fetch", "--progress", "off"]);
    assert_eq!(code, Some(1), "every source failed: {}", stdout);
    assert!(stdout.contains("no cached workspace"));
    assert!(!tmp.path().join("build/hugo/content").exists());
}

#[test]
fn test_invalid_config_exits_1() {
    let (_tmp, config_path) = setup_test_env();
    fs::write(&config_path, "[[sources]]\nname = \"bad name\"\ntype = \"directory\"\nlocation = \".\"\n").unwrap();

    let (_, stderr, code) = run_gallery(&config_path, &["build"]);
    assert_eq!(code, Some(1));
    assert!(stderr.contains("Invalid source name"));
}

#[test]
fn test_sources_lists_cache_state() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, code) = run_gallery(&config_path, &["sources"]);
    assert_eq!(code, Some(0), "stderr={}", stderr);
    assert!(stdout.contains("SOURCE"));
    assert!(stdout.contains("local"));
    assert!(stdout.contains("IN PLACE"));
}

#[test]
fn test_inspect_prints_records() {
    let (tmp, config_path) = setup_test_env();
    let plugin = tmp.path().join("repo/plugins/node.d.linux/load");

    let (stdout, stderr, code) = run_gallery(&config_path, &["inspect", plugin.to_str().unwrap()]);
    assert_eq!(code, Some(0), "stderr={}", stderr);
    let records: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(records[0]["name"], "load");
    assert_eq!(records[0]["summary"], "monitor the load average");
    assert_eq!(records[0]["license"], "GPL-2.0-only");
}

#[test]
fn test_stats_after_build() {
    let (_tmp, config_path) = setup_test_env();

    run_gallery(&config_path, &["build", "--progress", "off"]);
    let (stdout, stderr, code) = run_gallery(&config_path, &["stats"]);
    assert_eq!(code, Some(0), "stderr={}", stderr);
    assert!(stdout.contains("Plugins:     2"));
    assert!(stdout.contains("Documented:  1 / 2 (50%)"));
    assert!(stdout.contains("system"));
}

#[test]
fn test_completions() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, code) = run_gallery(&config_path, &["completions", "bash"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("gallery"));
}
