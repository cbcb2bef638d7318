//! Gallery statistics overview.
//!
//! Summarizes an exported content tree: plugin counts, documentation
//! coverage, missing details and per-repository breakdowns. Used by
//! `gallery stats` to check an export without opening the site.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::aggregate::Statistics;

/// Run the stats command: read the export and print a summary.
pub fn run_stats(output_dir: &Path) -> Result<()> {
    let stats_path = output_dir.join("statistics.json");
    let metadata_path = output_dir.join("metadata.json");

    let stats: Statistics = serde_json::from_str(
        &fs::read_to_string(&stats_path)
            .with_context(|| format!("No export found at {} (run `gallery build` first)", output_dir.display()))?,
    )
    .with_context(|| format!("Failed to parse {}", stats_path.display()))?;

    let metadata = fs::metadata(&metadata_path).ok();
    let size = metadata.as_ref().map(|m| m.len()).unwrap_or(0);
    let exported_at = metadata
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| format_ts_relative(d.as_secs() as i64))
        .unwrap_or_else(|| "unknown".to_string());

    println!("Plugin Gallery — Export Stats");
    println!("=============================");
    println!();
    println!("  Output:      {}", output_dir.display());
    println!("  Metadata:    {}", format_bytes(size));
    println!("  Exported:    {}", exported_at);
    println!();
    println!("  Plugins:     {}", stats.all);
    println!(
        "  Documented:  {} / {} ({}%)",
        stats.documented,
        stats.all,
        percent(stats.documented, stats.all)
    );
    println!("  Unexpected categories: {}", stats.unexpected_categories);

    if !stats.repositories.is_empty() {
        println!();
        println!("  By repository:");
        println!("  {:<24} {:>8}", "REPOSITORY", "PLUGINS");
        println!("  {}", "-".repeat(34));
        for (repository, count) in &stats.repositories {
            println!("  {:<24} {:>8}", repository, count);
        }
    }

    println!();
    println!("  Missing details:");
    println!("  {:<24} {:>8} {:>6}", "DETAIL", "PLUGINS", "%");
    println!("  {}", "-".repeat(40));
    for (detail, count) in &stats.missing {
        println!(
            "  {:<24} {:>8} {:>5}%",
            detail,
            count,
            percent(*count, stats.all)
        );
    }

    let categories_path = output_dir.join("taxonomies").join("categories.json");
    if let Ok(content) = fs::read_to_string(&categories_path) {
        let categories: BTreeMap<String, Vec<String>> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", categories_path.display()))?;
        let top = top_terms(&categories, 10);
        if !top.is_empty() {
            println!();
            println!("  Top categories:");
            for (category, count) in top {
                println!("  {:<24} {:>8}", category, count);
            }
        }
    }

    println!();
    Ok(())
}

/// Terms with the most plugins, ties broken by name.
fn top_terms(listing: &BTreeMap<String, Vec<String>>, limit: usize) -> Vec<(&str, usize)> {
    let mut terms: Vec<(&str, usize)> = listing
        .iter()
        .map(|(term, ids)| (term.as_str(), ids.len()))
        .collect();
    terms.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    terms.truncate(limit);
    terms
}

fn percent(part: usize, total: usize) -> usize {
    if total > 0 {
        part * 100 / total
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
