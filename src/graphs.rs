//! Example graph lookup.
//!
//! Plugins may ship sample graphs either in an `example-graphs/` directory
//! next to the plugin file or directly beside it, named
//! `<plugin>-<key>.png` where the key is `day`, `week`, `month`, `year` or a
//! number.

use regex::Regex;
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::models::ExampleGraph;

pub const EXAMPLE_GRAPH_DIR: &str = "example-graphs";

const PERIODS: [&str; 4] = ["day", "week", "month", "year"];

/// Find the example graphs of the plugin at `plugin_file`, sorted by key.
pub fn find_example_graphs(plugin_file: &Path, name: &str) -> Vec<ExampleGraph> {
    let Some(dir) = plugin_file.parent() else {
        return Vec::new();
    };
    let pattern = match Regex::new(&format!(
        r"^{}-(day|week|month|year|\d+)\.png$",
        regex::escape(name)
    )) {
        Ok(re) => re,
        Err(e) => {
            debug!("No graph pattern for '{}': {}", name, e);
            return Vec::new();
        }
    };

    let mut graphs: Vec<ExampleGraph> = Vec::new();
    for location in [dir.join(EXAMPLE_GRAPH_DIR), dir.to_path_buf()] {
        let Ok(entries) = fs::read_dir(&location) else {
            continue;
        };
        let mut found: Vec<_> = entries.filter_map(Result::ok).collect();
        found.sort_by_key(|e| e.file_name());
        for entry in found {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(caps) = pattern.captures(&file_name) else {
                continue;
            };
            let key = caps[1].to_string();
            if graphs.iter().any(|g| g.key == key) || !entry.path().is_file() {
                continue;
            }
            graphs.push(ExampleGraph {
                file_name: format!("{}.png", key),
                key,
                path: entry.path(),
            });
        }
    }

    graphs.sort_by(|a, b| compare_keys(&a.key, &b.key));
    graphs
}

/// Periods in calendar order, then numbers ascending, then anything else.
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    fn rank(key: &str) -> (u8, u64, &str) {
        if let Some(i) = PERIODS.iter().position(|p| *p == key) {
            (0, i as u64, "")
        } else if let Ok(n) = key.parse::<u64>() {
            (1, n, "")
        } else {
            (2, 0, key)
        }
    }
    rank(a).cmp(&rank(b))
}
