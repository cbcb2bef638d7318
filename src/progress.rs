//! Build progress reporting.
//!
//! Reports observable progress during `gallery build` so users see which
//! sources are being fetched and scanned, and when the content is exported.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event of a build.
#[derive(Clone, Debug)]
pub enum BuildProgressEvent {
    /// Source is being fetched (clone, download or directory check).
    Fetching { source: String },
    /// Plugin files of a fetched source are being parsed. Total unknown.
    Scanning { source: String },
    /// Source finished with `plugins` records.
    Scanned { source: String, plugins: u64 },
    /// Source failed and contributes nothing to the collection.
    Failed { source: String, error: String },
    /// Collection is being written: `plugins` content units.
    Exporting { plugins: u64 },
}

/// Reports build progress. Implementations write to stderr (human or JSON).
pub trait BuildProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the build pipeline.
    fn report(&self, event: BuildProgressEvent);
}

/// Human-friendly progress on stderr: "source contrib  scanned  1,234 plugins".
pub struct StderrProgress;

impl BuildProgressReporter for StderrProgress {
    fn report(&self, event: BuildProgressEvent) {
        let line = match &event {
            BuildProgressEvent::Fetching { source } => {
                format!("source {}  fetching...\n", source)
            }
            BuildProgressEvent::Scanning { source } => {
                format!("source {}  scanning...\n", source)
            }
            BuildProgressEvent::Scanned { source, plugins } => {
                format!("source {}  scanned  {} plugins\n", source, format_number(*plugins))
            }
            BuildProgressEvent::Failed { source, error } => {
                format!("source {}  FAILED  {}\n", source, error)
            }
            BuildProgressEvent::Exporting { plugins } => {
                format!("export  writing  {} plugins\n", format_number(*plugins))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl BuildProgressReporter for JsonProgress {
    fn report(&self, event: BuildProgressEvent) {
        let obj = match &event {
            BuildProgressEvent::Fetching { source } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "fetching"
            }),
            BuildProgressEvent::Scanning { source } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "scanning"
            }),
            BuildProgressEvent::Scanned { source, plugins } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "scanned",
                "plugins": plugins
            }),
            BuildProgressEvent::Failed { source, error } => serde_json::json!({
                "event": "error",
                "source": source,
                "error": error
            }),
            BuildProgressEvent::Exporting { plugins } => serde_json::json!({
                "event": "progress",
                "phase": "exporting",
                "plugins": plugins
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BuildProgressReporter for NoProgress {
    fn report(&self, _event: BuildProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode. Caller passes it to the pipeline.
    pub fn reporter(&self) -> Box<dyn BuildProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
