//! Metadata normalization.
//!
//! Turns a [`RawHeader`] plus file metadata into a [`PluginRecord`]. Nothing
//! here fails: every field that cannot be determined is left empty and
//! recorded in `missing_details`.
//!
//! # Term normalization
//!
//! Categories and keywords are trimmed, compared case-insensitively (the
//! first spelling seen is kept) and collapsed through a synonym table. The
//! built-in table is applied first; `normalize.category_synonyms` entries
//! replace built-in ones with the same key.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::config::NormalizeConfig;
use crate::header::RawHeader;
use crate::indexing::indexing_content;
use crate::license;
use crate::models::{CandidateFile, ExampleGraph, MissingDetail, PluginIdentity, PluginRecord};
use crate::pod;

/// Categories listed in the Munin graph category reference.
pub const WELL_KNOWN_CATEGORIES: &[&str] = &[
    "1sec",
    "antivirus",
    "appserver",
    "auth",
    "backup",
    "chat",
    "cloud",
    "cms",
    "cpu",
    "db",
    "devel",
    "disk",
    "dns",
    "filetransfer",
    "forum",
    "fs",
    "fw",
    "games",
    "htc",
    "loadbalancer",
    "mail",
    "mailinglist",
    "memory",
    "munin",
    "network",
    "other",
    "printing",
    "processes",
    "radio",
    "san",
    "search",
    "security",
    "sensors",
    "spamfilter",
    "streaming",
    "system",
    "time",
    "tv",
    "virtualization",
    "voip",
    "webserver",
    "wiki",
    "wireless",
];

const BUILTIN_SYNONYMS: &[(&str, &str)] = &[
    ("database", "db"),
    ("databases", "db"),
    ("disks", "disk"),
    ("e-mail", "mail"),
    ("email", "mail"),
    ("filesystem", "fs"),
    ("filesystems", "fs"),
    ("firewall", "fw"),
    ("net", "network"),
    ("networking", "network"),
    ("process", "processes"),
    ("sensor", "sensors"),
    ("virtualisation", "virtualization"),
    ("web", "webserver"),
    ("webservers", "webserver"),
];

const NAME_SECTIONS: &[&str] = &["NAME"];
const DESCRIPTION_SECTIONS: &[&str] = &["DESCRIPTION", "SYNOPSIS"];
const CONFIGURATION_SECTIONS: &[&str] = &["CONFIGURATION", "CONFIG", "CONFIGURATION NOTES"];
const AUTHOR_SECTIONS: &[&str] = &["AUTHOR", "AUTHORS", "AUTHOR(S)", "AUTHORS AND CONTRIBUTORS"];
const LICENSE_SECTIONS: &[&str] = &[
    "LICENSE",
    "LICENCE",
    "COPYRIGHT AND LICENSE",
    "COPYRIGHT & LICENSE",
    "LICENSE AND COPYRIGHT",
    "COPYRIGHT",
];

/// Lines searched for `<name> - <summary>`.
const SUMMARY_LINES: usize = 8;

static SUMMARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?P<name>[\w.\-]+)\s+-\s+(Munin )?((Plugin|Script) )?(to )?(?P<summary>.*?)\.?\s*$")
        .expect("valid regex")
});

/// Interpreters recognized on the shebang line, in match order.
static LANGUAGES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("bash", r"\Wbash(\W|$)"),
        ("ksh", r"\Wksh(\W|$)"),
        ("perl", r"\Wperl(\W|$)"),
        ("php", r"\Wphp"),
        ("python2", r"\Wpython2?(\W|$)"),
        ("python3", r"\Wpython3"),
        ("ruby", r"\Wruby"),
        ("sh", r"\W(?:good)?sh(\W|$)"),
        ("zsh", r"\Wzsh(\W|$)"),
        ("lua", r"\Wlua"),
        ("tcl", r"\W(?:tclsh|wish)"),
        ("javascript", r"\W(?:node|nodejs)(\W|$)"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid regex")))
    .collect()
});

const EXTENSIONS: &[(&str, &str)] = &[
    ("bash", "bash"),
    ("c", "c"),
    ("cpp", "cpp"),
    ("js", "javascript"),
    ("lua", "lua"),
    ("php", "php"),
    ("pl", "perl"),
    ("pm", "perl"),
    ("py", "python3"),
    ("rb", "ruby"),
    ("sh", "sh"),
    ("tcl", "tcl"),
];

/// Per-file facts gathered outside the header.
#[derive(Debug, Clone, Default)]
pub struct FileFacts {
    pub example_graphs: Vec<ExampleGraph>,
    pub changed_timestamp: Option<DateTime<Utc>>,
}

pub struct Normalizer {
    synonyms: BTreeMap<String, String>,
}

impl Normalizer {
    pub fn new(config: &NormalizeConfig) -> Self {
        let mut synonyms: BTreeMap<String, String> = BTreeMap::new();
        for (from, to) in BUILTIN_SYNONYMS {
            synonyms.insert(from.to_string(), to.to_string());
        }
        for (from, to) in &config.category_synonyms {
            synonyms.insert(from.trim().to_lowercase(), to.trim().to_string());
        }
        Self { synonyms }
    }

    /// Build the record for one candidate file.
    pub fn normalize(
        &self,
        repository: &str,
        candidate: &CandidateFile,
        header: &RawHeader,
        facts: FileFacts,
    ) -> PluginRecord {
        let mut missing = BTreeSet::new();

        let documentation = pod::render_documentation(header);
        if documentation.is_none() {
            missing.insert(MissingDetail::Documentation);
        }

        let name_text = header
            .first_section(NAME_SECTIONS)
            .map(pod::plain_text)
            .filter(|t| !t.trim().is_empty());
        if name_text.is_none() {
            missing.insert(MissingDetail::Name);
        }
        let (parsed_name, summary) = name_and_summary(name_text.as_deref(), header);
        let name = parsed_name.unwrap_or_else(|| candidate.name.clone());
        if summary.is_none() {
            missing.insert(MissingDetail::Summary);
        }

        let description = section_text(header, DESCRIPTION_SECTIONS);
        if description.is_none() {
            missing.insert(MissingDetail::Description);
        }
        let configuration = section_text(header, CONFIGURATION_SECTIONS);
        if configuration.is_none() {
            missing.insert(MissingDetail::Configuration);
        }

        let authors = section_text(header, AUTHOR_SECTIONS)
            .map(|text| parse_authors(&text))
            .unwrap_or_default();
        if authors.is_empty() {
            missing.insert(MissingDetail::Author);
        }

        let license_text = section_text(header, LICENSE_SECTIONS);
        let license = license::resolve(header.spdx.as_deref(), license_text.as_deref());
        if license.display.is_none() {
            missing.insert(MissingDetail::License);
        }
        if license.spdx.is_none() {
            missing.insert(MissingDetail::LicenseSpdx);
        }

        let family = header
            .marker("family")
            .map(|f| f.trim().to_lowercase())
            .filter(|f| !f.is_empty());
        if family.is_none() {
            missing.insert(MissingDetail::Family);
        }

        let capabilities = self.terms(
            header
                .marker("capabilities")
                .unwrap_or("")
                .split_whitespace()
                .map(str::to_lowercase),
            false,
        );
        if capabilities.is_empty() {
            missing.insert(MissingDetail::Capabilities);
        }

        let categories = self.terms(header.categories.iter().cloned(), true);
        if categories.is_empty() {
            missing.insert(MissingDetail::Category);
        }
        let unexpected_categories: BTreeSet<String> = categories
            .iter()
            .filter(|c| !WELL_KNOWN_CATEGORIES.contains(&c.to_lowercase().as_str()))
            .cloned()
            .collect();

        let keywords = self.terms(path_keywords(&candidate.relative_path), true);

        let implementation_language = detect_language(candidate, header);
        if implementation_language.is_none() {
            missing.insert(MissingDetail::ImplementationLanguage);
        }

        let indexing = documentation.as_deref().and_then(indexing_content);

        PluginRecord {
            identity: PluginIdentity::new(repository, candidate.relative_path.clone()),
            name,
            summary,
            description,
            documentation,
            configuration,
            implementation_language,
            license: license.display,
            license_text: license.text,
            license_spdx: license.spdx,
            authors,
            family,
            categories,
            unexpected_categories,
            capabilities,
            keywords,
            has_example_graphs: !facts.example_graphs.is_empty(),
            example_graphs: facts.example_graphs,
            source_repository: repository.to_string(),
            relative_path: candidate.relative_path.clone(),
            changed_timestamp: facts.changed_timestamp,
            indexing_content: indexing,
            missing_details: missing,
            source_file: candidate.path.clone(),
        }
    }

    /// Normalize a list of terms, optionally collapsing synonyms.
    ///
    /// Terms are compared case-insensitively; the first spelling wins.
    pub fn terms(&self, raw: impl IntoIterator<Item = String>, synonyms: bool) -> BTreeSet<String> {
        let mut by_key: BTreeMap<String, String> = BTreeMap::new();
        for term in raw {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            let mut display = term.to_string();
            if synonyms {
                if let Some(canonical) = self.synonyms.get(&term.to_lowercase()) {
                    display = canonical.clone();
                }
            }
            if display.is_empty() {
                continue;
            }
            by_key.entry(display.to_lowercase()).or_insert(display);
        }
        by_key.into_values().collect()
    }
}

fn section_text(header: &RawHeader, titles: &[&str]) -> Option<String> {
    header
        .first_section(titles)
        .map(pod::plain_text)
        .filter(|t| !t.trim().is_empty())
}

/// Find `<name> - <summary>` in the NAME section, else in the first
/// documentation lines.
fn name_and_summary(name_text: Option<&str>, header: &RawHeader) -> (Option<String>, Option<String>) {
    let from_lines = |lines: &mut dyn Iterator<Item = &str>| {
        lines
            .take(SUMMARY_LINES)
            .find_map(|line| SUMMARY.captures(line))
            .map(|caps| {
                let summary = caps["summary"].trim().to_string();
                (
                    caps["name"].to_string(),
                    (!summary.is_empty()).then_some(summary),
                )
            })
    };

    if let Some(text) = name_text {
        if let Some((name, summary)) = from_lines(&mut text.lines().filter(|l| !l.trim().is_empty())) {
            return (Some(name), summary);
        }
    }
    match from_lines(&mut header.documentation_lines().filter(|l| !l.trim().is_empty())) {
        Some((_, summary)) => (None, summary),
        None => (None, None),
    }
}

/// One author per non-empty line, duplicates and placeholders dropped.
fn parse_authors(text: &str) -> Vec<String> {
    let mut authors: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.trim().trim_end_matches(['.', ',']).trim();
        if line.is_empty() || matches!(line.to_lowercase().as_str(), "unknown" | "unknown author" | "none") {
            continue;
        }
        if !authors.iter().any(|a| a == line) {
            authors.push(line.to_string());
        }
    }
    authors
}

/// Directory tokens of the plugin path, without the `node.d` grouping.
pub fn path_keywords(relative_path: &str) -> Vec<String> {
    let dir = relative_path.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    dir.to_lowercase()
        .split('/')
        .map(|token| {
            if token == "node.d" {
                ""
            } else {
                token.strip_prefix("node.d.").unwrap_or(token)
            }
            .to_string()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// Explicit marker, then shebang interpreter, then file extension.
pub fn detect_language(candidate: &CandidateFile, header: &RawHeader) -> Option<String> {
    if let Some(lang) = header
        .marker("language")
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
    {
        return Some(lang);
    }

    if let Some(shebang) = &header.shebang {
        let line = shebang.to_lowercase();
        if let Some((name, _)) = LANGUAGES.iter().find(|(_, re)| re.is_match(&line)) {
            return Some(name.to_string());
        }
    }

    if let Some(hint) = &candidate.language_hint {
        return Some(hint.clone());
    }
    let extension = Path::new(&candidate.name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())?;
    EXTENSIONS
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, lang)| lang.to_string())
}
