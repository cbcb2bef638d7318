//! Documentation header parser.
//!
//! Extracts the first POD block and the free-standing metadata of a plugin
//! file. The POD block is tracked by an explicit state machine:
//!
//! ```text
//!            POD command                 =cut / end of comment
//! SeekingBlock ──────────► InSection(title) ───────────────────► Done
//!                            │      ▲
//!                            └──────┘ =head1 <title>
//! ```
//!
//! POD may be written plain (Perl) or inside line comments (`# =head1 NAME`
//! in shell or Python plugins). The comment prefix is detected on the line
//! that opens the block and stripped from every line of it.
//!
//! Independently of the block, every line is scanned for magic markers
//! (`#%# family=auto`), graph category declarations, the SPDX license line
//! and the shebang.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Commands that may open a POD block.
const OPENING_COMMANDS: &[&str] = &["head1", "head2", "head3", "head4", "pod", "begin", "over", "encoding", "for"];

static POD_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<prefix>\s*#+\s?)?=(?P<command>[a-z]+[0-9]?)\b").expect("valid regex")
});

static MAGIC_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.*#%#\s*(?P<key>[\w-]+)\s*=\s*(?P<value>.+)$").expect("valid regex"));

static CATEGORY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<line>.*[^$.]category[^\w\n]+(?P<category>\w+).*)$").expect("valid regex")
});

/// Lines mentioning "category" that are not graph category declarations.
static CATEGORY_BLACKLIST: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?:label|documentation|\bthe\b|filterwarnings)",
        r"(?:env\.category|/category/|category queries|category\.|force_category)",
        r"select.*from.*(?:join|where)",
        r"^\s*(?:#|//|/\*)",
        r"category.*[&\$]",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static SPDX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"SPDX-License-Identifier:\s*(?P<id>[A-Za-z0-9.+\-() ]+?)\s*(?:\*/|-->)?\s*$")
        .expect("valid regex")
});

/// One `=head1` section of the documentation block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Heading text; empty for content before the first `=head1`.
    pub title: String,
    /// Lines with the comment prefix removed, POD commands included.
    pub lines: Vec<String>,
}

impl Section {
    /// Section body with surrounding blank lines removed.
    pub fn text(&self) -> String {
        let start = self.lines.iter().position(|l| !l.trim().is_empty());
        let end = self.lines.iter().rposition(|l| !l.trim().is_empty());
        match (start, end) {
            (Some(s), Some(e)) => self.lines[s..=e].join("\n"),
            _ => String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.trim().is_empty())
    }
}

/// Everything the parser found in one file, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawHeader {
    /// Whether a POD block was found at all.
    pub has_block: bool,
    pub sections: Vec<Section>,
    /// Magic markers by lower-cased key; the first occurrence wins.
    pub markers: BTreeMap<String, String>,
    /// Graph categories declared in code, lower-cased, in order of appearance.
    pub categories: Vec<String>,
    pub spdx: Option<String>,
    pub shebang: Option<String>,
}

impl RawHeader {
    /// Find a section by title, ignoring case.
    pub fn section(&self, title: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.title.eq_ignore_ascii_case(title))
    }

    /// The first section whose title is one of `titles`.
    pub fn first_section(&self, titles: &[&str]) -> Option<&Section> {
        titles.iter().find_map(|t| self.section(t))
    }

    pub fn marker(&self, key: &str) -> Option<&str> {
        self.markers.get(key).map(String::as_str)
    }

    /// All documentation lines in order, headings included.
    pub fn documentation_lines(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().flat_map(|s| {
            let heading = (!s.title.is_empty()).then_some(s.title.as_str());
            heading
                .into_iter()
                .chain(s.lines.iter().map(String::as_str))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    SeekingBlock,
    InSection(String),
    Done,
}

/// Line-driven header parser.
struct Parser {
    state: State,
    prefix: Option<String>,
    header: RawHeader,
}

impl Parser {
    fn new() -> Self {
        Self {
            state: State::SeekingBlock,
            prefix: None,
            header: RawHeader::default(),
        }
    }

    fn feed(&mut self, index: usize, line: &str) {
        if index == 0 && line.starts_with("#!") {
            self.header.shebang = Some(line.to_string());
        }
        self.scan_metadata(line);
        self.step(line);
    }

    fn scan_metadata(&mut self, line: &str) {
        if let Some(caps) = MAGIC_MARKER.captures(line) {
            let key = caps["key"].to_lowercase();
            let value = caps["value"].trim().to_string();
            self.header.markers.entry(key).or_insert(value);
        }

        if let Some(caps) = CATEGORY.captures(line) {
            let whole = &caps["line"];
            if !CATEGORY_BLACKLIST.iter().any(|re| re.is_match(whole)) {
                self.header.categories.push(caps["category"].to_lowercase());
            }
        }

        if self.header.spdx.is_none() {
            if let Some(caps) = SPDX.captures(line) {
                let id = caps["id"].trim();
                if !id.is_empty() {
                    self.header.spdx = Some(id.to_string());
                }
            }
        }
    }

    fn step(&mut self, line: &str) {
        match self.state {
            State::Done => {}
            State::SeekingBlock => {
                let Some(caps) = POD_OPEN.captures(line) else {
                    return;
                };
                if !OPENING_COMMANDS.contains(&&caps["command"]) {
                    return;
                }
                self.prefix = caps.name("prefix").map(|m| m.as_str().to_string());
                self.header.has_block = true;
                self.state = State::InSection(String::new());
                self.block_line(line);
            }
            State::InSection(_) => self.block_line(line),
        }
    }

    fn block_line(&mut self, raw: &str) {
        let Some(line) = self.strip_prefix(raw) else {
            // End of the comment that carried the block
            self.state = State::Done;
            return;
        };

        if line.starts_with("=cut") {
            self.state = State::Done;
            return;
        }
        if let Some(title) = line.strip_prefix("=head1") {
            let title = title.trim().to_string();
            self.header.sections.push(Section {
                title: title.clone(),
                lines: Vec::new(),
            });
            self.state = State::InSection(title);
            return;
        }
        if line.starts_with("=pod") || line.starts_with("=encoding") {
            return;
        }

        if self.header.sections.is_empty() {
            // Content before the first =head1 opens an untitled section
            let State::InSection(title) = &self.state else {
                return;
            };
            if line.trim().is_empty() {
                return;
            }
            let title = title.clone();
            self.header.sections.push(Section {
                title,
                lines: Vec::new(),
            });
        }
        if let Some(section) = self.header.sections.last_mut() {
            section.lines.push(line.to_string());
        }
    }

    /// Remove the block's comment prefix; `None` once the comment ends.
    fn strip_prefix<'l>(&self, line: &'l str) -> Option<&'l str> {
        let Some(prefix) = &self.prefix else {
            return Some(line);
        };
        if let Some(rest) = line.strip_prefix(prefix.as_str()) {
            return Some(rest);
        }
        // "#" alone (or with trailing space) is an empty comment line
        if line.trim() == prefix.trim() {
            return Some("");
        }
        None
    }

    fn finish(self) -> RawHeader {
        self.header
    }
}

/// Parse the documentation header of a plugin file.
pub fn parse(content: &str) -> RawHeader {
    let mut parser = Parser::new();
    for (index, line) in content.lines().enumerate() {
        parser.feed(index, line.trim_end_matches('\r'));
    }
    parser.finish()
}

/// Parse raw file bytes, replacing invalid UTF-8.
pub fn parse_bytes(content: &[u8]) -> RawHeader {
    parse(&String::from_utf8_lossy(content))
}
