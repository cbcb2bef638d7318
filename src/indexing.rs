//! Search indexing content.
//!
//! Reduces rendered documentation to a flat word list for the site's search
//! index. Headings and magic marker lines are dropped, as are the words
//! "copyright", "munin" and "plugin" which appear in nearly every plugin.

use once_cell::sync::Lazy;
use regex::Regex;

static IGNORED_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^#|^\s+#%#)").expect("valid regex"));

static REMOVALS: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"(?i)\b(copyright|munin|plugin)\b").expect("valid regex"),
        Regex::new(r"[^\w\s.]").expect("valid regex"),
    ]
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

pub fn indexing_content(documentation: &str) -> Option<String> {
    let mut words = Vec::new();
    for line in documentation.lines() {
        if IGNORED_LINE.is_match(line) {
            continue;
        }
        let mut line = line.to_string();
        for re in REMOVALS.iter() {
            line = re.replace_all(&line, " ").into_owned();
        }
        let line = WHITESPACE.replace_all(&line, " ");
        let line = line.trim();
        if !line.is_empty() {
            words.push(line.to_string());
        }
    }
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduces_documentation() {
        let doc = "## Name\n\napache_accesses - Munin plugin to monitor Apache accesses.\n\n## Magic Markers\n\n  #%# family=auto\n\nCopyright (C) 2009 Foo <foo@example.org>";
        assert_eq!(
            indexing_content(doc).unwrap(),
            "apache_accesses to monitor Apache accesses. C 2009 Foo foo example.org"
        );
    }

    #[test]
    fn test_empty_result() {
        assert_eq!(indexing_content("## Name\n\n  #%# family=auto\n"), None);
    }
}
