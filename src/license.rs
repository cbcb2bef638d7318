//! License detection.
//!
//! An `SPDX-License-Identifier:` line always wins. Otherwise the free text of
//! the documentation's license section is mapped to an SPDX expression on a
//! best-effort basis; text that cannot be mapped is kept for display.

use once_cell::sync::Lazy;
use regex::Regex;

/// Identifiers accepted verbatim (compared case-insensitively).
const KNOWN_IDS: &[&str] = &[
    "GPL-1.0-only",
    "GPL-1.0-or-later",
    "GPL-2.0-only",
    "GPL-2.0-or-later",
    "GPL-3.0-only",
    "GPL-3.0-or-later",
    "LGPL-2.0-only",
    "LGPL-2.0-or-later",
    "LGPL-2.1-only",
    "LGPL-2.1-or-later",
    "LGPL-3.0-only",
    "LGPL-3.0-or-later",
    "AGPL-3.0-only",
    "AGPL-3.0-or-later",
    "MIT",
    "ISC",
    "BSD-2-Clause",
    "BSD-3-Clause",
    "Apache-2.0",
    "MPL-2.0",
    "Artistic-1.0-Perl",
    "Artistic-2.0",
    "Unlicense",
    "CC0-1.0",
];

const PERL_TERMS: &str = "Artistic-1.0-Perl OR GPL-1.0-or-later";

static GNU_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\bversion\s*|\bv\.?\s*|gpl\s*-?\s*v?\s*)(?P<major>[123])(?:\.(?P<minor>\d))?(?P<plus>\+)?(?:\D|$)")
        .expect("valid regex")
});

static OR_LATER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:or\s+(?:\(at your option\)\s+)?(?:any\s+)?(?:later|newer|higher)|\blater\s+version|\+)")
        .expect("valid regex")
});

static MIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bmit\b").expect("valid regex"));

/// License fields of a plugin record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LicenseInfo {
    /// SPDX expression when known, otherwise the first line of the free text.
    pub display: Option<String>,
    pub text: Option<String>,
    pub spdx: Option<String>,
}

/// Combine the SPDX line and the free-text license section.
pub fn resolve(spdx_line: Option<&str>, free_text: Option<&str>) -> LicenseInfo {
    let text = free_text
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    if let Some(id) = spdx_line.map(str::trim).filter(|id| !id.is_empty()) {
        return LicenseInfo {
            display: Some(id.to_string()),
            text,
            spdx: Some(id.to_string()),
        };
    }

    let Some(text) = text else {
        return LicenseInfo::default();
    };
    match map_free_text(&text) {
        Some(spdx) => LicenseInfo {
            display: Some(spdx.clone()),
            text: Some(text),
            spdx: Some(spdx),
        },
        None => LicenseInfo {
            display: text.lines().map(str::trim).find(|l| !l.is_empty()).map(str::to_string),
            text: Some(text),
            spdx: None,
        },
    }
}

/// Best-effort mapping of a license description to an SPDX expression.
pub fn map_free_text(text: &str) -> Option<String> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let lower = normalized.to_lowercase();

    let first_token = normalized.split_whitespace().next().unwrap_or("");
    let first_token = first_token.trim_end_matches(['.', ',', ';']);
    if let Some(id) = KNOWN_IDS
        .iter()
        .find(|id| id.eq_ignore_ascii_case(first_token))
    {
        return Some((*id).to_string());
    }

    if lower.contains("same terms as perl") {
        return Some(PERL_TERMS.to_string());
    }

    if let Some(id) = map_gnu(&normalized, &lower) {
        return Some(id);
    }

    if lower.contains("apache") && (lower.contains("2.0") || lower.contains("version 2")) {
        return Some("Apache-2.0".to_string());
    }
    if lower.contains("bsd") {
        if ["2-clause", "two-clause", "simplified", "freebsd"]
            .iter()
            .any(|k| lower.contains(k))
        {
            return Some("BSD-2-Clause".to_string());
        }
        if ["3-clause", "three-clause", "new bsd", "revised", "modified"]
            .iter()
            .any(|k| lower.contains(k))
        {
            return Some("BSD-3-Clause".to_string());
        }
        return None;
    }
    if MIT.is_match(&lower) {
        return Some("MIT".to_string());
    }
    None
}

fn map_gnu(normalized: &str, lower: &str) -> Option<String> {
    let family = if lower.contains("affero") || lower.contains("agpl") {
        "AGPL"
    } else if lower.contains("lesser")
        || lower.contains("library general public")
        || lower.contains("lgpl")
    {
        "LGPL"
    } else if lower.contains("gpl") || lower.contains("general public license") {
        "GPL"
    } else {
        return None;
    };

    let caps = GNU_VERSION.captures(normalized)?;
    let major = &caps["major"];
    let minor = caps.name("minor").map(|m| m.as_str()).unwrap_or("0");
    let version = match (family, major, minor) {
        ("LGPL", "2", "1") => "2.1".to_string(),
        ("AGPL", _, _) => "3.0".to_string(),
        (_, major, _) => format!("{}.0", major),
    };

    let after = &normalized[caps.get(0).map(|m| m.start()).unwrap_or(0)..];
    let later = caps.name("plus").is_some() || OR_LATER.is_match(after);
    let suffix = if later { "or-later" } else { "only" };
    Some(format!("{}-{}-{}", family, version, suffix))
}
