//! POD to markdown rendering.
//!
//! Only the subset of POD found in plugin headers is supported: `=head1`
//! sections (already split by the header parser), `=head2`..`=head4`, lists
//! (`=over`/`=item`/`=back`), verbatim paragraphs, `=begin`/`=end` and
//! `=for` regions (dropped) and the inline formatting codes `B I C F L E S X
//! Z`, including the `C<< ... >>` form.

use crate::header::{RawHeader, Section};

const UPPER_WORDS: &[&str] = &["IP", "TCP", "UDP"];
const LOWER_WORDS: &[&str] = &["a", "the", "in", "for", "to", "and"];

/// Render the whole documentation block, `None` when there is nothing to show.
pub fn render_documentation(header: &RawHeader) -> Option<String> {
    if !header.has_block {
        return None;
    }
    let parts: Vec<String> = header
        .sections
        .iter()
        .map(render_section)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Render one `=head1` section with its heading demoted to level 2.
pub fn render_section(section: &Section) -> String {
    let body = render_body(&section.lines);
    if section.title.is_empty() {
        return body;
    }
    let heading = format!("## {}", capitalize_heading(&render_inline(&section.title, Style::Plain)));
    if body.is_empty() {
        heading
    } else {
        format!("{}\n\n{}", heading, body)
    }
}

/// Section text without POD markup, for field extraction.
pub fn plain_text(section: &Section) -> String {
    let mut lines = Vec::new();
    let mut skipping: Option<String> = None;
    let mut in_for = false;

    for line in &section.lines {
        if let Some(region) = &skipping {
            if let Some(rest) = line.strip_prefix("=end") {
                if rest.trim() == region.as_str() || rest.trim().is_empty() {
                    skipping = None;
                }
            }
            continue;
        }
        if in_for {
            if line.trim().is_empty() {
                in_for = false;
            }
            continue;
        }
        match command(line) {
            Some(("begin", arg)) => skipping = Some(arg.split_whitespace().next().unwrap_or("").to_string()),
            Some(("for", _)) => in_for = true,
            Some(("item", arg)) => {
                let arg = arg.trim();
                if !arg.is_empty() && arg != "*" && arg != "-" {
                    lines.push(render_inline(arg, Style::Plain));
                }
            }
            Some((name, arg)) if name.starts_with("head") => {
                lines.push(render_inline(arg.trim(), Style::Plain));
            }
            Some(_) => {}
            None => {
                let text = render_inline(line, Style::Plain);
                let repeated_blank = text.trim().is_empty()
                    && lines.last().is_some_and(|l: &String| l.trim().is_empty());
                if !repeated_blank {
                    lines.push(text);
                }
            }
        }
    }

    trim_blank(&lines).join("\n")
}

fn trim_blank(lines: &[String]) -> &[String] {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => &lines[s..=e],
        _ => &[],
    }
}

/// Split a POD command line into name and argument.
fn command(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('=')?;
    let end = rest
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(rest.len());
    if end == 0 || !rest.as_bytes()[0].is_ascii_alphabetic() {
        return None;
    }
    Some((&rest[..end], &rest[end..]))
}

// ═══════════════════════════════════════════════════════════════════════
// Block rendering
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct BlockRenderer {
    blocks: Vec<String>,
    paragraph: Vec<String>,
    list_depth: usize,
    item_prefix: Option<String>,
    in_item: bool,
    skipping: Option<String>,
    in_for: bool,
}

impl BlockRenderer {
    fn line(&mut self, line: &str) {
        if let Some(region) = &self.skipping {
            if let Some(rest) = line.strip_prefix("=end") {
                if rest.trim() == region.as_str() || rest.trim().is_empty() {
                    self.skipping = None;
                }
            }
            return;
        }
        if self.in_for {
            if line.trim().is_empty() {
                self.in_for = false;
            }
            return;
        }

        if let Some((name, arg)) = command(line) {
            self.flush();
            self.command(name, arg.trim());
            return;
        }
        if line.trim().is_empty() {
            self.flush();
        } else {
            self.paragraph.push(line.to_string());
        }
    }

    fn command(&mut self, name: &str, arg: &str) {
        match name {
            "head2" | "head3" | "head4" => {
                let level = name[4..].parse::<usize>().unwrap_or(2) + 1;
                let title = capitalize_heading(&render_inline(arg, Style::Plain));
                self.blocks.push(format!("{} {}", "#".repeat(level), title));
                self.in_item = false;
            }
            "over" => self.list_depth += 1,
            "back" => {
                self.list_depth = self.list_depth.saturating_sub(1);
                self.in_item = false;
                self.item_prefix = None;
            }
            "item" => {
                let marker = arg.split_whitespace().next().unwrap_or("");
                let numbered = marker.trim_end_matches('.').parse::<u32>().ok();
                let prefix = match numbered {
                    Some(n) => format!("{}. ", n),
                    None => "- ".to_string(),
                };
                let text = if numbered.is_some() || marker == "*" || marker == "-" {
                    arg[marker.len()..].trim()
                } else {
                    arg
                };
                if text.is_empty() {
                    // The item text follows as the next paragraph
                    self.item_prefix = Some(prefix);
                } else {
                    self.blocks
                        .push(format!("{}{}", prefix, render_inline(text, Style::Markdown)));
                    self.item_prefix = None;
                }
                self.in_item = true;
            }
            "begin" => {
                let region = arg.split_whitespace().next().unwrap_or("").to_string();
                self.skipping = Some(region);
            }
            "for" => self.in_for = true,
            _ => {}
        }
    }

    fn flush(&mut self) {
        if self.paragraph.is_empty() {
            return;
        }
        let lines = std::mem::take(&mut self.paragraph);
        let verbatim = lines[0].starts_with(' ') || lines[0].starts_with('\t');

        let block = if verbatim {
            fence(&lines)
        } else {
            let joined = lines
                .iter()
                .map(|l| l.trim())
                .collect::<Vec<_>>()
                .join(" ");
            let text = render_inline(&joined, Style::Markdown);
            match self.item_prefix.take() {
                Some(prefix) => format!("{}{}", prefix, text),
                None if self.in_item && self.list_depth > 0 => format!("  {}", text),
                None => text,
            }
        };
        self.blocks.push(block);
    }

    fn finish(mut self) -> String {
        self.flush();
        self.blocks.join("\n\n")
    }
}

fn render_body(lines: &[String]) -> String {
    let mut renderer = BlockRenderer::default();
    for line in lines {
        renderer.line(line);
    }
    renderer.finish()
}

/// Fence a verbatim paragraph, removing its common indentation.
fn fence(lines: &[String]) -> String {
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let body: Vec<&str> = lines
        .iter()
        .map(|l| l.get(indent..).unwrap_or("").trim_end())
        .collect();
    format!("```\n{}\n```", body.join("\n"))
}

// ═══════════════════════════════════════════════════════════════════════
// Headings
// ═══════════════════════════════════════════════════════════════════════

/// Normalize the capitalization of a heading: protocol acronyms upper case,
/// trivial words lower case, all other words title case.
pub fn capitalize_heading(text: &str) -> String {
    text.split_whitespace()
        .map(|token| {
            if UPPER_WORDS.contains(&token.to_uppercase().as_str()) {
                token.to_uppercase()
            } else if LOWER_WORDS.contains(&token.to_lowercase().as_str()) {
                token.to_lowercase()
            } else {
                title_case(token)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut previous: Option<char> = None;
    for c in word.chars() {
        let starts_word = previous.map_or(true, |p| !p.is_alphabetic() && p != '\'');
        if starts_word {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        previous = Some(c);
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════
// Formatting codes
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    Markdown,
    Plain,
}

fn render_inline(text: &str, style: Style) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut pos = 0;
    render_codes(&chars, &mut pos, 0, style)
}

/// Render until the closing delimiter of the enclosing code.
///
/// `close` is 0 at top level, 1 for `X<...>` and n for `X<<< ... >>>` with n
/// angle brackets.
fn render_codes(chars: &[char], pos: &mut usize, close: usize, style: Style) -> String {
    let mut out = String::new();
    while *pos < chars.len() {
        let c = chars[*pos];

        if close == 1 && c == '>' {
            *pos += 1;
            return out;
        }
        if close > 1 && closes_multi(chars, *pos, close) {
            let skip = if c.is_whitespace() { 1 } else { 0 };
            *pos += skip + close;
            return out;
        }

        if "BICFLESXZ".contains(c) && chars.get(*pos + 1) == Some(&'<') {
            let brackets = chars[*pos + 1..].iter().take_while(|&&b| b == '<').count();
            let after = *pos + 1 + brackets;
            let inner_close = if brackets > 1 && chars.get(after).is_some_and(|b| b.is_whitespace()) {
                *pos = after + 1;
                brackets
            } else {
                *pos += 2;
                1
            };
            let inner = render_codes(chars, pos, inner_close, style);
            out.push_str(&apply_code(c, inner.trim_end_matches(' '), style));
            continue;
        }

        out.push(c);
        *pos += 1;
    }
    out
}

fn closes_multi(chars: &[char], pos: usize, count: usize) -> bool {
    let start = if chars[pos].is_whitespace() { pos + 1 } else { pos };
    start + count <= chars.len()
        && chars[start..start + count].iter().all(|&c| c == '>')
        && chars.get(start + count) != Some(&'>')
}

fn apply_code(code: char, inner: &str, style: Style) -> String {
    match (code, style) {
        ('X', _) | ('Z', _) => String::new(),
        ('E', _) => entity(inner),
        ('L', _) => link(inner, style),
        ('S', _) | (_, Style::Plain) => inner.to_string(),
        ('B', Style::Markdown) => format!("**{}**", inner),
        ('I', Style::Markdown) | ('F', Style::Markdown) => format!("*{}*", inner),
        ('C', Style::Markdown) => {
            if inner.contains('`') {
                format!("`` {} ``", inner)
            } else {
                format!("`{}`", inner)
            }
        }
        _ => inner.to_string(),
    }
}

fn entity(name: &str) -> String {
    match name {
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "verbar" => "|".to_string(),
        "sol" => "/".to_string(),
        "quot" => "\"".to_string(),
        "amp" => "&".to_string(),
        "apos" => "'".to_string(),
        _ => {
            let number = if let Some(hex) = name.strip_prefix("0x") {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(oct) = name.strip_prefix('0').filter(|o| !o.is_empty()) {
                u32::from_str_radix(oct, 8).ok()
            } else {
                name.parse::<u32>().ok()
            };
            number
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default()
        }
    }
}

/// `L<text|target>`, `L<url>` or `L<name/"section">`.
fn link(inner: &str, style: Style) -> String {
    let (text, target) = match inner.split_once('|') {
        Some((text, target)) => (Some(text.trim()), target.trim()),
        None => (None, inner.trim()),
    };
    let is_url = target.contains("://") || target.starts_with("mailto:");

    match (style, text, is_url) {
        (Style::Markdown, Some(text), true) => format!("[{}]({})", text, target),
        (Style::Markdown, None, true) => format!("<{}>", target),
        (_, Some(text), _) => text.to_string(),
        (_, None, _) => target.replace("/\"", " \"").replace('"', ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::parse;

    fn section(title: &str, body: &str) -> Section {
        Section {
            title: title.to_string(),
            lines: body.lines().map(str::to_string).collect(),
        }
    }

    #[test]
    fn test_heading_capitalization() {
        assert_eq!(capitalize_heading("MAGIC MARKERS"), "Magic Markers");
        assert_eq!(
            capitalize_heading("INTERPRETATION OF THE TCP AND ip GRAPHS"),
            "Interpretation Of the TCP and IP Graphs"
        );
        assert_eq!(capitalize_heading("SEE ALSO"), "See Also");
    }

    #[test]
    fn test_formatting_codes() {
        assert_eq!(
            render_inline("B<bold> I<it> C<code> F</etc/munin>", Style::Markdown),
            "**bold** *it* `code` */etc/munin*"
        );
        assert_eq!(render_inline("C<< $a->{b} >>", Style::Markdown), "`$a->{b}`");
        assert_eq!(render_inline("E<lt>tagE<gt> E<0x41>", Style::Markdown), "<tag> A");
        assert_eq!(render_inline("X<index>Z<>S<a b>", Style::Markdown), "a b");
        assert_eq!(render_inline("B<I<nested>>", Style::Markdown), "***nested***");
        assert_eq!(render_inline("B<I<nested>>", Style::Plain), "nested");
    }

    #[test]
    fn test_links() {
        assert_eq!(
            render_inline("L<munin|http://munin-monitoring.org/>", Style::Markdown),
            "[munin](http://munin-monitoring.org/)"
        );
        assert_eq!(
            render_inline("L<https://example.org>", Style::Markdown),
            "<https://example.org>"
        );
        assert_eq!(render_inline("L<perlpod>", Style::Markdown), "perlpod");
    }

    #[test]
    fn test_section_rendering() {
        let s = section(
            "CONFIGURATION",
            "\nThe plugin needs:\n\n  [apache_*]\n     env.url http://localhost/\n\n=head2 OPTIONAL\n\n=over 4\n\n=item * first\n\n=item *\n\nsecond item\n\n=back\n",
        );
        let rendered = render_section(&s);
        assert_eq!(
            rendered,
            "## Configuration\n\nThe plugin needs:\n\n```\n[apache_*]\n   env.url http://localhost/\n```\n\n### Optional\n\n- first\n\n- second item"
        );
    }

    #[test]
    fn test_begin_end_and_for_are_dropped() {
        let s = section(
            "LICENSE",
            "GPLv2\n\n=begin comment\n\n #%# family=auto\n\n=end comment\n\n=for html <b>x</b>\n\nshown\n",
        );
        assert_eq!(render_section(&s), "## License\n\nGPLv2\n\nshown");
        assert_eq!(plain_text(&s), "GPLv2\n\nshown");
    }

    #[test]
    fn test_plain_text_of_lists() {
        let s = section("AUTHORS", "=over\n\n=item Jane Doe\n\n=item John Roe\n\n=back\n");
        assert_eq!(plain_text(&s), "Jane Doe\n\nJohn Roe");
    }

    #[test]
    fn test_render_documentation() {
        let header = parse("=head1 NAME\n\nload - Plugin to monitor load\n\n=head1 USAGE\n\nRun it.\n\n=cut\n");
        assert_eq!(
            render_documentation(&header).unwrap(),
            "## Name\n\nload - Plugin to monitor load\n\n## Usage\n\nRun it."
        );
        assert!(render_documentation(&parse("echo hi\n")).is_none());
    }
}
