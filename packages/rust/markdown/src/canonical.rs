//! Final canonicalization of Markdown output.
//!
//! Each pass is a function `&str -> String` applied in sequence. Together
//! they make repeated conversions byte-identical on every platform.

use std::sync::LazyLock;

use regex::Regex;

use crate::engine::text::is_external_target;
use crate::normalize::unify_line_endings;
use crate::postprocess::{fenced_ranges, map_outside_code_spans, map_prose_lines};

/// Run every canonicalization pass. Empty or whitespace-only input gives an
/// empty string; anything else ends with exactly one `\n`.
pub fn canonicalize(md: &str, line_wrap_width: Option<usize>) -> String {
    let mut result = unify_line_endings(md);

    result = strip_trailing_whitespace(&result);
    result = collapse_blank_lines(&result);
    if let Some(width) = line_wrap_width {
        result = wrap_paragraphs(&result, width);
    }
    result = forward_slash_link_targets(&result);

    ensure_trailing_newline(&result)
}

// ---------------------------------------------------------------------------
// Pass 1: Trailing whitespace
// ---------------------------------------------------------------------------

/// Trailing whitespace is dropped from prose lines; fenced code keeps its
/// bytes.
fn strip_trailing_whitespace(md: &str) -> String {
    map_prose_lines(md, |line| line.trim_end().to_string())
}

// ---------------------------------------------------------------------------
// Pass 2: Blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of blank lines outside fenced code into one.
fn collapse_blank_lines(md: &str) -> String {
    let fences = fenced_ranges(md);
    let mut out = String::with_capacity(md.len());
    let mut offset = 0;
    let mut blank_run = 0;

    for line in md.split_inclusive('\n') {
        let in_code = fences.iter().any(|r| r.contains(&offset));
        offset += line.len();

        if !in_code && line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
    }
    out
}

// ---------------------------------------------------------------------------
// Pass 3: Paragraph wrapping
// ---------------------------------------------------------------------------

/// Greedy word wrap of plain paragraph lines. Headings, tables, lists,
/// quotes, indented lines and lines carrying links or images are kept whole.
fn wrap_paragraphs(md: &str, width: usize) -> String {
    map_prose_lines(md, |line| {
        if line.chars().count() <= width || !is_plain_paragraph(line) {
            return line.to_string();
        }
        wrap_line(line, width)
    })
}

fn is_plain_paragraph(line: &str) -> bool {
    static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(?:#|\||>|[-*+] |\d+[.)] |\s)").expect("valid regex")
    });
    !BLOCK_RE.is_match(line) && !line.contains("](")
}

fn wrap_line(line: &str, width: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in line.split(' ').filter(|w| !w.is_empty()) {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 4: Path separators
// ---------------------------------------------------------------------------

/// Relative link and image targets use `/` regardless of the host platform.
/// Inline code is left as written.
fn forward_slash_link_targets(md: &str) -> String {
    static TARGET_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\]\(([^)\s]+)").expect("valid regex"));

    map_prose_lines(md, |line| {
        map_outside_code_spans(line, |part| {
            TARGET_RE
                .replace_all(part, |caps: &regex::Captures| {
                    let target = &caps[1];
                    if is_external_target(target) {
                        caps[0].to_string()
                    } else {
                        format!("]({})", target.replace('\\', "/"))
                    }
                })
                .into_owned()
        })
    })
}

// ---------------------------------------------------------------------------
// Pass 5: Document edges
// ---------------------------------------------------------------------------

fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("{trimmed}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_endings_unified() {
        assert_eq!(canonicalize("a\r\nb\rc", None), "a\nb\nc\n");
    }

    #[test]
    fn trailing_whitespace_stripped() {
        assert_eq!(canonicalize("Line 1   \nLine 2\t\nLine 3", None), "Line 1\nLine 2\nLine 3\n");
    }

    #[test]
    fn blank_line_runs_collapse_to_one() {
        assert_eq!(canonicalize("Line 1\n\n\n\n\nLine 2", None), "Line 1\n\nLine 2\n");
        assert_eq!(canonicalize("Line 1\n\n   \n\t\nLine 2", None), "Line 1\n\nLine 2\n");
    }

    #[test]
    fn blank_lines_inside_code_kept() {
        let md = "```\na\n\n\n\nb\n```";
        assert_eq!(canonicalize(md, None), format!("{md}\n"));
    }

    #[test]
    fn edges_trimmed_single_newline() {
        assert_eq!(canonicalize("\n\n  Content\n\n\n", None), "Content\n");
        assert_eq!(canonicalize("Content", None), "Content\n");
    }

    #[test]
    fn empty_stays_empty() {
        assert_eq!(canonicalize("", None), "");
        assert_eq!(canonicalize(" \n\t\n", None), "");
    }

    #[test]
    fn backslashes_in_relative_targets() {
        assert_eq!(
            canonicalize(r"![x](doc_images\image-001.png) [w](https://a.io/b\c)", None),
            "![x](doc_images/image-001.png) [w](https://a.io/b\\c)\n"
        );
    }

    #[test]
    fn code_keeps_backslashes_and_trailing_spaces() {
        assert_eq!(
            canonicalize(r"Run `[a](b\c)` then [d](e\f)", None),
            "Run `[a](b\\c)` then [d](e/f)\n"
        );
        assert_eq!(canonicalize("```\nx = 1  \n```\nprose  ", None), "```\nx = 1  \n```\nprose\n");
    }

    #[test]
    fn paragraphs_wrap_greedily() {
        let out = canonicalize("one two three four five six", Some(10));
        assert_eq!(out, "one two\nthree four\nfive six\n");
    }

    #[test]
    fn wrap_leaves_structure_alone() {
        let md = "# a very long heading line\n\n- a very long list item\n\n| a very | long table |\n\nsee [a link](https://example.com) here";
        assert_eq!(canonicalize(md, Some(8)), format!("{md}\n"));
    }

    #[test]
    fn canonical_output_is_a_fixed_point() {
        let md = "Title  \r\n\r\n\r\n\r\nsome words that will need wrapping here\n\n![i](a\\b.png)\n";
        let once = canonicalize(md, Some(12));
        assert_eq!(canonicalize(&once, Some(12)), once);
    }
}
