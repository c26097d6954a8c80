//! Structural passes over the converted Markdown.
//!
//! Each pass is a function over the whole document, applied in sequence by
//! the pipeline. Fenced code blocks are never rewritten.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::LazyLock;

use docmark_shared::HeadingStrategy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

/// Link target that replaces an oversized inline image.
pub const ORPHAN_PLACEHOLDER: &str = "image-not-extracted";

/// Inline image URIs longer than this many characters are orphans.
pub const ORPHAN_URI_THRESHOLD: usize = 100;

const MAX_HEADING_DEPTH: usize = 6;

// ---------------------------------------------------------------------------
// Fenced code
// ---------------------------------------------------------------------------

/// Byte ranges of fenced code blocks, fences included. An unterminated
/// fence runs to the end of the document.
pub(crate) fn fenced_ranges(md: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut open: Option<(usize, char, usize)> = None;
    let mut offset = 0;

    for line in md.split_inclusive('\n') {
        let trimmed = line.trim_start_matches(' ');
        let marker = trimmed.chars().next().filter(|c| matches!(c, '`' | '~'));
        if let Some(c) = marker {
            let run = trimmed.chars().take_while(|x| *x == c).count();
            if run >= 3 {
                match open {
                    None => open = Some((offset, c, run)),
                    Some((start, fence, len))
                        if fence == c && run >= len && trimmed.trim_end().chars().all(|x| x == c) =>
                    {
                        ranges.push(start..offset + line.len());
                        open = None;
                    }
                    Some(_) => {}
                }
            }
        }
        offset += line.len();
    }

    if let Some((start, _, _)) = open {
        ranges.push(start..md.len());
    }
    ranges
}

fn in_ranges(ranges: &[Range<usize>], offset: usize) -> bool {
    ranges.iter().any(|r| r.contains(&offset))
}

/// Apply `f` to every line outside fenced code, keeping line breaks.
pub fn map_prose_lines(md: &str, mut f: impl FnMut(&str) -> String) -> String {
    let fences = fenced_ranges(md);
    let mut out = String::with_capacity(md.len());
    let mut offset = 0;

    for line in md.split_inclusive('\n') {
        if in_ranges(&fences, offset) {
            out.push_str(line);
        } else {
            let (body, newline) = match line.strip_suffix('\n') {
                Some(body) => (body, "\n"),
                None => (line, ""),
            };
            out.push_str(&f(body));
            out.push_str(newline);
        }
        offset += line.len();
    }
    out
}

/// Apply `f` to the parts of `line` outside inline code spans. A backtick
/// run without a matching closer is ordinary text.
pub(crate) fn map_outside_code_spans(line: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(open) = rest.find('`') {
        let run = backtick_run(&rest[open..]);
        let body = &rest[open + run..];
        match closing_run(body, run) {
            Some(close) => {
                let end = open + run + close + run;
                out.push_str(&f(&rest[..open]));
                out.push_str(&rest[open..end]);
                rest = &rest[end..];
            }
            None => {
                out.push_str(&f(&rest[..open + run]));
                rest = body;
            }
        }
    }
    out.push_str(&f(rest));
    out
}

fn backtick_run(text: &str) -> usize {
    text.len() - text.trim_start_matches('`').len()
}

/// Offset of the first backtick run of exactly `len` in `text`.
fn closing_run(text: &str, len: usize) -> Option<usize> {
    let mut offset = 0;
    while let Some(pos) = text[offset..].find('`') {
        let start = offset + pos;
        let run = backtick_run(&text[start..]);
        if run == len {
            return Some(start);
        }
        offset = start + run;
    }
    None
}

// ---------------------------------------------------------------------------
// Pass 1: Stale table-of-contents links
// ---------------------------------------------------------------------------

/// Replace links into word-processor bookmarks (`#_Toc…`, `#_heading…`,
/// `#_Ref…`) with their visible text.
pub fn repair_toc_links(md: &str) -> String {
    static TOC_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\[((?:\\.|[^\]\\])*)\]\(#_(?:Toc|heading|Ref)[^)]*\)").expect("valid regex")
    });
    map_prose_lines(md, |line| TOC_LINK_RE.replace_all(line, "$1").into_owned())
}

// ---------------------------------------------------------------------------
// Pass 2: Heading depth from outline numbering
// ---------------------------------------------------------------------------

/// A Markdown heading as seen by depth inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingRecord {
    pub depth: usize,
    pub raw_text: String,
    /// Leading dotted number (`2.1` in `2.1 Scope`), when present. A
    /// trailing dot (`1. Scope`) marks list-style numbering, not an outline.
    pub numbering_prefix: Option<Vec<u32>>,
}

impl HeadingRecord {
    /// Parse an ATX heading line.
    pub fn parse(line: &str) -> Option<Self> {
        static HEADING_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"^(#{1,6})[ \t]+(.*?)[ \t]*$").expect("valid regex"));
        static PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^(\d+(?:\.\d+)*)\s+\S").expect("valid regex")
        });

        let caps = HEADING_RE.captures(line)?;
        let raw_text = caps[2].to_string();
        let numbering_prefix = PREFIX_RE.captures(&raw_text).and_then(|p| {
            p[1].split('.')
                .map(|segment| segment.parse::<u32>().ok())
                .collect::<Option<Vec<_>>>()
        });

        Some(Self {
            depth: caps[1].len(),
            raw_text,
            numbering_prefix,
        })
    }

    /// Depth implied by the numbering prefix, if it reads as an outline
    /// number rather than a version or a decimal value.
    pub fn outline_depth(&self) -> Option<usize> {
        static PREFIX_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)*)").expect("valid regex"));

        let prefix = self.numbering_prefix.as_ref()?;
        let literal = PREFIX_RE.find(&self.raw_text)?.as_str();
        let overlong = literal.split('.').any(|segment| segment.len() > 2);
        if prefix.len() > 3 || overlong || prefix.contains(&0) {
            return None;
        }
        Some(prefix.len().min(MAX_HEADING_DEPTH))
    }
}

/// Re-level headings whose text starts with outline numbering.
pub fn infer_heading_depths(md: &str, strategy: HeadingStrategy) -> String {
    if strategy == HeadingStrategy::Preserve {
        return md.to_string();
    }

    let mut changed = 0usize;
    let out = map_prose_lines(md, |line| {
        let Some(record) = HeadingRecord::parse(line) else {
            return line.to_string();
        };
        match record.outline_depth() {
            Some(depth) if depth != record.depth => {
                changed += 1;
                format!("{} {}", "#".repeat(depth), record.raw_text)
            }
            _ => line.to_string(),
        }
    });

    if changed > 0 {
        debug!(changed, "heading depths inferred from outline numbering");
    }
    out
}

// ---------------------------------------------------------------------------
// Pass 3: Anchors
// ---------------------------------------------------------------------------

/// Stable anchor for heading text. Pure: equal input gives equal output.
pub fn anchor_id(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.trim().to_lowercase().chars() {
        if c.is_whitespace() || c == '-' {
            if !out.ends_with('-') {
                out.push('-');
            }
        } else if c.is_alphanumeric() {
            out.push(c);
        }
    }
    out.trim_matches('-').to_string()
}

/// Heading text as a reader sees it: link targets and escapes removed.
fn heading_plain_text(raw: &str) -> String {
    static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"!?\[((?:\\.|[^\]\\])*)\]\([^)]*\)").expect("valid regex")
    });
    static ESCAPE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\\(.)").expect("valid regex"));

    let text = LINK_RE.replace_all(raw, "$1");
    ESCAPE_RE.replace_all(&text, "$1").into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingAnchor {
    pub depth: usize,
    pub text: String,
    pub id: String,
}

/// Every heading of a document with its anchor. Repeated headings get
/// `-1`, `-2` suffixes in document order.
#[derive(Debug, Clone, Default)]
pub struct HeadingIndex {
    entries: Vec<HeadingAnchor>,
    ids: HashSet<String>,
}

impl HeadingIndex {
    pub fn build(md: &str) -> Self {
        let fences = fenced_ranges(md);
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut index = Self::default();
        let mut offset = 0;

        for line in md.split_inclusive('\n') {
            let start = offset;
            offset += line.len();
            if in_ranges(&fences, start) {
                continue;
            }
            let Some(record) = HeadingRecord::parse(line.trim_end_matches('\n')) else {
                continue;
            };
            let text = heading_plain_text(&record.raw_text);
            let base = anchor_id(&text);
            if base.is_empty() {
                continue;
            }
            let count = seen.entry(base.clone()).or_insert(0);
            let id = if *count == 0 {
                base.clone()
            } else {
                format!("{base}-{count}")
            };
            *count += 1;

            index.ids.insert(id.clone());
            index.entries.push(HeadingAnchor {
                depth: record.depth,
                text,
                id,
            });
        }

        index
    }

    pub fn entries(&self) -> &[HeadingAnchor] {
        &self.entries
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// In-document link fragments that match no heading, in order.
    pub fn unresolved_links(&self, md: &str) -> Vec<String> {
        static FRAGMENT_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\]\(#([^)\s]+)").expect("valid regex"));

        let fences = fenced_ranges(md);
        FRAGMENT_RE
            .captures_iter(md)
            .filter(|caps| caps.get(0).is_some_and(|m| !in_ranges(&fences, m.start())))
            .map(|caps| caps[1].to_string())
            .filter(|fragment| {
                let decoded = percent_decode_str(fragment).decode_utf8_lossy();
                !self.contains(fragment) && !self.contains(&decoded)
            })
            .collect()
    }
}

/// Warnings for in-document links whose target is not a heading anchor.
pub fn verify_anchor_links(md: &str) -> Vec<String> {
    let index = HeadingIndex::build(md);
    index
        .unresolved_links(md)
        .into_iter()
        .map(|fragment| format!("link target #{fragment} does not match any heading"))
        .collect()
}

// ---------------------------------------------------------------------------
// Pass 4: Orphaned inline images
// ---------------------------------------------------------------------------

/// An inline image payload that was never extracted into an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanDataUri {
    /// Byte offset of the image reference (`![`) in the scanned Markdown.
    pub position: usize,
    pub mime_type: String,
    pub approximate_byte_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanDataUriReport {
    pub cleaned_markdown: String,
    pub orphans: Vec<OrphanDataUri>,
}

/// Replace oversized `data:image/…` image targets with the placeholder.
/// Small inline icons are left alone. Whitespace inside a payload does not
/// count towards its length.
pub fn guard_orphan_data_uris(md: &str) -> OrphanDataUriReport {
    static DATA_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"!\[((?:\\.|[^\]\\])*)\]\((data:(image/[A-Za-z0-9.+-]+)[^)\s]*(?:\s+[^)\s"]+)*)(?:\s+"[^"]*")?\)"#)
            .expect("valid regex")
    });

    let fences = fenced_ranges(md);
    let mut orphans = Vec::new();
    let mut cleaned = String::with_capacity(md.len());
    let mut cursor = 0;

    for caps in DATA_IMAGE_RE.captures_iter(md) {
        let Some(whole) = caps.get(0) else { continue };
        let uri: String = caps[2].split_whitespace().collect();
        if uri.chars().count() <= ORPHAN_URI_THRESHOLD || in_ranges(&fences, whole.start()) {
            continue;
        }

        let orphan = OrphanDataUri {
            position: whole.start(),
            mime_type: caps[3].to_ascii_lowercase(),
            approximate_byte_size: decoded_size(&uri),
        };
        warn!(
            position = orphan.position,
            mime_type = %orphan.mime_type,
            bytes = orphan.approximate_byte_size,
            "inline image was not extracted"
        );
        orphans.push(orphan);

        cleaned.push_str(&md[cursor..whole.start()]);
        cleaned.push_str(&format!("![{}]({ORPHAN_PLACEHOLDER})", &caps[1]));
        cursor = whole.end();
    }
    cleaned.push_str(&md[cursor..]);

    OrphanDataUriReport {
        cleaned_markdown: cleaned,
        orphans,
    }
}

/// Approximate payload size of a data URI once decoded.
fn decoded_size(uri: &str) -> usize {
    let Some((header, payload)) = uri.split_once(',') else {
        return 0;
    };
    if header.to_ascii_lowercase().ends_with(";base64") {
        let padding = payload.chars().rev().take_while(|c| *c == '=').count();
        (payload.len() * 3 / 4).saturating_sub(padding)
    } else {
        payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_uri(total_len: usize) -> String {
        let prefix = "data:image/png;base64,";
        format!("{prefix}{}", "A".repeat(total_len - prefix.len()))
    }

    #[test]
    fn code_spans_are_left_out() {
        let upper = |part: &str| part.to_uppercase();
        assert_eq!(map_outside_code_spans("a `b` c ``d`e`` f", upper), "A `b` C ``d`e`` F");
        assert_eq!(map_outside_code_spans("x ` y", upper), "X ` Y");
    }

    #[test]
    fn toc_links_become_text() {
        assert_eq!(repair_toc_links("[1.1 Introduction](#_Toc123456)"), "1.1 Introduction");
        assert_eq!(repair_toc_links("See [Figure 2](#_Ref99) and [x](#_heading=h.abc)."), "See Figure 2 and x.");
    }

    #[test]
    fn ordinary_anchor_links_kept() {
        let md = "[Scope](#scope) [Web](https://a.io/#_Toc1)";
        assert_eq!(repair_toc_links(md), md);
    }

    #[test]
    fn toc_links_in_code_untouched() {
        let md = "```\n[a](#_Toc1)\n```";
        assert_eq!(repair_toc_links(md), md);
    }

    #[test]
    fn outline_heading_promoted_to_segment_depth() {
        assert_eq!(infer_heading_depths("# 1.1 Background", HeadingStrategy::Infer), "## 1.1 Background");
        assert_eq!(infer_heading_depths("#### 2 Scope", HeadingStrategy::Infer), "# 2 Scope");
        assert_eq!(infer_heading_depths("## 1.2.3 Detail", HeadingStrategy::Infer), "### 1.2.3 Detail");
    }

    #[test]
    fn versions_and_decimals_left_alone() {
        for md in [
            "# Version 2.1.0 Release",
            "# 3.14159 Pi Approximation",
            "# 2.0 Overview",
            "# 1.2.3.4 Too Deep",
            "# 100.1 Large",
        ] {
            assert_eq!(infer_heading_depths(md, HeadingStrategy::Infer), md);
        }
    }

    #[test]
    fn trailing_dot_is_not_outline_numbering() {
        for md in [r"### 1\. Introduction", "### 1. Introduction", "## 2.1. Scope"] {
            assert_eq!(infer_heading_depths(md, HeadingStrategy::Infer), md);
        }
        let record = HeadingRecord::parse(r"### 1\. Introduction").unwrap();
        assert_eq!(record.numbering_prefix, None);
        assert_eq!(record.outline_depth(), None);
    }

    #[test]
    fn preserve_strategy_skips_inference() {
        let md = "# 1.1 Background";
        assert_eq!(infer_heading_depths(md, HeadingStrategy::Preserve), md);
    }

    #[test]
    fn inference_skips_fenced_code() {
        let md = "```\n# 1.1 Comment\n```\n# 1.1 Real";
        assert_eq!(infer_heading_depths(md, HeadingStrategy::Infer), "```\n# 1.1 Comment\n```\n## 1.1 Real");
    }

    #[test]
    fn heading_record_parses_prefix() {
        let record = HeadingRecord::parse("## 2.1 Scope").unwrap();
        assert_eq!(record.depth, 2);
        assert_eq!(record.raw_text, "2.1 Scope");
        assert_eq!(record.numbering_prefix, Some(vec![2, 1]));
        assert!(HeadingRecord::parse("#NoSpace").is_none());
    }

    #[test]
    fn anchors_are_pure_and_unicode_aware() {
        let text = "Développement de l'application";
        assert_eq!(anchor_id(text), "développement-de-lapplication");
        assert_eq!(anchor_id(text), anchor_id(text));
        assert_eq!(anchor_id("  Hello,   World! -- Again "), "hello-world-again");
        assert_eq!(anchor_id("概要 セクション"), "概要-セクション");
        assert_eq!(anchor_id("!!!"), "");
    }

    #[test]
    fn duplicate_headings_get_suffixes() {
        let index = HeadingIndex::build("# Notes\n\n## Notes\n\n### Notes\n\n```\n# Notes\n```");
        let ids: Vec<&str> = index.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["notes", "notes-1", "notes-2"]);
    }

    #[test]
    fn heading_links_use_visible_text() {
        let index = HeadingIndex::build("## See [the guide](https://x.io/a_b) \\*now\\*");
        assert!(index.contains("see-the-guide-now"));
    }

    #[test]
    fn unresolved_anchor_links_warn() {
        let md = "# Scope\n\n[ok](#scope) [bad](#missing)";
        let warnings = verify_anchor_links(md);
        assert_eq!(warnings, ["link target #missing does not match any heading"]);
    }

    #[test]
    fn orphan_threshold_boundary() {
        let at_limit = format!("![icon]({})", data_uri(100));
        let report = guard_orphan_data_uris(&at_limit);
        assert_eq!(report.cleaned_markdown, at_limit);
        assert!(report.orphans.is_empty());

        let over = format!("Intro ![chart]({})", data_uri(101));
        let report = guard_orphan_data_uris(&over);
        assert_eq!(report.cleaned_markdown, "Intro ![chart](image-not-extracted)");
        assert_eq!(report.orphans.len(), 1);
        assert_eq!(report.orphans[0].position, 6);
        assert_eq!(report.orphans[0].mime_type, "image/png");
        assert_eq!(report.orphans[0].approximate_byte_size, (101 - 22) * 3 / 4);
    }

    #[test]
    fn wrapped_payload_is_still_an_orphan() {
        let prefix = "data:image/png;base64,";
        let md = format!("![x]({prefix}{}\n{} \"Chart\") after", "A".repeat(60), "A".repeat(60));
        let report = guard_orphan_data_uris(&md);
        assert_eq!(report.cleaned_markdown, "![x](image-not-extracted) after");
        assert_eq!(report.orphans.len(), 1);
        assert_eq!(report.orphans[0].approximate_byte_size, 90);

        let small = format!("![x]({prefix}{} {})", "A".repeat(30), "A".repeat(30));
        assert!(guard_orphan_data_uris(&small).orphans.is_empty());
    }

    #[test]
    fn orphans_reported_in_order() {
        let md = format!("![a]({0})\n\n![b]({0})", data_uri(200));
        let report = guard_orphan_data_uris(&md);
        assert_eq!(report.orphans.len(), 2);
        assert!(report.orphans[0].position < report.orphans[1].position);
        assert_eq!(report.cleaned_markdown, "![a](image-not-extracted)\n\n![b](image-not-extracted)");
    }
}
