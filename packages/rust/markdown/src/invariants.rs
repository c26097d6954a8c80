//! Output invariant checks for verification tooling.
//!
//! Each rule has a stable string id and reports violations with the
//! offending line. Fenced code and inline code spans are never inspected.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use docmark_shared::{DocmarkError, Result};
use regex::Regex;
use serde::Serialize;

use crate::engine::text::ACTIVE_TAGS;
use crate::postprocess::{HeadingIndex, ORPHAN_URI_THRESHOLD, fenced_ranges};

const EXCERPT_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvariantRule {
    NoDangerousElements,
    NoJavascriptUri,
    NoInlineStyle,
    NoVendorArtifacts,
    NoEmptyImageSrc,
    TableColumnConsistency,
    StableAnchors,
    NoOrphanDataUri,
}

impl InvariantRule {
    pub const ALL: [InvariantRule; 8] = [
        Self::NoDangerousElements,
        Self::NoJavascriptUri,
        Self::NoInlineStyle,
        Self::NoVendorArtifacts,
        Self::NoEmptyImageSrc,
        Self::TableColumnConsistency,
        Self::StableAnchors,
        Self::NoOrphanDataUri,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Self::NoDangerousElements => "no-dangerous-elements",
            Self::NoJavascriptUri => "no-javascript-uri",
            Self::NoInlineStyle => "no-inline-style",
            Self::NoVendorArtifacts => "no-vendor-artifacts",
            Self::NoEmptyImageSrc => "no-empty-image-src",
            Self::TableColumnConsistency => "table-column-consistency",
            Self::StableAnchors => "stable-anchors",
            Self::NoOrphanDataUri => "no-orphan-data-uri",
        }
    }

    fn known_ids() -> String {
        Self::ALL.iter().map(|r| r.id()).collect::<Vec<_>>().join(", ")
    }

    /// Run this rule over a document.
    pub fn check(self, md: &str) -> Vec<InvariantViolation> {
        let doc = Document::new(md);
        match self {
            Self::NoDangerousElements => doc.pattern_violations(self, dangerous_re(), "raw dangerous element"),
            Self::NoJavascriptUri => doc.pattern_violations(self, script_uri_re(), "script URI in link target"),
            Self::NoInlineStyle => doc.pattern_violations(self, inline_style_re(), "inline style declaration"),
            Self::NoVendorArtifacts => doc.pattern_violations(self, vendor_re(), "vendor markup artifact"),
            Self::NoEmptyImageSrc => doc.pattern_violations(self, empty_image_re(), "image with empty target"),
            Self::TableColumnConsistency => doc.table_violations(),
            Self::StableAnchors => doc.anchor_violations(md),
            Self::NoOrphanDataUri => doc.orphan_violations(),
        }
    }
}

impl fmt::Display for InvariantRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for InvariantRule {
    type Err = DocmarkError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|rule| rule.id() == s)
            .ok_or_else(|| DocmarkError::UnknownInvariant {
                rule: s.to_string(),
                known: Self::known_ids(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvariantViolation {
    pub rule: &'static str,
    pub message: String,
    /// 1-based line number, when the violation is tied to one line.
    pub line: Option<usize>,
    pub excerpt: String,
}

/// Run the named rules. Any unknown id fails the whole call before a rule
/// runs.
pub fn check_invariants(md: &str, rule_ids: &[&str]) -> Result<Vec<InvariantViolation>> {
    let rules = rule_ids
        .iter()
        .map(|id| id.parse::<InvariantRule>())
        .collect::<Result<Vec<_>>>()?;
    Ok(rules.into_iter().flat_map(|rule| rule.check(md)).collect())
}

/// Run every rule.
pub fn check_all_invariants(md: &str) -> Vec<InvariantViolation> {
    InvariantRule::ALL.into_iter().flat_map(|rule| rule.check(md)).collect()
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

fn dangerous_re() -> &'static Regex {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(&format!(r"(?i)(?:^|[^\\])</?(?:{})\b", ACTIVE_TAGS.join("|"))).expect("valid regex")
    });
    &RE
}

fn script_uri_re() -> &'static Regex {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\]\(\s*<?\s*(?:javascript|vbscript|data:text/html)").expect("valid regex")
    });
    &RE
}

fn inline_style_re() -> &'static Regex {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?i)<[a-z][^>]*\sstyle\s*=\s*["']|(?:^|[^\\])<style\b"#).expect("valid regex")
    });
    &RE
}

fn vendor_re() -> &'static Regex {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r#"(?i)\bmso-[a-z-]+\s*:|class\s*=\s*["']?Mso|</?(?:o|w|v|m|st1):[a-z]|\bxmlns:[a-z]|<!\[(?:if|endif)"#,
        )
        .expect("valid regex")
    });
    &RE
}

fn empty_image_re() -> &'static Regex {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[(?:\\.|[^\]\\])*\]\(\s*\)").expect("valid regex"));
    &RE
}

// ---------------------------------------------------------------------------
// Document view
// ---------------------------------------------------------------------------

/// Lines outside fenced code, inline code spans blanked, with 1-based line
/// numbers.
struct Document<'a> {
    lines: Vec<(usize, &'a str, String)>,
}

impl<'a> Document<'a> {
    fn new(md: &'a str) -> Self {
        static CODE_SPAN_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"(`+)[^`]*?(`+)").expect("valid regex"));

        let fences = fenced_ranges(md);
        let mut lines = Vec::new();
        let mut offset = 0;
        for (i, line) in md.split_inclusive('\n').enumerate() {
            let start = offset;
            offset += line.len();
            if fences.iter().any(|r| r.contains(&start)) {
                continue;
            }
            let raw = line.trim_end_matches(['\n', '\r']);
            let prose = CODE_SPAN_RE.replace_all(raw, "``").into_owned();
            lines.push((i + 1, raw, prose));
        }
        Self { lines }
    }

    fn pattern_violations(&self, rule: InvariantRule, re: &Regex, message: &str) -> Vec<InvariantViolation> {
        self.lines
            .iter()
            .filter(|(_, _, prose)| re.is_match(prose))
            .map(|(number, raw, _)| violation(rule, message.to_string(), Some(*number), raw))
            .collect()
    }

    /// Every row of a pipe table has the pipe count of its header.
    fn table_violations(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        let mut expected: Option<usize> = None;
        let mut previous = 0;

        for (number, raw, prose) in &self.lines {
            let is_row = prose.trim_start().starts_with('|');
            if !is_row || *number != previous + 1 {
                expected = None;
            }
            previous = *number;
            if !is_row {
                continue;
            }

            let pipes = prose.replace(r"\|", "").matches('|').count();
            match expected {
                None => expected = Some(pipes),
                Some(header) if header != pipes => violations.push(violation(
                    InvariantRule::TableColumnConsistency,
                    format!("row has {pipes} pipes, header has {header}"),
                    Some(*number),
                    raw,
                )),
                Some(_) => {}
            }
        }

        violations
    }

    /// Anchors must be reproducible and every in-document link must land
    /// on one.
    fn anchor_violations(&self, md: &str) -> Vec<InvariantViolation> {
        let first = HeadingIndex::build(md);
        let second = HeadingIndex::build(md);
        let mut violations = Vec::new();

        if first.entries() != second.entries() {
            violations.push(violation(
                InvariantRule::StableAnchors,
                "heading anchors differ between runs".to_string(),
                None,
                "",
            ));
        }

        for fragment in first.unresolved_links(md) {
            let needle = format!("(#{fragment}");
            let located = self.lines.iter().find(|(_, raw, _)| raw.contains(&needle));
            violations.push(violation(
                InvariantRule::StableAnchors,
                format!("link target #{fragment} does not match any heading"),
                located.map(|(number, _, _)| *number),
                located.map(|(_, raw, _)| *raw).unwrap_or(&needle),
            ));
        }

        violations
    }

    fn orphan_violations(&self) -> Vec<InvariantViolation> {
        static DATA_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"!\[(?:\\.|[^\]\\])*\]\((data:image/[^)\s]*(?:[ \t]+[^)\s\x22]+)*)")
                .expect("valid regex")
        });

        let mut violations = Vec::new();
        for (number, raw, prose) in &self.lines {
            for caps in DATA_IMAGE_RE.captures_iter(prose) {
                let length = caps[1].chars().filter(|c| !c.is_whitespace()).count();
                if length > ORPHAN_URI_THRESHOLD {
                    violations.push(violation(
                        InvariantRule::NoOrphanDataUri,
                        format!("inline image data of {length} characters"),
                        Some(*number),
                        raw,
                    ));
                }
            }
        }
        violations
    }
}

fn violation(rule: InvariantRule, message: String, line: Option<usize>, text: &str) -> InvariantViolation {
    InvariantViolation {
        rule: rule.id(),
        message,
        line,
        excerpt: text.trim().chars().take(EXCERPT_CHARS).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(violations: &[InvariantViolation]) -> Vec<&'static str> {
        violations.iter().map(|v| v.rule).collect()
    }

    #[test]
    fn rule_ids_round_trip() {
        for rule in InvariantRule::ALL {
            assert_eq!(rule.id().parse::<InvariantRule>().unwrap(), rule);
        }
    }

    #[test]
    fn unknown_rule_fails_loudly() {
        let err = check_invariants("# Ok\n", &["no-inline-style", "no-tabs"]).unwrap_err();
        match err {
            DocmarkError::UnknownInvariant { rule, known } => {
                assert_eq!(rule, "no-tabs");
                assert!(known.contains("stable-anchors"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn clean_document_passes_every_rule() {
        let md = "# Title\n\n## Scope\n\nSee [scope](#scope) and ![logo](images/logo.png).\n\n| A | B |\n| --- | --- |\n| 1 | 2 |\n";
        assert!(check_all_invariants(md).is_empty());
    }

    #[test]
    fn dangerous_elements_found_but_escaped_ones_ignored() {
        let found = check_invariants("ok\n<script>alert(1)</script>\n", &["no-dangerous-elements"]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, Some(2));

        let escaped = check_invariants(r"\<script> is text", &["no-dangerous-elements"]).unwrap();
        assert!(escaped.is_empty());
    }

    #[test]
    fn code_is_not_inspected() {
        let md = "```html\n<script>x</script>\n<p style=\"color:red\">\n```\n\nUse `<iframe>` here.\n";
        assert!(check_all_invariants(md).is_empty());
    }

    #[test]
    fn script_links_and_styles_flagged() {
        let md = "[x](javascript:alert(1))\n<span style=\"color:red\">y</span>\n";
        let found = check_invariants(md, &["no-javascript-uri", "no-inline-style"]).unwrap();
        assert_eq!(ids(&found), ["no-javascript-uri", "no-inline-style"]);
    }

    #[test]
    fn vendor_artifacts_flagged() {
        let found = check_invariants("a <o:p></o:p>\nb mso-bidi-font: x\nc", &["no-vendor-artifacts"]).unwrap();
        assert_eq!(found.iter().map(|v| v.line).collect::<Vec<_>>(), [Some(1), Some(2)]);
    }

    #[test]
    fn empty_image_target_flagged() {
        let found = check_invariants("![alt]()", &["no-empty-image-src"]).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn inconsistent_table_row_flagged() {
        let md = "| A | B |\n| --- | --- |\n| 1 | 2 | 3 |\n| a \\| b | c |\n\n| X |\n| --- |\n";
        let found = check_invariants(md, &["table-column-consistency"]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, Some(3));
    }

    #[test]
    fn unresolved_anchor_flagged() {
        let found = check_invariants("# One\n\n[two](#two)\n", &["stable-anchors"]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, Some(3));
    }

    #[test]
    fn spaced_orphan_payload_flagged() {
        let md = format!("![x](data:image/png;base64,{} {})", "A".repeat(50), "A".repeat(50));
        let found = check_invariants(&md, &["no-orphan-data-uri"]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message, "inline image data of 122 characters");
    }

    #[test]
    fn orphan_payload_flagged_and_excerpt_truncated() {
        let md = format!("![x](data:image/png;base64,{})", "A".repeat(200));
        let found = check_invariants(&md, &["no-orphan-data-uri"]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].excerpt.chars().count(), 100);
    }
}
