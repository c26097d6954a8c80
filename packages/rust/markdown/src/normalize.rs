//! Raw-markup normalization.
//!
//! Runs before any structural work: unifies line endings, inlines embedded
//! sub-documents carried in `srcdoc` attributes, and reverses one level of
//! entity escaping when the markup was encoded twice.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::scan;

/// Embedded documents nested deeper than this are left escaped.
const MAX_SRCDOC_PASSES: usize = 4;

/// Output of [`normalize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    pub markup: String,
    pub warnings: Vec<String>,
    /// Entities decoded by the double-encoding repair.
    pub entities_decoded: usize,
}

/// Normalize raw markup. Never fails.
pub fn normalize(raw: &str) -> Normalized {
    let mut warnings = Vec::new();

    let mut markup = unify_line_endings(raw);

    for _ in 0..MAX_SRCDOC_PASSES {
        let (next, spliced) = inline_srcdoc(&markup, &mut warnings);
        markup = next;
        if spliced == 0 {
            break;
        }
    }

    let (markup, entities_decoded) = repair_double_encoding(&markup);

    debug!(
        len = markup.len(),
        entities_decoded,
        warnings = warnings.len(),
        "normalization complete"
    );

    Normalized {
        markup,
        warnings,
        entities_decoded,
    }
}

// ---------------------------------------------------------------------------
// Line endings
// ---------------------------------------------------------------------------

pub(crate) fn unify_line_endings(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

// ---------------------------------------------------------------------------
// Embedded sub-documents
// ---------------------------------------------------------------------------

/// Replace `<iframe srcdoc="...">` elements with their decoded content.
///
/// Returns the new markup and how many embeds were processed.
fn inline_srcdoc(markup: &str, warnings: &mut Vec<String>) -> (String, usize) {
    static OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?is)<iframe\b[^>]*?\bsrcdoc\s*=\s*(?:"([^"]*)"|'([^']*)')[^>]*>"#)
            .expect("valid regex")
    });
    static CLOSE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)</iframe\s*>").expect("valid regex"));

    let mut out = String::with_capacity(markup.len());
    let mut cursor = 0;
    let mut count = 0;

    for caps in OPEN_RE.captures_iter(markup) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() < cursor {
            continue;
        }
        let escaped = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();

        // Swallow fallback content up to the matching close tag.
        let end = match CLOSE_RE.find_at(markup, whole.end()) {
            Some(close) if !markup[whole.end()..close.start()].to_ascii_lowercase().contains("<iframe") => {
                close.end()
            }
            _ => whole.end(),
        };

        out.push_str(&markup[cursor..whole.start()]);
        match decode_subdocument(escaped) {
            Some(content) => out.push_str(&content),
            None => {
                warnings.push(
                    "embedded document could not be decoded; kept as escaped text".to_string(),
                );
                out.push_str(escaped);
            }
        }
        cursor = end;
        count += 1;
    }

    if count == 0 {
        return (markup.to_string(), 0);
    }
    out.push_str(&markup[cursor..]);
    (out, count)
}

/// Decode a `srcdoc` value and strip the document scaffolding around its body.
fn decode_subdocument(escaped: &str) -> Option<String> {
    let decoded = html_escape::decode_html_entities(escaped);
    let decoded = unify_line_endings(&decoded);

    let body = crate::preprocess::extract_body(&decoded).unwrap_or(decoded.as_str());
    let mut content = scan::remove_regions(body, &["head", "style", "title"]);
    content = crate::preprocess::remove_declarations(&content);
    for tag in ["html", "body"] {
        content = scan::strip_tokens(&content, tag).0;
    }

    let trimmed = content.trim();
    let balanced = trimmed.matches('<').count() == trimmed.matches('>').count();
    if trimmed.is_empty() || !balanced {
        return None;
    }
    Some(trimmed.to_string())
}

// ---------------------------------------------------------------------------
// Double-encoded markup
// ---------------------------------------------------------------------------

/// Whether the text looks like markup that was entity-encoded twice.
///
/// The signature is an escaped tag whose first attribute is `class`, `id`,
/// `style` or a `data-*` attribute with an escaped quote. Escaped tags
/// without attributes (`&lt;tag&gt;`) are treated as legitimate text.
pub fn is_double_encoded(markup: &str) -> bool {
    static SIGNATURE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)&lt;[a-z][a-z0-9-]*\s+(?:class|id|style|data-[a-z0-9_-]+)\s*=\s*&quot;")
            .expect("valid regex")
    });
    SIGNATURE_RE.is_match(markup)
}

/// Reverse one level of markup escaping when the double-encoding signature
/// is present. `&amp;` is left alone so `&amp;lt;` stays escaped text.
fn repair_double_encoding(markup: &str) -> (String, usize) {
    static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"&(?:lt|gt|quot|apos|#39|#x27|#34|#60|#62);").expect("valid regex")
    });

    if !is_double_encoded(markup) {
        return (markup.to_string(), 0);
    }

    let mut count = 0;
    let repaired = ENTITY_RE
        .replace_all(markup, |caps: &regex::Captures| {
            count += 1;
            match &caps[0] {
                "&lt;" | "&#60;" => "<",
                "&gt;" | "&#62;" => ">",
                "&quot;" | "&#34;" => "\"",
                _ => "'",
            }
        })
        .into_owned();

    (repaired, count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_and_cr_become_lf() {
        assert_eq!(normalize("a\r\nb\rc").markup, "a\nb\nc");
    }

    #[test]
    fn srcdoc_is_decoded_and_spliced() {
        let raw = r#"<p>before</p><iframe srcdoc="&lt;html&gt;&lt;head&gt;&lt;style&gt;p{color:red}&lt;/style&gt;&lt;/head&gt;&lt;body&gt;&lt;h2&gt;Inner&lt;/h2&gt;&lt;/body&gt;&lt;/html&gt;"></iframe><p>after</p>"#;
        let out = normalize(raw);
        assert!(out.markup.contains("<h2>Inner</h2>"));
        assert!(!out.markup.contains("iframe"));
        assert!(!out.markup.contains("color:red"));
        assert!(out.markup.starts_with("<p>before</p>"));
        assert!(out.markup.ends_with("<p>after</p>"));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn single_quoted_srcdoc_supported() {
        let raw = "<iframe srcdoc='&lt;p&gt;Hi&lt;/p&gt;'></iframe>";
        assert_eq!(normalize(raw).markup, "<p>Hi</p>");
    }

    #[test]
    fn undecodable_srcdoc_passes_through_escaped() {
        let raw = r#"<iframe srcdoc="&lt;p class=&quot;x"></iframe>"#;
        let out = normalize(raw);
        assert_eq!(out.warnings.len(), 1);
        assert!(!out.markup.contains("<iframe"));
    }

    #[test]
    fn double_encoded_markup_is_repaired() {
        let raw = "&lt;section class=&quot;content&quot;&gt;&lt;p&gt;Hello&lt;/p&gt;&lt;/section&gt;";
        let out = normalize(raw);
        assert_eq!(out.markup, r#"<section class="content"><p>Hello</p></section>"#);
        assert!(out.entities_decoded >= 8);
    }

    #[test]
    fn escaped_tag_without_attributes_is_left_alone() {
        let raw = "<p>Use the &lt;tag&gt; element</p>";
        let out = normalize(raw);
        assert_eq!(out.markup, raw);
        assert_eq!(out.entities_decoded, 0);
    }

    #[test]
    fn amp_sequences_survive_repair() {
        let raw = "&lt;div id=&quot;a&quot;&gt;&amp;lt;b&amp;gt;&lt;/div&gt;";
        let out = normalize(raw);
        assert_eq!(out.markup, r#"<div id="a">&amp;lt;b&amp;gt;</div>"#);
    }

    #[test]
    fn data_attribute_signature_detected() {
        assert!(is_double_encoded("&lt;span data-role=&quot;x&quot;&gt;"));
        assert!(!is_double_encoded("&lt;span title=&quot;x&quot;&gt;"));
    }
}
