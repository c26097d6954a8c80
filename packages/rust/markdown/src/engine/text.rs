//! Text-level helpers shared by the conversion rules.

use std::sync::LazyLock;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use regex::Regex;

/// Characters left unescaped in a path segment: RFC 3986 unreserved plus
/// `!*'`. Parentheses stay encoded so link targets never unbalance.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'');

/// Collapse runs of ASCII whitespace (not NBSP) into single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    static WS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t\n\r\x0C]+").expect("valid regex"));
    WS_RE.replace_all(text, " ").into_owned()
}

/// Escape Markdown-significant characters in literal text.
///
/// `at_line_start` additionally escapes block markers that only matter at
/// the beginning of a line.
pub fn escape_text(text: &str, at_line_start: bool) -> String {
    static ORDERED_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(\d+)\. ").expect("valid regex"));

    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if matches!(c, '\\' | '*' | '_' | '`' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    let mut out = neutralize_active_tags(&out);

    if !at_line_start {
        return out;
    }
    if out.starts_with("# ") || out.starts_with('>') || out.starts_with("- ") || out.starts_with("+ ")
    {
        out.insert(0, '\\');
        return out;
    }
    ORDERED_RE.replace(&out, "$1\\. ").into_owned()
}

/// Elements a Markdown renderer would execute or embed if they appeared as
/// raw markup in text.
pub const ACTIVE_TAGS: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "applet", "noscript", "template", "frame",
    "frameset", "svg", "button", "meta", "link", "base",
];

/// Escape the `<` of literal text that spells an active tag (`<script>` in
/// prose); other angle brackets stay as typed.
fn neutralize_active_tags(text: &str) -> String {
    static ACTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(&format!(r"(?i)<(/?(?:{})\b)", ACTIVE_TAGS.join("|"))).expect("valid regex")
    });
    ACTIVE_RE.replace_all(text, r"\<$1").into_owned()
}

/// Escape brackets so text can sit inside `[...]`.
pub fn escape_brackets(text: &str) -> String {
    text.replace('[', "\\[").replace(']', "\\]")
}

/// Wrap `content` in `marker`, moving surrounding whitespace outside.
pub fn delimit(content: &str, marker: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return content.to_string();
    }
    let leading = &content[..content.len() - content.trim_start().len()];
    let trailing = &content[content.trim_end().len()..];
    format!("{leading}{marker}{trimmed}{marker}{trailing}")
}

/// Inline code span with a fence longer than any backtick run inside.
pub fn code_span(text: &str) -> String {
    let text = text.replace('\n', " ");
    if text.trim().is_empty() {
        return String::new();
    }
    let longest = longest_run(&text, '`');
    let fence = "`".repeat(longest + 1);
    if text.starts_with('`') || text.ends_with('`') {
        format!("{fence} {text} {fence}")
    } else {
        format!("{fence}{text}{fence}")
    }
}

/// Fence for a code block that must not be closed by its own content.
pub fn code_fence(text: &str) -> String {
    "`".repeat(longest_run(text, '`').max(2) + 1)
}

fn longest_run(text: &str, ch: char) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == ch {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Whether a link or image target points outside the document's own assets:
/// any URI with a scheme (including `data:`), protocol-relative URLs and
/// in-document fragments. Single-letter schemes are drive letters.
pub fn is_external_target(target: &str) -> bool {
    static SCHEME_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]+:").expect("valid regex"));
    let target = target.trim();
    target.starts_with("//") || target.starts_with('#') || SCHEME_RE.is_match(target)
}

/// Decode then re-encode each segment of a relative path, joining with `/`.
///
/// Idempotent: an already-encoded path comes back unchanged.
pub fn encode_path(path: &str) -> String {
    path.split(['/', '\\'])
        .map(|segment| {
            let decoded = percent_decode_str(segment).decode_utf8_lossy();
            utf8_percent_encode(&decoded, SEGMENT).to_string()
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Make an absolute link target safe inside `(...)`.
pub fn encode_link_target(href: &str) -> String {
    let mut out = String::with_capacity(href.len());
    for c in href.trim().chars() {
        match c {
            ' ' => out.push_str("%20"),
            '(' => out.push_str("%28"),
            ')' => out.push_str("%29"),
            '[' => out.push_str("%5B"),
            ']' => out.push_str("%5D"),
            '<' => out.push_str("%3C"),
            '>' => out.push_str("%3E"),
            '\n' | '\r' | '\t' => {}
            other => out.push(other),
        }
    }
    out
}

/// Schemes whose links are dropped in favor of their text.
pub fn is_script_uri(href: &str) -> bool {
    let compact: String = href
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    compact.starts_with("javascript:")
        || compact.starts_with("vbscript:")
        || compact.starts_with("data:text/html")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_inline_markers() {
        assert_eq!(escape_text("a*b_c[d]", false), r"a\*b\_c\[d\]");
    }

    #[test]
    fn escapes_block_markers_at_line_start_only() {
        assert_eq!(escape_text("# not a heading", true), r"\# not a heading");
        assert_eq!(escape_text("1. not a list", true), r"1\. not a list");
        assert_eq!(escape_text("1. mid line", false), "1. mid line");
        assert_eq!(escape_text("1.1 Background", true), "1.1 Background");
    }

    #[test]
    fn literal_angle_brackets_and_ampersands_kept() {
        assert_eq!(escape_text("<tag> & \"quoted\"", false), "<tag> & \"quoted\"");
    }

    #[test]
    fn literal_active_tags_are_escaped() {
        assert_eq!(escape_text("<script>x</SCRIPT>", false), r"\<script>x\</SCRIPT>");
        assert_eq!(escape_text("<scripts>", false), "<scripts>");
    }

    #[test]
    fn delimit_moves_whitespace_outside() {
        assert_eq!(delimit(" bold ", "**"), " **bold** ");
        assert_eq!(delimit("   ", "**"), "   ");
    }

    #[test]
    fn code_span_grows_fence() {
        assert_eq!(code_span("let x"), "`let x`");
        assert_eq!(code_span("a ` b"), "``a ` b``");
        assert_eq!(code_span("`tick"), "`` `tick ``");
    }

    #[test]
    fn external_targets() {
        assert!(is_external_target("https://example.com/a.png"));
        assert!(is_external_target("data:image/png;base64,AAAA"));
        assert!(is_external_target("//cdn.example.com/x.png"));
        assert!(is_external_target("#section"));
        assert!(!is_external_target("./images/a.png"));
        assert!(!is_external_target(r"C:\docs\a.png"));
    }

    #[test]
    fn encode_path_is_idempotent() {
        let once = encode_path("./my images/ä b.png");
        assert_eq!(once, "./my%20images/%C3%A4%20b.png");
        assert_eq!(encode_path(&once), once);
    }

    #[test]
    fn encode_path_normalizes_backslashes() {
        assert_eq!(encode_path(r"media\image 1.png"), "media/image%201.png");
    }

    #[test]
    fn link_target_encoding() {
        assert_eq!(
            encode_link_target("https://x.com/a b (1)"),
            "https://x.com/a%20b%20%281%29"
        );
    }

    #[test]
    fn script_uris_detected() {
        assert!(is_script_uri("javascript:alert(1)"));
        assert!(is_script_uri(" JavaScript :void(0)"));
        assert!(is_script_uri("java\tscript:x"));
        assert!(!is_script_uri("https://example.com"));
    }
}
