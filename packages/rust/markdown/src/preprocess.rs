//! Markup preprocessing.
//!
//! Strips everything that must never reach the conversion engine: comments
//! and declarations, document scaffolding, dangerous elements, vendor
//! namespaced elements and vendor class/style noise. Each pass is a
//! `&str -> String` step applied in a fixed order; anomalies become
//! warnings, never errors.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument, warn};

use docmark_shared::ConversionConfiguration;

use crate::scan::{self, RegionKind};

/// Document metadata and stylesheet elements.
const METADATA_TAGS: &[&str] = &["head", "title", "meta", "link", "style", "base"];

/// Counters reported alongside the cleaned markup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreprocessStats {
    pub elements_removed: usize,
    pub attributes_stripped: usize,
    /// Set when the markup had been entity-encoded twice and was repaired
    /// before preprocessing.
    pub entities_decoded: bool,
}

/// Output of [`preprocess`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreprocessResult {
    pub cleaned_markup: String,
    pub warnings: Vec<String>,
    pub stats: PreprocessStats,
}

/// Clean normalized markup according to `config`. Never fails.
#[instrument(skip_all, fields(len = markup.len()))]
pub fn preprocess(markup: &str, config: &ConversionConfiguration) -> PreprocessResult {
    let mut result = PreprocessResult::default();

    let (text, removed) = remove_declarations_counted(markup);
    result.stats.elements_removed += removed;

    let mut text = extract_body(&text).unwrap_or(&text).to_string();

    let removable: Vec<&str> = METADATA_TAGS
        .iter()
        .copied()
        .chain(config.dangerous_tags.iter().map(String::as_str))
        .collect();
    text = remove_elements(&text, &removable, &mut result);
    for tag in &config.discard_wrapper_tags {
        let (next, n) = scan::strip_tokens(&text, tag);
        text = next;
        result.stats.elements_removed += n;
    }
    for tag in &config.unwrap_tags {
        text = scan::strip_tokens(&text, tag).0;
    }

    text = strip_namespaced(&text, config, &mut result);
    text = scrub_attributes(&text, config, &mut result.stats);

    debug!(
        len = text.len(),
        elements_removed = result.stats.elements_removed,
        attributes_stripped = result.stats.attributes_stripped,
        "preprocessing complete"
    );

    result.cleaned_markup = text;
    result
}

// ---------------------------------------------------------------------------
// Pass 1: Comments and declarations
// ---------------------------------------------------------------------------

/// Remove comments, conditional comments, doctype and processing instructions.
pub(crate) fn remove_declarations(html: &str) -> String {
    remove_declarations_counted(html).0
}

fn remove_declarations_counted(html: &str) -> (String, usize) {
    static DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)<!--.*?(?:-->|\z)|<!\[(?:if[^\]]*|endif)\]>|<!doctype[^>]*>|<\?[^>]*>")
            .expect("valid regex")
    });

    let count = DECL_RE.find_iter(html).count();
    if count == 0 {
        return (html.to_string(), 0);
    }
    (DECL_RE.replace_all(html, "").into_owned(), count)
}

// ---------------------------------------------------------------------------
// Pass 2: Body extraction
// ---------------------------------------------------------------------------

/// Content between the first `<body>` open tag and the last `</body>`.
///
/// Returns `None` when there is no body element at all.
pub(crate) fn extract_body(html: &str) -> Option<&str> {
    static OPEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)<body(?:\s[^>]*)?>").expect("valid regex"));
    static CLOSE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)</body\s*>").expect("valid regex"));

    let open = OPEN_RE.find(html)?;
    let end = CLOSE_RE
        .find_iter(html)
        .filter(|m| m.start() >= open.end())
        .last()
        .map_or(html.len(), |m| m.start());
    Some(&html[open.end()..end])
}

// ---------------------------------------------------------------------------
// Pass 3: Element removal (metadata and dangerous tags)
// ---------------------------------------------------------------------------

/// Remove every element named in `tags` together with its content, in one
/// scan so that raw-text content of one element never opens another.
fn remove_elements(html: &str, tags: &[&str], result: &mut PreprocessResult) -> String {
    let found = scan::element_regions(html, tags);
    if found.is_empty() {
        return html.to_string();
    }

    for element in &found {
        match element.region.kind {
            RegionKind::Unclosed => {
                let tag = element.tag.as_str();
                warn!(tag, offset = element.region.start, "unclosed element removed to end of input");
                result
                    .warnings
                    .push(format!("unclosed <{tag}> removed to end of input"));
                result.stats.elements_removed += 1;
            }
            RegionKind::StrayClose => {}
            RegionKind::Closed | RegionKind::Single => result.stats.elements_removed += 1,
        }
    }

    let regions: Vec<_> = found.iter().map(|e| e.region).collect();
    scan::splice_regions(html, &regions, |_| String::new())
}

// ---------------------------------------------------------------------------
// Pass 4: Vendor namespaced elements
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct NsToken {
    start: usize,
    end: usize,
    name: String,
    attrs: String,
    closing: bool,
    self_closing: bool,
    /// Open tag with a matching close later on.
    paired: bool,
}

/// Remove elements whose prefix is configured for stripping, content and
/// all, except keep-listed elements which survive even when nested inside a
/// stripped element. Kept self-closing elements become explicit open/close
/// pairs, and `xmlns:*` declarations are dropped.
fn strip_namespaced(
    html: &str,
    config: &ConversionConfiguration,
    result: &mut PreprocessResult,
) -> String {
    let text = strip_xmlns(html, &mut result.stats);
    let Some(re) = namespace_regex(&config.namespace_prefixes_to_strip) else {
        return text;
    };

    let mut toks: Vec<NsToken> = re
        .captures_iter(&text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(NsToken {
                start: whole.start(),
                end: whole.end(),
                name: caps[2].to_ascii_lowercase(),
                attrs: caps.get(3).map_or("", |m| m.as_str()).to_string(),
                closing: !caps[1].is_empty(),
                self_closing: caps.get(4).is_some_and(|m| !m.as_str().is_empty()),
                paired: false,
            })
        })
        .collect();
    if toks.is_empty() {
        return text;
    }

    // Pair open and close tokens by name so unclosed openers only drop the tag.
    let mut stack: Vec<usize> = Vec::new();
    for i in 0..toks.len() {
        if toks[i].self_closing {
            continue;
        }
        if !toks[i].closing {
            stack.push(i);
            continue;
        }
        if let Some(pos) = stack.iter().rposition(|&j| toks[j].name == toks[i].name) {
            toks[stack[pos]].paired = true;
            stack.truncate(pos);
        }
    }

    let keep: Vec<String> = config
        .namespaced_tags_to_keep
        .iter()
        .map(|k| k.to_ascii_lowercase())
        .collect();

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut depth = 0usize;

    for tok in &toks {
        if depth == 0 {
            out.push_str(&text[cursor..tok.start]);
        }
        cursor = tok.end;

        if keep.contains(&tok.name) {
            if tok.self_closing {
                out.push_str(&format!("<{}{}></{}>", tok.name, tok.attrs.trim_end(), tok.name));
            } else {
                out.push_str(&text[tok.start..tok.end]);
            }
            continue;
        }

        if tok.closing {
            depth = depth.saturating_sub(1);
        } else {
            result.stats.elements_removed += 1;
            if tok.paired {
                depth += 1;
            }
        }
    }
    if depth == 0 {
        out.push_str(&text[cursor..]);
    } else {
        result
            .warnings
            .push("unbalanced namespaced element; trailing content dropped".to_string());
    }

    out
}

fn namespace_regex(prefixes: &[String]) -> Option<Regex> {
    if prefixes.is_empty() {
        return None;
    }
    let alternation = prefixes
        .iter()
        .map(|p| regex::escape(p))
        .collect::<Vec<_>>()
        .join("|");
    let pattern =
        format!(r"(?i)<(/?)((?:{alternation}):[a-z0-9_.-]+)((?:\s[^>]*?)?)\s*(/?)>");
    Regex::new(&pattern).ok()
}

fn strip_xmlns(html: &str, stats: &mut PreprocessStats) -> String {
    static XMLNS_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?i)\s+xmlns:[a-z0-9_-]+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#)
            .expect("valid regex")
    });

    let count = XMLNS_RE.find_iter(html).count();
    if count == 0 {
        return html.to_string();
    }
    stats.attributes_stripped += count;
    XMLNS_RE.replace_all(html, "").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 5: Class and style scrubbing
// ---------------------------------------------------------------------------

/// Drop vendor class tokens and style declarations inside every start tag.
fn scrub_attributes(
    html: &str,
    config: &ConversionConfiguration,
    stats: &mut PreprocessStats,
) -> String {
    static START_TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<[a-zA-Z][^<>]*>").expect("valid regex"));
    static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?i)\s(class|style)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"']+))"#)
            .expect("valid regex")
    });

    if config.class_prefixes_to_strip.is_empty() && config.style_property_prefixes_to_strip.is_empty()
    {
        return html.to_string();
    }

    START_TAG_RE
        .replace_all(html, |tag: &regex::Captures| {
            ATTR_RE
                .replace_all(&tag[0], |attr: &regex::Captures| {
                    let name = attr[1].to_ascii_lowercase();
                    let value = attr
                        .get(2)
                        .or_else(|| attr.get(3))
                        .or_else(|| attr.get(4))
                        .map_or("", |m| m.as_str());
                    let cleaned = if name == "class" {
                        scrub_classes(value, &config.class_prefixes_to_strip)
                    } else {
                        scrub_style(value, &config.style_property_prefixes_to_strip)
                    };
                    if cleaned.is_empty() {
                        stats.attributes_stripped += 1;
                        String::new()
                    } else if cleaned == value {
                        attr[0].to_string()
                    } else {
                        format!(" {name}=\"{cleaned}\"")
                    }
                })
                .into_owned()
        })
        .into_owned()
}

fn has_prefix(item: &str, prefixes: &[String]) -> bool {
    let lower = item.to_ascii_lowercase();
    prefixes
        .iter()
        .any(|p| lower.starts_with(&p.to_ascii_lowercase()))
}

fn scrub_classes(value: &str, prefixes: &[String]) -> String {
    let kept: Vec<&str> = value
        .split_whitespace()
        .filter(|token| !has_prefix(token, prefixes))
        .collect();
    if kept.len() == value.split_whitespace().count() {
        return value.to_string();
    }
    kept.join(" ")
}

fn scrub_style(value: &str, prefixes: &[String]) -> String {
    let decls: Vec<&str> = value
        .split(';')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .collect();
    let kept: Vec<&str> = decls
        .iter()
        .copied()
        .filter(|decl| {
            let property = decl.split(':').next().unwrap_or_default().trim();
            !has_prefix(property, prefixes)
        })
        .collect();
    if kept.len() == decls.len() && !decls.is_empty() {
        return value.to_string();
    }
    kept.join("; ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn run(html: &str) -> PreprocessResult {
        preprocess(html, &ConversionConfiguration::default())
    }

    #[test]
    fn removes_script_with_content() {
        let out = run("<p>a</p><script>alert('x')</script><p>b</p>");
        assert_eq!(out.cleaned_markup, "<p>a</p><p>b</p>");
        assert_eq!(out.stats.elements_removed, 1);
    }

    #[test]
    fn removes_nested_and_uppercase_dangerous_elements() {
        let out = run("<OBJECT>a<object>b</object>c</OBJECT><p>keep</p><noscript>n</noscript>");
        assert_eq!(out.cleaned_markup, "<p>keep</p>");
    }

    #[test]
    fn script_body_cannot_nest() {
        let out = run("<script>var s='<script>';</script><p>Important</p>");
        assert_eq!(out.cleaned_markup, "<p>Important</p>");
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn slash_forms_of_script_removed_with_body() {
        let out = run("<p>a</p><script/>alert(1)</script><p>b</p><pre><script/x>alert(2)</script>tail</pre>");
        assert_eq!(out.cleaned_markup, "<p>a</p><p>b</p><pre>tail</pre>");
    }

    #[test]
    fn tags_inside_style_sheet_are_text() {
        let out = run("<style>a::after{content:'<script>'}</style><p>kept</p>");
        assert_eq!(out.cleaned_markup, "<p>kept</p>");
    }

    #[test]
    fn self_closing_and_void_dangerous_forms() {
        let out = run("<p>x</p><embed src=\"a.swf\"><object data=\"y\"/><p>z</p>");
        assert_eq!(out.cleaned_markup, "<p>x</p><p>z</p>");
    }

    #[test]
    fn unclosed_dangerous_element_warns() {
        let out = run("<p>safe</p><script>never closed");
        assert_eq!(out.cleaned_markup, "<p>safe</p>");
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn comments_and_conditionals_removed() {
        let html = "<!DOCTYPE html><!--[if gte mso 9]><xml>junk</xml><![endif]--><p><![if !supportLists]>1.<![endif]>Item</p><!-- note -->";
        let out = run(html);
        assert_eq!(out.cleaned_markup, "<p>1.Item</p>");
    }

    #[test]
    fn body_region_extracted() {
        let html = "<html><head><title>T</title><style>.a{}</style></head><body class=\"b\"><p>Hello World</p></body></html>";
        assert_eq!(run(html).cleaned_markup, "<p>Hello World</p>");
    }

    #[test]
    fn nested_duplicate_wrappers_keep_content() {
        let html = "<html><div><html><p>Hello World</p></html><p>Second</p></div></html>";
        let out = run(html);
        assert_eq!(out.cleaned_markup, "<div><p>Hello World</p><p>Second</p></div>");
    }

    #[test]
    fn duplicate_body_tags_keep_content_between() {
        let html = "<body><p>one</p><body><p>two</p></body><p>three</p></body>";
        let out = run(html);
        assert!(out.cleaned_markup.contains("one"));
        assert!(out.cleaned_markup.contains("two"));
        assert!(out.cleaned_markup.contains("three"));
        assert!(!out.cleaned_markup.contains("body"));
    }

    #[test]
    fn unwrap_tags_keep_text() {
        let out = run("<p><font face=\"Arial\">Styled</font> <center>mid</center></p>");
        assert_eq!(out.cleaned_markup, "<p>Styled mid</p>");
    }

    #[test]
    fn office_namespaces_stripped() {
        let html = "<p class=\"MsoNormal\">Text<o:p></o:p></p><w:Sdt><p>hidden</p></w:Sdt><st1:place>Paris</st1:place>";
        let out = run(html);
        assert_eq!(out.cleaned_markup, "<p>Text</p>");
    }

    #[test]
    fn keep_list_survives_inside_stripped_element() {
        let html = r#"<v:shape id="s1" style="width:10pt"><v:imagedata src="img/a.png" o:title=""/></v:shape>"#;
        let out = run(html);
        assert_eq!(
            out.cleaned_markup,
            r#"<v:imagedata src="img/a.png" o:title=""></v:imagedata>"#
        );
    }

    #[test]
    fn unclosed_namespaced_tag_only_drops_token() {
        let out = run("<p>A<o:p>B</p>");
        assert_eq!(out.cleaned_markup, "<p>AB</p>");
    }

    #[test]
    fn xmlns_attributes_dropped() {
        let out = run(r#"<div xmlns:o="urn:schemas-microsoft-com:office:office"><p>x</p></div>"#);
        assert_eq!(out.cleaned_markup, "<div><p>x</p></div>");
        assert_eq!(out.stats.attributes_stripped, 1);
    }

    #[test]
    fn vendor_classes_and_styles_scrubbed() {
        let html = r#"<p class="MsoNormal intro" style="mso-margin-top-alt:auto; color: red">x</p><span class="MsoHyperlink" style="mso-bidi-font-size:11pt">y</span>"#;
        let out = run(html);
        assert_eq!(
            out.cleaned_markup,
            r#"<p class="intro" style="color: red">x</p><span>y</span>"#
        );
        assert_eq!(out.stats.attributes_stripped, 2);
    }

    #[test]
    fn attribute_like_text_outside_tags_untouched() {
        let out = run("<p>set class=\"MsoNormal\" manually</p>");
        assert_eq!(out.cleaned_markup, "<p>set class=\"MsoNormal\" manually</p>");
    }

    #[test]
    fn overriding_one_list_keeps_other_defaults() {
        let config = ConversionConfiguration {
            dangerous_tags: vec!["marquee".into()],
            ..ConversionConfiguration::default()
        };
        let out = preprocess("<marquee>x</marquee><p class=\"MsoNormal\">y</p>", &config);
        assert_eq!(out.cleaned_markup, "<p>y</p>");
    }
}
