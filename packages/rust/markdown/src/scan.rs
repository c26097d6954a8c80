//! Depth-counted tag scanning over raw markup.
//!
//! The preprocessor and the table reconstructor work on text that may be
//! badly nested or unclosed, so they locate element boundaries with a small
//! tokenizer instead of a full parse.

use regex::Regex;

/// HTML void elements: never have a close tag.
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is raw text up to the first matching close tag.
const RAW_TEXT_TAGS: &[&str] = &[
    "script", "style", "noscript", "iframe", "noembed", "noframes", "xmp", "textarea", "title",
];

/// How an element's extent is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContentModel {
    /// Nested elements of the same name are counted; `<x/>` stands alone.
    Normal,
    /// The opening token is the whole element.
    Void,
    /// Runs to the first matching close tag. Nothing inside is markup and a
    /// trailing `/` on the opener is ignored.
    RawText,
}

impl ContentModel {
    pub(crate) fn of(tag: &str) -> Self {
        if VOID_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            Self::Void
        } else if RAW_TEXT_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            Self::RawText
        } else {
            Self::Normal
        }
    }
}

/// One occurrence of a tag (`<x ...>`, `</x>` or `<x/>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TagToken {
    pub start: usize,
    pub end: usize,
    /// Lowercased tag name.
    pub name: String,
    pub closing: bool,
    pub self_closing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegionKind {
    /// Open tag with a matching close tag.
    Closed,
    /// Self-closing or void element; the region is the single token.
    Single,
    /// Open tag whose close never appears; the region runs to end of input.
    Unclosed,
    /// Close tag without an opener.
    StrayClose,
}

/// Outermost element span found by [`regions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Region {
    pub start: usize,
    pub end: usize,
    /// End of the opening tag (inner content starts here).
    pub inner_start: usize,
    /// Start of the closing tag (inner content ends here).
    pub inner_end: usize,
    pub kind: RegionKind,
}

/// A region together with the tag it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ElementRegion {
    pub tag: String,
    pub region: Region,
}

/// Build the token regex for a set of tag names. Matching is
/// case-insensitive and stops at the tag-name boundary (`b` never matches
/// `<br>`), but `<x/y>` still counts as an `x` tag.
pub(crate) fn tag_regex(tags: &[&str]) -> Option<Regex> {
    if tags.is_empty() {
        return None;
    }
    let names = tags.iter().map(|t| regex::escape(t)).collect::<Vec<_>>().join("|");
    let pattern = format!(r"(?i)<(/?)({names})(?:[\s/][^>]*?)??(/?)>");
    Regex::new(&pattern).ok()
}

/// All tokens for `tag`, in document order.
pub(crate) fn tokens(html: &str, tag: &str) -> Vec<TagToken> {
    tokens_of(html, &[tag])
}

fn tokens_of(html: &str, tags: &[&str]) -> Vec<TagToken> {
    let Some(re) = tag_regex(tags) else {
        return Vec::new();
    };
    re.captures_iter(html)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(TagToken {
                start: whole.start(),
                end: whole.end(),
                name: caps.get(2)?.as_str().to_ascii_lowercase(),
                closing: caps.get(1).is_some_and(|m| !m.as_str().is_empty()),
                self_closing: caps.get(3).is_some_and(|m| !m.as_str().is_empty()),
            })
        })
        .collect()
}

/// Outermost regions of `tag`, with nesting of the same tag counted unless
/// the tag is raw text or void.
pub(crate) fn regions(html: &str, tag: &str) -> Vec<Region> {
    element_regions(html, &[tag])
        .into_iter()
        .map(|e| e.region)
        .collect()
}

struct OpenElement {
    token: TagToken,
    depth: usize,
    raw: bool,
}

/// Outermost regions of any of `tags`, found in one left-to-right scan.
///
/// Inside a raw-text element only its own close tag is recognized, so a
/// literal `<script>` inside a script body, or `</object>` inside a style
/// sheet, never shifts a boundary.
pub(crate) fn element_regions(html: &str, tags: &[&str]) -> Vec<ElementRegion> {
    let mut out = Vec::new();
    let mut open: Option<OpenElement> = None;
    // Raw-text element nested inside the open region.
    let mut inner_raw: Option<String> = None;

    for tok in tokens_of(html, tags) {
        if let Some(name) = &inner_raw {
            if tok.closing && tok.name == *name {
                inner_raw = None;
            }
            continue;
        }

        let Some(current) = open.as_mut() else {
            let model = ContentModel::of(&tok.name);
            if tok.closing {
                out.push(single(&tok, RegionKind::StrayClose));
            } else if model == ContentModel::Void
                || (tok.self_closing && model == ContentModel::Normal)
            {
                out.push(single(&tok, RegionKind::Single));
            } else {
                open = Some(OpenElement {
                    token: tok,
                    depth: 1,
                    raw: model == ContentModel::RawText,
                });
            }
            continue;
        };

        if tok.name != current.token.name {
            if !current.raw && !tok.closing && ContentModel::of(&tok.name) == ContentModel::RawText {
                inner_raw = Some(tok.name);
            }
            continue;
        }

        if tok.closing {
            current.depth -= 1;
        } else if !current.raw && !tok.self_closing {
            current.depth += 1;
        }
        if current.depth == 0 {
            if let Some(start) = open.take() {
                out.push(ElementRegion {
                    region: Region {
                        start: start.token.start,
                        end: tok.end,
                        inner_start: start.token.end,
                        inner_end: tok.start,
                        kind: RegionKind::Closed,
                    },
                    tag: start.token.name,
                });
            }
        }
    }

    if let Some(start) = open {
        out.push(ElementRegion {
            region: Region {
                start: start.token.start,
                end: html.len(),
                inner_start: start.token.end,
                inner_end: html.len(),
                kind: RegionKind::Unclosed,
            },
            tag: start.token.name,
        });
    }

    out
}

fn single(tok: &TagToken, kind: RegionKind) -> ElementRegion {
    ElementRegion {
        tag: tok.name.clone(),
        region: Region {
            start: tok.start,
            end: tok.end,
            inner_start: tok.end,
            inner_end: tok.end,
            kind,
        },
    }
}

/// Replace each region with the output of `f`, keeping the text between.
pub(crate) fn splice_regions(
    html: &str,
    regions: &[Region],
    mut f: impl FnMut(&Region) -> String,
) -> String {
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    for region in regions {
        if region.start < cursor {
            continue;
        }
        out.push_str(&html[cursor..region.start]);
        out.push_str(&f(region));
        cursor = region.end;
    }
    out.push_str(&html[cursor..]);
    out
}

/// Remove every `tags` element together with its content.
pub(crate) fn remove_regions(html: &str, tags: &[&str]) -> String {
    let regions: Vec<Region> = element_regions(html, tags)
        .into_iter()
        .map(|e| e.region)
        .collect();
    if regions.is_empty() {
        return html.to_string();
    }
    splice_regions(html, &regions, |_| String::new())
}

/// Remove every token of `tag`, keeping the content between them.
pub(crate) fn strip_tokens(html: &str, tag: &str) -> (String, usize) {
    let toks = tokens(html, tag);
    if toks.is_empty() {
        return (html.to_string(), 0);
    }
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    for tok in &toks {
        out.push_str(&html[cursor..tok.start]);
        cursor = tok.end;
    }
    out.push_str(&html[cursor..]);
    (out, toks.len())
}
