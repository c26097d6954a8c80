//! Default conversion rules, one per [`Shape`].

use std::collections::HashMap;

use ego_tree::NodeRef;
use scraper::node::Element;
use scraper::{ElementRef, Node};
use serde::Deserialize;

use docmark_shared::MarkdownFlavor;

use super::text;
use super::{Rule, RuleInput, Shape};

pub(super) fn defaults() -> HashMap<Shape, Rule> {
    let table: [(Shape, Rule); 24] = [
        (Shape::Heading, heading),
        (Shape::Paragraph, paragraph),
        (Shape::Image, image),
        (Shape::LineBreak, line_break),
        (Shape::Strong, strong),
        (Shape::Emphasis, emphasis),
        (Shape::Strikethrough, strikethrough),
        (Shape::InlineCode, inline_code),
        (Shape::CodeBlock, code_block),
        (Shape::Link, link),
        (Shape::Citation, citation),
        (Shape::Card, card),
        (Shape::List, list),
        (Shape::ListItem, list_item),
        (Shape::Blockquote, blockquote),
        (Shape::Table, table),
        (Shape::ThematicBreak, thematic_break),
        (Shape::Superscript, superscript),
        (Shape::Subscript, subscript),
        (Shape::Checkbox, checkbox),
        (Shape::Summary, summary),
        (Shape::Block, block),
        (Shape::Transparent, transparent),
        (Shape::Discard, discard),
    ];
    table.into_iter().collect()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn as_block(text: &str) -> String {
    if text.is_empty() {
        String::new()
    } else {
        format!("\n\n{text}\n\n")
    }
}

fn single_line(text: &str) -> String {
    text::collapse_whitespace(text.trim()).trim().to_string()
}

fn inline_text(text: &str) -> String {
    let line = single_line(text);
    if line.is_empty() {
        line
    } else {
        format!("{line} ")
    }
}

fn parent_element<'a>(el: ElementRef<'a>) -> Option<ElementRef<'a>> {
    el.parent().and_then(ElementRef::wrap)
}

fn has_class_fragment(el: &Element, fragments: &[&str]) -> bool {
    el.classes()
        .any(|class| fragments.iter().any(|f| class.to_ascii_lowercase().contains(f)))
}

/// Whether `node` lies outside every discarded element below `root`.
fn is_visible(node: NodeRef<'_, Node>, root: ElementRef<'_>) -> bool {
    std::iter::once(node)
        .chain(node.ancestors().take_while(|a| a.id() != root.id()))
        .filter_map(|n| n.value().as_element())
        .all(|e| Shape::classify(e) != Shape::Discard)
}

/// Text nodes of `el` in document order, discarded subtrees excluded.
fn visible_text(el: ElementRef<'_>) -> Vec<&str> {
    el.descendants()
        .filter(|node| is_visible(*node, el))
        .filter_map(|node| node.value().as_text().map(|text| &**text))
        .collect()
}

fn element_text(el: ElementRef<'_>) -> String {
    single_line(&visible_text(el).join(" "))
}

// ---------------------------------------------------------------------------
// Block rules
// ---------------------------------------------------------------------------

fn heading(input: &RuleInput<'_>) -> String {
    let text = single_line(input.content);
    if text.is_empty() {
        return String::new();
    }
    if input.is_inline() {
        return format!("{text} ");
    }
    let level = input.tag()[1..].parse::<usize>().unwrap_or(1).clamp(1, 6);
    format!("\n\n{} {text}\n\n", "#".repeat(level))
}

fn paragraph(input: &RuleInput<'_>) -> String {
    if input.is_inline() {
        return inline_text(input.content);
    }
    as_block(input.content.trim())
}

fn block(input: &RuleInput<'_>) -> String {
    if input.is_inline() {
        return inline_text(input.content);
    }
    as_block(input.content.trim())
}

fn summary(input: &RuleInput<'_>) -> String {
    let text = single_line(input.content);
    if text.is_empty() {
        return String::new();
    }
    if input.is_inline() {
        return format!("**{text}** ");
    }
    as_block(&format!("**{text}**"))
}

fn blockquote(input: &RuleInput<'_>) -> String {
    if input.is_inline() {
        return inline_text(input.content);
    }
    as_block(&quote_lines(input.content.trim()))
}

fn quote_lines(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.trim().is_empty() {
                ">".to_string()
            } else {
                format!("> {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn thematic_break(input: &RuleInput<'_>) -> String {
    if input.is_inline() {
        " ".to_string()
    } else {
        "\n\n---\n\n".to_string()
    }
}

fn code_block(input: &RuleInput<'_>) -> String {
    let code = pre_text(input.element);
    if input.is_inline() {
        let span = text::code_span(&single_line(&code));
        return if span.is_empty() { span } else { format!("{span} ") };
    }

    let code = code.trim_end_matches(['\n', ' ', '\t']);
    let code = code.strip_prefix('\n').unwrap_or(code);
    if code.trim().is_empty() {
        return String::new();
    }
    let fence = text::code_fence(code);
    let language = code_language(input.element).unwrap_or_default();
    format!("\n\n{fence}{language}\n{code}\n{fence}\n\n")
}

/// Raw text of a preformatted element, with `<br>` as newlines.
fn pre_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in el.descendants().filter(|node| is_visible(*node, el)) {
        if let Some(text) = node.value().as_text() {
            out.push_str(text);
        } else if node.value().as_element().is_some_and(|e| e.name() == "br") {
            out.push('\n');
        }
    }
    out
}

/// Language hint from `language-*`, `lang-*` or `highlight-*` classes on the
/// block or its first `code` child.
fn code_language(el: ElementRef<'_>) -> Option<String> {
    let from_classes = |e: &Element| {
        e.classes().find_map(|class| {
            ["language-", "lang-", "highlight-"]
                .iter()
                .find_map(|prefix| class.strip_prefix(prefix))
                .filter(|lang| !lang.is_empty())
                .map(str::to_string)
        })
    };

    from_classes(el.value()).or_else(|| {
        el.descendants()
            .filter_map(|n| n.value().as_element())
            .find(|e| e.name() == "code")
            .and_then(from_classes)
    })
}

fn list(input: &RuleInput<'_>) -> String {
    if input.is_inline() {
        return input.content.to_string();
    }
    let content = input.content.trim_matches('\n');
    if content.trim().is_empty() {
        return String::new();
    }
    let nested = parent_element(input.element).is_some_and(|p| p.value().name() == "li");
    if nested {
        format!("\n{content}\n")
    } else {
        as_block(content)
    }
}

fn list_item(input: &RuleInput<'_>) -> String {
    let content = input.content.trim();
    if content.is_empty() {
        return String::new();
    }
    if input.is_inline() {
        return inline_text(content);
    }

    let marker = list_marker(input.element);
    let indent = " ".repeat(marker.chars().count());
    let mut out = marker;
    for (i, line) in content.lines().enumerate() {
        if i > 0 {
            out.push('\n');
            if !line.is_empty() {
                out.push_str(&indent);
            }
        }
        out.push_str(line);
    }
    out.push('\n');
    out
}

fn list_marker(item: ElementRef<'_>) -> String {
    let Some(parent) = parent_element(item) else {
        return "- ".to_string();
    };
    if parent.value().name() != "ol" {
        return "- ".to_string();
    }
    let start = parent
        .value()
        .attr("start")
        .and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(1);
    let position = item
        .prev_siblings()
        .filter(|n| n.value().as_element().is_some_and(|e| e.name() == "li"))
        .count() as i64;
    format!("{}. ", start + position)
}

fn table(input: &RuleInput<'_>) -> String {
    if input.is_inline() {
        return inline_text(&element_text(input.element));
    }
    match crate::table::try_convert_table(&input.element.html()) {
        Some(md) => as_block(&md),
        None => as_block(input.engine.render_children(input.element).trim()),
    }
}

/// Vendor card: icon and heading merged into one bold line, body quoted.
fn card(input: &RuleInput<'_>) -> String {
    let el = input.element;
    let inner = || el.descendants().skip(1).filter_map(ElementRef::wrap);

    let icon = inner().find(|e| has_class_fragment(e.value(), &["icon", "emoji"]));
    let title = inner().find(|e| {
        matches!(e.value().name(), "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
            || has_class_fragment(e.value(), &["title", "heading"])
    });
    let skipped: Vec<_> = icon.iter().chain(title.iter()).map(|e| e.id()).collect();

    let mut body = String::new();
    for child in el.children() {
        if child.descendants().any(|d| skipped.contains(&d.id())) {
            continue;
        }
        body.push_str(&input.engine.render_node(child));
    }

    let headline = [icon, title]
        .iter()
        .flatten()
        .map(|e| element_text(*e))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let headline = text::escape_text(&headline, false);
    let body = body.trim();

    if input.is_inline() {
        let lead = if headline.is_empty() { String::new() } else { format!("**{headline}** ") };
        return format!("{lead}{}", inline_text(body));
    }

    let mut lines = Vec::new();
    if !headline.is_empty() {
        lines.push(format!("> **{headline}**"));
    }
    if !body.is_empty() {
        lines.push(quote_lines(body));
    }
    as_block(&lines.join("\n"))
}

// ---------------------------------------------------------------------------
// Inline rules
// ---------------------------------------------------------------------------

fn transparent(input: &RuleInput<'_>) -> String {
    input.content.to_string()
}

fn discard(_: &RuleInput<'_>) -> String {
    String::new()
}

fn line_break(input: &RuleInput<'_>) -> String {
    let out = if input.is_inline() { " " } else { "\n" };
    out.to_string()
}

fn strong(input: &RuleInput<'_>) -> String {
    text::delimit(&without_strong_markers(input.content), "**")
}

/// Drop the `**` markers of strong spans nested in `content`; the outer span
/// already covers them. Code spans and escapes are copied as they are.
fn without_strong_markers(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut fence: Option<usize> = None;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '`' => {
                let mut run = 1;
                while chars.next_if_eq(&'`').is_some() {
                    run += 1;
                }
                out.push_str(&"`".repeat(run));
                fence = match fence {
                    None => Some(run),
                    Some(open) if open == run => None,
                    open => open,
                };
            }
            '\\' if fence.is_none() => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '*' if fence.is_none() && chars.next_if_eq(&'*').is_some() => {}
            _ => out.push(c),
        }
    }
    out
}

fn emphasis(input: &RuleInput<'_>) -> String {
    text::delimit(input.content, "*")
}

fn strikethrough(input: &RuleInput<'_>) -> String {
    match input.engine.flavor() {
        MarkdownFlavor::Gfm => text::delimit(input.content, "~~"),
        MarkdownFlavor::Commonmark => input.content.to_string(),
    }
}

fn inline_code(input: &RuleInput<'_>) -> String {
    let raw = visible_text(input.element).concat();
    text::code_span(&text::collapse_whitespace(&raw))
}

fn image(input: &RuleInput<'_>) -> String {
    let src = input.attr("src").map(str::trim).unwrap_or_default();
    if src.is_empty() {
        return String::new();
    }
    let alt = input
        .attr("alt")
        .or_else(|| input.attr("o:title"))
        .unwrap_or_default();
    let alt = text::escape_brackets(&single_line(alt));

    let target = if src.get(..5).is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:")) {
        // Exported payloads are often wrapped across lines.
        src.split_whitespace().collect::<String>()
    } else if text::is_external_target(src) {
        text::encode_link_target(src)
    } else {
        text::encode_path(src)
    };

    match input.attr("title").map(single_line).filter(|t| !t.is_empty()) {
        Some(title) => format!("![{alt}]({target} \"{}\")", title.replace('"', "\\\"")),
        None => format!("![{alt}]({target})"),
    }
}

fn link(input: &RuleInput<'_>) -> String {
    let href = input.attr("href").map(str::trim).unwrap_or_default();
    if href.is_empty() || text::is_script_uri(href) {
        return input.content.to_string();
    }
    let label = single_line(input.content);
    if label.is_empty() {
        return String::new();
    }

    let target = text::encode_link_target(href);
    let link = match input.attr("title").map(single_line).filter(|t| !t.is_empty()) {
        Some(title) => format!("[{label}]({target} \"{}\")", title.replace('"', "\\\"")),
        None => format!("[{label}]({target})"),
    };

    let content = input.content;
    let leading = if content.starts_with(char::is_whitespace) { " " } else { "" };
    let trailing = if content.ends_with(char::is_whitespace) { " " } else { "" };
    format!("{leading}{link}{trailing}")
}

/// One referenced document inside a grouped-citation payload.
#[derive(Debug, Deserialize)]
struct CitedDocument {
    #[serde(default)]
    url: String,
    #[serde(default)]
    name: String,
}

/// Citation anchor: one link per referenced document; icon and badge
/// decoration inside the anchor is dropped.
fn citation(input: &RuleInput<'_>) -> String {
    let payload = input.attr("data-grouped-citations").unwrap_or_default();
    let documents: Vec<CitedDocument> = serde_json::from_str(payload).unwrap_or_default();

    let links: Vec<String> = documents
        .iter()
        .filter(|doc| !doc.url.trim().is_empty() && !text::is_script_uri(&doc.url))
        .map(|doc| {
            let name = single_line(&doc.name);
            let label = if name.is_empty() { doc.url.trim().to_string() } else { name };
            format!(
                "[{}]({})",
                text::escape_brackets(&label),
                text::encode_link_target(&doc.url)
            )
        })
        .collect();

    if links.is_empty() {
        return input.engine.render_children(input.element);
    }
    links.join(" ")
}

fn superscript(input: &RuleInput<'_>) -> String {
    script_marker(input, "^")
}

fn subscript(input: &RuleInput<'_>) -> String {
    script_marker(input, "~")
}

/// Numeric super/subscripts are footnote references; anything else keeps
/// inline markers.
fn script_marker(input: &RuleInput<'_>, marker: &str) -> String {
    let raw = element_text(input.element);
    let bare = raw.trim_start_matches('[').trim_end_matches(']').trim();
    if !bare.is_empty() && bare.chars().all(|c| c.is_ascii_digit()) {
        return format!("[^{bare}]");
    }
    let content = input.content.trim();
    if content.is_empty() {
        return String::new();
    }
    format!("{marker}{content}{marker}")
}

fn checkbox(input: &RuleInput<'_>) -> String {
    if input.engine.flavor() != MarkdownFlavor::Gfm {
        return String::new();
    }
    if input.attr("checked").is_some() {
        "[x] ".to_string()
    } else {
        "[ ] ".to_string()
    }
}
