//! Rule-based tree-to-Markdown conversion.
//!
//! Every element is classified into a [`Shape`]; the engine keeps one
//! [`Rule`] per shape and walks the parsed tree once, depth-first,
//! converting children before their parent. Vendor shapes (citation anchors,
//! cards) are recognized at classification time, so supporting a new one
//! means adding a variant and a rule rather than another text pass.
//!
//! The walk uses an explicit stack, so nesting depth is bounded by memory
//! rather than by the call stack.

mod rules;
pub mod text;

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use ego_tree::NodeRef;
use scraper::node::Element;
use scraper::{ElementRef, Html, Node};

use docmark_shared::MarkdownFlavor;

/// Structural shape of an element, as far as Markdown output is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Heading,
    Paragraph,
    Image,
    LineBreak,
    Strong,
    Emphasis,
    Strikethrough,
    InlineCode,
    CodeBlock,
    Link,
    /// Anchor without a target carrying a grouped-citation payload.
    Citation,
    /// Insight/metric/summary card container.
    Card,
    List,
    ListItem,
    Blockquote,
    Table,
    ThematicBreak,
    Superscript,
    Subscript,
    Checkbox,
    Summary,
    /// Generic block container.
    Block,
    /// Contributes only its children.
    Transparent,
    /// Dropped together with its content.
    Discard,
}

/// Elements dropped together with their content wherever they appear.
pub(crate) const DISCARD_TAGS: &[&str] = &[
    "script", "style", "head", "title", "meta", "link", "noscript", "template", "object", "embed",
    "applet", "iframe", "frame", "frameset", "svg", "button", "select", "option", "textarea",
    "input", "canvas", "audio", "video", "map", "math",
];

/// Class fragments that mark a vendor card container.
const CARD_CLASS_FRAGMENTS: &[&str] = &["insight-card", "metric-card", "summary-card"];

impl Shape {
    /// Classify an element. Vendor shapes win over the plain tag table.
    pub fn classify(el: &Element) -> Self {
        let name = el.name();

        if name == "a" && el.attr("href").is_none() && el.attr("data-grouped-citations").is_some() {
            return Self::Citation;
        }
        if el
            .attr("class")
            .is_some_and(|class| CARD_CLASS_FRAGMENTS.iter().any(|f| class.contains(f)))
        {
            return Self::Card;
        }

        match name {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Self::Heading,
            "p" => Self::Paragraph,
            "img" | "v:imagedata" => Self::Image,
            "br" => Self::LineBreak,
            "strong" | "b" => Self::Strong,
            "em" | "i" => Self::Emphasis,
            "s" | "del" | "strike" => Self::Strikethrough,
            "code" | "kbd" | "samp" | "tt" => Self::InlineCode,
            "pre" | "listing" | "xmp" => Self::CodeBlock,
            "a" if el.attr("href").is_some() => Self::Link,
            "ul" | "ol" | "menu" => Self::List,
            "li" => Self::ListItem,
            "blockquote" => Self::Blockquote,
            "table" => Self::Table,
            "hr" => Self::ThematicBreak,
            "sup" => Self::Superscript,
            "sub" => Self::Subscript,
            "input" if el.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("checkbox")) => {
                Self::Checkbox
            }
            "summary" => Self::Summary,
            "div" | "section" | "article" | "main" | "header" | "footer" | "aside" | "nav"
            | "figure" | "figcaption" | "address" | "details" | "dl" | "dt" | "dd" | "fieldset"
            | "form" | "hgroup" | "center" => Self::Block,
            _ if DISCARD_TAGS.contains(&name) => Self::Discard,
            _ => Self::Transparent,
        }
    }

    /// Opaque shapes read their element directly; the walker does not
    /// descend into them.
    fn is_opaque(self) -> bool {
        matches!(
            self,
            Self::CodeBlock
                | Self::InlineCode
                | Self::Citation
                | Self::Card
                | Self::Table
                | Self::Image
                | Self::Checkbox
                | Self::Discard
        )
    }
}

/// Whether block shapes render as blocks or collapse into inline text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Document,
    /// Used for table cells: no line structure survives.
    Inline,
}

/// Everything a rule may look at.
pub struct RuleInput<'a> {
    pub element: ElementRef<'a>,
    /// Already-converted children; empty for opaque shapes.
    pub content: &'a str,
    pub engine: &'a Engine,
}

impl<'a> RuleInput<'a> {
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.element.value().attr(name)
    }

    pub fn tag(&self) -> &'a str {
        self.element.value().name()
    }

    pub fn is_inline(&self) -> bool {
        self.engine.mode() == Mode::Inline
    }
}

/// A conversion rule: element plus converted children to Markdown text.
pub type Rule = fn(&RuleInput<'_>) -> String;

/// Immutable rule table plus output settings.
#[derive(Clone)]
pub struct Engine {
    flavor: MarkdownFlavor,
    mode: Mode,
    rules: HashMap<Shape, Rule>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("flavor", &self.flavor)
            .field("mode", &self.mode)
            .field("rules", &self.rules.len())
            .finish()
    }
}

static GFM: LazyLock<Engine> = LazyLock::new(|| Engine::new(MarkdownFlavor::Gfm, Mode::Document));
static COMMONMARK: LazyLock<Engine> =
    LazyLock::new(|| Engine::new(MarkdownFlavor::Commonmark, Mode::Document));
static CELL: LazyLock<Engine> =
    LazyLock::new(|| Engine::new(MarkdownFlavor::Commonmark, Mode::Inline));

impl Engine {
    /// Build an engine with the default rule set.
    pub fn new(flavor: MarkdownFlavor, mode: Mode) -> Self {
        Self {
            flavor,
            mode,
            rules: rules::defaults(),
        }
    }

    /// Process-wide document engine for `flavor`.
    pub fn shared(flavor: MarkdownFlavor) -> &'static Engine {
        match flavor {
            MarkdownFlavor::Gfm => &GFM,
            MarkdownFlavor::Commonmark => &COMMONMARK,
        }
    }

    /// Process-wide inline engine used for table cells.
    pub fn cell() -> &'static Engine {
        &CELL
    }

    /// Replace the rule for one shape.
    pub fn with_rule(mut self, shape: Shape, rule: Rule) -> Self {
        self.rules.insert(shape, rule);
        self
    }

    pub fn flavor(&self) -> MarkdownFlavor {
        self.flavor
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Parse `markup` as a fragment and convert it.
    pub fn convert(&self, markup: &str) -> String {
        let fragment = Html::parse_fragment(markup);
        self.render(fragment.root_element().children().collect())
    }

    /// Convert the children of `el`.
    pub fn render_children(&self, el: ElementRef<'_>) -> String {
        self.render(el.children().collect())
    }

    /// Convert a single node, element or text.
    pub fn render_node(&self, node: NodeRef<'_, Node>) -> String {
        self.render(vec![node])
    }

    fn apply(&self, shape: Shape, element: ElementRef<'_>, content: &str) -> String {
        match self.rules.get(&shape) {
            Some(rule) => rule(&RuleInput {
                element,
                content,
                engine: self,
            }),
            None => content.to_string(),
        }
    }

    fn render<'a>(&self, roots: Vec<NodeRef<'a, Node>>) -> String {
        enum Step<'a> {
            Visit(NodeRef<'a, Node>),
            Finish(ElementRef<'a>, Shape),
        }

        let mut stack: Vec<Step<'a>> = roots.into_iter().rev().map(Step::Visit).collect();
        let mut buffers: Vec<String> = vec![String::new()];

        while let Some(step) = stack.pop() {
            match step {
                Step::Visit(node) => match node.value() {
                    Node::Text(text) => {
                        if let Some(buf) = buffers.last_mut() {
                            push_text(buf, text);
                        }
                    }
                    Node::Element(el) => {
                        let Some(element) = ElementRef::wrap(node) else {
                            continue;
                        };
                        let shape = Shape::classify(el);
                        if shape.is_opaque() {
                            let out = self.apply(shape, element, "");
                            if let Some(buf) = buffers.last_mut() {
                                push_rendered(buf, &out);
                            }
                        } else {
                            buffers.push(String::new());
                            stack.push(Step::Finish(element, shape));
                            stack.extend(node.children().rev().map(Step::Visit));
                        }
                    }
                    _ => {}
                },
                Step::Finish(element, shape) => {
                    let content = buffers.pop().unwrap_or_default();
                    let out = self.apply(shape, element, &content);
                    if let Some(buf) = buffers.last_mut() {
                        push_rendered(buf, &out);
                    }
                }
            }
        }

        buffers.into_iter().next().unwrap_or_default()
    }
}

/// Append a text node: whitespace collapsed, Markdown characters escaped.
fn push_text(buf: &mut String, raw: &str) {
    let collapsed = text::collapse_whitespace(raw);
    let collapsed = if buf.ends_with('\n') || buf.ends_with(' ') {
        collapsed.trim_start_matches(' ')
    } else {
        collapsed.as_str()
    };
    if collapsed.is_empty() {
        return;
    }
    let at_line_start = buf.is_empty() || buf.ends_with('\n');
    buf.push_str(&text::escape_text(collapsed, at_line_start));
}

/// Append rule output. Adjacent block separators overlap instead of
/// stacking, so two blocks are always one blank line apart.
fn push_rendered(buf: &mut String, out: &str) {
    let mut out = out;
    if out.starts_with('\n') {
        let kept = buf.trim_end_matches(' ').len();
        buf.truncate(kept);
        let trailing = buf.len() - buf.trim_end_matches('\n').len();
        let leading = out.len() - out.trim_start_matches('\n').len();
        out = &out[trailing.min(leading)..];
    } else if buf.ends_with('\n') {
        out = out.trim_start_matches(' ');
    }
    buf.push_str(out);
}
