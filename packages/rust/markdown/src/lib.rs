//! Markup-to-Markdown conversion pipeline.
//!
//! Converts rich-document and clipboard markup into canonical Markdown in
//! forward-only stages: normalization, preprocessing, rule-based tree
//! conversion, structural post-processing and canonicalization. Every stage
//! is a pure function; malformed input produces warnings, never errors.

pub mod canonical;
pub mod engine;
pub mod invariants;
pub mod normalize;
pub mod postprocess;
pub mod preprocess;
pub mod table;

mod scan;

use tracing::{debug, instrument};

use docmark_shared::{ConversionConfiguration, ConvertSettings, HeadingStrategy, MarkdownFlavor};

pub use canonical::canonicalize;
pub use engine::{Engine, Mode, Rule, RuleInput, Shape};
pub use invariants::{InvariantRule, InvariantViolation, check_all_invariants, check_invariants};
pub use normalize::{Normalized, is_double_encoded, normalize};
pub use postprocess::{
    HeadingAnchor, HeadingIndex, HeadingRecord, ORPHAN_PLACEHOLDER, OrphanDataUri,
    OrphanDataUriReport, anchor_id, guard_orphan_data_uris, infer_heading_depths,
    repair_toc_links, verify_anchor_links,
};
pub use preprocess::{PreprocessResult, PreprocessStats, preprocess};
pub use table::{convert_table, try_convert_table};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOptions {
    pub flavor: MarkdownFlavor,
    pub heading_strategy: HeadingStrategy,
    /// Wrap plain paragraphs at this width; `None` leaves lines whole.
    pub line_wrap_width: Option<usize>,
    pub preprocess: ConversionConfiguration,
}

impl PipelineOptions {
    /// Options matching a user's conversion settings.
    pub fn from_settings(settings: &ConvertSettings, preprocess: &ConversionConfiguration) -> Self {
        Self {
            flavor: settings.markdown_flavor,
            heading_strategy: settings.heading_strategy,
            line_wrap_width: settings.line_wrap_width,
            preprocess: preprocess.clone(),
        }
    }
}

/// Result of converting one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkdownOutput {
    /// Canonical Markdown; empty, or ending with exactly one `\n`.
    pub markdown: String,
    /// Recovered problems, in stage order.
    pub warnings: Vec<String>,
    pub stats: PreprocessStats,
    pub orphans: Vec<OrphanDataUri>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Convert markup to canonical Markdown with the shared engine for the
/// configured flavor.
///
/// This is the main entry point. It:
/// 1. Normalizes line endings, embedded sub-documents and double encoding
/// 2. Strips dangerous content, wrappers and vendor artifacts
/// 3. Converts the tree with the rule engine (tables reconstructed inline)
/// 4. Repairs stale TOC links and re-levels outline-numbered headings
/// 5. Guards orphaned inline image data and verifies in-document links
/// 6. Canonicalizes the result
pub fn convert(markup: &str, options: &PipelineOptions) -> MarkdownOutput {
    convert_with_engine(markup, options, Engine::shared(options.flavor))
}

/// Same as [`convert`], with a caller-supplied engine (custom rules).
#[instrument(skip_all, fields(len = markup.len(), flavor = ?engine.flavor()))]
pub fn convert_with_engine(markup: &str, options: &PipelineOptions, engine: &Engine) -> MarkdownOutput {
    if markup.trim().is_empty() {
        return MarkdownOutput::default();
    }

    let normalized = normalize(markup);
    let mut warnings = normalized.warnings;

    let cleaned = preprocess(&normalized.markup, &options.preprocess);
    warnings.extend(cleaned.warnings);
    let mut stats = cleaned.stats;
    stats.entities_decoded |= normalized.entities_decoded > 0;

    let md = engine.convert(&cleaned.cleaned_markup);
    let md = repair_toc_links(&md);
    let md = infer_heading_depths(&md, options.heading_strategy);

    let report = guard_orphan_data_uris(&md);
    warnings.extend(report.orphans.iter().map(|orphan| {
        format!(
            "inline {} image of about {} bytes was not extracted",
            orphan.mime_type, orphan.approximate_byte_size
        )
    }));
    warnings.extend(verify_anchor_links(&report.cleaned_markdown));

    let markdown = canonicalize(&report.cleaned_markdown, options.line_wrap_width);

    debug!(
        output_len = markdown.len(),
        warnings = warnings.len(),
        orphans = report.orphans.len(),
        "conversion complete"
    );

    MarkdownOutput {
        markdown,
        warnings,
        stats,
        orphans: report.orphans,
    }
}
