//! End-to-end conversion of a source into Markdown plus image assets.
//!
//! Extraction (or clipboard image processing) feeds the markup pipeline;
//! the result is checked so every relative image link resolves to an
//! extracted asset.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use docmark_markdown::engine::text::is_external_target;
use docmark_markdown::postprocess::map_prose_lines;
use docmark_markdown::{ORPHAN_PLACEHOLDER, PipelineOptions};
use docmark_shared::{
    AssetNaming, ConversionConfiguration, ConversionResult, ConversionSource, ConvertSettings,
    DocmarkError, ImageAsset, Result,
};

use crate::extract::DocumentExtractor;
use crate::images::extract_clipboard;
use crate::output::document_name;

/// Warning attached to documents with no visible content.
pub const EMPTY_DOCUMENT_WARNING: &str = "Document is empty or contains only whitespace";

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for batch conversions.
pub trait ProgressReporter: Send + Sync {
    fn phase(&self, name: &str);
    fn document_converted(&self, path: &Path, current: usize, total: usize);
    fn document_failed(&self, path: &Path, error: &DocmarkError, current: usize, total: usize);
    fn done(&self, summary: &BatchSummary);
}

/// No-op reporter.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn document_converted(&self, _path: &Path, _current: usize, _total: usize) {}
    fn document_failed(&self, _path: &Path, _error: &DocmarkError, _current: usize, _total: usize) {}
    fn done(&self, _summary: &BatchSummary) {}
}

/// Counts for a finished batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub converted: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

/// Outcome for one document of a batch.
#[derive(Debug)]
pub struct BatchItem {
    pub path: PathBuf,
    pub result: Result<ConversionResult>,
}

// ---------------------------------------------------------------------------
// Single conversion
// ---------------------------------------------------------------------------

/// Convert a source using its default document name.
pub fn convert(
    source: &ConversionSource,
    settings: &ConvertSettings,
    preprocess: &ConversionConfiguration,
    extractor: &dyn DocumentExtractor,
) -> Result<ConversionResult> {
    convert_as(source, &document_name(source), settings, preprocess, extractor)
}

/// Convert a source, naming its assets after `doc_name`.
///
/// Only an unreadable source is an error. Everything wrong with the content
/// itself comes back as warnings.
#[instrument(skip_all, fields(doc = %doc_name))]
pub fn convert_as(
    source: &ConversionSource,
    doc_name: &str,
    settings: &ConvertSettings,
    preprocess: &ConversionConfiguration,
    extractor: &dyn DocumentExtractor,
) -> Result<ConversionResult> {
    let start = Instant::now();
    let naming = AssetNaming::new(
        &settings.images_folder_name,
        doc_name,
        &settings.image_file_name_pattern,
    )
    .with_path_base(settings.image_path_base.clone());

    let extracted = match source {
        ConversionSource::Document(path) => extractor.extract(path, &naming)?,
        ConversionSource::Clipboard(payload) => extract_clipboard(payload, &naming),
    };
    let mut warnings = extracted.warnings;

    if is_empty_markup(&extracted.markup) {
        warn!("document has no visible content");
        warnings.push(EMPTY_DOCUMENT_WARNING.to_string());
        return Ok(ConversionResult {
            markdown: String::new(),
            images: Vec::new(),
            warnings,
        });
    }

    let options = PipelineOptions::from_settings(settings, preprocess);
    let output = docmark_markdown::convert(&extracted.markup, &options);
    warnings.extend(output.warnings);

    let (markdown, guard_warnings) = guard_asset_links(&output.markdown, &extracted.images);
    warnings.extend(guard_warnings);

    info!(
        images = extracted.images.len(),
        warnings = warnings.len(),
        elapsed_ms = start.elapsed().as_millis(),
        "conversion complete"
    );

    Ok(ConversionResult {
        markdown,
        images: extracted.images,
        warnings,
    })
}

/// True when the markup has neither text nor images once tags are removed.
pub fn is_empty_markup(markup: &str) -> bool {
    static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
    static IMG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<img\b").expect("valid regex"));

    if IMG_RE.is_match(markup) {
        return false;
    }
    let text = TAG_RE.replace_all(markup, "");
    html_escape::decode_html_entities(&text)
        .chars()
        .all(|c| c.is_whitespace() || c == '\u{a0}')
}

// ---------------------------------------------------------------------------
// Asset-link guard
// ---------------------------------------------------------------------------

/// Replace relative image targets whose file name matches no extracted
/// asset with the orphan placeholder.
///
/// External URLs, data URIs and in-document targets are left alone, as is
/// fenced code.
pub fn guard_asset_links(md: &str, images: &[ImageAsset]) -> (String, Vec<String>) {
    static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(!\[(?:\\.|[^\]\\])*\]\()([^)\s]+)((?:\s+"(?:\\.|[^"\\])*")?\))"#)
            .expect("valid regex")
    });

    let known: HashSet<&str> = images.iter().map(|i| i.filename.as_str()).collect();
    let mut warnings = Vec::new();

    let guarded = map_prose_lines(md, |line| {
        IMAGE_RE
            .replace_all(line, |caps: &regex::Captures| {
                let target = &caps[2];
                if target == ORPHAN_PLACEHOLDER || is_external_target(target) {
                    return caps[0].to_string();
                }
                let file = target.rsplit('/').next().unwrap_or(target);
                let file = percent_decode_str(file).decode_utf8_lossy();
                if known.contains(file.as_ref()) {
                    return caps[0].to_string();
                }
                warnings.push(format!("image link {target} does not resolve to an extracted image"));
                format!("{}{ORPHAN_PLACEHOLDER}{}", &caps[1], &caps[3])
            })
            .into_owned()
    });

    if !warnings.is_empty() {
        debug!(unresolved = warnings.len(), "asset links replaced");
    }
    (guarded, warnings)
}

// ---------------------------------------------------------------------------
// Batch conversion
// ---------------------------------------------------------------------------

/// Convert several documents independently, one blocking task each.
///
/// Results come back in input order; one document failing never affects the
/// others.
#[instrument(skip_all, fields(documents = paths.len()))]
pub async fn convert_batch(
    paths: &[PathBuf],
    settings: &ConvertSettings,
    preprocess: &ConversionConfiguration,
    extractor: Arc<dyn DocumentExtractor>,
    progress: &dyn ProgressReporter,
) -> Vec<BatchItem> {
    let start = Instant::now();
    let total = paths.len();
    let settings = Arc::new(settings.clone());
    let preprocess = Arc::new(preprocess.clone());

    progress.phase("Converting documents");

    let handles: Vec<_> = paths
        .iter()
        .map(|path| {
            let path = path.clone();
            let settings = Arc::clone(&settings);
            let preprocess = Arc::clone(&preprocess);
            let extractor = Arc::clone(&extractor);
            tokio::task::spawn_blocking(move || {
                let source = ConversionSource::Document(path);
                convert(&source, &settings, &preprocess, extractor.as_ref())
            })
        })
        .collect();

    let mut items = Vec::with_capacity(total);
    let mut failed = 0;
    for (i, (path, handle)) in paths.iter().zip(handles).enumerate() {
        let result = handle.await.unwrap_or_else(|e| {
            Err(DocmarkError::validation(format!("conversion task failed: {e}")))
        });
        match &result {
            Ok(_) => progress.document_converted(path, i + 1, total),
            Err(e) => {
                failed += 1;
                warn!(path = %path.display(), error = %e, "document failed");
                progress.document_failed(path, e, i + 1, total);
            }
        }
        items.push(BatchItem {
            path: path.clone(),
            result,
        });
    }

    let summary = BatchSummary {
        converted: total - failed,
        failed,
        elapsed: start.elapsed(),
    };
    progress.done(&summary);

    info!(
        converted = summary.converted,
        failed = summary.failed,
        elapsed_ms = summary.elapsed.as_millis(),
        "batch complete"
    );

    items
}

#[cfg(test)]
mod tests {
    use docmark_shared::{ClipboardPayload, ImageFormat};

    use super::*;
    use crate::extract::MarkupFileExtractor;

    fn asset(filename: &str) -> ImageAsset {
        ImageAsset {
            bytes: vec![0; 8],
            original_format: "png".into(),
            output_format: ImageFormat::Png,
            filename: filename.into(),
            relative_path: format!("./doc_images/{filename}"),
        }
    }

    #[test]
    fn empty_markup_detection() {
        assert!(is_empty_markup(""));
        assert!(is_empty_markup("<html><body><p> &nbsp; </p></body></html>"));
        assert!(!is_empty_markup("<p>x</p>"));
        assert!(!is_empty_markup(r#"<p><img src="a.png"></p>"#));
    }

    #[test]
    fn resolved_links_are_kept() {
        let md = "![a](./doc_images/image-001.png)\n";
        let (out, warnings) = guard_asset_links(md, &[asset("image-001.png")]);
        assert_eq!(out, md);
        assert!(warnings.is_empty());
    }

    #[test]
    fn unresolved_links_become_placeholders() {
        let md = "![a](./doc_images/image-009.png \"t\") ![b](https://x.io/b.png) ![c](image-not-extracted)\n";
        let (out, warnings) = guard_asset_links(md, &[asset("image-001.png")]);
        assert_eq!(
            out,
            "![a](image-not-extracted \"t\") ![b](https://x.io/b.png) ![c](image-not-extracted)\n"
        );
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("image-009.png"));
    }

    #[test]
    fn encoded_file_names_resolve() {
        let md = "![a](./my%20images/chart%201.png)\n";
        let (out, warnings) = guard_asset_links(md, &[asset("chart 1.png")]);
        assert_eq!(out, md);
        assert!(warnings.is_empty());
    }

    #[test]
    fn fenced_code_is_not_guarded() {
        let md = "```\n![a](missing.png)\n```\n";
        let (out, warnings) = guard_asset_links(md, &[]);
        assert_eq!(out, md);
        assert!(warnings.is_empty());
    }

    #[test]
    fn clipboard_conversion_names_assets_after_paste() {
        let payload = ClipboardPayload {
            html: r#"<p>Chart:</p><p><img alt="c" src="data:image/gif;base64,R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7"></p>"#.into(),
            images: Vec::new(),
            has_rich_content: true,
        };
        let source = ConversionSource::Clipboard(payload);
        let result = convert(
            &source,
            &ConvertSettings::default(),
            &ConversionConfiguration::default(),
            &MarkupFileExtractor,
        )
        .unwrap();
        assert_eq!(result.markdown, "Chart:\n\n![c](./paste_images/image-001.gif)\n");
        assert_eq!(result.images.len(), 1);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn empty_clipboard_warns() {
        let source = ConversionSource::Clipboard(ClipboardPayload {
            html: "<html><body>  </body></html>".into(),
            ..ClipboardPayload::default()
        });
        let result = convert(
            &source,
            &ConvertSettings::default(),
            &ConversionConfiguration::default(),
            &MarkupFileExtractor,
        )
        .unwrap();
        assert_eq!(result.markdown, "");
        assert_eq!(result.warnings, vec![EMPTY_DOCUMENT_WARNING.to_string()]);
    }
}
