//! Document extractors.
//!
//! An extractor opens a source document and produces markup plus image
//! assets. Container formats plug in through [`DocumentExtractor`]; the
//! shipped [`MarkupFileExtractor`] reads saved markup files.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::{debug, instrument};

use docmark_markdown::engine::text::is_external_target;
use docmark_shared::{AssetNaming, DocmarkError, ExtractedDocument, Result, SourceErrorKind};

use crate::images::{ImageCollector, lift_inline_images};

/// Sources larger than this are refused as too large.
pub const MAX_SOURCE_BYTES: u64 = 64 * 1024 * 1024;

/// Opens a source document and extracts its markup and images.
pub trait DocumentExtractor: Send + Sync {
    /// File extensions (lowercase, without the dot) this extractor reads.
    fn extensions(&self) -> &[&str];

    fn extract(&self, path: &Path, naming: &AssetNaming) -> Result<ExtractedDocument>;
}

/// Reads `.html` / `.htm` files.
///
/// Inline `data:image/…` sources and relative image files that exist next
/// to the document become assets.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupFileExtractor;

impl DocumentExtractor for MarkupFileExtractor {
    fn extensions(&self) -> &[&str] {
        &["html", "htm"]
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn extract(&self, path: &Path, naming: &AssetNaming) -> Result<ExtractedDocument> {
        check_source(path, self.extensions())?;

        let bytes = fs::read(path).map_err(|e| DocmarkError::source_io(path, &e))?;
        let mut warnings = Vec::new();
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                warnings.push("source is not valid UTF-8; invalid bytes were replaced".to_string());
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };
        let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

        let mut collector = ImageCollector::new(naming);
        let markup = lift_inline_images(text, &mut collector);
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let markup = lift_local_images(&markup, base_dir, &mut collector);

        let (images, image_warnings) = collector.finish();
        warnings.extend(image_warnings);
        debug!(len = markup.len(), images = images.len(), "markup file extracted");

        Ok(ExtractedDocument {
            markup,
            images,
            warnings,
        })
    }
}

/// Validate that `path` is a readable regular file of a supported type and
/// size.
pub fn check_source(path: &Path, extensions: &[&str]) -> Result<()> {
    let meta = fs::metadata(path).map_err(|e| DocmarkError::source_io(path, &e))?;
    if !meta.is_file() {
        return Err(DocmarkError::source(
            SourceErrorKind::NotAFile,
            path,
            "path is not a regular file",
        ));
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if !extensions.contains(&ext.as_str()) {
        return Err(DocmarkError::source(
            SourceErrorKind::UnsupportedFormat,
            path,
            format!("unsupported extension `.{ext}` (expected {})", extensions.join(", ")),
        ));
    }

    if meta.len() > MAX_SOURCE_BYTES {
        return Err(DocmarkError::source(
            SourceErrorKind::TooLarge,
            path,
            format!("{} bytes exceeds the {MAX_SOURCE_BYTES} byte limit", meta.len()),
        ));
    }
    Ok(())
}

/// Replace relative image sources that name an existing file under
/// `base_dir` with asset paths.
fn lift_local_images(markup: &str, base_dir: &Path, collector: &mut ImageCollector<'_>) -> String {
    static IMG_SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?i)(<img\b[^>]*?\bsrc\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
    });

    IMG_SRC_RE
        .replace_all(markup, |caps: &regex::Captures| {
            let src = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            if collector.images().iter().any(|i| i.relative_path == src) {
                return caps[0].to_string();
            }
            match read_local_image(src, base_dir) {
                Some((bytes, format)) => format!("{}\"{}\"", &caps[1], collector.add(bytes, &format)),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn read_local_image(src: &str, base_dir: &Path) -> Option<(Vec<u8>, String)> {
    let src = html_escape::decode_html_entities(src.trim());
    if src.is_empty() || is_external_target(&src) {
        return None;
    }
    let relative = src.split(['?', '#']).next().unwrap_or_default();
    let decoded = percent_decode_str(relative).decode_utf8_lossy();
    let path = base_dir.join(decoded.as_ref());

    let meta = fs::metadata(&path).ok()?;
    if !meta.is_file() || meta.len() > MAX_SOURCE_BYTES {
        return None;
    }
    let bytes = fs::read(&path).ok()?;
    let format = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_else(|| "png".to_string());
    debug!(path = %path.display(), "local image lifted");
    Some((bytes, format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markup_extensions() {
        assert_eq!(MarkupFileExtractor.extensions(), &["html", "htm"]);
    }

    #[test]
    fn missing_file_is_classified() {
        let naming = AssetNaming::new("{docname}_images", "x", "image-{index}");
        let err = MarkupFileExtractor
            .extract(Path::new("/definitely/not/here.html"), &naming)
            .unwrap_err();
        assert!(matches!(
            err,
            DocmarkError::Source {
                kind: SourceErrorKind::NotFound,
                ..
            }
        ));
    }

    #[test]
    fn local_sources_outside_the_tree_are_ignored() {
        let naming = AssetNaming::new("img", "x", "image-{index}");
        let mut collector = ImageCollector::new(&naming);
        let markup = r#"<img src="https://example.com/a.png"><img src="missing.png">"#;
        let out = lift_local_images(markup, Path::new("/nonexistent"), &mut collector);
        assert_eq!(out, markup);
        assert!(collector.images().is_empty());
    }
}
