//! Core domain types for docmark conversions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Document name used for clipboard conversions when the host gives none.
pub const CLIPBOARD_DOC_NAME: &str = "paste";

// ---------------------------------------------------------------------------
// ImageFormat
// ---------------------------------------------------------------------------

/// Output format of an extracted image asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Svg,
}

impl ImageFormat {
    /// Normalize a source format name (`jpg`, `svg+xml`, `webp`, ...).
    ///
    /// Anything that is not jpeg, gif or svg is written as png.
    pub fn from_source_format(format: &str) -> Self {
        match format.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "pjpeg" => Self::Jpeg,
            "gif" => Self::Gif,
            "svg" | "svg+xml" => Self::Svg,
            _ => Self::Png,
        }
    }

    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Gif => "gif",
            Self::Svg => "svg",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

// ---------------------------------------------------------------------------
// ImageAsset
// ---------------------------------------------------------------------------

/// A binary image extracted from the source, ready to be written next to the
/// Markdown output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub bytes: Vec<u8>,
    /// Format as declared by the source (`jpg`, `svg+xml`, `webp`, ...).
    pub original_format: String,
    pub output_format: ImageFormat,
    /// File name inside the images folder, e.g. `image-001.png`.
    pub filename: String,
    /// Link target used in the Markdown, e.g. `./report_images/image-001.png`.
    pub relative_path: String,
}

// ---------------------------------------------------------------------------
// Asset naming
// ---------------------------------------------------------------------------

/// Resolved naming rules for the images of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetNaming {
    /// Folder name with `{docname}` already substituted.
    pub folder_name: String,
    /// File pattern still holding `{index}`.
    pub file_pattern: String,
    /// Replaces the `./` prefix of relative image links when set.
    pub path_base: Option<String>,
}

impl AssetNaming {
    pub fn new(folder_pattern: &str, doc_name: &str, file_pattern: &str) -> Self {
        Self {
            folder_name: resolve_images_folder_name(folder_pattern, doc_name),
            file_pattern: file_pattern.to_string(),
            path_base: None,
        }
    }

    pub fn with_path_base(mut self, base: Option<String>) -> Self {
        self.path_base = base.filter(|b| !b.trim().is_empty());
        self
    }

    /// File name for the image at 1-based `index`.
    pub fn file_name(&self, index: usize, format: ImageFormat) -> String {
        format!(
            "{}.{}",
            resolve_image_file_name(&self.file_pattern, index),
            format.extension()
        )
    }
}

/// Substitute `{docname}` in an images-folder pattern.
pub fn resolve_images_folder_name(pattern: &str, doc_name: &str) -> String {
    pattern.replace("{docname}", doc_name)
}

/// Substitute `{index}` (zero-padded to three digits) in a file-name pattern.
pub fn resolve_image_file_name(pattern: &str, index: usize) -> String {
    pattern.replace("{index}", &format!("{index:03}"))
}

// ---------------------------------------------------------------------------
// Conversion inputs and outputs
// ---------------------------------------------------------------------------

/// Rich clipboard content captured by a host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipboardPayload {
    /// Markup as copied.
    pub html: String,
    /// Image data URIs captured next to the markup.
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub has_rich_content: bool,
}

/// Input to a conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionSource {
    /// A document on disk, handed to a `DocumentExtractor`.
    Document(PathBuf),
    /// Clipboard markup plus captured images.
    Clipboard(ClipboardPayload),
}

/// Markup and images produced by a document extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub markup: String,
    pub images: Vec<ImageAsset>,
    pub warnings: Vec<String>,
}

/// Final result of converting one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionResult {
    pub markdown: String,
    pub images: Vec<ImageAsset>,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_normalization() {
        assert_eq!(ImageFormat::from_source_format("jpg"), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_source_format("JPEG"), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_source_format("svg+xml"), ImageFormat::Svg);
        assert_eq!(ImageFormat::from_source_format("gif"), ImageFormat::Gif);
        assert_eq!(ImageFormat::from_source_format("webp"), ImageFormat::Png);
        assert_eq!(ImageFormat::from_source_format("x-emf"), ImageFormat::Png);
    }

    #[test]
    fn image_file_name_is_zero_padded() {
        assert_eq!(resolve_image_file_name("image-{index}", 1), "image-001");
        assert_eq!(resolve_image_file_name("image-{index}", 42), "image-042");
        assert_eq!(resolve_image_file_name("fig_{index}", 1234), "fig_1234");
    }

    #[test]
    fn folder_name_substitutes_docname() {
        assert_eq!(
            resolve_images_folder_name("{docname}_images", "report"),
            "report_images"
        );
        assert_eq!(resolve_images_folder_name("assets", "report"), "assets");
    }

    #[test]
    fn asset_naming_builds_file_names() {
        let naming = AssetNaming::new("{docname}_images", "paste", "image-{index}");
        assert_eq!(naming.folder_name, "paste_images");
        assert_eq!(naming.file_name(3, ImageFormat::Jpeg), "image-003.jpeg");
    }

    #[test]
    fn blank_path_base_is_ignored() {
        let naming = AssetNaming::new("img", "doc", "i-{index}").with_path_base(Some("  ".into()));
        assert_eq!(naming.path_base, None);
    }

    #[test]
    fn clipboard_payload_parses_camel_case() {
        let json = r#"{"html":"<p>x</p>","images":["data:image/png;base64,AA=="],"hasRichContent":true}"#;
        let payload: ClipboardPayload = serde_json::from_str(json).expect("parse");
        assert!(payload.has_rich_content);
        assert_eq!(payload.images.len(), 1);

        let minimal: ClipboardPayload = serde_json::from_str(r#"{"html":""}"#).expect("parse");
        assert!(minimal.images.is_empty());
    }
}
