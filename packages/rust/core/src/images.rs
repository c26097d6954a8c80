//! Image asset collection.
//!
//! Turns clipboard data URIs, inline `data:image/…` sources and local image
//! files into [`ImageAsset`]s, and rewrites the markup to point at the
//! relative paths the assets will be written to.

use std::collections::HashMap;
use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use docmark_markdown::engine::text::encode_path;
use docmark_shared::{AssetNaming, ClipboardPayload, ExtractedDocument, ImageAsset, ImageFormat};

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Accumulates the distinct images of one document.
///
/// Byte-identical payloads share one asset. Files are numbered in the order
/// distinct payloads are first seen, so naming is deterministic.
#[derive(Debug)]
pub struct ImageCollector<'a> {
    naming: &'a AssetNaming,
    images: Vec<ImageAsset>,
    by_digest: HashMap<String, usize>,
    warnings: Vec<String>,
}

impl<'a> ImageCollector<'a> {
    pub fn new(naming: &'a AssetNaming) -> Self {
        Self {
            naming,
            images: Vec::new(),
            by_digest: HashMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Register image bytes and return the link target for them.
    pub fn add(&mut self, bytes: Vec<u8>, original_format: &str) -> String {
        let digest = format!("{:x}", Sha256::digest(&bytes));
        if let Some(&existing) = self.by_digest.get(&digest) {
            return self.images[existing].relative_path.clone();
        }

        let index = self.images.len() + 1;
        let output_format = ImageFormat::from_source_format(original_format);
        if !has_image_signature(&bytes) {
            self.warn(format!(
                "image {index} ({original_format}) does not look like a valid image"
            ));
        }

        let filename = self.naming.file_name(index, output_format);
        let relative_path = asset_link(self.naming, &filename);
        debug!(index, original_format, output = %output_format, bytes = bytes.len(), "image collected");

        self.images.push(ImageAsset {
            bytes,
            original_format: original_format.to_string(),
            output_format,
            filename,
            relative_path: relative_path.clone(),
        });
        self.by_digest.insert(digest, self.images.len() - 1);
        relative_path
    }

    /// Decode a `data:image/…;base64,` URI and register it.
    pub fn add_data_uri(&mut self, uri: &str) -> Result<String, String> {
        let bytes = decode_data_uri(uri)?;
        Ok(self.add(bytes, &data_uri_format(uri)))
    }

    pub fn warn(&mut self, message: String) {
        warn!(%message, "image problem");
        self.warnings.push(message);
    }

    pub fn images(&self) -> &[ImageAsset] {
        &self.images
    }

    pub fn finish(self) -> (Vec<ImageAsset>, Vec<String>) {
        (self.images, self.warnings)
    }
}

// ---------------------------------------------------------------------------
// Clipboard
// ---------------------------------------------------------------------------

/// Collect clipboard images and rewrite every occurrence of each data URI in
/// the markup to its asset path. Inline data URIs the host did not capture
/// separately are lifted too.
pub fn extract_clipboard(payload: &ClipboardPayload, naming: &AssetNaming) -> ExtractedDocument {
    let mut collector = ImageCollector::new(naming);
    let mut markup = payload.html.clone();

    for (i, uri) in payload.images.iter().enumerate() {
        let uri = uri.trim();
        match collector.add_data_uri(uri) {
            Ok(path) => markup = markup.replace(uri, &path),
            Err(reason) => collector.warn(format!("clipboard image {} skipped: {reason}", i + 1)),
        }
    }

    let markup = lift_inline_images(&markup, &mut collector);
    let (images, warnings) = collector.finish();
    debug!(images = images.len(), "clipboard images processed");

    ExtractedDocument {
        markup,
        images,
        warnings,
    }
}

/// Replace `src="data:image/…"` attributes with asset paths. Sources that
/// cannot be decoded are left for the orphan guard.
pub fn lift_inline_images(markup: &str, collector: &mut ImageCollector<'_>) -> String {
    static SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?i)(\bsrc\s*=\s*)(?:"(data:image/[^"]*)"|'(data:image/[^']*)')"#)
            .expect("valid regex")
    });

    SRC_RE
        .replace_all(markup, |caps: &regex::Captures| {
            let uri = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            match collector.add_data_uri(uri) {
                Ok(path) => format!("{}\"{path}\"", &caps[1]),
                Err(reason) => {
                    collector.warn(format!("inline image skipped: {reason}"));
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// Data URIs
// ---------------------------------------------------------------------------

/// Subtype of a `data:image/<subtype>` URI, lowercased; `png` when absent.
pub fn data_uri_format(uri: &str) -> String {
    static FORMAT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)^data:image/([a-z0-9+.-]+)[;,]").expect("valid regex"));
    FORMAT_RE
        .captures(uri.trim())
        .map_or_else(|| "png".to_string(), |caps| caps[1].to_ascii_lowercase())
}

/// Decode the payload of a base64 data URI.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, String> {
    let (header, data) = uri
        .trim()
        .split_once(',')
        .ok_or_else(|| "data URI has no payload".to_string())?;
    if !header.to_ascii_lowercase().ends_with(";base64") {
        return Err("data URI is not base64 encoded".to_string());
    }

    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err("data URI has no payload".to_string());
    }
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| format!("invalid base64 payload: {e}"))
}

/// Whether the bytes start like a PNG, JPEG, GIF, BMP or WebP file, or are
/// SVG text.
pub fn has_image_signature(bytes: &[u8]) -> bool {
    if bytes.len() < 8 {
        return false;
    }
    let raster = bytes.starts_with(&[0x89, b'P', b'N', b'G'])
        || bytes.starts_with(&[0xFF, 0xD8, 0xFF])
        || bytes.starts_with(b"GIF8")
        || bytes.starts_with(b"BM")
        || (bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP".as_slice()));
    if raster {
        return true;
    }

    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]).to_ascii_lowercase();
    head.contains("<svg")
}

// ---------------------------------------------------------------------------
// Link targets
// ---------------------------------------------------------------------------

/// Link target for an asset: `./<folder>/<file>` with each segment
/// percent-encoded, or the same segments under the configured base.
pub fn asset_link(naming: &AssetNaming, filename: &str) -> String {
    let rest = format!("{}/{}", encode_path(&naming.folder_name), encode_path(filename));
    match naming.path_base.as_deref() {
        Some(base) => join_base(base.trim(), &rest),
        None => format!("./{rest}"),
    }
}

fn join_base(base: &str, rest: &str) -> String {
    if let Ok(mut url) = Url::parse(base) {
        // One-letter schemes are drive letters, not URLs.
        if url.scheme().len() > 1 && !url.cannot_be_a_base() {
            if !url.path().ends_with('/') {
                let path = format!("{}/", url.path());
                url.set_path(&path);
            }
            if let Ok(joined) = url.join(rest) {
                return joined.to_string();
            }
        }
    }
    format!("{}/{rest}", base.trim_end_matches(['/', '\\']).replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";
    const GIF: &str = "R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7";

    fn naming() -> AssetNaming {
        AssetNaming::new("{docname}_images", "paste", "image-{index}")
    }

    #[test]
    fn format_from_data_uri() {
        assert_eq!(data_uri_format("data:image/JPEG;base64,AAAA"), "jpeg");
        assert_eq!(data_uri_format("data:image/svg+xml;base64,AAAA"), "svg+xml");
        assert_eq!(data_uri_format("data:text/plain,hi"), "png");
    }

    #[test]
    fn decode_rejects_bad_payloads() {
        assert!(decode_data_uri("data:image/png;base64").is_err());
        assert!(decode_data_uri("data:image/png,rawbytes").is_err());
        assert!(decode_data_uri("data:image/png;base64,!!!").is_err());
        assert!(decode_data_uri("data:image/png;base64,").is_err());
        let bytes = decode_data_uri(&format!("data:image/png;base64,{PNG}")).unwrap();
        assert!(has_image_signature(&bytes));
    }

    #[test]
    fn signatures() {
        assert!(!has_image_signature(b"short"));
        assert!(!has_image_signature(b"plain text, not an image"));
        assert!(has_image_signature(b"<?xml version=\"1.0\"?><svg></svg>"));
        assert!(has_image_signature(b"GIF89a\x01\x00\x01\x00"));
    }

    #[test]
    fn identical_payloads_share_one_asset() {
        let naming = naming();
        let mut collector = ImageCollector::new(&naming);
        let a = collector.add_data_uri(&format!("data:image/png;base64,{PNG}")).unwrap();
        let b = collector.add_data_uri(&format!("data:image/gif;base64,{GIF}")).unwrap();
        let c = collector.add_data_uri(&format!("data:image/png;base64,{PNG}")).unwrap();
        assert_eq!(a, "./paste_images/image-001.png");
        assert_eq!(b, "./paste_images/image-002.gif");
        assert_eq!(a, c);
        let (images, warnings) = collector.finish();
        assert_eq!(images.len(), 2);
        assert!(warnings.is_empty());
    }

    #[test]
    fn unrecognized_bytes_warn_but_are_kept() {
        let naming = naming();
        let mut collector = ImageCollector::new(&naming);
        let path = collector.add(b"definitely not an image".to_vec(), "x-emf");
        assert_eq!(path, "./paste_images/image-001.png");
        let (images, warnings) = collector.finish();
        assert_eq!(images[0].original_format, "x-emf");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn clipboard_rewrites_every_occurrence() {
        let uri = format!("data:image/png;base64,{PNG}");
        let payload = ClipboardPayload {
            html: format!(r#"<p><img src="{uri}"></p><p><img src="{uri}"></p>"#),
            images: vec![uri.clone(), "data:image/png;base64,@@".into()],
            has_rich_content: true,
        };
        let doc = extract_clipboard(&payload, &naming());
        assert!(!doc.markup.contains("data:image"));
        assert_eq!(doc.markup.matches("./paste_images/image-001.png").count(), 2);
        assert_eq!(doc.images.len(), 1);
        assert_eq!(doc.warnings.len(), 1);
        assert!(doc.warnings[0].contains("clipboard image 2"));
    }

    #[test]
    fn inline_images_are_lifted() {
        let naming = naming();
        let mut collector = ImageCollector::new(&naming);
        let markup = format!(r#"<img alt='a' src='data:image/gif;base64,{GIF}'><img src="data:image/png;base64,%%%">"#);
        let out = lift_inline_images(&markup, &mut collector);
        assert!(out.contains(r#"src="./paste_images/image-001.gif""#));
        assert!(out.contains("data:image/png;base64,%%%"));
        assert_eq!(collector.images().len(), 1);
    }

    #[test]
    fn links_are_encoded_per_segment() {
        let naming = AssetNaming::new("{docname} images", "Q3 Report", "image-{index}");
        assert_eq!(asset_link(&naming, "image-001.png"), "./Q3%20Report%20images/image-001.png");
    }

    #[test]
    fn links_under_a_base() {
        let url = naming().with_path_base(Some("https://cdn.example.com/docs".into()));
        assert_eq!(
            asset_link(&url, "image-001.png"),
            "https://cdn.example.com/docs/paste_images/image-001.png"
        );
        let dir = naming().with_path_base(Some("assets\\shared/".into()));
        assert_eq!(asset_link(&dir, "image-001.png"), "assets/shared/paste_images/image-001.png");
    }
}
