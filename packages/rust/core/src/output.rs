//! Output path resolution and writing.
//!
//! Decides where a converted document and its images land and writes them,
//! honoring the configured overwrite policy.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use docmark_markdown::engine::text::encode_path;
use docmark_shared::{
    CLIPBOARD_DOC_NAME, ConversionResult, ConversionSource, ConvertSettings, DocmarkError,
    ImageAsset, OutputFolderStrategy, OverwriteBehavior, Result, resolve_images_folder_name,
};

/// Where one document's output is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub markdown_path: PathBuf,
    pub images_folder_path: PathBuf,
    /// Directory created before writing.
    pub base_dir: PathBuf,
}

/// What [`write_conversion_result`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written {
        markdown_path: PathBuf,
        images_written: usize,
    },
    /// The Markdown file already existed and the policy was `skip`.
    Skipped { markdown_path: PathBuf },
}

/// Document name for a source: the file stem, or `paste` for clipboard
/// content.
pub fn document_name(source: &ConversionSource) -> String {
    match source {
        ConversionSource::Document(path) => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "document".to_string()),
        ConversionSource::Clipboard(_) => CLIPBOARD_DOC_NAME.to_string(),
    }
}

/// Resolve output paths inside `output_dir` (normally the source's own
/// directory).
///
/// - same-folder: `<dir>/<doc>.md` and `<dir>/<images folder>`
/// - sub-folder: `<dir>/<doc>/<doc>.md` and `<dir>/<doc>/<images folder>`
pub fn resolve_output_paths(output_dir: &Path, doc_name: &str, settings: &ConvertSettings) -> OutputPaths {
    let images_folder = resolve_images_folder_name(&settings.images_folder_name, doc_name);
    let base_dir = match settings.output_folder_strategy {
        OutputFolderStrategy::SameFolder => output_dir.to_path_buf(),
        OutputFolderStrategy::SubFolder => output_dir.join(doc_name),
    };

    let paths = OutputPaths {
        markdown_path: base_dir.join(format!("{doc_name}.md")),
        images_folder_path: base_dir.join(images_folder),
        base_dir,
    };
    debug!(markdown = %paths.markdown_path.display(), images = %paths.images_folder_path.display(), "output paths resolved");
    paths
}

/// Paths for a renamed copy: the first `-N` suffix that is free for the
/// Markdown file and, when `with_images` is set, for the images folder too.
pub fn unique_output_paths(paths: &OutputPaths, with_images: bool) -> OutputPaths {
    let stem = file_name(&paths.markdown_path, true);
    let folder = file_name(&paths.images_folder_path, false);
    let markdown_dir = paths.markdown_path.parent().unwrap_or_else(|| Path::new(""));
    let images_dir = paths.images_folder_path.parent().unwrap_or_else(|| Path::new(""));

    let mut counter = 1;
    loop {
        let candidate = OutputPaths {
            markdown_path: markdown_dir.join(format!("{stem}-{counter}.md")),
            images_folder_path: images_dir.join(format!("{folder}-{counter}")),
            base_dir: paths.base_dir.clone(),
        };
        let taken = candidate.markdown_path.exists()
            || (with_images && candidate.images_folder_path.exists());
        if !taken {
            return candidate;
        }
        counter += 1;
    }
}

/// `path` when nothing exists there yet, otherwise the first free
/// `<folder>-N` next to it.
pub fn unique_folder_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let name = file_name(path, false);
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let mut counter = 1;
    loop {
        let candidate = parent.join(format!("{name}-{counter}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

fn file_name(path: &Path, stem: bool) -> String {
    let name = if stem { path.file_stem() } else { path.file_name() };
    name.map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Point the image links of `result` into `images_folder` instead of the
/// folder the assets were named for. Everything before the folder segment
/// (`./` or a configured base) is kept.
pub fn relink_images(result: &ConversionResult, images_folder: &Path) -> ConversionResult {
    let mut moved = result.clone();
    let Some((old_prefix, _)) = result
        .images
        .first()
        .and_then(|image| image.relative_path.rsplit_once('/'))
    else {
        return moved;
    };

    let folder = encode_path(&file_name(images_folder, false));
    let new_prefix = match old_prefix.rsplit_once('/') {
        Some((head, _)) => format!("{head}/{folder}"),
        None => folder,
    };
    if new_prefix == old_prefix {
        return moved;
    }

    let from = format!("{old_prefix}/");
    let to = format!("{new_prefix}/");
    moved.markdown = moved.markdown.replace(&from, &to);
    for image in &mut moved.images {
        if let Some(file) = image.relative_path.strip_prefix(&from) {
            image.relative_path = format!("{to}{file}");
        }
    }
    debug!(from = %from, to = %to, "image links moved");
    moved
}

/// Write the Markdown file and its images.
///
/// When the Markdown file exists, `rename` writes `<stem>-N.md` with its
/// images in `<folder>-N` so the earlier document keeps its own images,
/// `skip` writes nothing and `overwrite` replaces it. `prompt` must be
/// resolved by the host beforehand; reaching the writer with an existing
/// file is an error.
#[instrument(skip_all, fields(markdown = %paths.markdown_path.display(), ?overwrite))]
pub fn write_conversion_result(
    result: &ConversionResult,
    paths: &OutputPaths,
    overwrite: OverwriteBehavior,
) -> Result<WriteOutcome> {
    if paths.markdown_path.exists() {
        match overwrite {
            OverwriteBehavior::Overwrite => debug!("overwriting existing file"),
            OverwriteBehavior::Skip => {
                info!("output exists, skipping");
                return Ok(WriteOutcome::Skipped {
                    markdown_path: paths.markdown_path.clone(),
                });
            }
            OverwriteBehavior::Rename => {
                let renamed = unique_output_paths(paths, !result.images.is_empty());
                debug!(
                    markdown = %renamed.markdown_path.display(),
                    images = %renamed.images_folder_path.display(),
                    "output exists, renaming"
                );
                let moved = relink_images(result, &renamed.images_folder_path);
                return write_files(&moved, &renamed);
            }
            OverwriteBehavior::Prompt => {
                return Err(DocmarkError::validation(format!(
                    "{} already exists; choose overwrite, skip or rename",
                    paths.markdown_path.display()
                )));
            }
        }
    }
    write_files(result, paths)
}

fn write_files(result: &ConversionResult, paths: &OutputPaths) -> Result<WriteOutcome> {
    let markdown_path = &paths.markdown_path;
    fs::create_dir_all(&paths.base_dir).map_err(|e| DocmarkError::io(&paths.base_dir, e))?;
    fs::write(markdown_path, &result.markdown).map_err(|e| DocmarkError::io(markdown_path, e))?;
    let images_written = write_images(&result.images, &paths.images_folder_path)?;

    info!(
        path = %markdown_path.display(),
        images = images_written,
        "conversion written"
    );

    Ok(WriteOutcome::Written {
        markdown_path: markdown_path.clone(),
        images_written,
    })
}

/// Write image assets into `dir`, creating it when there is anything to
/// write. Returns the number of files written.
pub fn write_images(images: &[ImageAsset], dir: &Path) -> Result<usize> {
    if images.is_empty() {
        return Ok(0);
    }
    fs::create_dir_all(dir).map_err(|e| DocmarkError::io(dir, e))?;
    for image in images {
        let image_path = dir.join(&image.filename);
        fs::write(&image_path, &image.bytes).map_err(|e| DocmarkError::io(&image_path, e))?;
    }
    Ok(images.len())
}

#[cfg(test)]
mod tests {
    use docmark_shared::{ClipboardPayload, ImageFormat};

    use super::*;

    fn asset(relative_path: &str) -> ImageAsset {
        ImageAsset {
            bytes: vec![1, 2, 3],
            original_format: "png".into(),
            output_format: ImageFormat::Png,
            filename: "image-001.png".into(),
            relative_path: relative_path.into(),
        }
    }

    #[test]
    fn relink_moves_folder_segment_only() {
        let result = ConversionResult {
            markdown: "![a](./My%20Doc_images/image-001.png) ![b](./My%20Doc_images/image-001.png)\n".into(),
            images: vec![asset("./My%20Doc_images/image-001.png")],
            warnings: Vec::new(),
        };
        let moved = relink_images(&result, Path::new("/out/My Doc_images-1"));
        assert_eq!(
            moved.markdown,
            "![a](./My%20Doc_images-1/image-001.png) ![b](./My%20Doc_images-1/image-001.png)\n"
        );
        assert_eq!(moved.images[0].relative_path, "./My%20Doc_images-1/image-001.png");

        let based = ConversionResult {
            markdown: "![a](https://cdn.example.com/d/img/image-001.png)".into(),
            images: vec![asset("https://cdn.example.com/d/img/image-001.png")],
            warnings: Vec::new(),
        };
        let moved = relink_images(&based, Path::new("img-2"));
        assert_eq!(moved.markdown, "![a](https://cdn.example.com/d/img-2/image-001.png)");
    }

    #[test]
    fn relink_without_images_is_identity() {
        let result = ConversionResult {
            markdown: "text\n".into(),
            ..ConversionResult::default()
        };
        assert_eq!(relink_images(&result, Path::new("elsewhere")), result);
    }

    #[test]
    fn document_names() {
        let doc = ConversionSource::Document(PathBuf::from("/docs/Q3 Report.docx"));
        assert_eq!(document_name(&doc), "Q3 Report");
        let clip = ConversionSource::Clipboard(ClipboardPayload::default());
        assert_eq!(document_name(&clip), "paste");
    }

    #[test]
    fn same_folder_layout() {
        let settings = ConvertSettings::default();
        let paths = resolve_output_paths(Path::new("/docs"), "report", &settings);
        assert_eq!(paths.markdown_path, Path::new("/docs/report.md"));
        assert_eq!(paths.images_folder_path, Path::new("/docs/report_images"));
        assert_eq!(paths.base_dir, Path::new("/docs"));
    }

    #[test]
    fn sub_folder_layout() {
        let settings = ConvertSettings {
            output_folder_strategy: OutputFolderStrategy::SubFolder,
            images_folder_name: "assets".into(),
            ..ConvertSettings::default()
        };
        let paths = resolve_output_paths(Path::new("/docs"), "report", &settings);
        assert_eq!(paths.markdown_path, Path::new("/docs/report/report.md"));
        assert_eq!(paths.images_folder_path, Path::new("/docs/report/assets"));
        assert_eq!(paths.base_dir, Path::new("/docs/report"));
    }
}
