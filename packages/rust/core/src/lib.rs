//! Conversion orchestration for docmark.
//!
//! This crate ties together source extraction, image asset handling, the
//! Markdown pipeline and output writing into end-to-end workflows
//! (e.g., [`convert`], [`convert_batch`]).

pub mod extract;
pub mod images;
pub mod output;
pub mod pipeline;

pub use extract::{DocumentExtractor, MAX_SOURCE_BYTES, MarkupFileExtractor, check_source};
pub use images::{ImageCollector, asset_link, extract_clipboard};
pub use output::{
    OutputPaths, WriteOutcome, document_name, relink_images, resolve_output_paths,
    unique_folder_path, unique_output_paths, write_conversion_result, write_images,
};
pub use pipeline::{
    BatchItem, BatchSummary, EMPTY_DOCUMENT_WARNING, ProgressReporter, SilentProgress, convert,
    convert_as, convert_batch, guard_asset_links,
};
