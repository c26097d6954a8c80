//! Shared types, error model, and configuration for docmark.
//!
//! This crate is the foundation depended on by all other docmark crates.
//! It provides:
//! - [`DocmarkError`]: the unified error type
//! - Domain types ([`ImageAsset`], [`ConversionResult`], [`ClipboardPayload`])
//! - Configuration ([`AppConfig`], [`ConvertSettings`], [`ConversionConfiguration`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConversionConfiguration, ConvertSettings, HeadingStrategy, MarkdownFlavor,
    OutputFolderStrategy, OverwriteBehavior, PasteTarget, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{DocmarkError, Result, SourceErrorKind};
pub use types::{
    AssetNaming, CLIPBOARD_DOC_NAME, ClipboardPayload, ConversionResult, ConversionSource,
    ExtractedDocument, ImageAsset, ImageFormat, resolve_image_file_name,
    resolve_images_folder_name,
};
