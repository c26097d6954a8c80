//! Application configuration for docmark.
//!
//! User config lives at `~/.docmark/docmark.toml`.
//! CLI flags override config file values, which override defaults.
//! Every field has a default, so a config file may set any subset.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DocmarkError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docmark.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docmark";

// ---------------------------------------------------------------------------
// Config structs (matching docmark.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// `[settings]` section: output placement and Markdown style.
    #[serde(default)]
    pub settings: ConvertSettings,

    /// `[preprocess]` section: vendor-artifact lists.
    #[serde(default)]
    pub preprocess: ConversionConfiguration,
}

/// Where converted Markdown is written relative to the source document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFolderStrategy {
    /// Next to the source document.
    #[default]
    SameFolder,
    /// In a `<docname>/` folder next to the source document.
    SubFolder,
}

/// What to do when the output file already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverwriteBehavior {
    /// Ask the host; hosts without a prompt treat this as `Skip`.
    #[default]
    Prompt,
    Overwrite,
    Skip,
    /// Pick the first free `name-N.md`.
    Rename,
}

/// Where clipboard conversions go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PasteTarget {
    #[default]
    NewFile,
    CurrentEditor,
}

/// Markdown dialect emitted by the conversion engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkdownFlavor {
    /// GitHub Flavored Markdown: tables, strikethrough, task lists.
    #[default]
    #[serde(alias = "default")]
    Gfm,
    /// Plain CommonMark: no strikethrough, no task checkboxes.
    Commonmark,
}

/// How heading levels are decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadingStrategy {
    /// Re-level headings from their outline numbering.
    #[default]
    Infer,
    /// Keep source heading levels.
    Preserve,
}

/// `[settings]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertSettings {
    #[serde(default)]
    pub output_folder_strategy: OutputFolderStrategy,

    /// Image folder pattern; `{docname}` is replaced by the document stem.
    #[serde(default = "default_images_folder_name")]
    pub images_folder_name: String,

    /// Image file pattern; `{index}` is replaced by the 3-digit, 1-based index.
    #[serde(default = "default_image_file_name_pattern")]
    pub image_file_name_pattern: String,

    #[serde(default)]
    pub overwrite_behavior: OverwriteBehavior,

    #[serde(default)]
    pub paste_target: PasteTarget,

    #[serde(default = "default_true")]
    pub open_after_conversion: bool,

    #[serde(default = "default_true")]
    pub show_notifications: bool,

    #[serde(default)]
    pub markdown_flavor: MarkdownFlavor,

    /// Soft wrap column for paragraphs; `"none"` disables wrapping.
    #[serde(default, with = "line_wrap")]
    pub line_wrap_width: Option<usize>,

    #[serde(default)]
    pub heading_strategy: HeadingStrategy,

    /// Optional prefix for image links, replacing the leading `./`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path_base: Option<String>,
}

impl Default for ConvertSettings {
    fn default() -> Self {
        Self {
            output_folder_strategy: OutputFolderStrategy::default(),
            images_folder_name: default_images_folder_name(),
            image_file_name_pattern: default_image_file_name_pattern(),
            overwrite_behavior: OverwriteBehavior::default(),
            paste_target: PasteTarget::default(),
            open_after_conversion: true,
            show_notifications: true,
            markdown_flavor: MarkdownFlavor::default(),
            line_wrap_width: None,
            heading_strategy: HeadingStrategy::default(),
            image_path_base: None,
        }
    }
}

fn default_images_folder_name() -> String {
    "{docname}_images".into()
}
fn default_image_file_name_pattern() -> String {
    "image-{index}".into()
}
fn default_true() -> bool {
    true
}

impl ConvertSettings {
    /// Reject values serde cannot catch on its own.
    pub fn validate(&self) -> Result<()> {
        if self.images_folder_name.trim().is_empty() {
            return Err(DocmarkError::config("images_folder_name must not be empty"));
        }
        if !self.image_file_name_pattern.contains("{index}") {
            return Err(DocmarkError::config(
                "image_file_name_pattern must contain {index}",
            ));
        }
        Ok(())
    }
}

/// `line_wrap_width` accepts a positive integer or the string `"none"`.
mod line_wrap {
    use serde::{Deserialize, Deserializer, Serializer, de};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Width(i64),
        Keyword(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<usize>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(width) => s.serialize_u64(*width as u64),
            None => s.serialize_str("none"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<usize>, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Width(w) if w > 0 => Ok(Some(w as usize)),
            Raw::Width(w) => Err(de::Error::custom(format!(
                "line_wrap_width must be positive, got {w}"
            ))),
            Raw::Keyword(k) if k.eq_ignore_ascii_case("none") => Ok(None),
            Raw::Keyword(k) => Err(de::Error::custom(format!(
                "line_wrap_width must be a number or \"none\", got {k:?}"
            ))),
        }
    }
}

/// `[preprocess]` section: tag, namespace, class and style lists that drive
/// the preprocessor. Matching is case-insensitive for tag names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfiguration {
    /// Elements removed together with their content.
    pub dangerous_tags: Vec<String>,
    /// Elements whose tags are removed but whose content is kept.
    pub unwrap_tags: Vec<String>,
    /// Document wrapper tags removed as independent tokens.
    pub discard_wrapper_tags: Vec<String>,
    /// Namespace prefixes (`w`, `o`, ...) whose elements are stripped.
    pub namespace_prefixes_to_strip: Vec<String>,
    /// Namespaced elements preserved even inside stripped ones.
    pub namespaced_tags_to_keep: Vec<String>,
    /// Class tokens starting with these prefixes are dropped.
    pub class_prefixes_to_strip: Vec<String>,
    /// Style declarations whose property starts with these prefixes are dropped.
    pub style_property_prefixes_to_strip: Vec<String>,
}

impl Default for ConversionConfiguration {
    fn default() -> Self {
        fn owned(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| (*s).to_string()).collect()
        }

        Self {
            dangerous_tags: owned(&[
                "script", "noscript", "template", "object", "embed", "applet", "iframe", "frame",
                "frameset", "svg", "button",
            ]),
            unwrap_tags: owned(&["font", "center"]),
            discard_wrapper_tags: owned(&["html", "body"]),
            namespace_prefixes_to_strip: owned(&["w", "o", "v", "m", "st1"]),
            namespaced_tags_to_keep: owned(&["v:imagedata"]),
            class_prefixes_to_strip: owned(&["Mso"]),
            style_property_prefixes_to_strip: owned(&["mso-"]),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docmark/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocmarkError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docmark/docmark.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocmarkError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| DocmarkError::config(format!("failed to parse {}: {e}", path.display())))?;
    config.settings.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocmarkError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| DocmarkError::Serialization(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocmarkError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let toml_str = toml::to_string_pretty(&AppConfig::default()).expect("serialize");
        assert!(toml_str.contains("images_folder_name"));
        assert!(toml_str.contains("line_wrap_width = \"none\""));
        assert!(toml_str.contains("v:imagedata"));
    }

    #[test]
    fn config_roundtrip() {
        let toml_str = toml::to_string_pretty(&AppConfig::default()).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed, AppConfig::default());
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let toml_str = r#"
[settings]
markdown_flavor = "commonmark"
line_wrap_width = 80

[preprocess]
unwrap_tags = ["font", "center", "nobr"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.settings.markdown_flavor, MarkdownFlavor::Commonmark);
        assert_eq!(config.settings.line_wrap_width, Some(80));
        assert_eq!(config.settings.images_folder_name, "{docname}_images");
        assert_eq!(config.preprocess.unwrap_tags.len(), 3);
        assert!(config.preprocess.dangerous_tags.contains(&"script".to_string()));
    }

    #[test]
    fn default_flavor_alias_maps_to_gfm() {
        let config: AppConfig =
            toml::from_str("[settings]\nmarkdown_flavor = \"default\"\n").expect("parse");
        assert_eq!(config.settings.markdown_flavor, MarkdownFlavor::Gfm);
    }

    #[test]
    fn kebab_case_enums_parse() {
        let toml_str = r#"
[settings]
output_folder_strategy = "sub-folder"
overwrite_behavior = "rename"
paste_target = "current-editor"
heading_strategy = "preserve"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.settings.output_folder_strategy, OutputFolderStrategy::SubFolder);
        assert_eq!(config.settings.overwrite_behavior, OverwriteBehavior::Rename);
        assert_eq!(config.settings.paste_target, PasteTarget::CurrentEditor);
        assert_eq!(config.settings.heading_strategy, HeadingStrategy::Preserve);
    }

    #[test]
    fn invalid_line_wrap_rejected() {
        assert!(toml::from_str::<AppConfig>("[settings]\nline_wrap_width = 0\n").is_err());
        assert!(toml::from_str::<AppConfig>("[settings]\nline_wrap_width = \"wide\"\n").is_err());
    }

    #[test]
    fn validate_requires_index_placeholder() {
        let settings = ConvertSettings {
            image_file_name_pattern: "picture".into(),
            ..ConvertSettings::default()
        };
        assert!(settings.validate().is_err());
        assert!(ConvertSettings::default().validate().is_ok());
    }

    #[test]
    fn load_config_from_file() {
        let dir = std::env::temp_dir().join(format!("docmark-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("docmark.toml");
        std::fs::write(&path, "[settings]\nshow_notifications = false\n").expect("write");

        let config = load_config_from(&path).expect("load");
        assert!(!config.settings.show_notifications);
        assert!(config.settings.open_after_conversion);

        std::fs::remove_dir_all(&dir).ok();
    }
}
