//! CLI command definitions, routing, and tracing setup.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use docmark_core::{
    BatchSummary, MarkupFileExtractor, OutputPaths, ProgressReporter, WriteOutcome, convert_as,
    convert_batch, document_name, relink_images, resolve_output_paths, unique_folder_path,
    write_conversion_result, write_images,
};
use docmark_shared::{
    AppConfig, CLIPBOARD_DOC_NAME, ClipboardPayload, ConversionResult, ConversionSource,
    DocmarkError, OverwriteBehavior, PasteTarget, init_config, load_config, load_config_from,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Command-line entry point for docmark.
#[derive(Parser)]
#[command(
    name = "docmark",
    version,
    about = "Convert rich-document and clipboard markup into canonical Markdown.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.docmark/docmark.toml.
    #[arg(long, global = true, env = "DOCMARK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Overwrite policy override.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OverwriteArg {
    Prompt,
    Overwrite,
    Skip,
    Rename,
}

impl From<OverwriteArg> for OverwriteBehavior {
    fn from(arg: OverwriteArg) -> Self {
        match arg {
            OverwriteArg::Prompt => Self::Prompt,
            OverwriteArg::Overwrite => Self::Overwrite,
            OverwriteArg::Skip => Self::Skip,
            OverwriteArg::Rename => Self::Rename,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Convert markup files to Markdown.
    Convert {
        /// Files to convert (.html, .htm).
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output directory (defaults to each file's own directory).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Print Markdown to stdout instead of writing files.
        #[arg(long)]
        stdout: bool,

        /// What to do when the output file exists.
        #[arg(long)]
        overwrite: Option<OverwriteArg>,
    },

    /// Convert a captured clipboard payload (JSON) to Markdown.
    Paste {
        /// Payload file; reads stdin when omitted.
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Document name used for the Markdown file and images folder.
        #[arg(short, long)]
        name: Option<String>,

        /// Output directory (defaults to the current directory).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// What to do when the output file exists.
        #[arg(long)]
        overwrite: Option<OverwriteArg>,
    },

    /// Check a Markdown file against output invariants.
    Check {
        /// Markdown file to check.
        file: PathBuf,

        /// Rule to run (repeatable). Defaults to all rules.
        #[arg(short, long = "rule")]
        rules: Vec<String>,

        /// Print violations as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docmark=info",
        1 => "docmark=debug",
        _ => "docmark=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Convert {
            files,
            out,
            stdout,
            overwrite,
        } => {
            let config = load(config_path.as_deref())?;
            cmd_convert(config, &files, out.as_deref(), stdout, overwrite).await
        }
        Command::Paste {
            input,
            name,
            out,
            overwrite,
        } => {
            let config = load(config_path.as_deref())?;
            cmd_paste(config, input, name, out, overwrite).await
        }
        Command::Check { file, rules, json } => cmd_check(&file, &rules, json),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

fn load(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// convert
// ---------------------------------------------------------------------------

async fn cmd_convert(
    mut config: AppConfig,
    files: &[PathBuf],
    out: Option<&Path>,
    stdout: bool,
    overwrite: Option<OverwriteArg>,
) -> Result<()> {
    if let Some(policy) = overwrite {
        config.settings.overwrite_behavior = policy.into();
    }
    info!(files = files.len(), "converting documents");

    let reporter = CliProgress::new(files.len());
    let items = convert_batch(
        files,
        &config.settings,
        &config.preprocess,
        Arc::new(MarkupFileExtractor),
        &reporter,
    )
    .await;

    let open_written = config.settings.open_after_conversion && !stdout && files.len() == 1;
    let mut failed = 0;
    for item in items {
        let result = match item.result {
            Ok(result) => result,
            Err(e) => {
                failed += 1;
                eprintln!("  {}: {}", item.path.display(), describe(&e));
                continue;
            }
        };

        if stdout {
            report_warnings(&item.path, &result.warnings);
            print!("{}", result.markdown);
            continue;
        }

        let doc_name = document_name(&ConversionSource::Document(item.path.clone()));
        let dir = match out {
            Some(dir) => dir.to_path_buf(),
            None => item.path.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        let paths = resolve_output_paths(&dir, &doc_name, &config.settings);
        match write_output(&result, &paths, config.settings.overwrite_behavior) {
            Ok(outcome) => {
                if config.settings.show_notifications {
                    print_outcome(&item.path, &outcome, &result);
                }
                if open_written {
                    open_in_editor(&outcome);
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("  {}: {}", item.path.display(), describe(&e));
            }
        }
    }

    if failed > 0 {
        return Err(eyre!("{failed} of {} documents failed", files.len()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// paste
// ---------------------------------------------------------------------------

async fn cmd_paste(
    mut config: AppConfig,
    input: Option<PathBuf>,
    name: Option<String>,
    out: Option<PathBuf>,
    overwrite: Option<OverwriteArg>,
) -> Result<()> {
    if let Some(policy) = overwrite {
        config.settings.overwrite_behavior = policy.into();
    }

    let raw = match &input {
        Some(path) => {
            std::fs::read_to_string(path).map_err(|e| DocmarkError::io(path, e))?
        }
        None => io::read_to_string(io::stdin()).map_err(|e| eyre!("cannot read stdin: {e}"))?,
    };
    let payload: ClipboardPayload =
        serde_json::from_str(&raw).map_err(|e| eyre!("invalid clipboard payload: {e}"))?;
    if !payload.has_rich_content && payload.html.trim().is_empty() {
        return Err(eyre!("clipboard payload has no content to convert"));
    }

    let doc_name = name.unwrap_or_else(|| CLIPBOARD_DOC_NAME.to_string());
    info!(doc = %doc_name, images = payload.images.len(), "converting clipboard payload");

    let settings = config.settings.clone();
    let preprocess = config.preprocess.clone();
    let task_name = doc_name.clone();
    let result = tokio::task::spawn_blocking(move || {
        convert_as(
            &ConversionSource::Clipboard(payload),
            &task_name,
            &settings,
            &preprocess,
            &MarkupFileExtractor,
        )
    })
    .await??;

    let dir = match out {
        Some(dir) => dir,
        None => std::env::current_dir().map_err(|e| eyre!("cannot determine working directory: {e}"))?,
    };
    let paths = resolve_output_paths(&dir, &doc_name, &config.settings);
    let origin = PathBuf::from(format!("<{doc_name}>"));

    match config.settings.paste_target {
        PasteTarget::CurrentEditor => {
            // Markdown goes to stdout; images still need a home on disk,
            // one that no earlier paste is using.
            let result = if result.images.is_empty() {
                result
            } else {
                let folder = unique_folder_path(&paths.images_folder_path);
                let moved = relink_images(&result, &folder);
                write_images(&moved.images, &folder)?;
                moved
            };
            report_warnings(&origin, &result.warnings);
            print!("{}", result.markdown);
        }
        PasteTarget::NewFile => {
            let outcome = write_output(&result, &paths, config.settings.overwrite_behavior)?;
            if config.settings.show_notifications {
                print_outcome(&origin, &outcome, &result);
            }
            if config.settings.open_after_conversion {
                open_in_editor(&outcome);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

fn cmd_check(file: &Path, rules: &[String], json: bool) -> Result<()> {
    let md = std::fs::read_to_string(file).map_err(|e| DocmarkError::io(file, e))?;
    let violations = if rules.is_empty() {
        docmark_markdown::check_all_invariants(&md)
    } else {
        let ids: Vec<&str> = rules.iter().map(String::as_str).collect();
        docmark_markdown::check_invariants(&md, &ids)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&violations)?);
    } else {
        for v in &violations {
            match v.line {
                Some(line) => println!("{}:{line}: [{}] {}", file.display(), v.rule, v.message),
                None => println!("{}: [{}] {}", file.display(), v.rule, v.message),
            }
            if !v.excerpt.is_empty() {
                println!("    {}", v.excerpt);
            }
        }
    }

    if !violations.is_empty() {
        return Err(eyre!("{} invariant violation(s) in {}", violations.len(), file.display()));
    }
    info!(file = %file.display(), "all invariants hold");
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = load(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

/// Write a result, asking on the terminal when the policy is `prompt` and
/// the file exists. Without a terminal, `prompt` means `skip`.
fn write_output(
    result: &ConversionResult,
    paths: &OutputPaths,
    policy: OverwriteBehavior,
) -> docmark_shared::Result<WriteOutcome> {
    let policy = if policy == OverwriteBehavior::Prompt && paths.markdown_path.exists() {
        ask_overwrite(&paths.markdown_path)
    } else {
        policy
    };
    write_conversion_result(result, paths, policy)
}

fn ask_overwrite(path: &Path) -> OverwriteBehavior {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return OverwriteBehavior::Skip;
    }

    eprint!("{} already exists. [o]verwrite, [s]kip, [r]ename? ", path.display());
    let _ = io::stderr().flush();
    let mut answer = String::new();
    if stdin.lock().read_line(&mut answer).is_err() {
        return OverwriteBehavior::Skip;
    }
    parse_overwrite_answer(&answer)
}

fn parse_overwrite_answer(answer: &str) -> OverwriteBehavior {
    match answer.trim().to_ascii_lowercase().as_str() {
        "o" | "overwrite" | "y" | "yes" => OverwriteBehavior::Overwrite,
        "r" | "rename" => OverwriteBehavior::Rename,
        _ => OverwriteBehavior::Skip,
    }
}

/// Open a freshly written document in `$VISUAL` or `$EDITOR`. Only done
/// when stdout is a terminal; failures are logged, not fatal.
fn open_in_editor(outcome: &WriteOutcome) {
    let WriteOutcome::Written { markdown_path, .. } = outcome else {
        return;
    };
    if !io::stdout().is_terminal() {
        return;
    }
    let editor = std::env::var("VISUAL")
        .ok()
        .or_else(|| std::env::var("EDITOR").ok())
        .filter(|e| !e.trim().is_empty());
    let Some((program, args)) = editor.as_deref().and_then(editor_command) else {
        debug!("no editor configured, not opening output");
        return;
    };

    match std::process::Command::new(program).args(args).arg(markdown_path).status() {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(editor = program, %status, "editor exited with an error"),
        Err(e) => warn!(editor = program, error = %e, "cannot start editor"),
    }
}

/// Split an editor setting such as `code --wait` into program and arguments.
fn editor_command(editor: &str) -> Option<(&str, Vec<&str>)> {
    let mut parts = editor.split_whitespace();
    let program = parts.next()?;
    Some((program, parts.collect()))
}

fn print_outcome(source: &Path, outcome: &WriteOutcome, result: &ConversionResult) {
    match outcome {
        WriteOutcome::Written {
            markdown_path,
            images_written,
        } => {
            println!(
                "  {} -> {} ({images_written} images, {} warnings)",
                source.display(),
                markdown_path.display(),
                result.warnings.len()
            );
            report_warnings(source, &result.warnings);
        }
        WriteOutcome::Skipped { markdown_path } => {
            println!("  Skipped: {} already exists.", markdown_path.display());
        }
    }
}

fn report_warnings(source: &Path, warnings: &[String]) {
    for w in warnings {
        warn!(source = %source.display(), "{w}");
    }
}

fn describe(err: &DocmarkError) -> String {
    match err {
        DocmarkError::Source { detail, .. } => format!("{} ({detail})", err.user_message()),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn document_converted(&self, path: &Path, current: usize, _total: usize) {
        self.bar.set_position(current as u64);
        self.bar.set_message(path.display().to_string());
    }

    fn document_failed(&self, path: &Path, _error: &DocmarkError, current: usize, _total: usize) {
        self.bar.set_position(current as u64);
        self.bar.set_message(format!("failed: {}", path.display()));
    }

    fn done(&self, summary: &BatchSummary) {
        self.bar.finish_and_clear();
        info!(
            converted = summary.converted,
            failed = summary.failed,
            "converted in {:.1}s",
            summary.elapsed.as_secs_f64()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_args_parse() {
        let cli = Cli::try_parse_from([
            "docmark", "-vv", "convert", "a.html", "b.htm", "--out", "md", "--overwrite", "rename",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Convert {
                files,
                out,
                stdout,
                overwrite,
            } => {
                assert_eq!(files.len(), 2);
                assert_eq!(out, Some(PathBuf::from("md")));
                assert!(!stdout);
                assert_eq!(overwrite, Some(OverwriteArg::Rename));
            }
            _ => panic!("expected convert"),
        }
    }

    #[test]
    fn convert_requires_files() {
        assert!(Cli::try_parse_from(["docmark", "convert"]).is_err());
    }

    #[test]
    fn check_collects_rules() {
        let cli = Cli::try_parse_from([
            "docmark", "check", "out.md", "--rule", "no-inline-style", "-r", "stable-anchors",
        ])
        .unwrap();
        match cli.command {
            Command::Check { rules, json, .. } => {
                assert_eq!(rules, ["no-inline-style", "stable-anchors"]);
                assert!(!json);
            }
            _ => panic!("expected check"),
        }
    }

    #[test]
    fn editor_setting_splits_arguments() {
        assert_eq!(editor_command("code --wait"), Some(("code", vec!["--wait"])));
        assert_eq!(editor_command("vim"), Some(("vim", Vec::new())));
        assert_eq!(editor_command("   "), None);
    }

    #[test]
    fn overwrite_answers() {
        assert_eq!(parse_overwrite_answer("o\n"), OverwriteBehavior::Overwrite);
        assert_eq!(parse_overwrite_answer(" Rename "), OverwriteBehavior::Rename);
        assert_eq!(parse_overwrite_answer(""), OverwriteBehavior::Skip);
        assert_eq!(parse_overwrite_answer("what"), OverwriteBehavior::Skip);
    }

    #[test]
    fn overwrite_arg_maps_to_policy() {
        assert_eq!(OverwriteBehavior::from(OverwriteArg::Skip), OverwriteBehavior::Skip);
        assert_eq!(OverwriteBehavior::from(OverwriteArg::Prompt), OverwriteBehavior::Prompt);
    }
}
