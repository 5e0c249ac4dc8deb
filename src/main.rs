//! Command-line front end for the masking engine.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use zentinel_masking::{MaskingConfig, MaskingConfigJson, MaskingService, Segment};

/// Reversible masking of sensitive entities in text and documents
///
/// Detects phone numbers, ID and bank card numbers, emails, IP addresses,
/// dates, times and money amounts, replaces them with tokens and keeps a
/// mapping file so the text can be restored.
#[derive(Parser, Debug)]
#[command(name = "zentinel-mask")]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON configuration file (kebab-case keys)
    #[arg(long, env = "MASKING_CONFIG")]
    config: Option<PathBuf>,

    /// Mapping file, overrides the configuration file
    #[arg(long, env = "MASKING_MAPPING_FILE")]
    mapping_file: Option<PathBuf>,

    /// Default strategy: opaque, fixed, hash, template, context, hybrid, custom
    #[arg(long, env = "MASKING_STRATEGY")]
    strategy: Option<String>,

    /// Run segments and detector chunks concurrently
    #[arg(long, env = "MASKING_PARALLEL", default_value = "false")]
    parallel: bool,

    /// Enable verbose debug logging
    #[arg(long, short, env = "VERBOSE", default_value = "false")]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, env = "JSON_LOGS", default_value = "false")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mask plain text
    MaskText(Io),
    /// Restore plain text
    UnmaskText(Io),
    /// Mask a content-list JSON document
    MaskDocument(Io),
    /// Restore a content-list JSON document
    UnmaskDocument(Io),
    /// Mask markdown paragraph by paragraph
    MaskMarkdown(Io),
    /// Restore markdown
    UnmaskMarkdown(Io),
    /// Manage custom replacements
    #[command(subcommand)]
    Custom(CustomCommand),
    /// Forget every mapping
    ClearMapping {
        /// Also delete the mapping file
        #[arg(long)]
        delete_file: bool,
    },
}

#[derive(clap::Args, Debug)]
struct Io {
    /// Input file (stdin if omitted)
    input: Option<PathBuf>,

    /// Output file (stdout if omitted)
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum CustomCommand {
    /// Always mask ORIGINAL as REPLACEMENT
    Add { original: String, replacement: String },
    /// Remove the replacement for ORIGINAL
    Remove { original: String },
    /// List registered replacements
    List,
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    // stdout carries masked output
    if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn load_config(args: &Args) -> Result<MaskingConfig> {
    let mut json = match &args.config {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str::<MaskingConfigJson>(&raw)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => MaskingConfigJson::default(),
    };

    if let Some(mapping_file) = &args.mapping_file {
        json.mapping_file = Some(mapping_file.clone());
    }
    if let Some(strategy) = &args.strategy {
        json.default_strategy = strategy.clone();
    }
    if args.parallel {
        json.parallel = true;
    }
    Ok(json.into())
}

async fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

async fn write_output(path: Option<&Path>, content: &str) -> Result<()> {
    match path {
        Some(path) => tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(content.as_bytes()).await?;
            stdout.flush().await?;
            Ok(())
        }
    }
}

async fn read_segments(io: &Io) -> Result<Vec<Segment>> {
    let raw = read_input(io.input.as_deref()).await?;
    serde_json::from_str(&raw).context("Input is not a content-list JSON array")
}

async fn write_segments(io: &Io, segments: &[Segment]) -> Result<()> {
    let mut out = serde_json::to_string_pretty(segments)?;
    out.push('\n');
    write_output(io.output.as_deref(), &out).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs);

    let config = load_config(&args).await?;
    info!(
        mapping_file = ?config.mapping_file,
        strategy = config.default_strategy.as_str(),
        parallel = config.parallel,
        "Starting masking"
    );
    let service = MaskingService::regex_only(config);

    match &args.command {
        Command::MaskText(io) => {
            let text = read_input(io.input.as_deref()).await?;
            let masked = service.mask_text(&text).await;
            write_output(io.output.as_deref(), &masked).await?;
        }
        Command::UnmaskText(io) => {
            let text = read_input(io.input.as_deref()).await?;
            let restored = service.unmask_text(&text).await;
            write_output(io.output.as_deref(), &restored).await?;
        }
        Command::MaskDocument(io) => {
            let segments = read_segments(io).await?;
            let masked = service.mask_document(&segments).await;
            write_segments(io, &masked).await?;
        }
        Command::UnmaskDocument(io) => {
            let segments = read_segments(io).await?;
            let restored = service.unmask_document(&segments).await;
            write_segments(io, &restored).await?;
        }
        Command::MaskMarkdown(io) => {
            let markdown = read_input(io.input.as_deref()).await?;
            let masked = service.mask_markdown(&markdown).await;
            write_output(io.output.as_deref(), &masked).await?;
        }
        Command::UnmaskMarkdown(io) => {
            let markdown = read_input(io.input.as_deref()).await?;
            let restored = service.unmask_markdown(&markdown).await;
            write_output(io.output.as_deref(), &restored).await?;
        }
        Command::Custom(CustomCommand::Add {
            original,
            replacement,
        }) => {
            service
                .register_custom_replacement(original, replacement)
                .await
                .context("Failed to register custom replacement")?;
            service.save_mapping().await?;
        }
        Command::Custom(CustomCommand::Remove { original }) => {
            if service.remove_custom_replacement(original).await {
                service.save_mapping().await?;
            } else {
                info!("No custom replacement registered for that value");
            }
        }
        Command::Custom(CustomCommand::List) => {
            let replacements = service.custom_replacements().await;
            let mut out = serde_json::to_string_pretty(&replacements)?;
            out.push('\n');
            write_output(None, &out).await?;
        }
        Command::ClearMapping { delete_file } => {
            service.clear_mapping(*delete_file).await;
            if !*delete_file {
                service.save_mapping().await?;
            }
        }
    }

    Ok(())
}
