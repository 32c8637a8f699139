//! Studio compositing CLI
//!
//! Runs a whole batch through the workflow against one backdrop and writes
//! the finalized images next to their inputs or into `--output`.

use super::config::CliConfigBuilder;
use super::progress::IndicatifProgressReporter;
use crate::{
    backends::MaskDirectoryRemover,
    config::{OutputFormat, WorkflowConfig},
    services::{ImageIOService, ProgressTracker},
    tracing_config::{init_cli_tracing, spans},
    workflow::{BatchReport, WorkflowOrchestrator},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

/// Studio-style product image compositing
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "imgly-studio")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image files or directories
    #[arg(value_name = "INPUT", required_unless_present = "print_config")]
    pub input: Vec<String>,

    /// Backdrop image every subject is placed on
    #[arg(short, long, value_name = "FILE", required_unless_present = "print_config")]
    pub backdrop: Option<PathBuf>,

    /// Output canvas size as WIDTHxHEIGHT [default: backdrop size]
    #[arg(long, value_name = "WxH")]
    pub canvas: Option<String>,

    /// Output directory [default: next to each input]
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Output format [default: from config, png]
    #[arg(short, long, value_enum)]
    pub format: Option<CliOutputFormat>,

    /// Horizontal center of the subject as a fraction of canvas width
    #[arg(long, default_value_t = 0.5)]
    pub x: f64,

    /// Vertical center of the subject as a fraction of canvas height
    #[arg(long, default_value_t = 0.5)]
    pub y: f64,

    /// Subject width as a fraction of canvas width
    #[arg(long, default_value_t = 0.5)]
    pub scale: f64,

    /// Add a mirrored floor reflection under the subject
    #[arg(long)]
    pub reflection: bool,

    /// Leave out the floor reflection even if the config file enables it
    #[arg(long, conflicts_with = "reflection")]
    pub no_reflection: bool,

    /// Blur the backdrop behind the subject
    #[arg(long)]
    pub depth_of_field: bool,

    /// Render a contact shadow through the compositing service
    #[arg(long)]
    pub shadow: bool,

    /// Run the generative enhancement pass
    #[arg(long)]
    pub enhance: bool,

    /// Store finalized images in the library
    #[arg(long)]
    pub persist: bool,

    /// Background-removal service endpoint
    #[arg(long, value_name = "URL")]
    pub removal_url: Option<String>,

    /// Generative compositing service endpoint
    #[arg(long, value_name = "URL")]
    pub compositing_url: Option<String>,

    /// Library service endpoint
    #[arg(long, value_name = "URL")]
    pub library_url: Option<String>,

    /// Directory of pre-generated masks used instead of a removal service
    #[arg(long, value_name = "DIR", conflicts_with = "removal_url")]
    pub mask_dir: Option<PathBuf>,

    /// Number of external calls in flight at once (1-8)
    #[arg(short, long)]
    pub group_size: Option<usize>,

    /// Process directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Pattern for directory inputs (e.g., "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Workflow config file [default: platform config dir]
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    pub print_config: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Output formats accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliOutputFormat {
    Png,
    Tiff,
    Webp,
}

impl From<CliOutputFormat> for OutputFormat {
    fn from(format: CliOutputFormat) -> Self {
        match format {
            CliOutputFormat::Png => Self::Png,
            CliOutputFormat::Tiff => Self::Tiff,
            CliOutputFormat::Webp => Self::WebP,
        }
    }
}

/// Main entry point for the CLI application
pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;

    if cli.print_config {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    let inputs = collect_inputs(&cli)?;
    if inputs.is_empty() {
        warn!("No supported image files found in the provided inputs");
        return Ok(());
    }
    info!("Found {} image file(s) to process", inputs.len());

    let backdrop_path = cli
        .backdrop
        .as_deref()
        .context("--backdrop is required")?;
    let backdrop = ImageIOService::load_backdrop(backdrop_path, CliConfigBuilder::canvas(&cli)?)
        .await
        .with_context(|| format!("Failed to load backdrop {}", backdrop_path.display()))?;
    let placement = CliConfigBuilder::placement(&cli)?;

    let mut orchestrator = build_orchestrator(&cli, config, &inputs)?;

    let mut uploads = Vec::with_capacity(inputs.len());
    for path in &inputs {
        let upload = ImageIOService::read_upload(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        uploads.push(upload);
    }
    orchestrator.load_batch(uploads)?;
    orchestrator.set_positioning(backdrop, placement)?;

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupted, stopping after the current group");
            token.cancel();
        }
    });

    let batch_span = spans::batch(
        &orchestrator.state().session_id.to_string(),
        orchestrator.state().len(),
    );
    let report = orchestrator
        .run_to_completion()
        .instrument(batch_span)
        .await
        .context("Batch did not complete")?;

    write_outputs(&cli, &inputs, &report, orchestrator.config().output_format).await?;

    println!("{}", report);
    if report.all_failed() {
        anyhow::bail!("All {} images failed", report.total);
    }
    Ok(())
}

/// Wire the remover and optional services into an orchestrator
fn build_orchestrator(
    cli: &Cli,
    config: WorkflowConfig,
    inputs: &[PathBuf],
) -> Result<WorkflowOrchestrator> {
    let progress = if cli.verbose > 0 {
        ProgressTracker::console(true)
    } else {
        ProgressTracker::new(Box::new(IndicatifProgressReporter::new()))
    };

    let mut builder = WorkflowOrchestrator::builder(config).progress(progress);
    if let Some(dir) = &cli.mask_dir {
        let remover = MaskDirectoryRemover::new(dir)
            .with_context(|| format!("Invalid mask directory {}", dir.display()))?
            .excluding(inputs);
        builder = builder.remover(Arc::new(remover));
    }

    builder
        .http_services()
        .context("Invalid service configuration")?
        .build()
        .context("Failed to set up the workflow")
}

/// Write every finalized image and log every failure, in upload order
async fn write_outputs(
    cli: &Cli,
    inputs: &[PathBuf],
    report: &BatchReport,
    format: OutputFormat,
) -> Result<()> {
    let label = cli
        .output
        .as_deref()
        .map_or_else(|| "<input dirs>".to_string(), |p| p.display().to_string());
    let span = spans::write_outputs(Path::new(&label), &format.to_string());

    async {
        for (item, input) in report.items.iter().zip(inputs) {
            match (&item.finalized, &item.error) {
                (Some(image), _) => {
                    let dir = output_dir_for(cli.output.as_deref(), input);
                    let path = ImageIOService::save_output(image, &dir, &item.name, format)
                        .await
                        .with_context(|| format!("Failed to write output for {}", item.name))?;
                    info!("✅ {} → {}", item.name, path.display());
                },
                (None, Some(err)) => {
                    let stage = item
                        .failed_stage
                        .map_or_else(|| "unknown stage".to_string(), |s| s.to_string());
                    error!("❌ {} failed during {}: {}", item.name, stage, err);
                },
                (None, None) => debug!("{} produced no output", item.name),
            }
        }
        Ok(())
    }
    .instrument(span)
    .await
}

/// `--output` if given, otherwise the input's own directory
fn output_dir_for(output: Option<&Path>, input: &Path) -> PathBuf {
    output.map_or_else(
        || {
            input
                .parent()
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
        },
        Path::to_path_buf,
    )
}

/// Expand inputs into a sorted list of image files
fn collect_inputs(cli: &Cli) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for input in &cli.input {
        let path = PathBuf::from(input);

        if path.is_file() {
            if ImageIOService::is_supported_format(&path) {
                files.push(path);
            } else {
                warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            files.extend(find_image_files(&path, cli.recursive, cli.pattern.as_deref())?);
        } else {
            anyhow::bail!(
                "Input path does not exist or is not accessible: {}",
                path.display()
            );
        }
    }

    // Alphanumeric order keeps item indices stable between runs
    files.sort();
    files.dedup();
    Ok(files)
}

/// Find all supported image files in a directory
fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if recursive {
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry?;
            if entry.file_type().is_file() {
                let path = entry.path();
                if ImageIOService::is_supported_format(path) && matches_pattern(path, pattern) {
                    files.push(path.to_path_buf());
                }
            }
        }
    } else {
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory {}", dir.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let path = entry.path();
                if ImageIOService::is_supported_format(&path) && matches_pattern(&path, pattern) {
                    files.push(path);
                }
            }
        }
    }

    Ok(files)
}

/// Check if the file name matches the given glob pattern
fn matches_pattern(path: &Path, pattern: Option<&str>) -> bool {
    match pattern {
        Some(pat) => path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|filename| {
                glob::Pattern::new(pat)
                    .map(|p| p.matches(filename))
                    .unwrap_or(false)
            }),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        std::fs::write(path, b"x").unwrap();
    }

    fn cli_for(inputs: Vec<String>) -> Cli {
        Cli::parse_from(
            std::iter::once("imgly-studio".to_string())
                .chain(["--backdrop".to_string(), "bg.png".to_string()])
                .chain(inputs),
        )
    }

    #[test]
    fn test_cli_parses_effects_and_services() {
        let cli = Cli::parse_from([
            "imgly-studio",
            "--backdrop",
            "marble.png",
            "--x",
            "0.4",
            "--scale",
            "0.3",
            "--reflection",
            "--shadow",
            "--compositing-url",
            "https://compose.example.com",
            "--mask-dir",
            "masks",
            "-g",
            "4",
            "-f",
            "tiff",
            "-vv",
            "shoe.jpg",
            "bag.jpg",
        ]);

        assert_eq!(cli.input, vec!["shoe.jpg", "bag.jpg"]);
        assert_eq!(cli.backdrop.as_deref(), Some(Path::new("marble.png")));
        assert!((cli.x - 0.4).abs() < f64::EPSILON);
        assert!((cli.y - 0.5).abs() < f64::EPSILON);
        assert!(cli.reflection && cli.shadow && !cli.enhance);
        assert_eq!(cli.group_size, Some(4));
        assert_eq!(cli.format, Some(CliOutputFormat::Tiff));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_requires_backdrop_and_inputs() {
        assert!(Cli::try_parse_from(["imgly-studio", "shoe.jpg"]).is_err());
        assert!(Cli::try_parse_from(["imgly-studio", "--backdrop", "bg.png"]).is_err());
        assert!(Cli::try_parse_from(["imgly-studio", "--print-config"]).is_ok());
    }

    #[test]
    fn test_mask_dir_conflicts_with_removal_url() {
        let result = Cli::try_parse_from([
            "imgly-studio",
            "--backdrop",
            "bg.png",
            "--mask-dir",
            "masks",
            "--removal-url",
            "https://remove.example.com",
            "shoe.jpg",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_collect_inputs_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        for name in ["b.jpg", "a.png", "c.txt", "d.JPEG"] {
            touch(&dir.path().join(name));
        }
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        touch(&nested.join("e.png"));

        let cli = cli_for(vec![dir.path().display().to_string()]);
        let files = collect_inputs(&cli).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "b.jpg", "d.JPEG"]);

        let mut recursive = cli_for(vec![dir.path().display().to_string()]);
        recursive.recursive = true;
        recursive.pattern = Some("*.png".to_string());
        let files = collect_inputs(&recursive).unwrap();
        assert_eq!(files, vec![dir.path().join("a.png"), nested.join("e.png")]);
    }

    #[test]
    fn test_collect_inputs_missing_path() {
        let cli = cli_for(vec!["/definitely/not/here.png".to_string()]);
        assert!(collect_inputs(&cli).is_err());
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern(Path::new("dir/shoe.jpg"), Some("*.jpg")));
        assert!(!matches_pattern(Path::new("dir/shoe.png"), Some("*.jpg")));
        assert!(matches_pattern(Path::new("dir/shoe.png"), None));
        assert!(!matches_pattern(Path::new("dir/shoe.png"), Some("[")));
    }

    #[test]
    fn test_output_dir_for() {
        assert_eq!(
            output_dir_for(Some(Path::new("/out")), Path::new("/in/shoe.jpg")),
            PathBuf::from("/out")
        );
        assert_eq!(
            output_dir_for(None, Path::new("/in/shoe.jpg")),
            PathBuf::from("/in")
        );
    }

    #[test]
    fn test_output_format_mapping() {
        assert_eq!(OutputFormat::from(CliOutputFormat::Webp), OutputFormat::WebP);
        assert_eq!(OutputFormat::from(CliOutputFormat::Tiff), OutputFormat::Tiff);
    }
}
