//! batch-resizer CLI
//!
//! Converts images to one format and size in parallel. Ctrl-C cancels the
//! batch: running jobs finish, the rest are reported as cancelled.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use batch_resizer::config::DEFAULT_TARGET_SIZE_KB;
use batch_resizer::processing::supported_input_extensions;
use batch_resizer::{
    discover_inputs, init_with_config, BatchPlanner, BatchReport, JobResult, JobStatus,
    OutputFormat, ProgressState, ResizeSpec, Scheduler, Settings,
};

/// batch-resizer - parallel batch image converter
#[derive(Parser)]
#[command(
    name = "batch-resizer",
    version,
    about = "Batch-convert images to one format and size, in parallel",
    long_about = "Resizes and re-encodes a set of images to JPEG, PNG or WebP. Lossy formats can \
                  be compressed to a target file size. Outputs never overwrite their inputs or \
                  each other.",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Input files or directories
    #[arg(value_name = "INPUTS")]
    inputs: Vec<PathBuf>,

    /// Output directory (default: a `resized` folder next to each input)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Scale by percentage
    #[arg(
        short,
        long,
        value_name = "PERCENT",
        conflicts_with_all = ["width", "height", "fit"]
    )]
    percent: Option<u32>,

    /// Target width in pixels, height follows aspect ratio
    #[arg(
        short,
        long,
        value_name = "PIXELS",
        conflicts_with_all = ["percent", "height", "fit"]
    )]
    width: Option<u32>,

    /// Target height in pixels, width follows aspect ratio
    #[arg(
        short = 'H',
        long,
        value_name = "PIXELS",
        conflicts_with_all = ["percent", "width", "fit"]
    )]
    height: Option<u32>,

    /// Fit within dimensions (width x height)
    #[arg(
        long,
        value_name = "WxH",
        value_parser = parse_dimensions,
        conflicts_with_all = ["percent", "width", "height"]
    )]
    fit: Option<(u32, u32)>,

    /// Output format
    #[arg(short, long, value_enum, value_name = "FORMAT")]
    format: Option<CliOutputFormat>,

    /// Output quality (1-100)
    #[arg(
        short,
        long,
        value_name = "QUALITY",
        value_parser = clap::value_parser!(u8).range(1..=100)
    )]
    quality: Option<u8>,

    /// Compress lossy outputs to at most this many kilobytes
    #[arg(
        long,
        value_name = "KB",
        num_args = 0..=1,
        default_missing_value = DEFAULT_TARGET_SIZE_KB_STR
    )]
    target_kb: Option<u64>,

    /// Number of worker threads (default: CPU count - 1)
    #[arg(short, long, value_name = "COUNT")]
    threads: Option<usize>,

    /// Configuration file path (.toml or .yaml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Process directories recursively
    #[arg(short = 'R', long)]
    recursive: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short = 'Q', long, conflicts_with = "verbose")]
    quiet: bool,
}

const DEFAULT_TARGET_SIZE_KB_STR: &str = "500";

/// Available subcommands
#[derive(Subcommand)]
enum Commands {
    /// Generate example configuration file
    ExampleConfig {
        /// Output file path
        #[arg(short, long, default_value = "batch-resizer.toml")]
        output: PathBuf,
        /// Use YAML format instead of TOML
        #[arg(long)]
        yaml: bool,
    },
    /// List supported input and output formats
    Formats,
}

/// CLI-compatible output format enum
#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliOutputFormat {
    Jpeg,
    Png,
    Webp,
    Avif,
}

impl From<CliOutputFormat> for OutputFormat {
    fn from(format: CliOutputFormat) -> Self {
        match format {
            CliOutputFormat::Jpeg => OutputFormat::Jpeg,
            CliOutputFormat::Png => OutputFormat::Png,
            CliOutputFormat::Webp => OutputFormat::WebP,
            CliOutputFormat::Avif => OutputFormat::Avif,
        }
    }
}

/// Parse dimension string (e.g., "1920x1080")
fn parse_dimensions(s: &str) -> Result<(u32, u32), String> {
    let (width, height) = s.split_once(['x', 'X']).ok_or_else(|| {
        "Dimensions must be in format 'WIDTHxHEIGHT' (e.g., '1920x1080')".to_string()
    })?;

    let width = width
        .trim()
        .parse::<u32>()
        .map_err(|_| "Invalid width value".to_string())?;
    let height = height
        .trim()
        .parse::<u32>()
        .map_err(|_| "Invalid height value".to_string())?;

    if width == 0 || height == 0 {
        return Err("Width and height must be greater than 0".to_string());
    }

    Ok((width, height))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Some(command) = cli.command {
        if let Err(e) = handle_subcommand(command) {
            eprintln!("{}: {}", style("Error").red().bold(), describe(&e));
            process::exit(1);
        }
        return;
    }

    match run_batch(&cli).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{}: {}", style("Error").red().bold(), describe(&e));
            process::exit(1);
        }
    }
}

/// Library errors without added context get their friendlier wording
fn describe(error: &anyhow::Error) -> String {
    match error.downcast_ref::<batch_resizer::Error>() {
        Some(inner) if error.chain().count() == 1 => inner.user_message(),
        _ => format!("{:#}", error),
    }
}

/// Handle subcommands
fn handle_subcommand(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::ExampleConfig { output, yaml } => generate_example_config(&output, yaml),
        Commands::Formats => {
            show_formats();
            Ok(())
        }
    }
}

/// Merge the config file (if any) with command-line overrides
fn build_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Settings::default(),
    };

    if let Some(output) = &cli.output {
        settings.output_dir = Some(output.clone());
    }
    if let Some(format) = cli.format {
        settings.format = format.into();
    }
    if let Some(quality) = cli.quality {
        settings.quality = quality;
    }
    if cli.target_kb.is_some() {
        settings.target_size_kb = cli.target_kb;
    }
    if cli.threads.is_some() {
        settings.threads = cli.threads;
    }
    if cli.recursive {
        settings.recursive = true;
    }

    if let Some(percent) = cli.percent {
        settings.resize = ResizeSpec::Percentage { percent };
    } else if let Some(width) = cli.width {
        settings.resize = ResizeSpec::FitWidth { width };
    } else if let Some(height) = cli.height {
        settings.resize = ResizeSpec::FitHeight { height };
    } else if let Some((width, height)) = cli.fit {
        settings.resize = ResizeSpec::FitBoundingBox { width, height };
    }

    if cli.quiet {
        settings.logging.level = "error".to_string();
    } else if cli.verbose {
        settings.logging.level = "debug".to_string();
    }
    if cli.json {
        settings.logging.json_format = true;
    }

    settings.validate()?;
    Ok(settings)
}

/// Run one batch. Returns whether every job avoided a hard failure.
async fn run_batch(cli: &Cli) -> anyhow::Result<bool> {
    let settings = build_settings(cli)?;
    init_with_config(&settings)?;

    if cli.inputs.is_empty() {
        bail!("No inputs given. Run with --help for usage information");
    }

    let files = discover_inputs(&cli.inputs, settings.recursive);
    if files.is_empty() {
        bail!("No supported image files found in the given inputs");
    }
    info!("Found {} files to process", files.len());

    let encode = settings.encode_spec()?;
    let planner = BatchPlanner::new(settings.resize, encode, settings.output_target())?;
    let jobs = planner.plan(&files).context("Could not prepare output folders")?;

    let scheduler = Arc::new(Scheduler::new(settings.concurrency()));
    let mut handle = scheduler.submit(jobs)?;

    let signal_scheduler = Arc::clone(&scheduler);
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing running jobs");
            signal_scheduler.cancel();
        }
    });

    let progress = (!cli.json && !cli.quiet).then(|| {
        let pb = ProgressBar::new(handle.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    });

    let tracker = scheduler.progress();
    while let Some((index, result)) = handle.next().await {
        let snapshot = tracker.snapshot();
        debug!(
            "Job {} finished: {:?} ({})",
            index,
            result.status,
            snapshot.status_text()
        );
        if let Some(pb) = &progress {
            pb.set_message(format!(
                "{} | ETA {} | {}",
                snapshot.speed_text(),
                snapshot.eta_text(),
                file_name(&result.input_path)
            ));
            pb.inc(1);
        }
    }

    let report = handle.finish().await?;
    signal_task.abort();

    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !cli.quiet {
        print_results(&report);
        print_summary(&report, &tracker.snapshot());
    }

    Ok(!report.has_failures())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0)
    } else {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    }
}

/// Print one line per job, in input order
fn print_results(report: &BatchReport) {
    println!();
    for result in &report.results {
        println!("{}", result_line(result));
    }
}

fn result_line(result: &JobResult) -> String {
    let name = file_name(&result.input_path);
    match result.status {
        JobStatus::Success => {
            let line = format!(
                "{} {}  {}x{} -> {}x{}  {} -> {} ({:+.1}%)",
                style("✓").green(),
                name,
                result.original_dims.0,
                result.original_dims.1,
                result.new_dims.0,
                result.new_dims.1,
                format_size(result.original_bytes),
                format_size(result.new_bytes),
                -result.reduction_percent()
            );
            match &result.message {
                Some(note) => format!("{}  {}", line, style(note).yellow()),
                None => line,
            }
        }
        JobStatus::Cancelled => {
            format!("{} {}  {}", style("-").dim(), name, style("Cancelled").dim())
        }
        status => format!(
            "{} {}  {}: {}",
            style("✗").red(),
            name,
            style(status.label()).red(),
            result.message.as_deref().unwrap_or("")
        ),
    }
}

/// Print processing summary
fn print_summary(report: &BatchReport, progress: &ProgressState) {
    println!();
    println!("{}", style(report.status_line()).bold());
    println!("  {}: {}", style("Processed").green(), report.succeeded());
    if report.with_warnings() > 0 {
        println!("  {}: {}", style("With warnings").yellow(), report.with_warnings());
    }
    if report.failed() > 0 {
        println!("  {}: {}", style("Failed").red(), report.failed());
    }
    if report.cancelled() > 0 {
        println!("  {}: {}", style("Cancelled").dim(), report.cancelled());
    }
    println!(
        "  {}: {:.2}s ({})",
        style("Duration").blue(),
        report.elapsed.as_secs_f64(),
        progress.speed_text()
    );

    if report.succeeded() > 0 {
        println!(
            "  {}: {} → {}",
            style("Size").cyan(),
            format_size(report.total_input_size()),
            format_size(report.total_output_size())
        );
        println!(
            "  {}: {:.1}x ({:.1}% reduction)",
            style("Compression").cyan(),
            report.compression_ratio(),
            report.size_reduction()
        );
    }
}

/// Generate example configuration file
fn generate_example_config(output_path: &Path, use_yaml: bool) -> anyhow::Result<()> {
    let output_path = match output_path.extension().and_then(|e| e.to_str()) {
        Some("toml") if use_yaml => output_path.with_extension("yaml"),
        _ => output_path.to_path_buf(),
    };

    let settings = Settings {
        output_dir: Some(PathBuf::from("resized")),
        format: OutputFormat::WebP,
        target_size_kb: Some(DEFAULT_TARGET_SIZE_KB),
        resize: ResizeSpec::FitBoundingBox {
            width: 1920,
            height: 1080,
        },
        ..Settings::default()
    };
    settings
        .to_file(&output_path)
        .with_context(|| format!("Could not write {}", output_path.display()))?;

    let format = if use_yaml { "YAML" } else { "TOML" };
    println!(
        "{}: Generated example {} configuration: {}",
        style("Success").green().bold(),
        format,
        output_path.display()
    );

    Ok(())
}

/// Show supported formats
fn show_formats() {
    println!("{}", style("Input formats:").bold());
    let inputs: Vec<_> = supported_input_extensions().collect();
    println!("  {}", inputs.join(" "));
    if !cfg!(feature = "raw") {
        println!("  {}", style("(camera RAW decoding is disabled in this build)").dim());
    }
    println!();

    println!("{}", style("Output formats:").bold());
    for format in OutputFormat::all() {
        let note = match (format.is_encodable(), format.is_lossy()) {
            (false, _) => style("not available in this build").dim().to_string(),
            (true, true) => "quality 1-100, target size".to_string(),
            (true, false) => "lossless".to_string(),
        };
        println!("  {:<5} {:<6} {}", format.to_string(), format.extension(), note);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(parse_dimensions("1920x1080"), Ok((1920, 1080)));
        assert_eq!(parse_dimensions("640X480"), Ok((640, 480)));
        assert!(parse_dimensions("1920").is_err());
        assert!(parse_dimensions("0x10").is_err());
        assert!(parse_dimensions("axb").is_err());
    }

    #[test]
    fn test_cli_overrides_settings() {
        let cli = Cli::parse_from([
            "batch-resizer",
            "a.jpg",
            "--fit",
            "800x600",
            "--format",
            "webp",
            "--target-kb",
        ]);
        let settings = build_settings(&cli).unwrap();
        assert_eq!(
            settings.resize,
            ResizeSpec::FitBoundingBox {
                width: 800,
                height: 600
            }
        );
        assert_eq!(settings.format, OutputFormat::WebP);
        assert_eq!(settings.target_size_kb, Some(DEFAULT_TARGET_SIZE_KB));
        assert_eq!(cli.inputs, vec![PathBuf::from("a.jpg")]);
    }

    #[test]
    fn test_describe_uses_friendly_library_message() {
        let bare = anyhow::Error::new(batch_resizer::Error::BatchInProgress);
        assert!(describe(&bare).contains("already running"));

        let wrapped = anyhow::Error::new(batch_resizer::Error::config("bad level"))
            .context("Failed to load configuration");
        let text = describe(&wrapped);
        assert!(text.starts_with("Failed to load configuration"));
        assert!(text.contains("bad level"));
    }

    #[test]
    fn test_default_target_matches_constant() {
        assert_eq!(DEFAULT_TARGET_SIZE_KB_STR.parse::<u64>().unwrap(), DEFAULT_TARGET_SIZE_KB);
    }
}
