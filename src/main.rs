mod checksum;
mod error;
mod pipeline;
mod probe;
mod progress;
mod report;
mod sequence;
mod tool;
mod transcode;
mod util;
mod verify;
mod workspace;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use pipeline::{RunContext, RunSummary};
use progress::{ProgressConfig, ProgressMode};
use report::ReportWriter;
use std::path::PathBuf;
use std::time::Duration;
use tool::Toolchain;

#[derive(Parser)]
#[command(
    name = "seqcert",
    version,
    about = "Transcode every DPX/TIFF image sequence under a tree to FFV1 in Matroska and certify losslessness with framemd5"
)]
struct Cli {
    /// Root of the tree to search for image sequences
    source_directory: PathBuf,

    /// Where per-sequence output folders are created
    destination: PathBuf,

    /// CSV report path. Default: <destination>/dpx_transcode_report_<timestamp>.csv
    #[arg(long)]
    report: Option<PathBuf>,

    /// Directories processed concurrently. Default: 1 (strictly sequential).
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Kill any single ffmpeg invocation that runs longer than this.
    #[arg(long)]
    tool_timeout_secs: Option<u64>,

    /// ffmpeg executable
    #[arg(long, env = "SEQCERT_FFMPEG", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// ffprobe executable
    #[arg(long, env = "SEQCERT_FFPROBE", default_value = "ffprobe")]
    ffprobe: PathBuf,

    /// Progress display mode: auto (TTY-aware), rich, plain, quiet.
    #[arg(long, value_enum, default_value_t = ProgressMode::Auto)]
    progress: ProgressMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    if !cli.source_directory.is_dir() {
        bail!(
            "source directory {} is not a directory",
            cli.source_directory.display()
        );
    }

    let tools = Toolchain {
        ffmpeg: cli.ffmpeg,
        ffprobe: cli.ffprobe,
        timeout: cli.tool_timeout_secs.map(Duration::from_secs),
    };
    for (program, version) in
        util::ensure_tools_available(&tools).context("ffmpeg/ffprobe not usable")?
    {
        log::info!("{} version: {}", program, version);
    }

    std::fs::create_dir_all(&cli.destination)
        .with_context(|| format!("create destination {}", cli.destination.display()))?;

    let report_path = cli.report.unwrap_or_else(|| {
        cli.destination.join(format!(
            "dpx_transcode_report_{}.csv",
            workspace::run_stamp(&Local::now())
        ))
    });
    let report = ReportWriter::create(&report_path)?;
    log::info!("report: {}", report.path().display());

    let cores = num_cpus::get().max(1);
    let workers = cli.workers.clamp(1, cores);
    if workers != cli.workers {
        log::warn!("workers clamped from {} to {}", cli.workers, workers);
    }

    let ctx = RunContext {
        source_root: cli.source_directory,
        destination: cli.destination,
        tools,
        report,
        workers,
        progress: ProgressConfig::new(cli.progress),
    };

    let summary = pipeline::run(&ctx)?;
    print_run_summary(&summary, &ctx);
    Ok(())
}

fn print_run_summary(summary: &RunSummary, ctx: &RunContext) {
    println!(
        "Run summary: directories={} sequences={} skipped={} failed={} lossless={} lossless_par={} not_lossless={} workers={} duration={} report={}",
        summary.directories,
        summary.sequences,
        summary.skipped,
        summary.failed,
        summary.lossless,
        summary.lossless_par,
        summary.not_lossless,
        ctx.workers,
        util::fmt_duration(summary.elapsed),
        ctx.report.path().display(),
    );
    for warning in &summary.warnings {
        println!("  warning: {}", warning);
    }
}
