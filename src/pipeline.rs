use anyhow::Result;
use chrono::Local;
use crossbeam_channel::bounded;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use walkdir::WalkDir;

use crate::checksum::{self, ChecksumSource};
use crate::error::{SequenceError, SequenceResult};
use crate::progress::{ProgressConfig, ProgressHandle, ProgressReporter};
use crate::report::{self, ReportRow, ReportWriter};
use crate::sequence::{self, ImageSequence, Numbering};
use crate::tool::Toolchain;
use crate::transcode;
use crate::util;
use crate::verify::{self, Comparison, Verdict};
use crate::workspace;

/// Everything a run needs, built once at startup and shared by reference.
pub struct RunContext {
    pub source_root: PathBuf,
    pub destination: PathBuf,
    pub tools: Toolchain,
    pub report: ReportWriter,
    pub workers: usize,
    pub progress: ProgressConfig,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub directories: usize,
    pub sequences: usize,
    pub skipped: usize,
    pub failed: usize,
    pub lossless: usize,
    pub lossless_par: usize,
    pub not_lossless: usize,
    pub elapsed: Duration,
    pub warnings: Vec<String>,
}

impl RunSummary {
    fn record(&mut self, outcome: &DirectoryOutcome) {
        match outcome {
            DirectoryOutcome::Skipped => self.skipped += 1,
            DirectoryOutcome::Failed(_) => {
                self.sequences += 1;
                self.failed += 1;
            }
            DirectoryOutcome::Certified(verdict) => {
                self.sequences += 1;
                match verdict {
                    Verdict::Lossless => self.lossless += 1,
                    Verdict::LosslessWithParDifference => self.lossless_par += 1,
                    Verdict::NotLossless => self.not_lossless += 1,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryOutcome {
    /// No frame sequence in the directory.
    Skipped,
    /// A verdict was reached and a report row written.
    Certified(Verdict),
    /// Aborted before a verdict; carries the failure kind.
    Failed(&'static str),
}

#[derive(Serialize)]
struct VerificationRecord<'a> {
    sequence: &'a str,
    source_directory: &'a Path,
    frame_count: usize,
    numbering: &'a str,
    pixel_format: &'a str,
    source_checksums: &'a Path,
    output_checksums: &'a Path,
    output: &'a Path,
    #[serde(flatten)]
    comparison: &'a Comparison,
}

/// Walks `ctx.source_root` and processes every directory. Per-directory
/// failures are logged and counted; they never end the walk.
pub fn run(ctx: &RunContext) -> Result<RunSummary> {
    let dirs = discover_directories(&ctx.source_root);
    log::info!(
        "found {} directories under {}",
        dirs.len(),
        ctx.source_root.display()
    );

    let reporter = ProgressReporter::new("seqcert", dirs.len() as u64, ctx.progress);
    let summary = Mutex::new(RunSummary {
        directories: dirs.len(),
        ..RunSummary::default()
    });

    let workers = ctx.workers.max(1);
    if workers == 1 {
        let progress = reporter.handle();
        for dir in &dirs {
            let outcome = handle_directory(ctx, dir, &progress);
            lock(&summary).record(&outcome);
        }
    } else {
        let (tx, rx) = bounded::<PathBuf>(workers);
        std::thread::scope(|s| {
            for _ in 0..workers {
                let rx = rx.clone();
                let progress = reporter.handle();
                let summary = &summary;
                s.spawn(move || {
                    for dir in rx.iter() {
                        let outcome = handle_directory(ctx, &dir, &progress);
                        lock(summary).record(&outcome);
                    }
                });
            }
            drop(rx);
            for dir in dirs {
                if tx.send(dir).is_err() {
                    break;
                }
            }
            drop(tx);
        });
    }

    let outcome = reporter.finish("walk complete");
    log::info!(
        "visited {}/{} directories",
        outcome.processed_dirs,
        outcome.total_dirs
    );
    let mut summary = summary.into_inner().unwrap_or_else(|p| p.into_inner());
    summary.elapsed = outcome.elapsed;
    summary.warnings = outcome.warnings;
    Ok(summary)
}

fn lock(summary: &Mutex<RunSummary>) -> std::sync::MutexGuard<'_, RunSummary> {
    summary.lock().unwrap_or_else(|p| p.into_inner())
}

/// Every directory under `root` (root included), in a stable order.
/// Unreadable entries are logged and skipped.
pub fn discover_directories(root: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![];
    for entry in WalkDir::new(root).sort_by_file_name() {
        match entry {
            Ok(e) if e.file_type().is_dir() => dirs.push(e.into_path()),
            Ok(_) => {}
            Err(err) => log::warn!("skipping unreadable entry: {}", err),
        }
    }
    dirs
}

fn handle_directory(ctx: &RunContext, dir: &Path, progress: &ProgressHandle) -> DirectoryOutcome {
    let op = dir
        .strip_prefix(&ctx.source_root)
        .ok()
        .filter(|rel| !rel.as_os_str().is_empty())
        .map(|rel| rel.display().to_string())
        .unwrap_or_else(|| util::folder_basename(dir));

    let outcome = match process_directory(ctx, dir, &op, progress) {
        Ok(None) => DirectoryOutcome::Skipped,
        Ok(Some(row)) => match ctx.report.append(&row) {
            Ok(()) => {
                announce_verdict(&row);
                DirectoryOutcome::Certified(row.verdict)
            }
            Err(err) => {
                log::error!("{}: failed to append report row: {:#}", dir.display(), err);
                DirectoryOutcome::Failed("report")
            }
        },
        Err(err) => {
            log::error!("{}: aborted ({}): {}", dir.display(), err.kind(), err);
            progress.warn(format!("{}: {}", op, err));
            DirectoryOutcome::Failed(err.kind())
        }
    };

    let status = match &outcome {
        DirectoryOutcome::Skipped => "skipped".to_string(),
        DirectoryOutcome::Certified(v) => v.to_string(),
        DirectoryOutcome::Failed(kind) => format!("failed ({})", kind),
    };
    progress.complete_operation(&op, &status);
    outcome
}

/// DISCOVER -> BUILD_WORKSPACE -> SOURCE_CHECKSUM -> TRANSCODE -> OUTPUT_CHECKSUM -> VERIFY.
/// Returns the report row, or `None` when the directory holds no sequence.
pub fn process_directory(
    ctx: &RunContext,
    dir: &Path,
    op: &str,
    progress: &ProgressHandle,
) -> SequenceResult<Option<ReportRow>> {
    let started_at = Local::now();

    progress.set_operation_status(op, "discover");
    let Some(sequence) = sequence::locate(dir).map_err(|e| SequenceError::io(dir, e))? else {
        log::debug!("{}: no image sequence", dir.display());
        return Ok(None);
    };
    if let Numbering::Unrecognized { reason } = &sequence.numbering {
        log::warn!(
            "{}: numbering not recognized ({}); identifying by directory name",
            dir.display(),
            reason
        );
    }
    log::info!(
        "{}: {} {} frames",
        dir.display(),
        sequence.frame_count(),
        sequence.extension
    );

    let source_bytes = util::directory_size(dir).map_err(|e| SequenceError::io(dir, e))?;

    progress.set_operation_status(op, "workspace");
    let ws = workspace::build(&sequence, &ctx.destination, &started_at)?;

    progress.set_operation_status(op, "source checksum");
    let source_log = checksum::generate(
        &ctx.tools,
        ChecksumSource::Sequence(&sequence),
        &ws.source_checksum_path(),
        &ws.log_path("source_framemd5"),
    )?;

    progress.set_operation_status(op, "transcode + output checksum");
    let (output_log, encoded) = transcode::transcode(&ctx.tools, &sequence, &ws)?;

    progress.set_operation_status(op, "verify");
    let comparison = verify::verify(&source_log, &output_log)?;

    let sequence_name = ws.name();
    let record = VerificationRecord {
        sequence: &sequence_name,
        source_directory: dir,
        frame_count: sequence.frame_count(),
        numbering: numbering_label(&sequence),
        pixel_format: &encoded.pixel_format,
        source_checksums: &source_log.path,
        output_checksums: &output_log.path,
        output: &encoded.output,
        comparison: &comparison,
    };
    write_record(&ws.verification_record_path(), &record);

    let output_bytes = std::fs::metadata(&encoded.output)
        .map_err(|e| SequenceError::io(&encoded.output, e))?
        .len();

    Ok(Some(ReportRow {
        sequence_name,
        verdict: comparison.verdict,
        started_at,
        finished_at: Local::now(),
        transcode_started_at: encoded.started_at,
        transcode_finished_at: encoded.finished_at,
        transcode_seconds: encoded.elapsed.as_secs_f64(),
        frame_count: sequence.frame_count(),
        encode_fps: encoded.encode_fps(sequence.frame_count()),
        source_bytes,
        output_bytes,
        pixel_format: encoded.pixel_format.clone(),
        container: sequence.extension.clone(),
        width: encoded.width,
        height: encoded.height,
        compression_ratio: report::compression_ratio(source_bytes, output_bytes),
    }))
}

fn numbering_label(sequence: &ImageSequence) -> &'static str {
    if sequence.is_recognized() {
        "detected"
    } else {
        "unrecognized"
    }
}

fn write_record(path: &Path, record: &VerificationRecord<'_>) {
    let result = serde_json::to_vec_pretty(record)
        .map_err(std::io::Error::from)
        .and_then(|bytes| std::fs::write(path, bytes));
    if let Err(err) = result {
        log::warn!("could not write {}: {}", path.display(), err);
    }
}

fn announce_verdict(row: &ReportRow) {
    match row.verdict {
        Verdict::Lossless => log::info!("{}: LOSSLESS", row.sequence_name),
        Verdict::LosslessWithParDifference => log::info!(
            "{}: image content is lossless, pixel aspect ratio differs. The source most \
             likely declared no pixel aspect ratio and Matroska states 1:1",
            row.sequence_name
        ),
        Verdict::NotLossless => log::warn!("{}: NOT LOSSLESS", row.sequence_name),
    }
}
