use chrono::{DateTime, Local};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::checksum::{self, ChecksumLog, ChecksumSource};
use crate::error::SequenceResult;
use crate::probe;
use crate::sequence::ImageSequence;
use crate::tool::{Invocation, Toolchain};
use crate::workspace::Workspace;

/// FFV1 slice count; fixed so reruns produce the same bitstream layout.
pub const FFV1_SLICES: u32 = 16;

#[derive(Debug, Clone)]
pub struct TranscodeResult {
    pub output: PathBuf,
    /// Wall-clock bracket, kept for the audit trail.
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    /// Monotonic duration of the encode alone, used for throughput.
    pub elapsed: Duration,
    pub pixel_format: String,
    pub width: u32,
    pub height: u32,
}

impl TranscodeResult {
    pub fn encode_fps(&self, frames: usize) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= f64::EPSILON {
            0.0
        } else {
            frames as f64 / secs
        }
    }
}

/// FFV1 version 3, intra-only, per-slice CRCs, in Matroska.
pub fn ffv1_args(sequence: &ImageSequence, pixel_format: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-y".into()];
    args.extend(sequence.input_args());
    for a in [
        "-strict",
        "-2",
        "-c:v",
        "ffv1",
        "-level",
        "3",
        "-g",
        "1",
        "-slicecrc",
        "1",
        "-slices",
    ] {
        args.push(a.into());
    }
    args.push(FFV1_SLICES.to_string().into());
    args.push("-pix_fmt".into());
    args.push(pixel_format.into());
    args
}

/// Encodes `sequence` into the workspace's `objects/` dir, then checksums the
/// result with the same pixel format so both logs are directly comparable.
pub fn transcode(
    tools: &Toolchain,
    sequence: &ImageSequence,
    workspace: &Workspace,
) -> SequenceResult<(ChecksumLog, TranscodeResult)> {
    let pixel_format = probe::pixel_format(&tools.ffprobe, sequence.first_frame())?;
    let output = workspace.object_path();

    let invocation = Invocation::new("ffmpeg ffv1", &tools.ffmpeg, workspace.log_path("ffv1_transcode"))
        .args(ffv1_args(sequence, &pixel_format))
        .arg(&output)
        .timeout(tools.timeout);
    log::info!("transcode: {}", invocation.command_line());

    let started_at = Local::now();
    let clock = Instant::now();
    let outcome = invocation.run()?;
    let elapsed = clock.elapsed();
    let finished_at = Local::now();
    outcome.require_artifact("ffmpeg ffv1", &output)?;

    let width = probe::width(&tools.ffprobe, &output)?;
    let height = probe::height(&tools.ffprobe, &output)?;

    let log = checksum::generate(
        tools,
        ChecksumSource::Encoded {
            file: &output,
            pixel_format: &pixel_format,
        },
        &workspace.output_checksum_path(),
        &workspace.log_path("ffv1_framemd5"),
    )?;

    Ok((
        log,
        TranscodeResult {
            output,
            started_at,
            finished_at,
            elapsed,
            pixel_format,
            width,
            height,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence;
    use tempfile::TempDir;

    #[test]
    fn parameterization_is_fixed_and_lossless() {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::write(tmp.path().join("reel01_0000001.dpx"), b"x").expect("frame");
        let seq = sequence::locate(tmp.path()).expect("locate").expect("sequence");

        let args: Vec<String> = ffv1_args(&seq, "rgb48le")
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        let joined = args.join(" ");
        assert!(joined.contains("-framerate 24 -start_number 1 -i "));
        assert!(joined.ends_with(
            "-strict -2 -c:v ffv1 -level 3 -g 1 -slicecrc 1 -slices 16 -pix_fmt rgb48le"
        ));
    }

    #[test]
    fn fps_guards_against_zero_elapsed() {
        let now = Local::now();
        let mut result = TranscodeResult {
            output: PathBuf::from("x.mkv"),
            started_at: now,
            finished_at: now,
            elapsed: Duration::ZERO,
            pixel_format: "rgb48le".to_string(),
            width: 2048,
            height: 1556,
        };
        assert_eq!(result.encode_fps(250), 0.0);
        result.elapsed = Duration::from_secs(10);
        assert!((result.encode_fps(250) - 25.0).abs() < 1e-9);
    }
}
