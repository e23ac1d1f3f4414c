use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{SequenceError, SequenceResult};
use crate::sequence::ImageSequence;
use crate::tool::{Invocation, Toolchain};

/// What the per-frame checksums are computed over.
#[derive(Debug, Clone, Copy)]
pub enum ChecksumSource<'a> {
    /// Raw frames, read through the sequence's numbering pattern.
    Sequence(&'a ImageSequence),
    /// One encoded container, decoded to the pixel format it was encoded from.
    Encoded {
        file: &'a Path,
        pixel_format: &'a str,
    },
}

/// Write-once framemd5 text; line order is presentation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumLog {
    pub path: PathBuf,
}

impl ChecksumLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A missing or unreadable log is an I/O failure, never a content mismatch.
    pub fn read_lines(&self) -> SequenceResult<Vec<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(text.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SequenceError::ArtifactMissing {
                path: self.path.clone(),
            }),
            Err(source) => Err(SequenceError::ArtifactUnreadable {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

fn framemd5_args(source: ChecksumSource<'_>) -> Vec<std::ffi::OsString> {
    let mut args: Vec<std::ffi::OsString> = vec!["-hide_banner".into(), "-y".into()];
    match source {
        ChecksumSource::Sequence(seq) => args.extend(seq.input_args()),
        ChecksumSource::Encoded { file, pixel_format } => {
            args.push("-i".into());
            args.push(file.as_os_str().to_os_string());
            args.push("-pix_fmt".into());
            args.push(pixel_format.into());
        }
    }
    args.push("-f".into());
    args.push("framemd5".into());
    args
}

/// Runs ffmpeg's framemd5 muxer over `source`, writing the checksums to
/// `output` and ffmpeg's diagnostics to `log_path`.
pub fn generate(
    tools: &Toolchain,
    source: ChecksumSource<'_>,
    output: &Path,
    log_path: &Path,
) -> SequenceResult<ChecksumLog> {
    let outcome = Invocation::new("ffmpeg framemd5", &tools.ffmpeg, log_path)
        .args(framemd5_args(source))
        .arg(output)
        .timeout(tools.timeout)
        .run()?;
    log::debug!(
        "framemd5 {} finished in {:?} ({})",
        output.display(),
        outcome.elapsed,
        outcome.status
    );
    outcome.require_artifact("ffmpeg framemd5", output)?;
    Ok(ChecksumLog::new(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn encoded_source_args_pin_pixel_format() {
        let args = framemd5_args(ChecksumSource::Encoded {
            file: Path::new("/out/reel01.mkv"),
            pixel_format: "rgb48le",
        });
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            args,
            [
                "-hide_banner",
                "-y",
                "-i",
                "/out/reel01.mkv",
                "-pix_fmt",
                "rgb48le",
                "-f",
                "framemd5"
            ]
        );
    }

    #[test]
    fn missing_log_is_reported_as_missing_artifact() {
        let tmp = TempDir::new().expect("tempdir");
        let err = ChecksumLog::new(tmp.path().join("absent.framemd5"))
            .read_lines()
            .expect_err("absent");
        assert!(matches!(err, SequenceError::ArtifactMissing { .. }));
    }

    #[test]
    fn directory_in_place_of_log_is_unreadable() {
        let tmp = TempDir::new().expect("tempdir");
        let err = ChecksumLog::new(tmp.path()).read_lines().expect_err("is a dir");
        assert!(matches!(err, SequenceError::ArtifactUnreadable { .. }));
    }

    #[test]
    fn lines_keep_file_order() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("a.framemd5");
        std::fs::write(&path, "#format: frame checksums\n0, 0, 0, 1, 10, aa\n0, 1, 1, 1, 10, bb\n")
            .expect("write");
        let lines = ChecksumLog::new(&path).read_lines().expect("read");
        assert_eq!(lines.len(), 3);
        assert!(lines[2].ends_with("bb"));
    }

    #[cfg(unix)]
    mod fake_tool {
        use super::*;
        use crate::sequence;
        use std::os::unix::fs::PermissionsExt;

        fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-ffmpeg");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("script");
            let mut perms = std::fs::metadata(&path).expect("meta").permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).expect("chmod");
            path
        }

        fn one_frame_sequence(dir: &Path) -> ImageSequence {
            let src = dir.join("src");
            std::fs::create_dir_all(&src).expect("mkdir");
            std::fs::write(src.join("reel01_0001.dpx"), b"x").expect("frame");
            sequence::locate(&src).expect("locate").expect("sequence")
        }

        #[test]
        fn abnormal_exit_without_output_is_tool_failure() {
            let tmp = TempDir::new().expect("tempdir");
            let tools = Toolchain {
                ffmpeg: fake_ffmpeg(tmp.path(), "echo boom >&2; exit 1"),
                ..Toolchain::default()
            };
            let seq = one_frame_sequence(tmp.path());
            let err = generate(
                &tools,
                ChecksumSource::Sequence(&seq),
                &tmp.path().join("out.framemd5"),
                &tmp.path().join("out.log"),
            )
            .expect_err("no output");
            assert!(matches!(err, SequenceError::ToolFailed { .. }));
        }

        #[test]
        fn abnormal_exit_with_output_still_yields_log() {
            let tmp = TempDir::new().expect("tempdir");
            // The output path is always the last argument.
            let tools = Toolchain {
                ffmpeg: fake_ffmpeg(
                    tmp.path(),
                    "for last; do :; done\necho '0, 0, 0, 1, 10, aa' > \"$last\"\nexit 1",
                ),
                ..Toolchain::default()
            };
            let seq = one_frame_sequence(tmp.path());
            let out = tmp.path().join("out.framemd5");
            let log = generate(
                &tools,
                ChecksumSource::Sequence(&seq),
                &out,
                &tmp.path().join("out.log"),
            )
            .expect("artifact present");
            assert_eq!(log.read_lines().expect("read").len(), 1);
        }

        #[test]
        fn clean_exit_without_output_is_missing_artifact() {
            let tmp = TempDir::new().expect("tempdir");
            let tools = Toolchain {
                ffmpeg: fake_ffmpeg(tmp.path(), "exit 0"),
                ..Toolchain::default()
            };
            let seq = one_frame_sequence(tmp.path());
            let err = generate(
                &tools,
                ChecksumSource::Sequence(&seq),
                &tmp.path().join("out.framemd5"),
                &tmp.path().join("out.log"),
            )
            .expect_err("no output");
            assert!(matches!(err, SequenceError::ArtifactMissing { .. }));
        }
    }
}
