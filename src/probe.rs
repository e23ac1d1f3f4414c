//! Media inspection through `ffprobe`, one discrete query per property.

use std::path::Path;
use std::process::Command;

use crate::error::{SequenceError, SequenceResult};

fn query_stream(ffprobe: &Path, entry: &'static str, file: &Path) -> SequenceResult<String> {
    let show = format!("stream={}", entry);
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            show.as_str(),
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(file)
        .output()
        .map_err(|source| SequenceError::ToolSpawn {
            tool: "ffprobe".to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(SequenceError::Probe {
            what: entry,
            path: file.to_path_buf(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let value = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    if value.is_empty() || value == "N/A" {
        return Err(SequenceError::Probe {
            what: entry,
            path: file.to_path_buf(),
            detail: "ffprobe returned no value".to_string(),
        });
    }
    Ok(value)
}

pub fn pixel_format(ffprobe: &Path, file: &Path) -> SequenceResult<String> {
    query_stream(ffprobe, "pix_fmt", file)
}

pub fn width(ffprobe: &Path, file: &Path) -> SequenceResult<u32> {
    parse_dimension("width", query_stream(ffprobe, "width", file)?, file)
}

pub fn height(ffprobe: &Path, file: &Path) -> SequenceResult<u32> {
    parse_dimension("height", query_stream(ffprobe, "height", file)?, file)
}

fn parse_dimension(what: &'static str, raw: String, file: &Path) -> SequenceResult<u32> {
    raw.parse::<u32>().map_err(|e| SequenceError::Probe {
        what,
        path: file.to_path_buf(),
        detail: format!("unparseable value {:?}: {}", raw, e),
    })
}
