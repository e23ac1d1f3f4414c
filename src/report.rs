use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::verify::Verdict;

pub const HEADER: [&str; 16] = [
    "Sequence Name",
    "Lossless?",
    "Start time",
    "Finish Time",
    "Transcode Start Time",
    "Transcode Finish Time",
    "Transcode Time",
    "Frame Count",
    "Encode FPS",
    "Sequence Size",
    "FFV1 Size",
    "Pixel Format",
    "Sequence Type",
    "Width",
    "Height",
    "Compression Ratio",
];

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One audit record per sequence that reached a verdict.
#[derive(Debug, Clone)]
pub struct ReportRow {
    pub sequence_name: String,
    pub verdict: Verdict,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub transcode_started_at: DateTime<Local>,
    pub transcode_finished_at: DateTime<Local>,
    pub transcode_seconds: f64,
    pub frame_count: usize,
    pub encode_fps: f64,
    pub source_bytes: u64,
    pub output_bytes: u64,
    pub pixel_format: String,
    pub container: String,
    pub width: u32,
    pub height: u32,
    pub compression_ratio: f64,
}

impl ReportRow {
    fn fields(&self) -> [String; 16] {
        [
            self.sequence_name.clone(),
            self.verdict.to_string(),
            self.started_at.format(TIME_FORMAT).to_string(),
            self.finished_at.format(TIME_FORMAT).to_string(),
            self.transcode_started_at.format(TIME_FORMAT).to_string(),
            self.transcode_finished_at.format(TIME_FORMAT).to_string(),
            format!("{:.3}", self.transcode_seconds),
            self.frame_count.to_string(),
            format!("{:.2}", self.encode_fps),
            self.source_bytes.to_string(),
            self.output_bytes.to_string(),
            self.pixel_format.clone(),
            self.container.clone(),
            self.width.to_string(),
            self.height.to_string(),
            format!("{:.4}", self.compression_ratio),
        ]
    }
}

/// Source bytes per output byte; zero when there is no output to divide by.
pub fn compression_ratio(source_bytes: u64, output_bytes: u64) -> f64 {
    if output_bytes == 0 {
        0.0
    } else {
        source_bytes as f64 / output_bytes as f64
    }
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn encode_record<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields
        .iter()
        .map(|f| escape_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

/// Append-only CSV report. The header is written once on creation; rows from
/// concurrent workers are serialized through the inner lock.
pub struct ReportWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl ReportWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create report directory {:?}", parent))?;
        }
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)
            .with_context(|| format!("create report {:?}", path))?;
        file.write_all(encode_record(&HEADER).as_bytes())
            .and_then(|_| file.flush())
            .with_context(|| format!("write report header to {:?}", path))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, row: &ReportRow) -> Result<()> {
        let line = encode_record(&row.fields());
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("report lock poisoned"))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .with_context(|| format!("append row to {:?}", self.path))
    }
}
