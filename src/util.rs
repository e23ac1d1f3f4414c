use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::tool::Toolchain;

/// Confirms ffmpeg and ffprobe run, returning `(program, version)` pairs.
pub fn ensure_tools_available(tools: &Toolchain) -> Result<Vec<(String, String)>> {
    let mut versions = vec![];
    for program in [&tools.ffmpeg, &tools.ffprobe] {
        let out = Command::new(program)
            .arg("-version")
            .output()
            .with_context(|| format!("failed to run {} -version", program.display()))?;
        if !out.status.success() {
            bail!("{} exists but returned non-zero on -version", program.display());
        }
        let text = String::from_utf8_lossy(&out.stdout);
        let version = text
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(2))
            .unwrap_or("unknown")
            .to_string();
        versions.push((program.display().to_string(), version));
    }
    Ok(versions)
}

pub fn folder_basename(p: &Path) -> String {
    p.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "root".to_string())
}

/// Bytes of every regular file directly inside `dir`, frames or not.
pub fn directory_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let e = entry?;
        let meta = e.metadata()?;
        if meta.is_file() {
            total = total.saturating_add(meta.len());
        }
    }
    Ok(total)
}

pub fn fmt_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}
