use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{SequenceError, SequenceResult};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Locations of the external programs plus the per-invocation time limit.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub timeout: Option<Duration>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            timeout: None,
        }
    }
}

/// One external program run with an explicit argument list and a dedicated
/// diagnostics file.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub tool: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub log_path: PathBuf,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub status: ExitStatus,
    pub log_path: PathBuf,
    pub elapsed: Duration,
}

impl Invocation {
    pub fn new(tool: impl Into<String>, program: &Path, log_path: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            program: program.to_path_buf(),
            args: vec![],
            log_path: log_path.into(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Shell-pasteable rendering of the command, used in the log header.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(|a| a.as_os_str()))
            .map(|a| shell_quote(&a.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Runs to completion. stderr lands in `log_path`; both the log handle and
    /// the child are released on every return path.
    pub fn run(&self) -> SequenceResult<InvocationOutcome> {
        let mut log = File::create(&self.log_path)
            .map_err(|e| SequenceError::io(&self.log_path, e))?;
        writeln!(log, "# {}", self.command_line())
            .map_err(|e| SequenceError::io(&self.log_path, e))?;
        let stderr = log
            .try_clone()
            .map_err(|e| SequenceError::io(&self.log_path, e))?;

        let started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|source| SequenceError::ToolSpawn {
                tool: self.tool.clone(),
                source,
            })?;

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SequenceError::io(&self.log_path, e));
                }
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = writeln!(log, "# killed after {:?}", limit);
                    return Err(SequenceError::ToolTimeout {
                        tool: self.tool.clone(),
                        timeout: limit,
                        log: self.log_path.clone(),
                    });
                }
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(InvocationOutcome {
            status,
            log_path: self.log_path.clone(),
            elapsed: started.elapsed(),
        })
    }
}

impl InvocationOutcome {
    /// The exit status alone does not decide success: a non-zero exit with the
    /// artifact in place is only a warning, a missing artifact is fatal.
    pub fn require_artifact(&self, tool: &str, artifact: &Path) -> SequenceResult<()> {
        if artifact.is_file() {
            if !self.status.success() {
                log::warn!(
                    "{} exited with {} but produced {} (diagnostics in {})",
                    tool,
                    self.status,
                    artifact.display(),
                    self.log_path.display()
                );
            }
            return Ok(());
        }
        if self.status.success() {
            Err(SequenceError::ArtifactMissing {
                path: artifact.to_path_buf(),
            })
        } else {
            Err(SequenceError::ToolFailed {
                tool: tool.to_string(),
                status: self.status,
                log: self.log_path.clone(),
            })
        }
    }
}

pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ',' | '%' | '+'));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
