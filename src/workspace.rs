use chrono::{DateTime, Local};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{SequenceError, SequenceResult};
use crate::sequence::ImageSequence;

pub const STAMP_FORMAT: &str = "%Y_%m_%dT%H_%M_%S";

const MAX_ROOT_ATTEMPTS: u32 = 1000;

/// Per-sequence output root with its fixed `logs/`, `objects/` and `metadata/` children.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub base_name: String,
}

pub fn run_stamp(at: &DateTime<Local>) -> String {
    at.format(STAMP_FORMAT).to_string()
}

impl Workspace {
    /// Pure path derivation; nothing touches the filesystem.
    pub fn plan(sequence: &ImageSequence, destination: &Path, at: &DateTime<Local>) -> Self {
        let base_name = sequence.base_name();
        let root = destination.join(format!("{}_{}", base_name, run_stamp(at)));
        Self { root, base_name }
    }

    /// Claims a fresh root and creates the layout under it. When the planned
    /// root is already taken, `_2`, `_3`, ... is appended until `create_dir`
    /// succeeds; an existing root is never reused. Returns whether a suffix
    /// was needed.
    pub fn materialize(&mut self) -> SequenceResult<bool> {
        if let Some(parent) = self.root.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SequenceError::WorkspaceCreation {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let disambiguated = self.claim_root()?;
        for dir in [self.logs_dir(), self.objects_dir(), self.metadata_dir()] {
            match std::fs::create_dir(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists && dir.is_dir() => {}
                Err(source) => {
                    return Err(SequenceError::WorkspaceCreation { path: dir, source });
                }
            }
        }
        Ok(disambiguated)
    }

    fn claim_root(&mut self) -> SequenceResult<bool> {
        let planned = self.root.clone();
        for attempt in 1..=MAX_ROOT_ATTEMPTS {
            let candidate = if attempt == 1 {
                planned.clone()
            } else {
                let mut name = planned.as_os_str().to_os_string();
                name.push(format!("_{}", attempt));
                PathBuf::from(name)
            };
            match std::fs::create_dir(&candidate) {
                Ok(()) => {
                    self.root = candidate;
                    return Ok(attempt > 1);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(source) => {
                    return Err(SequenceError::WorkspaceCreation {
                        path: candidate,
                        source,
                    });
                }
            }
        }
        Err(SequenceError::WorkspaceCreation {
            path: planned,
            source: std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{} suffixed names already taken", MAX_ROOT_ATTEMPTS),
            ),
        })
    }

    pub fn name(&self) -> String {
        crate::util::folder_basename(&self.root)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    pub fn source_checksum_path(&self) -> PathBuf {
        self.metadata_dir()
            .join(format!("{}_source.framemd5", self.base_name))
    }

    pub fn output_checksum_path(&self) -> PathBuf {
        self.metadata_dir()
            .join(format!("{}_ffv1.framemd5", self.base_name))
    }

    pub fn verification_record_path(&self) -> PathBuf {
        self.metadata_dir()
            .join(format!("{}_verification.json", self.base_name))
    }

    pub fn object_path(&self) -> PathBuf {
        self.objects_dir().join(format!("{}.mkv", self.base_name))
    }

    pub fn log_path(&self, label: &str) -> PathBuf {
        self.logs_dir()
            .join(format!("{}_{}.log", self.base_name, label))
    }
}

/// Plans and materializes the workspace for `sequence`.
pub fn build(
    sequence: &ImageSequence,
    destination: &Path,
    at: &DateTime<Local>,
) -> SequenceResult<Workspace> {
    let mut workspace = Workspace::plan(sequence, destination, at);
    if workspace.materialize()? {
        log::warn!(
            "planned workspace name was taken, using {}",
            workspace.root.display()
        );
    }
    Ok(workspace)
}
