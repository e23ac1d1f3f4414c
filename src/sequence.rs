use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use crate::util;

/// Frame extensions we treat as image sequences, in priority order when a
/// directory holds more than one kind.
pub const FRAME_EXTENSIONS: [&str; 3] = ["dpx", "tiff", "tif"];

/// Nominal playback rate handed to the image2 demuxer.
pub const NOMINAL_FRAMERATE: u32 = 24;

/// A single frame filename split into its parts.
///
/// `reel01_0000001.dpx` -> stem `reel01_`, index `0000001`, extension `dpx`.
/// `reel01_0000001.left.dpx` -> same, plus sub-tag `left`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameName {
    /// Everything before the numeric index, separator included.
    pub stem: String,
    /// Zero-padded digits exactly as written.
    pub index: String,
    /// Dotted token between index and extension, if any.
    pub subtag: Option<String>,
    pub extension: String,
}

impl FrameName {
    /// The dot-delimited tokens between stem and extension are scanned from
    /// the right. The token with the longest trailing digit run carries the
    /// index (ties go to the rightmost); tokens after it form the sub-tag.
    pub fn parse(file_name: &str) -> Option<Self> {
        let (rest, extension) = file_name.rsplit_once('.')?;
        if rest.is_empty() || extension.is_empty() {
            return None;
        }

        let tokens: Vec<&str> = rest.split('.').collect();
        let mut best: Option<(usize, &str, &str)> = None;
        for (pos, token) in tokens.iter().enumerate().rev() {
            if let Some((prefix, digits)) = split_trailing_digits(token) {
                if best.map_or(true, |(_, _, d)| digits.len() > d.len()) {
                    best = Some((pos, prefix, digits));
                }
            }
        }
        let (pos, prefix, digits) = best?;

        let subtag_tokens = &tokens[pos + 1..];
        if subtag_tokens.iter().any(|t| t.is_empty()) {
            return None;
        }
        let mut stem = tokens[..pos].join(".");
        if pos > 0 {
            stem.push('.');
        }
        stem.push_str(prefix);

        Some(Self {
            stem,
            index: digits.to_string(),
            subtag: (!subtag_tokens.is_empty()).then(|| subtag_tokens.join(".")),
            extension: extension.to_string(),
        })
    }

    pub fn width(&self) -> usize {
        self.index.len()
    }

    pub fn number(&self) -> Option<u64> {
        self.index.parse().ok()
    }

    /// Stem without trailing separators, e.g. `reel01` for `reel01_`.
    pub fn base_name(&self) -> &str {
        self.stem
            .trim_end_matches(|c: char| matches!(c, '_' | '-' | '.' | ' '))
    }

    /// printf-style template understood by ffmpeg's image2 demuxer.
    pub fn ffmpeg_pattern(&self) -> String {
        let mut pattern = escape_percent(&self.stem);
        pattern.push_str(&format!("%0{}d", self.width()));
        if let Some(tag) = &self.subtag {
            pattern.push('.');
            pattern.push_str(&escape_percent(tag));
        }
        pattern.push('.');
        pattern.push_str(&self.extension);
        pattern
    }

    fn same_pattern(&self, other: &FrameName) -> bool {
        self.stem == other.stem
            && self.width() == other.width()
            && self.subtag == other.subtag
            && self.extension == other.extension
    }
}

fn split_trailing_digits(s: &str) -> Option<(&str, &str)> {
    let stem_len = s.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if stem_len == s.len() {
        return None;
    }
    Some(s.split_at(stem_len))
}

fn escape_percent(s: &str) -> String {
    s.replace('%', "%%")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Numbering {
    Detected {
        start: u64,
        width: usize,
        /// ffmpeg image2 template relative to the sequence directory.
        pattern: String,
        base_name: String,
    },
    /// Numbering could not be trusted; the sequence is identified by its
    /// directory name and read back through a glob over its extension.
    Unrecognized { reason: String },
}

#[derive(Debug, Clone)]
pub struct ImageSequence {
    pub directory: PathBuf,
    pub frames: Vec<PathBuf>,
    /// Container token, e.g. `dpx`.
    pub extension: String,
    pub numbering: Numbering,
}

impl ImageSequence {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn first_frame(&self) -> &Path {
        &self.frames[0]
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self.numbering, Numbering::Detected { .. })
    }

    /// Identity used for the workspace and output file names.
    pub fn base_name(&self) -> String {
        match &self.numbering {
            Numbering::Detected { base_name, .. } if !base_name.is_empty() => base_name.clone(),
            _ => util::folder_basename(&self.directory),
        }
    }

    /// Demuxer arguments (everything up to and including `-i <input>`).
    pub fn input_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-f".into(),
            "image2".into(),
            "-framerate".into(),
            NOMINAL_FRAMERATE.to_string().into(),
        ];
        match &self.numbering {
            Numbering::Detected { start, pattern, .. } => {
                args.push("-start_number".into());
                args.push(start.to_string().into());
                args.push("-i".into());
                args.push(self.directory.join(pattern).into_os_string());
            }
            Numbering::Unrecognized { .. } => {
                let mut glob = escape_glob(&self.directory.to_string_lossy());
                glob.push_str("/*.");
                glob.push_str(&case_insensitive_glob(&self.extension));
                args.push("-pattern_type".into());
                args.push("glob".into());
                args.push("-i".into());
                args.push(glob.into());
            }
        }
        args
    }
}

fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `dpx` -> `[dD][pP][xX]`, so mixed-case extensions all match.
fn case_insensitive_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 4);
    for c in s.chars() {
        if c.is_ascii_alphabetic() {
            out.push('[');
            out.push(c.to_ascii_lowercase());
            out.push(c.to_ascii_uppercase());
            out.push(']');
        } else {
            out.push_str(&escape_glob(&c.to_string()));
        }
    }
    out
}

/// Look for a numbered frame sequence directly inside `dir`.
///
/// Returns `Ok(None)` when the directory holds no frame files. Numbering that
/// cannot be parsed consistently degrades to [`Numbering::Unrecognized`].
pub fn locate(dir: &Path) -> io::Result<Option<ImageSequence>> {
    let mut candidates: Vec<(String, PathBuf)> = vec![];
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        // AppleDouble and other hidden side files.
        if name.starts_with('.') {
            continue;
        }
        candidates.push((name, entry.path()));
    }

    for ext in FRAME_EXTENSIONS {
        let mut frames: Vec<(String, PathBuf)> = candidates
            .iter()
            .filter(|(name, _)| {
                Path::new(name)
                    .extension()
                    .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if frames.is_empty() {
            continue;
        }
        frames.sort();

        let extension = Path::new(&frames[0].0)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| ext.to_string());
        let numbering = detect_numbering(frames.iter().map(|(name, _)| name.as_str()));

        return Ok(Some(ImageSequence {
            directory: dir.to_path_buf(),
            frames: frames.into_iter().map(|(_, path)| path).collect(),
            extension,
            numbering,
        }));
    }

    Ok(None)
}

fn detect_numbering<'a>(mut names: impl Iterator<Item = &'a str>) -> Numbering {
    let Some(first_name) = names.next() else {
        return Numbering::Unrecognized {
            reason: "no frames".to_string(),
        };
    };
    let Some(first) = FrameName::parse(first_name) else {
        return Numbering::Unrecognized {
            reason: format!("{} carries no numeric frame index", first_name),
        };
    };
    let Some(start) = first.number() else {
        return Numbering::Unrecognized {
            reason: format!("frame index {} of {} is out of range", first.index, first_name),
        };
    };

    let mut expected = start;
    for name in names {
        let Some(other) = FrameName::parse(name).filter(|o| o.same_pattern(&first)) else {
            return Numbering::Unrecognized {
                reason: format!("{} does not follow the pattern of {}", name, first_name),
            };
        };
        // image2 stops reading at the first missing index.
        if other.number() != expected.checked_add(1) {
            return Numbering::Unrecognized {
                reason: format!("numbering breaks at {} after index {}", name, expected),
            };
        }
        expected += 1;
    }

    Numbering::Detected {
        start,
        width: first.width(),
        pattern: first.ffmpeg_pattern(),
        base_name: first.base_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"frame").expect("write frame");
    }

    #[test]
    fn tokenizer_splits_plain_numbered_name() {
        let name = FrameName::parse("reel01_0000001.dpx").expect("parses");
        assert_eq!(name.stem, "reel01_");
        assert_eq!(name.index, "0000001");
        assert_eq!(name.subtag, None);
        assert_eq!(name.extension, "dpx");
        assert_eq!(name.width(), 7);
        assert_eq!(name.number(), Some(1));
        assert_eq!(name.base_name(), "reel01");
        assert_eq!(name.ffmpeg_pattern(), "reel01_%07d.dpx");
    }

    #[test]
    fn tokenizer_resplits_dotted_subtag() {
        let name = FrameName::parse("scan_00086400.left.tiff").expect("parses");
        assert_eq!(name.stem, "scan_");
        assert_eq!(name.index, "00086400");
        assert_eq!(name.subtag.as_deref(), Some("left"));
        assert_eq!(name.extension, "tiff");
        assert_eq!(name.ffmpeg_pattern(), "scan_%08d.left.tiff");
    }

    #[test]
    fn tokenizer_handles_dot_separated_index_and_literal_percent() {
        let name = FrameName::parse("roll.2.000123.dpx").expect("parses");
        assert_eq!(name.stem, "roll.2.");
        assert_eq!(name.index, "000123");
        assert_eq!(name.base_name(), "roll.2");

        let pct = FrameName::parse("100%_0001.dpx").expect("parses");
        assert_eq!(pct.ffmpeg_pattern(), "100%%_%04d.dpx");
    }

    #[test]
    fn tokenizer_rejects_names_without_index() {
        assert_eq!(FrameName::parse("poster.dpx"), None);
        assert_eq!(FrameName::parse("poster.final.dpx"), None);
        assert_eq!(FrameName::parse("noextension"), None);
        assert_eq!(FrameName::parse(".dpx"), None);
    }

    #[test]
    fn locate_returns_none_without_frames() {
        let tmp = TempDir::new().expect("tempdir");
        touch(tmp.path(), "notes.txt");
        touch(tmp.path(), "clip.mov");
        assert!(locate(tmp.path()).expect("locate").is_none());
    }

    #[test]
    fn locate_detects_padded_sequence() {
        let tmp = TempDir::new().expect("tempdir");
        for i in (1..=12).rev() {
            touch(tmp.path(), &format!("reel01_{:07}.dpx", i));
        }
        touch(tmp.path(), "._reel01_0000001.dpx");
        touch(tmp.path(), "readme.txt");

        let seq = locate(tmp.path()).expect("locate").expect("sequence");
        assert_eq!(seq.frame_count(), 12);
        assert_eq!(seq.extension, "dpx");
        assert!(seq.first_frame().ends_with("reel01_0000001.dpx"));
        assert_eq!(seq.base_name(), "reel01");
        assert_eq!(
            seq.numbering,
            Numbering::Detected {
                start: 1,
                width: 7,
                pattern: "reel01_%07d.dpx".to_string(),
                base_name: "reel01".to_string(),
            }
        );
    }

    #[test]
    fn locate_prefers_dpx_over_tiff() {
        let tmp = TempDir::new().expect("tempdir");
        touch(tmp.path(), "a_0001.tif");
        touch(tmp.path(), "b_0001.DPX");
        let seq = locate(tmp.path()).expect("locate").expect("sequence");
        assert_eq!(seq.extension, "DPX");
        assert_eq!(seq.base_name(), "b");
    }

    #[test]
    fn mixed_patterns_degrade_to_directory_identity() {
        let tmp = TempDir::new().expect("tempdir");
        let dir = tmp.path().join("tape_07");
        fs::create_dir_all(&dir).expect("mkdir");
        touch(&dir, "shot_001.dpx");
        touch(&dir, "shot_0002.dpx");

        let seq = locate(&dir).expect("locate").expect("sequence");
        assert!(!seq.is_recognized());
        assert_eq!(seq.base_name(), "tape_07");
        let args = seq.input_args();
        assert!(args.iter().any(|a| a == "glob"));
        assert!(args
            .last()
            .unwrap()
            .to_string_lossy()
            .ends_with("/*.[dD][pP][xX]"));
    }

    #[test]
    fn unnumbered_frame_degrades_instead_of_failing() {
        let tmp = TempDir::new().expect("tempdir");
        touch(tmp.path(), "poster.tiff");
        let seq = locate(tmp.path()).expect("locate").expect("sequence");
        match seq.numbering {
            Numbering::Unrecognized { reason } => assert!(reason.contains("poster.tiff")),
            other => panic!("unexpected numbering {:?}", other),
        }
    }

    #[test]
    fn detected_input_args_carry_start_number() {
        let tmp = TempDir::new().expect("tempdir");
        touch(tmp.path(), "reel01_0000250.dpx");
        let seq = locate(tmp.path()).expect("locate").expect("sequence");
        let args: Vec<String> = seq
            .input_args()
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(&args[..6], &["-f", "image2", "-framerate", "24", "-start_number", "250"]);
        assert!(args[7].ends_with("reel01_%07d.dpx"));
    }

    #[test]
    fn subtag_ending_in_digit_is_not_the_index() {
        let name = FrameName::parse("reel01_0000001.cam2.dpx").expect("parses");
        assert_eq!(name.stem, "reel01_");
        assert_eq!(name.index, "0000001");
        assert_eq!(name.subtag.as_deref(), Some("cam2"));
        assert_eq!(name.ffmpeg_pattern(), "reel01_%07d.cam2.dpx");

        let tmp = TempDir::new().expect("tempdir");
        for i in 1..=3 {
            touch(tmp.path(), &format!("reel01_{:07}.cam2.dpx", i));
        }
        let seq = locate(tmp.path()).expect("locate").expect("sequence");
        assert!(seq.is_recognized(), "{:?}", seq.numbering);
        assert_eq!(seq.base_name(), "reel01");
    }

    #[test]
    fn multi_token_subtag_is_kept_whole() {
        let name = FrameName::parse("reel01_0000001.left.v.dpx").expect("parses");
        assert_eq!(name.stem, "reel01_");
        assert_eq!(name.index, "0000001");
        assert_eq!(name.subtag.as_deref(), Some("left.v"));
        assert_eq!(name.ffmpeg_pattern(), "reel01_%07d.left.v.dpx");

        let versioned = FrameName::parse("shot_v2.0001.dpx").expect("parses");
        assert_eq!(versioned.stem, "shot_v2.");
        assert_eq!(versioned.index, "0001");
        assert_eq!(versioned.subtag, None);
    }

    #[test]
    fn numbering_gap_degrades_to_glob_input() {
        let tmp = TempDir::new().expect("tempdir");
        for i in [1, 2, 3, 10, 11] {
            touch(tmp.path(), &format!("reel01_{:04}.dpx", i));
        }
        let seq = locate(tmp.path()).expect("locate").expect("sequence");
        assert_eq!(seq.frame_count(), 5);
        match &seq.numbering {
            Numbering::Unrecognized { reason } => {
                assert!(reason.contains("reel01_0010.dpx"), "{}", reason)
            }
            other => panic!("gap must not be detected: {:?}", other),
        }
        assert!(seq.input_args().iter().any(|a| a == "glob"));
    }

    #[test]
    fn mixed_extension_case_is_not_a_single_pattern() {
        let tmp = TempDir::new().expect("tempdir");
        touch(tmp.path(), "reel01_0001.dpx");
        touch(tmp.path(), "reel01_0002.DPX");
        let seq = locate(tmp.path()).expect("locate").expect("sequence");
        assert_eq!(seq.frame_count(), 2);
        assert!(!seq.is_recognized());
        assert!(seq
            .input_args()
            .last()
            .unwrap()
            .to_string_lossy()
            .ends_with("/*.[dD][pP][xX]"));
    }

    #[test]
    fn glob_escaping_protects_metacharacters() {
        assert_eq!(escape_glob("a[1]*?"), "a\\[1\\]\\*\\?");
    }
}
