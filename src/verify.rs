use serde::Serialize;
use std::fmt;

use crate::checksum::ChecksumLog;
use crate::error::SequenceResult;

/// Token framemd5 uses to announce a stream's sample (pixel) aspect ratio.
pub const PAR_MARKER: &str = "sar";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Lossless,
    /// Image content identical; only the declared pixel aspect ratio moved,
    /// typically because Matroska states 1:1 where the source declared nothing.
    LosslessWithParDifference,
    NotLossless,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Lossless => "LOSSLESS",
            Verdict::LosslessWithParDifference => "LOSSLESS_WITH_PAR_DIFFERENCE",
            Verdict::NotLossless => "NOT_LOSSLESS",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comparison {
    pub verdict: Verdict,
    pub source_lines: usize,
    pub output_lines: usize,
    /// 1-based line numbers that differ, trailing unmatched lines included.
    pub differing_lines: Vec<usize>,
}

pub fn carries_par_marker(line: &str) -> bool {
    line.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token.eq_ignore_ascii_case(PAR_MARKER))
}

/// Lockstep comparison of two checksum logs.
///
/// A lone differing pair is tolerated only when one side of it is a PAR
/// declaration. Each unmatched trailing line in the longer log counts as a
/// differing pair and is never tolerated.
pub fn classify<S: AsRef<str>>(source: &[S], output: &[S]) -> Comparison {
    let longest = source.len().max(output.len());
    let mut differing_lines = vec![];
    let mut par_only = true;

    for idx in 0..longest {
        match (source.get(idx), output.get(idx)) {
            (Some(a), Some(b)) if a.as_ref() == b.as_ref() => {}
            (Some(a), Some(b)) => {
                differing_lines.push(idx + 1);
                if !(carries_par_marker(a.as_ref()) || carries_par_marker(b.as_ref())) {
                    par_only = false;
                }
            }
            _ => {
                differing_lines.push(idx + 1);
                par_only = false;
            }
        }
    }

    let verdict = match differing_lines.len() {
        0 => Verdict::Lossless,
        1 if par_only => Verdict::LosslessWithParDifference,
        _ => Verdict::NotLossless,
    };

    Comparison {
        verdict,
        source_lines: source.len(),
        output_lines: output.len(),
        differing_lines,
    }
}

/// Reads both logs and classifies them. Read failures surface as errors and
/// never turn into a `NOT_LOSSLESS` verdict.
pub fn verify(source: &ChecksumLog, output: &ChecksumLog) -> SequenceResult<Comparison> {
    let source_lines = source.read_lines()?;
    let output_lines = output.read_lines()?;
    Ok(classify(&source_lines, &output_lines))
}
