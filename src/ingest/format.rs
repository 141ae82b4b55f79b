//! Copyright © 2025-2026 Wenze Wei. All Rights Reserved.
//!
//! This file is part of Tabpress.
//! The Tabpress project belongs to the Dunimd Team.
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! You may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//!     http://www.apache.org/licenses/LICENSE-2.0
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

use std::borrow::Cow;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use encoding_rs::{DecoderResult, Encoding, GB18030, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::errors::{Result, TabError};

/// Field delimiters considered during detection, in tie-break order.
pub const DELIMITER_CANDIDATES: [char; 4] = [',', '\t', '|', ';'];

/// Encodings tried, in order, when the sample carries no byte order mark.
const UNMARKED_CANDIDATES: [TextEncoding; 3] = [
    TextEncoding::Utf8,
    TextEncoding::Gb18030,
    TextEncoding::Windows1252,
];

/// Character encodings the pipeline can read and reproduce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Gb18030,
    Windows1252,
}

impl TextEncoding {
    pub fn as_encoding(&self) -> &'static Encoding {
        match self {
            TextEncoding::Utf8 => UTF_8,
            TextEncoding::Utf16Le => UTF_16LE,
            TextEncoding::Utf16Be => UTF_16BE,
            TextEncoding::Gb18030 => GB18030,
            TextEncoding::Windows1252 => WINDOWS_1252,
        }
    }

    pub fn name(&self) -> &'static str {
        self.as_encoding().name()
    }

    /// Byte order mark written in front of the text when the source had one.
    pub fn bom(&self) -> &'static [u8] {
        match self {
            TextEncoding::Utf8 => b"\xEF\xBB\xBF",
            TextEncoding::Utf16Le => b"\xFF\xFE",
            TextEncoding::Utf16Be => b"\xFE\xFF",
            TextEncoding::Gb18030 | TextEncoding::Windows1252 => b"",
        }
    }

    /// Encodes `text` back into this encoding, appending to `out`.
    ///
    /// The WHATWG encoders behind `encoding_rs` emit UTF-8 for the UTF-16
    /// labels, so those two are encoded by hand.
    pub fn encode_into(&self, text: &str, out: &mut Vec<u8>) -> Result<()> {
        match self {
            TextEncoding::Utf8 => out.extend_from_slice(text.as_bytes()),
            TextEncoding::Utf16Le => {
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
            }
            TextEncoding::Utf16Be => {
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
            }
            TextEncoding::Gb18030 | TextEncoding::Windows1252 => {
                let (bytes, _, had_errors): (Cow<'_, [u8]>, _, bool) =
                    self.as_encoding().encode(text);
                if had_errors {
                    return Err(TabError::internal(format!(
                        "text not representable in {}",
                        self.name()
                    )));
                }
                out.extend_from_slice(&bytes);
            }
        }
        Ok(())
    }
}

/// Row terminator observed on the first line of the sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineTerminator {
    #[default]
    Lf,
    CrLf,
}

impl LineTerminator {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineTerminator::Lf => "\n",
            LineTerminator::CrLf => "\r\n",
        }
    }
}

/// Detected parameters of one input file. Immutable once sniffed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub encoding: TextEncoding,
    /// The file starts with a byte order mark for `encoding`.
    pub has_bom: bool,
    pub delimiter: char,
    pub has_header: bool,
    /// Field count of the modal sample line.
    pub field_count: usize,
    pub line_terminator: LineTerminator,
    pub byte_size: u64,
}

impl FileDescriptor {
    /// Extension of the source file, lower-cased, empty when absent.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase()
    }
}

/// Delimiter implied by a conventional extension, used only to break ties.
pub fn delimiter_hint(extension: &str) -> Option<char> {
    match extension.to_ascii_lowercase().as_str() {
        "tbl" => Some('|'),
        "csv" => Some(','),
        "txt" | "tsv" | "tab" => Some('\t'),
        _ => None,
    }
}

#[derive(Clone, Debug)]
struct DelimiterScore {
    delimiter: char,
    consistency: f64,
    modal_count: usize,
}

/// Infers encoding, delimiter and header presence from the head of a file.
#[derive(Clone, Debug)]
pub struct FormatSniffer {
    sample_size: usize,
    min_consistency: f64,
}

impl Default for FormatSniffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatSniffer {
    pub fn new() -> Self {
        Self {
            sample_size: 64 * 1024,
            min_consistency: 0.5,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            sample_size: config.sample_size,
            min_consistency: config.min_delimiter_consistency,
        }
    }

    pub fn with_sample_size(mut self, size: usize) -> Self {
        self.sample_size = size.max(1);
        self
    }

    pub fn with_min_consistency(mut self, consistency: f64) -> Self {
        self.min_consistency = consistency;
        self
    }

    /// Reads up to `sample_size` bytes from `path` and sniffs them.
    pub fn sniff_path(&self, path: &Path) -> Result<FileDescriptor> {
        let file = File::open(path)?;
        let byte_size = file.metadata()?.len();
        let mut sample = Vec::with_capacity(self.sample_size.min(byte_size as usize));
        file.take(self.sample_size as u64).read_to_end(&mut sample)?;
        let truncated = (sample.len() as u64) < byte_size;
        self.sniff_sample(path, &sample, byte_size, truncated)
    }

    /// Pure detection over an in-memory sample.
    ///
    /// `truncated` tells the sniffer that the sample stops mid-file, so its
    /// last line may be partial and is ignored.
    pub fn sniff_sample(
        &self,
        path: &Path,
        sample: &[u8],
        byte_size: u64,
        truncated: bool,
    ) -> Result<FileDescriptor> {
        let (marked, bom_len) = detect_bom(path, sample)?;
        let body = &sample[bom_len..];

        let candidates: Vec<TextEncoding> = match marked {
            Some(encoding) => vec![encoding],
            None => {
                if body.contains(&0) {
                    return Err(TabError::UnsupportedEncoding {
                        path: path.to_path_buf(),
                        reason: "NUL bytes without a byte order mark".to_string(),
                    });
                }
                UNMARKED_CANDIDATES.to_vec()
            }
        };

        let hint = delimiter_hint(
            path.extension().and_then(|e| e.to_str()).unwrap_or(""),
        );
        let mut decoded_any = false;
        let mut last_reason = String::from("no candidate encoding decodes the sample");

        for encoding in candidates {
            let Some(text) = decode_sample(encoding, body, !truncated) else {
                log::debug!("{}: sample is not valid {}", path.display(), encoding.name());
                continue;
            };
            if !reencodes_exactly(encoding, &text, body, truncated) {
                log::debug!("{}: {} does not reproduce the sample bytes", path.display(), encoding.name());
                continue;
            }
            decoded_any = true;

            let lines = sample_lines(&text, truncated);
            match self.pick_delimiter(&lines, hint) {
                Ok(score) => {
                    let has_header = detect_header(&lines, score.delimiter);
                    let line_terminator = if text
                        .split_once('\n')
                        .map(|(first, _)| first.ends_with('\r'))
                        .unwrap_or(false)
                    {
                        LineTerminator::CrLf
                    } else {
                        LineTerminator::Lf
                    };
                    log::debug!(
                        "{}: encoding={} delimiter={:?} consistency={:.2} header={}",
                        path.display(),
                        encoding.name(),
                        score.delimiter,
                        score.consistency,
                        has_header
                    );
                    return Ok(FileDescriptor {
                        path: path.to_path_buf(),
                        encoding,
                        has_bom: bom_len > 0,
                        delimiter: score.delimiter,
                        has_header,
                        field_count: score.modal_count + 1,
                        line_terminator,
                        byte_size,
                    });
                }
                Err(reason) => last_reason = reason,
            }
        }

        if decoded_any {
            Err(TabError::FormatUndetectable {
                path: path.to_path_buf(),
                reason: last_reason,
            })
        } else {
            Err(TabError::UnsupportedEncoding {
                path: path.to_path_buf(),
                reason: last_reason,
            })
        }
    }

    fn pick_delimiter(
        &self,
        lines: &[&str],
        hint: Option<char>,
    ) -> std::result::Result<DelimiterScore, String> {
        if lines.is_empty() {
            return Err("sample contains no non-blank lines".to_string());
        }

        let mut best: Option<DelimiterScore> = None;
        for delimiter in DELIMITER_CANDIDATES {
            let counts: Vec<usize> = lines.iter().map(|l| l.matches(delimiter).count()).collect();
            let modal_count = modal(&counts);
            if modal_count == 0 {
                continue;
            }
            let agreeing = counts.iter().filter(|&&c| c == modal_count).count();
            let score = DelimiterScore {
                delimiter,
                consistency: agreeing as f64 / counts.len() as f64,
                modal_count,
            };
            best = match best {
                None => Some(score),
                Some(current) => Some(if outranks(&score, &current, hint) {
                    score
                } else {
                    current
                }),
            };
        }

        match best {
            Some(score) if score.consistency >= self.min_consistency => Ok(score),
            Some(score) => Err(format!(
                "best delimiter {:?} agrees on only {:.0}% of sample lines",
                score.delimiter,
                score.consistency * 100.0
            )),
            None => Err("no candidate delimiter occurs in the sample".to_string()),
        }
    }
}

fn detect_bom(path: &Path, sample: &[u8]) -> Result<(Option<TextEncoding>, usize)> {
    if sample.starts_with(b"\x00\x00\xFE\xFF") || sample.starts_with(b"\xFF\xFE\x00\x00") {
        return Err(TabError::UnsupportedEncoding {
            path: path.to_path_buf(),
            reason: "UTF-32 input".to_string(),
        });
    }
    Ok(match Encoding::for_bom(sample) {
        Some((encoding, len)) if encoding == UTF_8 => (Some(TextEncoding::Utf8), len),
        Some((encoding, len)) if encoding == UTF_16LE => (Some(TextEncoding::Utf16Le), len),
        Some((encoding, len)) if encoding == UTF_16BE => (Some(TextEncoding::Utf16Be), len),
        _ => (None, 0),
    })
}

/// Strict decode. An incomplete trailing sequence is tolerated when the
/// sample is not the whole file.
fn decode_sample(encoding: TextEncoding, bytes: &[u8], last: bool) -> Option<String> {
    let mut decoder = encoding.as_encoding().new_decoder_without_bom_handling();
    let capacity = decoder.max_utf8_buffer_length_without_replacement(bytes.len())?;
    let mut text = String::with_capacity(capacity);
    let (result, _) = decoder.decode_to_string_without_replacement(bytes, &mut text, last);
    match result {
        DecoderResult::InputEmpty => Some(text),
        DecoderResult::Malformed(_, _) | DecoderResult::OutputFull => None,
    }
}

/// Longest byte sequence a decoder may hold back at the end of a truncated sample.
const MAX_PENDING_SEQUENCE: usize = 4;

/// Whether `text` encodes back to exactly `body`. A truncated sample may end in
/// a partial sequence the decoder kept back, so only a short tail may differ.
fn reencodes_exactly(encoding: TextEncoding, text: &str, body: &[u8], truncated: bool) -> bool {
    let mut encoded = Vec::with_capacity(body.len());
    if encoding.encode_into(text, &mut encoded).is_err() {
        return false;
    }
    if truncated {
        body.starts_with(&encoded) && body.len() - encoded.len() < MAX_PENDING_SEQUENCE
    } else {
        encoded == body
    }
}

fn sample_lines(text: &str, truncated: bool) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    if truncated && !text.ends_with('\n') {
        lines.pop();
    }
    lines
        .into_iter()
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .filter(|l| !l.is_empty())
        .collect()
}

/// Most frequent value; ties go to the larger value.
fn modal(counts: &[usize]) -> usize {
    let mut tally: Vec<(usize, usize)> = Vec::new();
    for &c in counts {
        match tally.iter_mut().find(|(value, _)| *value == c) {
            Some((_, n)) => *n += 1,
            None => tally.push((c, 1)),
        }
    }
    tally
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))
        .map(|(value, _)| value)
        .unwrap_or(0)
}

fn outranks(candidate: &DelimiterScore, current: &DelimiterScore, hint: Option<char>) -> bool {
    const EPS: f64 = 1e-9;
    if (candidate.consistency - current.consistency).abs() > EPS {
        return candidate.consistency > current.consistency;
    }
    if let Some(hinted) = hint {
        if candidate.delimiter == hinted {
            return true;
        }
        if current.delimiter == hinted {
            return false;
        }
    }
    candidate.modal_count > current.modal_count
}

fn looks_numeric(field: &str) -> bool {
    let trimmed = field.trim();
    trimmed.bytes().any(|b| b.is_ascii_digit()) && trimmed.parse::<f64>().is_ok()
}

/// First line entirely non-numeric while a later line carries a number.
fn detect_header(lines: &[&str], delimiter: char) -> bool {
    let Some((first, rest)) = lines.split_first() else {
        return false;
    };
    if rest.is_empty() {
        return false;
    }
    let first_is_text = first.split(delimiter).all(|f| !looks_numeric(f));
    let later_has_number = rest
        .iter()
        .any(|line| line.split(delimiter).any(looks_numeric));
    first_is_text && later_has_number
}
