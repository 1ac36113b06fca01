//! Fixed-window chunking of recordings.
//!
//! Chunk keys are `{recording_key}-▁start-{start_seconds}`. The delimiter is
//! U+2581 and recording keys containing it are rejected, which keeps keys
//! unique across a corpus and lets [`recording_key_of`] invert them.

use crate::config::{ConfigError, FRAME_RATE};
use crate::error::EvalError;
use crate::manifest::{Label, Record, Recording};

/// Reserved delimiter that never appears in a recording key.
pub const CHUNK_DELIMITER: char = '\u{2581}';

/// One fixed-length window of a recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub key: String,
    pub recording_key: String,
    pub label: Label,
    pub start_s: f64,
    /// Offset into the feature sequence at [`FRAME_RATE`].
    pub start_frame: usize,
    /// Source record extended with `rec`, `start` and `start_s` for this chunk.
    pub record: Record,
}

/// Splits durations into windows of `window_s` advancing by `stride_s`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chunker {
    window_s: f64,
    stride_s: f64,
}

impl Chunker {
    /// Both lengths come from `chunk_s` in an evaluation config, so errors
    /// name that key.
    pub fn new(window_s: f64, stride_s: f64) -> Result<Self, ConfigError> {
        if !(window_s.is_finite() && window_s > 0.0) {
            return Err(ConfigError::Invalid {
                field: "chunk_s",
                reason: format!("window must be a positive number of seconds, got {window_s}"),
            });
        }
        if !(stride_s.is_finite() && stride_s * FRAME_RATE as f64 >= 1.0) {
            return Err(ConfigError::Invalid {
                field: "chunk_s",
                reason: format!("stride must span at least one frame, got {stride_s} s"),
            });
        }
        Ok(Self { window_s, stride_s })
    }

    /// Window starts in seconds for a recording of `duration_s`.
    ///
    /// Starts sit on the [`FRAME_RATE`] grid. The first window always exists.
    /// Another follows while the previous one ends before the recording does,
    /// so `[0, duration_s)` is covered.
    pub fn starts(&self, duration_s: f64) -> Vec<f64> {
        let rate = FRAME_RATE as f64;
        let mut starts = Vec::new();
        let mut index = 0u32;
        loop {
            let start = (f64::from(index) * self.stride_s * rate).round() / rate;
            starts.push(start);
            if start + self.window_s >= duration_s {
                break;
            }
            index += 1;
        }
        starts
    }

    /// Chunk one recording.
    pub fn chunk(&self, recording: &Recording) -> Result<Vec<Chunk>, EvalError> {
        if recording.key.contains(CHUNK_DELIMITER) {
            return Err(EvalError::DelimiterInKey {
                key: recording.key.clone(),
            });
        }
        Ok(self
            .starts(recording.duration_s)
            .into_iter()
            .map(|start_s| {
                let key = chunk_key(&recording.key, start_s);
                let start_frame = (start_s * FRAME_RATE as f64).round() as usize;
                let mut record = recording.record.clone();
                record.set("start_s", start_s);
                record.set("start", start_frame);
                record.set("rec", key.clone());
                Chunk {
                    key,
                    recording_key: recording.key.clone(),
                    label: recording.label.clone(),
                    start_s,
                    start_frame,
                    record,
                }
            })
            .collect())
    }

    /// Chunk every recording, keeping manifest order.
    pub fn chunk_all(&self, recordings: &[Recording]) -> Result<Vec<Chunk>, EvalError> {
        let mut chunks = Vec::new();
        for recording in recordings {
            chunks.extend(self.chunk(recording)?);
        }
        Ok(chunks)
    }
}

/// Build the key for the window of `recording_key` starting at `start_s`.
pub fn chunk_key(recording_key: &str, start_s: f64) -> String {
    format!(
        "{recording_key}-{CHUNK_DELIMITER}start-{}",
        format_start(start_s)
    )
}

/// Recover the recording key from a chunk key.
pub fn recording_key_of(chunk_key: &str) -> &str {
    let marker = format!("-{CHUNK_DELIMITER}start-");
    chunk_key
        .rfind(&marker)
        .map(|idx| &chunk_key[..idx])
        .unwrap_or(chunk_key)
}

fn format_start(start_s: f64) -> String {
    if start_s.fract() == 0.0 && start_s < u64::MAX as f64 {
        format!("{}", start_s as u64)
    } else {
        format!("{start_s}")
    }
}
