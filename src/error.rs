//! Error taxonomy for the record-streaming pipeline.
//!
//! Every fallible core API returns [`Result`]. Variants map 1:1 onto the
//! error kinds named for this pipeline: configuration, I/O, framing,
//! format, decode and environment failures are all fatal and propagate to
//! the caller rather than being retried or skipped.

use std::io;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad construction-time parameters: missing `path_imgrec`, a
    /// `label_width` below 1, a zero `data_shape` dimension, or
    /// `preprocess_threads` below 1.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The archive or image-list file could not be opened or read.
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Record magic mismatch or a truncated frame inside a chunk.
    #[error("framing error at byte offset {offset}: {reason}")]
    Framing { offset: u64, reason: String },

    /// Malformed image-list line, or an archive index with no matching
    /// label-table entry.
    #[error("format error: {0}")]
    Format(String),

    /// The image codec rejected the payload bytes for a record.
    #[error("decode error for record {index}: {reason}")]
    Decode { index: u64, reason: String },

    /// A required codec capability is absent from this build (e.g. the
    /// `image-codec` feature was not enabled).
    #[error("environment error: {0}")]
    Environment(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn framing(offset: u64, reason: impl Into<String>) -> Self {
        Error::Framing {
            offset,
            reason: reason.into(),
        }
    }
}
