// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::segmenter::SegmenterError;

/// Represents errors that can occur in the tiering core
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Proxy file, metadata record or digest does not exist
    NotFound,

    /// Object store returned a non-success status
    Cloud(u16),

    /// Compression failed
    Compress,

    /// Decompression failed (malformed stream)
    Decompress,

    /// The rolling-hash segmenter failed internally
    Segmenter(SegmenterError),

    /// A digest was inserted into the segment index twice
    DuplicateSegment,

    /// A digest was acquired or released that the segment index does not hold
    MissingSegment,

    /// Index and metadata record disagree (e.g. a referenced digest is unindexed)
    Invariant(String),

    /// Invalid configuration sizes
    InvalidConfig(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TierFsError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SegmenterError> for Error {
    fn from(value: SegmenterError) -> Self {
        Self::Segmenter(value)
    }
}

/// Tiering core result
pub type Result<T> = std::result::Result<T, Error>;
