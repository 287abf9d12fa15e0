// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{segmenter::RollingHash, store::ObjectClient};

/// Tiering core configuration
pub struct Config<S: ObjectClient, H: RollingHash + Clone> {
    /// Object-store client to use
    pub(crate) client: S,

    /// Rolling hash prototype, cloned for each migration
    pub(crate) hasher: H,

    /// Files larger than this many bytes migrate on release
    pub(crate) threshold: u64,

    /// Target segment length in bytes
    pub(crate) avg_seg_size: usize,

    /// Rolling-hash window in bytes
    pub(crate) rabin_window_size: usize,

    /// Segment cache budget in bytes
    pub(crate) cache_size: u64,

    /// Disables the dedup lookup (segments are always uploaded)
    pub(crate) no_dedup: bool,

    /// Disables the segment cache
    pub(crate) no_cache: bool,

    /// Disables on-cloud compression
    pub(crate) no_compress: bool,

    /// Object-store endpoint, for diagnostics
    pub(crate) hostname: String,
}

impl<S: ObjectClient, H: RollingHash + Clone> Config<S, H> {
    /// Creates a new configuration.
    pub fn new(client: S, hasher: H) -> Self {
        Self {
            client,
            hasher,
            threshold: /* 1 MiB */ 1_024 * 1_024,
            avg_seg_size: /* 64 KiB */ 64 * 1_024,
            rabin_window_size: 48,
            cache_size: /* 256 MiB */ 256 * 1_024 * 1_024,
            no_dedup: false,
            no_cache: false,
            no_compress: false,
            hostname: String::new(),
        }
    }

    /// Sets the migration threshold.
    ///
    /// Files whose proxy body exceeds this size when the last writable
    /// handle closes have their bodies moved to the object store.
    ///
    /// Default = 1 MiB
    #[must_use]
    pub fn threshold(mut self, bytes: u64) -> Self {
        self.threshold = bytes;
        self
    }

    /// Sets the target segment length.
    ///
    /// Actual segments are between `avg - avg/16` and `avg + avg/16`
    /// bytes long.
    ///
    /// Default = 64 KiB
    #[must_use]
    pub fn avg_seg_size(mut self, bytes: usize) -> Self {
        self.avg_seg_size = bytes;
        self
    }

    /// Sets the rolling-hash window size.
    ///
    /// Default = 48
    #[must_use]
    pub fn rabin_window_size(mut self, bytes: usize) -> Self {
        self.rabin_window_size = bytes;
        self
    }

    /// Sets the segment cache budget.
    ///
    /// A budget smaller than the maximum segment size disables the
    /// cache entirely; reads then go through a scratch file.
    ///
    /// Default = 256 MiB
    #[must_use]
    pub fn cache_size(mut self, bytes: u64) -> Self {
        self.cache_size = bytes;
        self
    }

    /// Disables the dedup lookup during migration.
    #[must_use]
    pub fn no_dedup(mut self, no_dedup: bool) -> Self {
        self.no_dedup = no_dedup;
        self
    }

    /// Disables the segment cache.
    #[must_use]
    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    /// Disables compression; segments are uploaded verbatim.
    #[must_use]
    pub fn no_compress(mut self, no_compress: bool) -> Self {
        self.no_compress = no_compress;
        self
    }

    /// Sets the object-store endpoint name, for diagnostics.
    ///
    /// The endpoint is not dialled by the core; the injected
    /// [`ObjectClient`] owns the actual transport.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Largest segment length the segmenter can produce.
    pub(crate) fn max_seg_size(&self) -> u64 {
        (self.avg_seg_size + self.avg_seg_size / 16) as u64
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.avg_seg_size < 16 {
            return Err(crate::Error::InvalidConfig(
                "avg_seg_size must be at least 16 bytes",
            ));
        }

        if self.rabin_window_size == 0 {
            return Err(crate::Error::InvalidConfig(
                "rabin_window_size must be non-zero",
            ));
        }

        if self.rabin_window_size > self.avg_seg_size - self.avg_seg_size / 16 {
            return Err(crate::Error::InvalidConfig(
                "rabin_window_size must not exceed the minimum segment size",
            ));
        }

        Ok(())
    }
}
