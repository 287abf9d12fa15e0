// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{digest::SegmentDigest, index::SegmentIndex};
use lru::LruCache;
use std::path::{Path, PathBuf};

/// Segment cache, in which segments fetched from the object store are
/// kept on SSD as plain (uncompressed) files
///
/// The cache is bounded in bytes, not entries; eviction walks the
/// least-recently-used end and deletes the backing files. The entry
/// list always reflects the files present under the cache folder.
pub struct SegmentCache {
    folder: PathBuf,

    /// MRU-first ordering; values are segment lengths
    entries: LruCache<SegmentDigest, u32>,

    /// Sum of cached segment lengths
    current_bytes: u64,

    /// Budget in bytes
    capacity: u64,
}

impl std::fmt::Debug for SegmentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SegmentCache<{} / {} bytes>",
            self.current_bytes, self.capacity
        )
    }
}

impl SegmentCache {
    pub(crate) fn new<P: Into<PathBuf>>(folder: P, capacity: u64) -> Self {
        Self {
            folder: folder.into(),
            entries: LruCache::unbounded(),
            current_bytes: 0,
            capacity,
        }
    }

    /// On-SSD path of a cached segment.
    pub(crate) fn segment_path(&self, digest: &SegmentDigest) -> PathBuf {
        self.folder.join(digest.to_hex())
    }

    /// Returns `true` if the segment is cached. Does not promote.
    #[must_use]
    pub fn contains(&self, digest: &SegmentDigest) -> bool {
        self.entries.contains(digest)
    }

    /// Promotes a cached segment to most-recently-used.
    pub fn touch(&mut self, digest: &SegmentDigest) {
        self.entries.promote(digest);
    }

    /// Registers a freshly materialised segment as most-recently-used.
    ///
    /// The caller must have ensured capacity and written the file.
    pub fn insert(&mut self, digest: SegmentDigest, length: u32) {
        self.entries.put(digest, length);
        self.current_bytes += u64::from(length);
    }

    /// Evicts least-recently-used segments until `n` bytes fit.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a backing file cannot be deleted.
    pub fn ensure_capacity(&mut self, n: u64) -> crate::Result<()> {
        while self.capacity.saturating_sub(self.current_bytes) < n {
            let Some((victim, length)) = self.entries.pop_lru() else {
                break;
            };

            log::trace!("Evicting cached segment {victim} ({length} bytes)");
            remove_file_if_exists(self.segment_path(&victim))?;
            self.current_bytes -= u64::from(length);
        }

        Ok(())
    }

    /// Removes a segment from anywhere in the list, deleting its file.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the backing file cannot be deleted.
    pub fn evict(&mut self, digest: &SegmentDigest) -> crate::Result<()> {
        if let Some(length) = self.entries.pop(digest) {
            remove_file_if_exists(self.segment_path(digest))?;
            self.current_bytes -= u64::from(length);
        }

        Ok(())
    }

    /// Sum of cached segment lengths.
    #[must_use]
    pub fn current_bytes(&self) -> u64 {
        self.current_bytes
    }

    /// Budget in bytes.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Amount of cached segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most-recently-used digest, if any.
    #[must_use]
    pub fn mru(&self) -> Option<SegmentDigest> {
        self.entries.iter().next().map(|(digest, _)| *digest)
    }

    /// Re-adopts cache files left over from a previous run.
    ///
    /// Files whose names are not indexed digests are deleted, as are
    /// files that no longer fit the budget.
    pub(crate) fn resurrect(&mut self, index: &SegmentIndex) -> crate::Result<()> {
        for dirent in std::fs::read_dir(&self.folder)? {
            let dirent = dirent?;

            let digest = dirent
                .file_name()
                .to_str()
                .and_then(SegmentDigest::from_hex);

            let entry = digest.and_then(|d| index.lookup(&d));

            match (digest, entry) {
                (Some(digest), Some(entry))
                    if self.current_bytes + u64::from(entry.length) <= self.capacity =>
                {
                    log::trace!("Resurrecting cached segment {digest}");
                    self.insert(digest, entry.length);
                }
                _ => {
                    log::debug!(
                        "Deleting stray cache file {:?}",
                        dirent.file_name()
                    );
                    std::fs::remove_file(dirent.path())?;
                }
            }
        }

        Ok(())
    }
}

fn remove_file_if_exists<P: AsRef<Path>>(path: P) -> crate::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(x: u8) -> SegmentDigest {
        SegmentDigest::of(&[x])
    }

    fn materialise(cache: &mut SegmentCache, x: u8, length: u32) -> crate::Result<()> {
        cache.ensure_capacity(u64::from(length))?;
        std::fs::write(cache.segment_path(&digest(x)), vec![x; length as usize])?;
        cache.insert(digest(x), length);
        Ok(())
    }

    #[test]
    fn cache_evicts_lru_first() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cache = SegmentCache::new(dir.path(), 100);

        materialise(&mut cache, 1, 40)?;
        materialise(&mut cache, 2, 40)?;
        cache.touch(&digest(1));

        // 40 more bytes only fit after dropping the LRU entry, which
        // is #2 after the touch
        materialise(&mut cache, 3, 40)?;

        assert!(cache.contains(&digest(1)));
        assert!(!cache.contains(&digest(2)));
        assert!(cache.contains(&digest(3)));
        assert_eq!(80, cache.current_bytes());
        assert!(!cache.segment_path(&digest(2)).try_exists()?);
        assert_eq!(Some(digest(3)), cache.mru());

        Ok(())
    }

    #[test]
    fn cache_evict_removes_anywhere() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cache = SegmentCache::new(dir.path(), 100);

        materialise(&mut cache, 1, 30)?;
        materialise(&mut cache, 2, 30)?;
        materialise(&mut cache, 3, 30)?;

        cache.evict(&digest(2))?;

        assert_eq!(2, cache.len());
        assert_eq!(60, cache.current_bytes());
        assert!(!cache.segment_path(&digest(2)).try_exists()?);

        Ok(())
    }

    #[test]
    fn cache_budget_is_never_exceeded() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cache = SegmentCache::new(dir.path(), 100);

        for x in 0..20 {
            materialise(&mut cache, x, 33)?;
            assert!(cache.current_bytes() <= cache.capacity());
        }

        Ok(())
    }
}
