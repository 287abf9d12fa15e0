// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    digest::{SegmentDigest, DIGEST_HEX_LEN},
    path::HASH_TABLE_FILE,
    HashMap,
};
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::{
    io::{Cursor, Read, Write},
    path::{Path, PathBuf},
};

/// Bytes per mirror record: hex digest, length, refcount
const MIRROR_RECORD_LEN: usize = DIGEST_HEX_LEN + 2 * std::mem::size_of::<u32>();

/// Replaces the mirror without ever exposing a half-written file.
///
/// The new contents are staged in a hidden sibling, synced while still
/// under the staging name, then renamed over the target. Readers see
/// either the old mirror or the new one.
fn rewrite_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let folder = path.parent().unwrap_or_else(|| Path::new("."));

    let mut staged = tempfile::Builder::new()
        .prefix(HASH_TABLE_FILE)
        .tempfile_in(folder)?;

    staged.write_all(content)?;
    staged.as_file().sync_all()?;
    staged.persist(path)?;

    Ok(())
}

/// Length and reference count of an indexed segment
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IndexEntry {
    /// Uncompressed length in bytes
    pub length: u32,

    /// Number of segment references across all metadata records
    pub refcount: u32,
}

/// Outcome of releasing one reference
#[derive(Debug, Eq, PartialEq)]
pub enum Released {
    /// References remain
    Alive(u32),

    /// The reference count reached zero and the entry was removed;
    /// the caller is responsible for deleting the blob and cache entry
    ZeroNow,
}

/// Global segment index: digest → (length, refcount).
///
/// The index is authoritative in memory and mirrored to a hidden flat
/// file after every mutation. The mirror is rewritten whole; a crash
/// mid-write leaves a partial tail that the rebuild path drops.
pub struct SegmentIndex {
    path: PathBuf,
    entries: HashMap<SegmentDigest, IndexEntry>,
}

impl SegmentIndex {
    /// Creates a new empty index and persists its (empty) mirror.
    pub(crate) fn create_new<P: Into<PathBuf>>(path: P) -> crate::Result<Self> {
        let index = Self {
            path: path.into(),
            entries: HashMap::default(),
        };
        index.flush()?;

        Ok(index)
    }

    /// Rebuilds the index from its durable mirror.
    ///
    /// Records that do not parse, and everything after them, are
    /// dropped. Entries are loaded even if their blobs have since gone
    /// missing; that disagreement surfaces at read time.
    pub(crate) fn rebuild<P: Into<PathBuf>>(path: P) -> crate::Result<Self> {
        let path = path.into();
        log::debug!("Loading segment index from {}", path.display());

        let bytes = std::fs::read(&path)?;
        let mut entries = HashMap::default();
        let mut cursor = Cursor::new(bytes);

        let mut hex = [0; DIGEST_HEX_LEN];

        loop {
            if cursor.read_exact(&mut hex).is_err() {
                break;
            }

            let Some(digest) = std::str::from_utf8(&hex)
                .ok()
                .and_then(SegmentDigest::from_hex)
            else {
                log::warn!("Dropping malformed tail of segment index mirror");
                break;
            };

            let Ok(length) = cursor.read_u32::<NativeEndian>() else {
                log::warn!("Dropping partial record at tail of segment index mirror");
                break;
            };
            let Ok(refcount) = cursor.read_u32::<NativeEndian>() else {
                log::warn!("Dropping partial record at tail of segment index mirror");
                break;
            };

            entries.insert(digest, IndexEntry { length, refcount });
        }

        log::info!("Recovered segment index with {} entries", entries.len());

        Ok(Self { path, entries })
    }

    /// Looks up a digest.
    #[must_use]
    pub fn lookup(&self, digest: &SegmentDigest) -> Option<IndexEntry> {
        self.entries.get(digest).copied()
    }

    /// Inserts a freshly uploaded digest with a reference count of 1.
    ///
    /// # Errors
    ///
    /// Will return [`crate::Error::DuplicateSegment`] if the digest is
    /// already indexed.
    pub fn insert(&mut self, digest: SegmentDigest, length: u32) -> crate::Result<()> {
        if self.entries.contains_key(&digest) {
            return Err(crate::Error::DuplicateSegment);
        }

        self.entries.insert(
            digest,
            IndexEntry {
                length,
                refcount: 1,
            },
        );

        Ok(())
    }

    /// Adds one reference to an indexed digest, returning the new count.
    ///
    /// # Errors
    ///
    /// Will return [`crate::Error::MissingSegment`] if the digest is
    /// not indexed.
    pub fn acquire(&mut self, digest: &SegmentDigest) -> crate::Result<u32> {
        let entry = self
            .entries
            .get_mut(digest)
            .ok_or(crate::Error::MissingSegment)?;

        entry.refcount += 1;

        Ok(entry.refcount)
    }

    /// Drops one reference from an indexed digest.
    ///
    /// When the count reaches zero, the entry is removed and
    /// [`Released::ZeroNow`] is returned; the caller must delete the
    /// blob and any cache entry.
    ///
    /// # Errors
    ///
    /// Will return [`crate::Error::MissingSegment`] if the digest is
    /// not indexed.
    pub fn release(&mut self, digest: &SegmentDigest) -> crate::Result<Released> {
        let entry = self
            .entries
            .get_mut(digest)
            .ok_or(crate::Error::MissingSegment)?;

        entry.refcount -= 1;

        if entry.refcount == 0 {
            self.entries.remove(digest);
            return Ok(Released::ZeroNow);
        }

        Ok(Released::Alive(entry.refcount))
    }

    /// Amount of indexed digests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no digests are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrites the durable mirror.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn flush(&self) -> crate::Result<()> {
        log::trace!(
            "Writing segment index mirror to {} ({} entries)",
            self.path.display(),
            self.entries.len()
        );

        let mut bytes = Vec::with_capacity(self.entries.len() * MIRROR_RECORD_LEN);

        for (digest, entry) in &self.entries {
            bytes.write_all(digest.to_hex().as_bytes())?;
            bytes.write_u32::<NativeEndian>(entry.length)?;
            bytes.write_u32::<NativeEndian>(entry.refcount)?;
        }

        rewrite_atomic(&self.path, &bytes)?;

        Ok(())
    }

    /// Rewrites the durable mirror; failure is logged, not returned.
    ///
    /// Used where the flush is a secondary effect of a request that
    /// has already succeeded. The rebuild path tolerates a stale
    /// mirror.
    pub(crate) fn flush_or_log(&self) {
        if let Err(e) = self.flush() {
            log::error!("Segment index mirror write failed: {e:?}");
        }
    }
}
