// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::digest::{SegmentDigest, DIGEST_HEX_LEN};
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

/// Packed header length: total size plus three timestamps
pub(crate) const META_HEADER_LEN: u64 = 4 * std::mem::size_of::<i64>() as u64;

/// Metadata record header of a tiered file
///
/// Timestamps are wall-clock seconds. The segment-reference stream
/// follows the header; its order is the read order of the file body.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MetaHeader {
    /// Total logical size in bytes
    pub total_size: i64,

    /// Access time
    pub atime: i64,

    /// Modification time
    pub mtime: i64,

    /// Attribute-change time
    pub ctime: i64,
}

impl MetaHeader {
    pub(crate) fn new(total_size: i64) -> Self {
        let now = wall_clock_seconds();

        Self {
            total_size,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    /// Refreshes the modification timestamps.
    pub(crate) fn touch(&mut self) {
        let now = wall_clock_seconds();
        self.mtime = now;
        self.ctime = now;
    }

    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        Ok(Self {
            total_size: reader.read_i64::<NativeEndian>()?,
            atime: reader.read_i64::<NativeEndian>()?,
            mtime: reader.read_i64::<NativeEndian>()?,
            ctime: reader.read_i64::<NativeEndian>()?,
        })
    }

    fn encode_into<W: Write>(&self, writer: &mut W) -> crate::Result<()> {
        writer.write_i64::<NativeEndian>(self.total_size)?;
        writer.write_i64::<NativeEndian>(self.atime)?;
        writer.write_i64::<NativeEndian>(self.mtime)?;
        writer.write_i64::<NativeEndian>(self.ctime)?;
        Ok(())
    }
}

// NOTE: Wrapping is fine until the year 292 billion
#[allow(clippy::cast_possible_wrap)]
fn wall_clock_seconds() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(_) => 0,
    }
}

/// Open handle to a metadata record.
pub(crate) struct MetadataRecord {
    file: File,
}

impl MetadataRecord {
    /// Creates (or truncates) a record with a fresh header.
    pub fn create(path: &Path, total_size: i64) -> crate::Result<Self> {
        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        MetaHeader::new(total_size).encode_into(&mut file)?;

        Ok(Self { file })
    }

    /// Opens an existing record.
    ///
    /// # Errors
    ///
    /// Will return [`crate::Error::NotFound`] if the record does not exist.
    pub fn open(path: &Path) -> crate::Result<Self> {
        match File::options().read(true).write(true).open(path) {
            Ok(file) => Ok(Self { file }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(crate::Error::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    pub fn header(&mut self) -> crate::Result<MetaHeader> {
        self.file.seek(SeekFrom::Start(0))?;
        MetaHeader::decode_from(&mut self.file)
    }

    pub fn write_header(&mut self, header: &MetaHeader) -> crate::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        header.encode_into(&mut self.file)
    }

    /// Amount of complete segment references.
    ///
    /// A partial trailing reference (crashed append) is not counted.
    pub fn ref_count(&self) -> crate::Result<u64> {
        let len = self.file.metadata()?.len();
        Ok(len.saturating_sub(META_HEADER_LEN) / DIGEST_HEX_LEN as u64)
    }

    /// Appends one segment reference at the end of the record.
    pub fn append_ref(&mut self, digest: &SegmentDigest) -> crate::Result<()> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(digest.to_hex().as_bytes())?;
        Ok(())
    }

    /// Streams the segment references in read order.
    pub fn refs(&mut self) -> crate::Result<Refs<'_>> {
        let remaining = self.ref_count()?;
        self.file.seek(SeekFrom::Start(META_HEADER_LEN))?;

        Ok(Refs {
            reader: BufReader::new(&mut self.file),
            remaining,
        })
    }

    /// Last complete segment reference, without removing it.
    ///
    /// Seeks backward by exactly one reference from the end of the
    /// complete-reference region. Returns `None` when the record holds
    /// no references.
    pub fn last_ref(&mut self) -> crate::Result<Option<SegmentDigest>> {
        let refs = self.ref_count()?;
        if refs == 0 {
            return Ok(None);
        }

        let last = META_HEADER_LEN + (refs - 1) * DIGEST_HEX_LEN as u64;
        self.file.seek(SeekFrom::Start(last))?;

        let mut hex = [0; DIGEST_HEX_LEN];
        self.file.read_exact(&mut hex)?;

        parse_ref(&hex).map(Some)
    }

    /// Removes the last segment reference and returns its digest.
    ///
    /// A partial trailing reference (crashed append) is clipped along
    /// the way. Returns `None` when the record holds no references.
    pub fn truncate_last_ref(&mut self) -> crate::Result<Option<SegmentDigest>> {
        let Some(digest) = self.last_ref()? else {
            return Ok(None);
        };

        let refs = self.ref_count()?;
        let last = META_HEADER_LEN + (refs - 1) * DIGEST_HEX_LEN as u64;
        self.file.set_len(last)?;

        Ok(Some(digest))
    }
}

/// Iterator over the segment references of a metadata record
pub(crate) struct Refs<'a> {
    reader: BufReader<&'a mut File>,
    remaining: u64,
}

impl Iterator for Refs<'_> {
    type Item = crate::Result<SegmentDigest>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let mut hex = [0; DIGEST_HEX_LEN];

        if let Err(e) = self.reader.read_exact(&mut hex) {
            return Some(Err(e.into()));
        }

        Some(parse_ref(&hex))
    }
}

fn parse_ref(hex: &[u8; DIGEST_HEX_LEN]) -> crate::Result<SegmentDigest> {
    std::str::from_utf8(hex)
        .ok()
        .and_then(SegmentDigest::from_hex)
        .ok_or_else(|| crate::Error::Invariant("malformed segment reference".into()))
}
