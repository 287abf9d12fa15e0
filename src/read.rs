// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    compression, digest::SegmentDigest, meta::MetadataRecord, segmenter::RollingHash,
    store::ObjectClient, TieredFs,
};
use std::{
    fs::File,
    io::{BufWriter, Write},
    os::unix::fs::FileExt,
    path::Path,
};

impl<S: ObjectClient, H: RollingHash + Clone> TieredFs<S, H> {
    /// Reads up to `buf.len()` bytes at `offset` from a logical file.
    ///
    /// Resident files are served from the proxy. For tiered files the
    /// segment list is walked sequentially to the segment straddling
    /// `offset`, then bytes are copied across successive segments and
    /// finally out of the tail file. Returns the number of bytes read;
    /// 0 past end-of-file.
    ///
    /// # Errors
    ///
    /// Will return [`crate::Error::Invariant`] if a referenced digest
    /// is not indexed; data is never fabricated.
    pub fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> crate::Result<usize> {
        let meta_path = self.mapper.metadata_path(path)?;

        if !meta_path.try_exists()? {
            let proxy = File::open(self.mapper.proxy_path(path))?;
            return Ok(read_at_most(&proxy, offset, buf)?);
        }

        let mut record = MetadataRecord::open(&meta_path)?;
        let header = record.header()?;

        // NOTE: Wrapping is fine, sizes are file lengths
        #[allow(clippy::cast_sign_loss)]
        let total_size = header.total_size as u64;

        if offset >= total_size {
            return Ok(0);
        }

        // NOTE: Truncation is fine, `want` fits in the caller's buffer
        #[allow(clippy::cast_possible_truncation)]
        let want = buf.len().min((total_size - offset) as usize);
        let mut served = 0;

        // Offset of the segment currently under the cursor,
        // accumulated while scanning the reference list
        let mut current = 0;

        let digests = record.refs()?.collect::<crate::Result<Vec<_>>>()?;

        for digest in digests {
            let entry = self
                .index
                .lock()
                .expect("lock is poisoned")
                .lookup(&digest)
                .ok_or_else(|| {
                    crate::Error::Invariant(format!("referenced segment {digest} is not indexed"))
                })?;

            let length = u64::from(entry.length);

            if current + length <= offset {
                // Before the requested window
                current += length;
                continue;
            }

            let seg_offset = offset + served as u64 - current;

            // NOTE: Truncation is fine, bounded by segment length
            #[allow(clippy::cast_possible_truncation)]
            let n = ((length - seg_offset) as usize).min(want - served);

            self.fetch(&digest, seg_offset, &mut buf[served..served + n], entry.length)?;

            served += n;
            current += length;

            if served == want {
                return Ok(served);
            }
        }

        // The remainder lives in the tail file
        let tail = File::open(self.mapper.tail_path(path)?)?;
        let tail_offset = offset + served as u64 - current;
        served += read_at_most(&tail, tail_offset, &mut buf[served..want])?;

        Ok(served)
    }

    /// Copies `dest.len()` bytes of a segment, starting at `offset`
    /// within it, into `dest`.
    ///
    /// With the cache enabled, a miss materialises the segment under
    /// the cache folder (evicting to make room) and registers it as
    /// most-recently-used; a hit only promotes. With the cache
    /// disabled, the segment goes through a scratch file that is
    /// dropped right after the copy.
    pub(crate) fn fetch(
        &self,
        digest: &SegmentDigest,
        offset: u64,
        dest: &mut [u8],
        length: u32,
    ) -> crate::Result<()> {
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock().expect("lock is poisoned");

            if cache.contains(digest) {
                cache.touch(digest);
                log::trace!("Segment cache hit for {digest}");
            } else {
                cache.ensure_capacity(u64::from(length))?;

                let segment_path = cache.segment_path(digest);

                if let Err(e) = self.download_segment(digest, &segment_path) {
                    // Keep the folder in sync with the entry list
                    let _ = std::fs::remove_file(&segment_path);
                    return Err(e);
                }

                cache.insert(*digest, length);
            }

            let file = File::open(cache.segment_path(digest))?;
            file.read_exact_at(dest, offset)?;

            return Ok(());
        }

        let scratch = tempfile::Builder::new()
            .prefix(".segment_temp")
            .tempfile_in(self.mapper.root())?;

        self.download_segment(digest, scratch.path())?;
        scratch.as_file().read_exact_at(dest, offset)?;

        Ok(())
    }

    /// Downloads a segment, decompressed, to the given path.
    pub(crate) fn download_segment(&self, digest: &SegmentDigest, dest: &Path) -> crate::Result<()> {
        log::debug!("Fetching segment {digest} from the object store");

        let file = File::create(dest)?;

        if self.config.no_compress {
            let mut writer = BufWriter::new(file);
            self.store().get(digest, &mut writer)?;
            writer.flush()?;
            return Ok(());
        }

        let mut sink = compression::decompress_sink(BufWriter::new(file));

        self.store().get(digest, &mut sink).map_err(|e| match e {
            crate::Error::Io(io) if compression::is_corrupt_stream(&io) => crate::Error::Decompress,
            other => other,
        })?;

        let mut writer = sink.finish().map_err(|e| {
            if compression::is_corrupt_stream(&e) {
                crate::Error::Decompress
            } else {
                crate::Error::Io(e)
            }
        })?;
        writer.flush()?;

        Ok(())
    }
}

/// Positional read that tolerates end-of-file.
fn read_at_most(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;

    while filled < buf.len() {
        let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    Ok(filled)
}
