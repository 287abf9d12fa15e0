// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    index::Released, meta::MetadataRecord, segmenter::RollingHash, store::ObjectClient, TieredFs,
};
use std::{fs::File, io::Write, os::unix::fs::FileExt, path::Path};

impl<S: ObjectClient, H: RollingHash + Clone> TieredFs<S, H> {
    /// Writes `buf` at `offset` into a logical file.
    ///
    /// Resident files are written straight through to the proxy.
    /// Tiered files only support appending: the first write detaches
    /// the last segment back onto the SSD as the tail file, and every
    /// write lands at the end of it. Returns the number of bytes
    /// written.
    ///
    /// # Errors
    ///
    /// Will return `Err` with [`std::io::ErrorKind::InvalidInput`] for
    /// a non-append write into a tiered file.
    pub fn write(&self, path: &str, buf: &[u8], offset: u64) -> crate::Result<usize> {
        let proxy = self.mapper.proxy_path(path);

        if !proxy.try_exists()? {
            // Fresh file; the proxy carries the bytes until release
            let file = File::options().write(true).create(true).open(&proxy)?;
            file.write_all_at(buf, offset)?;
            return Ok(buf.len());
        }

        let meta_path = self.mapper.metadata_path(path)?;

        if !meta_path.try_exists()? {
            let file = File::options().write(true).open(&proxy)?;
            file.write_all_at(buf, offset)?;
            return Ok(buf.len());
        }

        let mut record = MetadataRecord::open(&meta_path)?;
        let mut header = record.header()?;

        // NOTE: Wrapping is fine, sizes are file lengths
        #[allow(clippy::cast_sign_loss)]
        let total_size = header.total_size as u64;

        if offset != total_size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "writes into tiered files must append",
            )
            .into());
        }

        let tail_path = self.mapper.tail_path(path)?;

        if !tail_path.try_exists()? {
            self.detach_last_segment(&mut record, &tail_path)?;
        }

        let mut tail = File::options().append(true).create(true).open(&tail_path)?;
        tail.write_all(buf)?;

        header.total_size += buf.len() as i64;
        header.touch();
        record.write_header(&header)?;

        log::trace!("Appended {} bytes to the tail of {path}", buf.len());

        Ok(buf.len())
    }

    /// Pulls the record's last segment back onto the SSD as the tail
    /// file and drops its reference.
    ///
    /// Appends then grow the tail file instead of rewriting immutable
    /// segments. A record with no references just gets an empty tail.
    fn detach_last_segment(
        &self,
        record: &mut MetadataRecord,
        tail_path: &Path,
    ) -> crate::Result<()> {
        let Some(digest) = record.last_ref()? else {
            File::create(tail_path)?;
            return Ok(());
        };

        log::debug!("Detaching last segment {digest} into the tail file");

        // Materialise the segment bytes before dropping the reference,
        // so a failed fetch leaves the record intact
        let cached = self.cache.as_ref().is_some_and(|cache| {
            cache.lock().expect("lock is poisoned").contains(&digest)
        });

        if cached {
            let cache = self.cache.as_ref().expect("cache was probed above");
            let segment_path = cache.lock().expect("lock is poisoned").segment_path(&digest);
            std::fs::copy(segment_path, tail_path)?;
        } else {
            self.download_segment(&digest, tail_path)?;
        }

        record.truncate_last_ref()?;

        let mut index = self.index.lock().expect("lock is poisoned");

        if let Released::ZeroNow = index.release(&digest)? {
            if let Some(cache) = &self.cache {
                cache.lock().expect("lock is poisoned").evict(&digest)?;
            }

            self.store().delete(&digest)?;
            log::trace!("Purged segment {digest} (no more references)");
        }

        index.flush_or_log();

        Ok(())
    }
}
