// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    compression,
    meta::MetadataRecord,
    segmenter::{ClosedSegment, RollingHash, Segmenter},
    store::ObjectClient,
    TieredFs,
};
use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
};

impl<S: ObjectClient, H: RollingHash + Clone> TieredFs<S, H> {
    /// Moves the body readable at `path` into the object store,
    /// producing (or extending) its metadata record.
    ///
    /// With `from_ssd`, the source is the proxy file and a metadata
    /// record is created; otherwise the source is the tail file and
    /// references are appended to the existing record.
    ///
    /// With `emit_tail`, the trailing residual is closed as one final
    /// segment and the source is truncated to zero; otherwise the
    /// residual is moved to the tail file.
    ///
    /// A failed migration leaves the metadata record partially grown;
    /// re-running resumes after the already-referenced prefix.
    #[doc(hidden)]
    pub fn migrate(&self, path: &str, from_ssd: bool, emit_tail: bool) -> crate::Result<()> {
        let meta_path = self.mapper.metadata_path(path)?;
        let source_path = if from_ssd {
            self.mapper.proxy_path(path)
        } else {
            self.mapper.tail_path(path)?
        };

        let source_len = std::fs::metadata(&source_path)?.len();

        // NOTE: Wrapping is fine, sizes are file lengths
        #[allow(clippy::cast_possible_wrap)]
        let total_size = source_len as i64;

        // A pre-existing record on the from-SSD path means an earlier
        // attempt failed mid-way; its references are picked up below.
        let mut record = if from_ssd && !meta_path.try_exists()? {
            MetadataRecord::create(&meta_path, total_size)?
        } else {
            MetadataRecord::open(&meta_path)?
        };

        let covered = self.covered_prefix(&mut record)?;

        // NOTE: Sign loss is fine, sizes are file lengths
        #[allow(clippy::cast_sign_loss)]
        let logical_size = record.header()?.total_size as u64;

        // The source's first byte sits where the logical size stops
        // being backed by the source: offset 0 for a proxy, the end of
        // the pre-tail body for a tail file. References past that
        // point were committed by a failed earlier attempt, so their
        // bytes are skipped instead of re-segmented.
        let skip = (covered + source_len)
            .saturating_sub(logical_size)
            .min(source_len);

        if skip > 0 {
            log::debug!("Resuming migration behind {skip} already-migrated source bytes");
        }

        let mut stream = BufReader::new(File::open(&source_path)?);
        stream.seek(SeekFrom::Start(skip))?;

        // Secondary handle, kept aligned with the segmenter so staging
        // for upload can read straight from it
        let mut staging = File::open(&source_path)?;
        staging.seek(SeekFrom::Start(skip))?;

        let mut segmenter = Segmenter::new(
            self.config.hasher.clone(),
            self.config.avg_seg_size,
            self.config.rabin_window_size,
        );

        let mut buf = vec![0; 64 * 1_024];

        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                break;
            }

            for segment in segmenter.feed(&buf[..n])? {
                self.commit_segment(&mut record, &mut staging, &segment)?;
            }
        }

        if emit_tail {
            if let Some(segment) = segmenter.take_residual() {
                self.commit_segment(&mut record, &mut staging, &segment)?;
            }

            truncate_file(&source_path)?;
        } else {
            self.spill_residual(path, from_ssd, &source_path, &mut staging, source_len)?;
        }

        self.index.lock().expect("lock is poisoned").flush_or_log();

        log::debug!(
            "Migrated {path}: {} references, {source_len} bytes",
            record.ref_count()?
        );

        Ok(())
    }

    /// Bytes already sitting behind the record's references.
    fn covered_prefix(&self, record: &mut MetadataRecord) -> crate::Result<u64> {
        let index = self.index.lock().expect("lock is poisoned");
        let mut covered = 0;

        for digest in record.refs()? {
            let digest = digest?;
            let entry = index.lookup(&digest).ok_or_else(|| {
                crate::Error::Invariant(format!("referenced segment {digest} is not indexed"))
            })?;
            covered += u64::from(entry.length);
        }

        Ok(covered)
    }

    /// Uploads a closed segment, or just bumps its reference count if
    /// the namespace already holds its bytes.
    fn commit_segment(
        &self,
        record: &mut MetadataRecord,
        staging: &mut File,
        segment: &ClosedSegment,
    ) -> crate::Result<()> {
        let mut index = self.index.lock().expect("lock is poisoned");

        if !self.config.no_dedup && index.lookup(&segment.digest).is_some() {
            index.acquire(&segment.digest)?;
            index.flush_or_log();

            // Keep the staging cursor aligned with the segmenter
            staging.seek(SeekFrom::Current(i64::from(segment.length)))?;
            record.append_ref(&segment.digest)?;

            log::trace!(
                "Deduplicated segment {} ({} bytes)",
                segment.digest,
                segment.length
            );
            return Ok(());
        }

        self.store().ensure_bucket(&segment.digest)?;

        if self.config.no_compress {
            let mut body = &*staging;
            self.store()
                .put(&segment.digest, u64::from(segment.length), &mut body)?;
        } else {
            let mut scratch = tempfile::Builder::new()
                .prefix(".temp_compress")
                .tempfile_in(self.mapper.root())?;

            let compressed_len = compression::deflate(
                &*staging,
                scratch.as_file_mut(),
                u64::from(segment.length),
            )?;
            scratch.as_file_mut().seek(SeekFrom::Start(0))?;

            self.store()
                .put(&segment.digest, compressed_len, scratch.as_file_mut())?;
        }

        // Insert only after the upload succeeded, so an indexed digest
        // always has a blob behind it
        if index.lookup(&segment.digest).is_some() {
            index.acquire(&segment.digest)?;
        } else {
            index.insert(segment.digest, segment.length)?;
        }
        index.flush_or_log();

        record.append_ref(&segment.digest)?;

        log::trace!(
            "Uploaded segment {} ({} bytes)",
            segment.digest,
            segment.length
        );
        Ok(())
    }

    /// Moves the unsegmented trailing bytes into the tail file and
    /// empties the source.
    fn spill_residual(
        &self,
        path: &str,
        from_ssd: bool,
        source_path: &std::path::Path,
        staging: &mut File,
        source_len: u64,
    ) -> crate::Result<()> {
        let consumed = staging.stream_position()?;
        let residual = source_len - consumed;

        if residual == 0 {
            truncate_file(source_path)?;
            return Ok(());
        }

        let tail_path = self.mapper.tail_path(path)?;
        log::trace!("Retaining {residual} residual bytes in the tail file");

        if from_ssd {
            let mut tail = File::create(tail_path)?;
            std::io::copy(&mut &*staging, &mut tail)?;
            truncate_file(source_path)?;
        } else {
            // The source is the tail file itself; stage the leftover
            // through a scratch file, then swap it in
            let mut scratch = tempfile::Builder::new()
                .prefix(".segment_temp")
                .tempfile_in(self.mapper.root())?;

            std::io::copy(&mut &*staging, scratch.as_file_mut())?;
            scratch.persist(tail_path).map_err(|e| e.error)?;
        }

        Ok(())
    }
}

fn truncate_file(path: &std::path::Path) -> crate::Result<()> {
    let file = File::options().write(true).open(path)?;
    file.set_len(0)?;
    Ok(())
}
