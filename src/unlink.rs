// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    index::Released, meta::MetadataRecord, segmenter::RollingHash, store::ObjectClient, TieredFs,
};

impl<S: ObjectClient, H: RollingHash + Clone> TieredFs<S, H> {
    /// Removes a logical file.
    ///
    /// Every segment reference is dropped; segments nobody else
    /// references are deleted from the object store and the cache.
    /// The metadata record, tail file and proxy go away with them.
    ///
    /// # Errors
    ///
    /// Will return [`crate::Error::NotFound`] if the proxy does not
    /// exist.
    pub fn unlink(&self, path: &str) -> crate::Result<()> {
        let proxy = self.mapper.proxy_path(path);
        let meta_path = self.mapper.metadata_path(path)?;
        let tail_path = self.mapper.tail_path(path)?;

        if meta_path.try_exists()? {
            let mut record = MetadataRecord::open(&meta_path)?;
            let digests = record.refs()?.collect::<crate::Result<Vec<_>>>()?;
            drop(record);

            let mut index = self.index.lock().expect("lock is poisoned");

            for digest in digests {
                if let Released::ZeroNow = index.release(&digest)? {
                    if let Some(cache) = &self.cache {
                        cache.lock().expect("lock is poisoned").evict(&digest)?;
                    }

                    self.store().delete(&digest)?;
                    log::trace!("Purged segment {digest} (no more references)");
                }
            }

            index.flush_or_log();
            drop(index);

            std::fs::remove_file(&meta_path)?;

            if tail_path.try_exists()? {
                std::fs::remove_file(&tail_path)?;
            }
        }

        std::fs::remove_file(&proxy)?;
        log::debug!("Unlinked {path}");

        Ok(())
    }
}
