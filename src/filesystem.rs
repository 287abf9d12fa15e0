// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    cache::SegmentCache,
    config::Config,
    digest::SegmentDigest,
    handle_table::HandleTable,
    index::{IndexEntry, SegmentIndex},
    meta::{MetaHeader, MetadataRecord},
    path::{absolute_path, PathMapper},
    segmenter::RollingHash,
    store::{ObjectClient, ObjectStore},
};
use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

/// A tiering filesystem core rooted at an SSD folder
///
/// Small files live entirely on the SSD; larger files have their
/// bodies split into content-defined segments that are deduplicated
/// across the namespace and moved to an object store. A bounded
/// on-SSD cache absorbs read traffic.
///
/// All operations assume serialised requests from the bridge. The
/// shared tables are individually mutex-wrapped; lock order is
/// index → cache → handles.
#[derive(Clone)]
pub struct TieredFs<S: ObjectClient, H: RollingHash + Clone>(Arc<TieredFsInner<S, H>>);

impl<S: ObjectClient, H: RollingHash + Clone> std::ops::Deref for TieredFs<S, H> {
    type Target = TieredFsInner<S, H>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[allow(clippy::module_name_repetitions)]
pub struct TieredFsInner<S: ObjectClient, H: RollingHash + Clone> {
    /// SSD root folder
    pub path: PathBuf,

    /// Tiering configuration
    pub(crate) config: Config<S, H>,

    pub(crate) mapper: PathMapper,

    /// Global segment index
    pub(crate) index: Mutex<SegmentIndex>,

    /// Segment cache; `None` when disabled
    pub(crate) cache: Option<Mutex<SegmentCache>>,

    /// Outstanding writable handles
    pub(crate) handles: Mutex<HandleTable>,
}

impl<S: ObjectClient, H: RollingHash + Clone> TieredFs<S, H> {
    /// Mounts the tiering core at the given SSD root, creating it or
    /// rebuilding state from a previous run.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the configuration is invalid or an IO
    /// error occurs.
    pub fn mount<P: Into<PathBuf>>(path: P, config: Config<S, H>) -> crate::Result<Self> {
        config.validate()?;

        let path = absolute_path(path.into())?;
        let mapper = PathMapper::new(&path);

        if mapper.hash_table_path().try_exists()? {
            Self::recover(path, mapper, config)
        } else {
            Self::create_new(path, mapper, config)
        }
    }

    /// Creates a fresh SSD root.
    fn create_new(path: PathBuf, mapper: PathMapper, config: Config<S, H>) -> crate::Result<Self> {
        log::info!(
            "Creating tiering root at {} (object store: {})",
            path.display(),
            if config.hostname.is_empty() {
                "injected client"
            } else {
                config.hostname.as_str()
            }
        );

        std::fs::create_dir_all(&path)?;
        std::fs::create_dir_all(mapper.cache_folder())?;

        let index = SegmentIndex::create_new(mapper.hash_table_path())?;

        #[cfg(not(target_os = "windows"))]
        {
            // fsync folders on Unix
            let folder = std::fs::File::open(mapper.cache_folder())?;
            folder.sync_all()?;

            let folder = std::fs::File::open(&path)?;
            folder.sync_all()?;
        }

        let cache = Self::build_cache(&mapper, &config);

        Ok(Self(Arc::new(TieredFsInner {
            path,
            config,
            mapper,
            index: Mutex::new(index),
            cache,
            handles: Mutex::new(HandleTable::default()),
        })))
    }

    /// Rebuilds the index from its mirror and re-adopts cache files.
    fn recover(path: PathBuf, mapper: PathMapper, config: Config<S, H>) -> crate::Result<Self> {
        log::info!("Recovering tiering root at {}", path.display());

        std::fs::create_dir_all(mapper.cache_folder())?;

        let index = SegmentIndex::rebuild(mapper.hash_table_path())?;
        let cache = Self::build_cache(&mapper, &config);

        if let Some(cache) = &cache {
            cache
                .lock()
                .expect("lock is poisoned")
                .resurrect(&index)?;
        }

        Ok(Self(Arc::new(TieredFsInner {
            path,
            config,
            mapper,
            index: Mutex::new(index),
            cache,
            handles: Mutex::new(HandleTable::default()),
        })))
    }

    fn build_cache(mapper: &PathMapper, config: &Config<S, H>) -> Option<Mutex<SegmentCache>> {
        if config.no_cache {
            log::debug!("Segment cache disabled by configuration");
            return None;
        }

        if config.cache_size < config.max_seg_size() {
            log::warn!(
                "Cache budget of {} bytes cannot hold a single segment, disabling cache",
                config.cache_size
            );
            return None;
        }

        Some(Mutex::new(SegmentCache::new(
            mapper.cache_folder(),
            config.cache_size,
        )))
    }

    pub(crate) fn store(&self) -> ObjectStore<'_, S> {
        ObjectStore::new(&self.config.client)
    }

    /// Rewrites the durable index mirror.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn flush(&self) -> crate::Result<()> {
        self.index.lock().expect("lock is poisoned").flush()
    }

    /// Flushes durable state ahead of teardown.
    ///
    /// The core holds no background work, so dropping the value after
    /// this call is a clean shutdown.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn unmount(&self) -> crate::Result<()> {
        log::debug!("Unmounting tiering root at {}", self.path.display());
        self.flush()
    }

    /// Registers an open of a logical file.
    ///
    /// Writable opens are counted so that migration can wait for the
    /// last writer to close. A writable open creates the proxy file if
    /// it does not exist yet.
    ///
    /// # Errors
    ///
    /// Will return [`crate::Error::NotFound`] for a read-only open of
    /// a missing file.
    pub fn open(&self, path: &str, writable: bool) -> crate::Result<()> {
        let proxy = self.mapper.proxy_path(path);

        if !proxy.try_exists()? {
            if !writable {
                return Err(crate::Error::NotFound);
            }

            std::fs::File::create(&proxy)?;
        }

        if writable {
            let ino = self.mapper.proxy_inode(path)?;
            self.handles.lock().expect("lock is poisoned").open(ino);
        }

        Ok(())
    }

    /// Registers a close of a logical file.
    ///
    /// When the last writable handle goes away, the release-time
    /// migration decision runs. The handle count is consumed before
    /// migration, so a failed migration does not re-arm the decision.
    ///
    /// # Errors
    ///
    /// Will return `Err` if migration fails.
    pub fn release(&self, path: &str, writable: bool) -> crate::Result<()> {
        if !writable {
            return Ok(());
        }

        let ino = self.mapper.proxy_inode(path)?;
        let remaining = self.handles.lock().expect("lock is poisoned").close(ino);

        if remaining == 0 {
            self.migrate_on_release(path)?;
        }

        Ok(())
    }

    /// Runs the release-time migration decision.
    ///
    /// - Resident files above the threshold migrate wholesale.
    /// - Tiered files with a tail file have the tail segmented and
    ///   uploaded, then the tail file is deleted.
    /// - Everything else is a no-op.
    ///
    /// # Errors
    ///
    /// Will return `Err` if migration fails.
    pub fn migrate_on_release(&self, path: &str) -> crate::Result<()> {
        let meta_path = self.mapper.metadata_path(path)?;

        if meta_path.try_exists()? {
            let tail_path = self.mapper.tail_path(path)?;

            if tail_path.try_exists()? {
                log::debug!("Flushing tail of {path}");
                self.migrate(path, false, true)?;
                std::fs::remove_file(tail_path)?;
            }

            return Ok(());
        }

        let proxy_len = std::fs::metadata(self.mapper.proxy_path(path))?.len();

        if proxy_len > self.config.threshold {
            log::debug!("Migrating {path} ({proxy_len} bytes) to the object store");
            self.migrate(path, true, true)?;
        }

        Ok(())
    }

    /// Reads size and timestamps from the metadata record.
    ///
    /// Returns `None` for resident files; the bridge then relies on
    /// the proxy's own attributes.
    ///
    /// # Errors
    ///
    /// Will return [`crate::Error::NotFound`] if the proxy does not
    /// exist.
    pub fn tiered_stat(&self, path: &str) -> crate::Result<Option<MetaHeader>> {
        let meta_path = self.mapper.metadata_path(path)?;

        if !meta_path.try_exists()? {
            return Ok(None);
        }

        MetadataRecord::open(&meta_path)?.header().map(Some)
    }

    /// Segment references of a tiered file, in read order.
    #[doc(hidden)]
    pub fn segment_refs(&self, path: &str) -> crate::Result<Vec<SegmentDigest>> {
        let meta_path = self.mapper.metadata_path(path)?;
        let mut record = MetadataRecord::open(&meta_path)?;
        record.refs()?.collect()
    }

    /// Index entry for a digest.
    #[doc(hidden)]
    #[must_use]
    pub fn index_entry(&self, digest: &SegmentDigest) -> Option<IndexEntry> {
        self.index.lock().expect("lock is poisoned").lookup(digest)
    }

    /// Amount of indexed digests.
    #[doc(hidden)]
    #[must_use]
    pub fn index_len(&self) -> usize {
        self.index.lock().expect("lock is poisoned").len()
    }

    /// Sum of cached segment lengths.
    #[doc(hidden)]
    #[must_use]
    pub fn cache_bytes(&self) -> u64 {
        self.cache.as_ref().map_or(0, |cache| {
            cache.lock().expect("lock is poisoned").current_bytes()
        })
    }

    /// Amount of cached segments.
    #[doc(hidden)]
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache
            .as_ref()
            .map_or(0, |cache| cache.lock().expect("lock is poisoned").len())
    }

    /// Most-recently-used cached digest.
    #[doc(hidden)]
    #[must_use]
    pub fn cache_mru(&self) -> Option<SegmentDigest> {
        self.cache
            .as_ref()
            .and_then(|cache| cache.lock().expect("lock is poisoned").mru())
    }
}
