// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use path_absolutize::Absolutize;
use std::path::{Path, PathBuf};

/// Hidden folder holding locally materialised segments
pub const CACHE_FOLDER: &str = ".cache";

/// Hidden file mirroring the in-memory segment index
pub const HASH_TABLE_FILE: &str = ".hash_table";

/// Suffix appended to a metadata path to form the tail-file path
pub const TAIL_SUFFIX: &str = "_data";

pub fn absolute_path<P: AsRef<Path>>(path: P) -> std::io::Result<PathBuf> {
    Ok(path.as_ref().absolutize()?.into_owned())
}

/// Derives on-SSD paths for a logical file.
///
/// The proxy file sits at the logical path below the SSD root; the
/// metadata record and tail file are hidden siblings of the root named
/// after the proxy's inode number.
pub(crate) struct PathMapper {
    root: PathBuf,
}

impl PathMapper {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_folder(&self) -> PathBuf {
        self.root.join(CACHE_FOLDER)
    }

    pub fn hash_table_path(&self) -> PathBuf {
        self.root.join(HASH_TABLE_FILE)
    }

    /// On-SSD path of the proxy file for a logical path.
    pub fn proxy_path(&self, logical: &str) -> PathBuf {
        self.root.join(logical.trim_start_matches('/'))
    }

    /// On-SSD path of the metadata record for a logical path.
    ///
    /// # Errors
    ///
    /// Will return [`crate::Error::NotFound`] if the proxy does not exist.
    pub fn metadata_path(&self, logical: &str) -> crate::Result<PathBuf> {
        let ino = self.proxy_inode(logical)?;
        Ok(self.root.join(format!(".{ino:x}")))
    }

    /// On-SSD path of the tail file for a logical path.
    ///
    /// # Errors
    ///
    /// Will return [`crate::Error::NotFound`] if the proxy does not exist.
    pub fn tail_path(&self, logical: &str) -> crate::Result<PathBuf> {
        let ino = self.proxy_inode(logical)?;
        Ok(self.root.join(format!(".{ino:x}{TAIL_SUFFIX}")))
    }

    /// Inode number of the proxy file.
    pub fn proxy_inode(&self, logical: &str) -> crate::Result<u64> {
        use std::os::unix::fs::MetadataExt;

        match std::fs::metadata(self.proxy_path(logical)) {
            Ok(meta) => Ok(meta.ino()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(crate::Error::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}
