// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Tiering core for a userspace filesystem that keeps small files on
//! SSD and moves large file bodies into an object store.
//!
//! A logical file always has a *proxy* inode on the SSD carrying its
//! POSIX attributes. Bodies above a configurable threshold are split
//! into content-defined segments on release:
//!
//! [seg 0][seg 1][seg 2][seg 3][tail bytes…]
//!
//! Each segment is identified by its content digest and deduplicated
//! across the entire namespace through a global, refcounted segment
//! index mirrored to disk. Segment payloads are (optionally deflated)
//! objects whose bucket and key are derived from the digest. A
//! byte-bounded LRU cache of materialised segments absorbs read
//! traffic; appends land in an on-SSD tail file so immutable segments
//! never get rewritten.
//!
//! The kernel bridge in front of this crate serialises requests and
//! owns directory operations, permissions and attribute handling; the
//! object-store transport and the rolling-hash primitive are injected
//! through the [`ObjectClient`] and [`RollingHash`] traits.
//!
//! In summary, the core trades cold-read latency for SSD capacity:
//! hot, small, or freshly appended data stays local, while bulk bytes
//! are deduplicated and parked in cheap storage.
//!
//! # Example usage
//!
//! ```
//! # use tierfs::mock::{MemoryStore, RabinHash};
//! use tierfs::{Config, TieredFs};
//!
//! # fn main() -> tierfs::Result<()> {
//! # let folder = tempfile::tempdir()?;
//! let config = Config::new(MemoryStore::default(), RabinHash::new(16))
//!     .threshold(1_024)
//!     .avg_seg_size(256)
//!     .rabin_window_size(16);
//!
//! let fs = TieredFs::mount(folder.path(), config)?;
//!
//! fs.open("/report", true)?;
//! fs.write("/report", b"hello", 0)?;
//! fs.release("/report", true)?;
//!
//! let mut buf = [0; 5];
//! let n = fs.read("/report", &mut buf, 0)?;
//! assert_eq!(b"hello", &buf[..n]);
//! #
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]

mod cache;
mod compression;
mod config;
mod digest;
mod error;
mod filesystem;
mod handle_table;
mod index;
mod meta;
mod migrate;
mod path;
mod read;
mod segmenter;
mod store;
mod tail;
mod unlink;

#[doc(hidden)]
pub mod mock;

pub(crate) type HashMap<K, V> = std::collections::HashMap<K, V, xxhash_rust::xxh3::Xxh3Builder>;

pub use {
    cache::SegmentCache,
    config::Config,
    digest::{SegmentDigest, BUCKET_HEX_LEN, DIGEST_HEX_LEN, DIGEST_RAW_LEN},
    error::{Error, Result},
    filesystem::TieredFs,
    index::{IndexEntry, Released, SegmentIndex},
    meta::MetaHeader,
    segmenter::{RollingHash, SegmenterError},
    store::ObjectClient,
};

#[doc(hidden)]
pub use segmenter::ClosedSegment;
