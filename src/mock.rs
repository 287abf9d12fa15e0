// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::segmenter::{RollingHash, SegmenterError};
use crate::store::ObjectClient;
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    io::{Read, Write},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

type Objects = RwLock<BTreeMap<(String, String), Vec<u8>>>;

/// Mock in-memory object store
#[derive(Clone, Default)]
pub struct MemoryStore(Arc<MemoryStoreInner>);

/// See [`MemoryStore`]
#[derive(Default)]
pub struct MemoryStoreInner {
    objects: Objects,
    buckets: RwLock<BTreeSet<String>>,

    put_count: AtomicU64,
    get_count: AtomicU64,
    delete_count: AtomicU64,
}

impl std::ops::Deref for MemoryStore {
    type Target = MemoryStoreInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MemoryStore {
    /// Amount of stored objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.read().expect("lock is poisoned").len()
    }

    /// Sum of stored (on-the-wire) payload lengths.
    #[must_use]
    pub fn object_bytes(&self) -> u64 {
        self.objects
            .read()
            .expect("lock is poisoned")
            .values()
            .map(|payload| payload.len() as u64)
            .sum()
    }

    /// Returns `true` if an object exists under the bucket and key.
    #[must_use]
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .read()
            .expect("lock is poisoned")
            .contains_key(&(bucket.into(), key.into()))
    }

    /// Amount of uploads performed.
    #[must_use]
    pub fn put_count(&self) -> u64 {
        self.put_count.load(Ordering::Relaxed)
    }

    /// Amount of downloads performed.
    #[must_use]
    pub fn get_count(&self) -> u64 {
        self.get_count.load(Ordering::Relaxed)
    }

    /// Amount of deletes performed.
    #[must_use]
    pub fn delete_count(&self) -> u64 {
        self.delete_count.load(Ordering::Relaxed)
    }
}

impl ObjectClient for MemoryStore {
    fn ensure_bucket(&self, bucket: &str) -> crate::Result<()> {
        self.buckets
            .write()
            .expect("lock is poisoned")
            .insert(bucket.into());
        Ok(())
    }

    fn put(
        &self,
        bucket: &str,
        key: &str,
        length: u64,
        reader: &mut dyn Read,
    ) -> crate::Result<()> {
        if !self
            .buckets
            .read()
            .expect("lock is poisoned")
            .contains(bucket)
        {
            return Err(crate::Error::Cloud(404));
        }

        let mut payload = Vec::new();
        reader.take(length).read_to_end(&mut payload)?;

        if payload.len() as u64 != length {
            return Err(crate::Error::Cloud(400));
        }

        self.put_count.fetch_add(1, Ordering::Relaxed);
        self.objects
            .write()
            .expect("lock is poisoned")
            .insert((bucket.into(), key.into()), payload);

        Ok(())
    }

    fn get(&self, bucket: &str, key: &str, writer: &mut dyn Write) -> crate::Result<()> {
        let objects = self.objects.read().expect("lock is poisoned");

        let payload = objects
            .get(&(bucket.into(), key.into()))
            .ok_or(crate::Error::Cloud(404))?;

        self.get_count.fetch_add(1, Ordering::Relaxed);
        writer.write_all(payload)?;

        Ok(())
    }

    fn delete(&self, bucket: &str, key: &str) -> crate::Result<()> {
        self.delete_count.fetch_add(1, Ordering::Relaxed);

        self.objects
            .write()
            .expect("lock is poisoned")
            .remove(&(bucket.into(), key.into()))
            .map(|_| ())
            .ok_or(crate::Error::Cloud(404))
    }
}

const RABIN_BASE: u64 = 257;

/// Polynomial rolling hash over a fixed byte window
///
/// The fingerprint of window `b₀..b₁..bₙ` is `Σ (bᵢ+1)·Bⁿ⁻ⁱ` with
/// wrapping arithmetic; sliding the window is O(1).
#[derive(Clone)]
pub struct RabinHash {
    window: usize,

    /// `BASE^(window-1)`, the weight of the outgoing byte
    top_weight: u64,

    buf: VecDeque<u8>,
    hash: u64,
}

impl RabinHash {
    /// Creates a hash with the given window size.
    #[must_use]
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "window must be non-empty");

        let mut top_weight = 1u64;
        for _ in 1..window {
            top_weight = top_weight.wrapping_mul(RABIN_BASE);
        }

        Self {
            window,
            top_weight,
            buf: VecDeque::with_capacity(window),
            hash: 0,
        }
    }
}

impl RollingHash for RabinHash {
    fn reset(&mut self) {
        self.buf.clear();
        self.hash = 0;
    }

    fn push(&mut self, byte: u8) -> Result<u64, SegmenterError> {
        if self.buf.len() == self.window {
            let outgoing = self
                .buf
                .pop_front()
                .ok_or_else(|| SegmenterError("window underflow".into()))?;

            self.hash = self
                .hash
                .wrapping_sub((u64::from(outgoing) + 1).wrapping_mul(self.top_weight));
        }

        self.hash = self
            .hash
            .wrapping_mul(RABIN_BASE)
            .wrapping_add(u64::from(byte) + 1);
        self.buf.push_back(byte);

        Ok(self.hash)
    }
}
