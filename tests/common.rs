// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use rand::{rngs::StdRng, RngCore, SeedableRng};
use tierfs::mock::{MemoryStore, RabinHash};
use tierfs::Config;

pub const WINDOW: usize = 8;

/// Small-segment configuration so a handful of bytes already spans
/// several segments.
#[must_use]
pub fn small_config(store: MemoryStore) -> Config<MemoryStore, RabinHash> {
    Config::new(store, RabinHash::new(WINDOW))
        .threshold(8)
        .avg_seg_size(16)
        .rabin_window_size(WINDOW)
        .cache_size(1_024 * 1_024)
}

/// Deterministic pseudo-random bytes.
#[must_use]
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bytes = vec![0; len];
    rng.fill_bytes(&mut bytes);
    bytes
}

/// Writes a whole body and closes the file.
pub fn write_file(
    fs: &tierfs::TieredFs<MemoryStore, RabinHash>,
    path: &str,
    body: &[u8],
) -> tierfs::Result<()> {
    fs.open(path, true)?;
    fs.write(path, body, 0)?;
    fs.release(path, true)?;
    Ok(())
}

/// Reads a whole tiered or resident file back.
pub fn read_file(
    fs: &tierfs::TieredFs<MemoryStore, RabinHash>,
    path: &str,
    len: usize,
) -> tierfs::Result<Vec<u8>> {
    let mut buf = vec![0; len];
    let n = fs.read(path, &mut buf, 0)?;
    buf.truncate(n);
    Ok(buf)
}
