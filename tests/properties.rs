mod common;

use common::{random_bytes, read_file, small_config, write_file};
use std::collections::HashMap;
use test_log::test;
use tierfs::mock::MemoryStore;
use tierfs::{SegmentDigest, TieredFs};

fn refcount_appearances(
    fs: &TieredFs<MemoryStore, tierfs::mock::RabinHash>,
    paths: &[&str],
) -> tierfs::Result<HashMap<SegmentDigest, u32>> {
    let mut appearances = HashMap::new();

    for path in paths {
        for digest in fs.segment_refs(path)? {
            *appearances.entry(digest).or_insert(0) += 1;
        }
    }

    Ok(appearances)
}

/// Refcounts must equal the number of appearances across all records,
/// the index must hold exactly the referenced digests, and every
/// indexed digest must have an object behind it.
fn assert_accounting(
    fs: &TieredFs<MemoryStore, tierfs::mock::RabinHash>,
    store: &MemoryStore,
    paths: &[&str],
) -> tierfs::Result<()> {
    let appearances = refcount_appearances(fs, paths)?;

    assert_eq!(appearances.len(), fs.index_len());

    for (digest, count) in appearances {
        let entry = fs.index_entry(&digest).expect("should be indexed");
        assert_eq!(count, entry.refcount, "refcount of {digest}");
        assert!(store.contains(&digest.bucket(), &digest.object_key()));
    }

    Ok(())
}

fn assert_size_invariant(
    fs: &TieredFs<MemoryStore, tierfs::mock::RabinHash>,
    path: &str,
) -> tierfs::Result<()> {
    let header = fs.tiered_stat(path)?.expect("should be tiered");

    let segment_bytes: u64 = fs
        .segment_refs(path)?
        .iter()
        .map(|d| u64::from(fs.index_entry(d).expect("should be indexed").length))
        .sum();

    // After release no tail file exists, so the segments must cover
    // the full logical size
    assert_eq!(header.total_size as u64, segment_bytes);

    Ok(())
}

#[test]
fn accounting_survives_a_mixed_workload() -> tierfs::Result<()> {
    let folder = tempfile::tempdir()?;
    let store = MemoryStore::default();

    let fs = TieredFs::mount(folder.path(), small_config(store.clone()))?;

    let shared = random_bytes(64, 60);
    let unique = random_bytes(48, 61);

    write_file(&fs, "/a", &shared)?;
    write_file(&fs, "/b", &shared)?;
    write_file(&fs, "/c", &unique)?;

    assert_accounting(&fs, &store, &["/a", "/b", "/c"])?;
    assert_size_invariant(&fs, "/a")?;
    assert_size_invariant(&fs, "/c")?;

    // Append to one of the twins; their reference lists diverge
    fs.open("/a", true)?;
    fs.write("/a", &random_bytes(20, 62), 64)?;
    fs.release("/a", true)?;

    assert_accounting(&fs, &store, &["/a", "/b", "/c"])?;
    assert_size_invariant(&fs, "/a")?;
    assert_size_invariant(&fs, "/b")?;

    fs.unlink("/c")?;
    assert_accounting(&fs, &store, &["/a", "/b"])?;

    fs.unlink("/b")?;
    assert_accounting(&fs, &store, &["/a"])?;

    // Contents are still intact at the end of it all
    let mut expected = shared;
    expected.extend_from_slice(&random_bytes(20, 62));
    assert_eq!(expected, read_file(&fs, "/a", 84)?);

    fs.unlink("/a")?;
    assert_eq!(0, fs.index_len());
    assert_eq!(0, store.object_count());

    Ok(())
}
