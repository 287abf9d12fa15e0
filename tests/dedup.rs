mod common;

use common::{random_bytes, read_file, small_config, write_file};
use test_log::test;
use tierfs::mock::MemoryStore;
use tierfs::TieredFs;

#[test]
fn dedup_identical_bodies_share_segments() -> tierfs::Result<()> {
    let folder = tempfile::tempdir()?;
    let store = MemoryStore::default();

    let fs = TieredFs::mount(folder.path(), small_config(store.clone()))?;

    let body = random_bytes(32, 10);
    write_file(&fs, "/a", &body)?;

    let bytes_after_first = store.object_bytes();
    let puts_after_first = store.put_count();

    write_file(&fs, "/b", &body)?;

    // Identical content cuts identically, so the second file adds no
    // objects and no uploads
    assert_eq!(fs.segment_refs("/a")?, fs.segment_refs("/b")?);
    assert_eq!(bytes_after_first, store.object_bytes());
    assert_eq!(puts_after_first, store.put_count());

    for digest in fs.segment_refs("/a")? {
        let entry = fs.index_entry(&digest).expect("should be indexed");
        assert_eq!(2, entry.refcount);
    }

    assert_eq!(body, read_file(&fs, "/a", 32)?);
    assert_eq!(body, read_file(&fs, "/b", 32)?);

    Ok(())
}

#[test]
fn dedup_within_a_single_file() -> tierfs::Result<()> {
    let folder = tempfile::tempdir()?;
    let store = MemoryStore::default();

    let fs = TieredFs::mount(folder.path(), small_config(store.clone()))?;

    // The same 32 bytes four times over; repeated segments are
    // uploaded once
    let block = random_bytes(32, 11);
    let body = block.repeat(4);
    write_file(&fs, "/rep", &body)?;

    let refs = fs.segment_refs("/rep")?;
    let mut distinct = refs.clone();
    distinct.sort();
    distinct.dedup();

    assert_eq!(distinct.len(), store.object_count());
    assert_eq!(distinct.len() as u64, store.put_count());

    assert_eq!(body, read_file(&fs, "/rep", body.len())?);

    Ok(())
}

#[test]
fn dedup_unlink_of_shared_file_keeps_blobs() -> tierfs::Result<()> {
    let folder = tempfile::tempdir()?;
    let store = MemoryStore::default();

    let fs = TieredFs::mount(folder.path(), small_config(store.clone()))?;

    let body = random_bytes(32, 12);
    write_file(&fs, "/a", &body)?;
    write_file(&fs, "/b", &body)?;

    let object_count = store.object_count();

    fs.unlink("/a")?;

    // Every segment is still referenced by /b
    assert_eq!(object_count, store.object_count());
    assert_eq!(0, store.delete_count());
    assert_eq!(body, read_file(&fs, "/b", 32)?);

    for digest in fs.segment_refs("/b")? {
        let entry = fs.index_entry(&digest).expect("should be indexed");
        assert_eq!(1, entry.refcount);
    }

    fs.unlink("/b")?;

    assert_eq!(0, store.object_count());
    assert_eq!(0, fs.index_len());

    Ok(())
}

#[test]
fn dedup_disabled_still_counts_references() -> tierfs::Result<()> {
    let folder = tempfile::tempdir()?;
    let store = MemoryStore::default();

    let fs = TieredFs::mount(folder.path(), small_config(store.clone()).no_dedup(true))?;

    let body = random_bytes(32, 13);
    write_file(&fs, "/a", &body)?;

    let puts_after_first = store.put_count();

    write_file(&fs, "/b", &body)?;

    // Dedup off: the second copy is uploaded again (to the same
    // content-addressed objects), but refcounts still track both files
    assert!(store.put_count() > puts_after_first);
    assert_eq!(fs.segment_refs("/a")?.len(), fs.segment_refs("/b")?.len());

    for digest in fs.segment_refs("/a")? {
        let entry = fs.index_entry(&digest).expect("should be indexed");
        assert_eq!(2, entry.refcount);
    }

    fs.unlink("/a")?;
    fs.unlink("/b")?;

    assert_eq!(0, store.object_count());
    assert_eq!(0, fs.index_len());

    Ok(())
}
