// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::digest::SegmentDigest;
use std::io::{Read, Write};

/// External object-store transport
///
/// The client is the only component that talks to the network. Byte
/// streams are passed per call, so the client never holds state
/// between requests.
///
/// Implementations should surface any non-success store status as
/// [`crate::Error::Cloud`].
pub trait ObjectClient {
    /// Creates a bucket if it does not exist.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store rejects the request.
    fn ensure_bucket(&self, bucket: &str) -> crate::Result<()>;

    /// Uploads `length` bytes read from `reader` as an object.
    ///
    /// The client must consume exactly `length` bytes.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store rejects the request.
    fn put(&self, bucket: &str, key: &str, length: u64, reader: &mut dyn Read)
        -> crate::Result<()>;

    /// Streams an object's payload into `writer`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the object is absent or the store rejects
    /// the request.
    fn get(&self, bucket: &str, key: &str, writer: &mut dyn Write) -> crate::Result<()>;

    /// Deletes an object.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the object is absent or the store rejects
    /// the request.
    fn delete(&self, bucket: &str, key: &str) -> crate::Result<()>;
}

/// Digest-addressed view over an [`ObjectClient`].
///
/// Bucket name = first hex characters of the digest, key = the rest.
pub(crate) struct ObjectStore<'a, S: ObjectClient> {
    client: &'a S,
}

impl<'a, S: ObjectClient> ObjectStore<'a, S> {
    pub fn new(client: &'a S) -> Self {
        Self { client }
    }

    pub fn ensure_bucket(&self, digest: &SegmentDigest) -> crate::Result<()> {
        self.client.ensure_bucket(&digest.bucket())
    }

    pub fn put(
        &self,
        digest: &SegmentDigest,
        length: u64,
        reader: &mut dyn Read,
    ) -> crate::Result<()> {
        log::trace!("Uploading segment {digest} ({length} bytes on the wire)");

        let mut limited = reader.take(length);
        self.client
            .put(&digest.bucket(), &digest.object_key(), length, &mut limited)
    }

    pub fn get(&self, digest: &SegmentDigest, writer: &mut dyn Write) -> crate::Result<()> {
        log::trace!("Downloading segment {digest}");

        self.client
            .get(&digest.bucket(), &digest.object_key(), writer)
    }

    pub fn delete(&self, digest: &SegmentDigest) -> crate::Result<()> {
        log::trace!("Deleting segment {digest}");

        self.client.delete(&digest.bucket(), &digest.object_key())
    }
}
