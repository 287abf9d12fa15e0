// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use sha2::{Digest, Sha256};

/// Raw digest width in bytes
pub const DIGEST_RAW_LEN: usize = 32;

/// Digest width as lowercase hex
pub const DIGEST_HEX_LEN: usize = DIGEST_RAW_LEN * 2;

/// Leading hex characters that form the bucket name
pub const BUCKET_HEX_LEN: usize = 3;

/// Content digest identifying a segment.
///
/// Two segments with the same digest are considered identical across
/// the entire namespace; that is what deduplication hinges on.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SegmentDigest([u8; DIGEST_RAW_LEN]);

impl SegmentDigest {
    /// Hashes the given bytes.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    pub(crate) fn from_raw(raw: [u8; DIGEST_RAW_LEN]) -> Self {
        Self(raw)
    }

    /// Parses a digest from its lowercase hex form.
    ///
    /// Returns `None` if the input is not exactly [`DIGEST_HEX_LEN`]
    /// hex characters.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != DIGEST_HEX_LEN {
            return None;
        }

        let mut raw = [0; DIGEST_RAW_LEN];

        for (idx, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
            let pair = std::str::from_utf8(chunk).ok()?;
            raw[idx] = u8::from_str_radix(pair, 16).ok()?;
        }

        Some(Self(raw))
    }

    /// Formats the digest as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        use std::fmt::Write;

        let mut s = String::with_capacity(DIGEST_HEX_LEN);

        for byte in self.0 {
            write!(s, "{byte:02x}").expect("in-memory write should not fail");
        }

        s
    }

    /// Returns the object-store bucket name (first hex characters).
    #[must_use]
    pub fn bucket(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(BUCKET_HEX_LEN);
        hex
    }

    /// Returns the object-store key (remaining hex characters).
    #[must_use]
    pub fn object_key(&self) -> String {
        self.to_hex().split_off(BUCKET_HEX_LEN)
    }
}

impl std::fmt::Display for SegmentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Debug for SegmentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_hex_round_trip() {
        let digest = SegmentDigest::of(b"hello world");
        let hex = digest.to_hex();

        assert_eq!(DIGEST_HEX_LEN, hex.len());
        assert_eq!(Some(digest), SegmentDigest::from_hex(&hex));
    }

    #[test]
    fn digest_bucket_key_split() {
        let digest = SegmentDigest::of(b"hello world");

        assert_eq!(BUCKET_HEX_LEN, digest.bucket().len());
        assert_eq!(DIGEST_HEX_LEN - BUCKET_HEX_LEN, digest.object_key().len());
        assert_eq!(
            digest.to_hex(),
            format!("{}{}", digest.bucket(), digest.object_key())
        );
    }

    #[test]
    fn digest_rejects_bad_hex() {
        assert!(SegmentDigest::from_hex("deadbeef").is_none());
        assert!(SegmentDigest::from_hex(&"zz".repeat(DIGEST_RAW_LEN)).is_none());
    }
}
