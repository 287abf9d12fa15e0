// Copyright (c) 2024-present, the tierfs authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::digest::SegmentDigest;
use sha2::{Digest, Sha256};

/// Rolling-hash failure
#[derive(Debug)]
pub struct SegmenterError(pub String);

/// Generic rolling hash trait
///
/// The hash is computed over a sliding window of recent input bytes;
/// the segmenter inspects the fingerprint after every byte to find
/// content-defined cut points.
pub trait RollingHash {
    /// Clears all window state.
    fn reset(&mut self);

    /// Pushes a byte into the window and returns the updated fingerprint.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the hash implementation fails internally.
    fn push(&mut self, byte: u8) -> Result<u64, SegmenterError>;
}

/// A segment closed by the segmenter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClosedSegment {
    /// Offset of the first byte, cumulative over the input stream
    pub offset: u64,

    /// Uncompressed length in bytes
    pub length: u32,

    /// Content digest of the segment bytes
    pub digest: SegmentDigest,
}

/// Drives a rolling hash across a byte stream and yields segments.
///
/// Cut points fire when the fingerprint matches modulo the target
/// length, constrained to `avg ± avg/16`. Bytes past the last cut form
/// a residual; the caller decides whether to close it as a final
/// segment or keep it for later.
pub(crate) struct Segmenter<H: RollingHash> {
    hasher: H,

    window: usize,
    avg: u64,
    min: usize,
    max: usize,

    seg_len: usize,
    fingerprint: u64,
    seg_hash: Sha256,

    /// Start offset of the in-progress segment
    offset: u64,
}

impl<H: RollingHash> Segmenter<H> {
    pub fn new(mut hasher: H, avg_seg_size: usize, window: usize) -> Self {
        hasher.reset();

        Self {
            hasher,
            window,
            avg: avg_seg_size as u64,
            min: avg_seg_size - avg_seg_size / 16,
            max: avg_seg_size + avg_seg_size / 16,
            seg_len: 0,
            fingerprint: 0,
            seg_hash: Sha256::new(),
            offset: 0,
        }
    }

    /// Feeds a chunk of input, returning segments closed within it.
    pub fn feed(&mut self, chunk: &[u8]) -> crate::Result<Vec<ClosedSegment>> {
        let mut closed = Vec::new();
        let mut start = 0;

        for (idx, &byte) in chunk.iter().enumerate() {
            self.fingerprint = self.hasher.push(byte)?;
            self.seg_len += 1;

            if self.is_cut_point() {
                self.seg_hash.update(&chunk[start..=idx]);
                closed.push(self.close());
                start = idx + 1;
            }
        }

        self.seg_hash.update(&chunk[start..]);

        Ok(closed)
    }

    fn is_cut_point(&self) -> bool {
        if self.seg_len >= self.max {
            return true;
        }

        self.seg_len >= self.min
            && self.seg_len >= self.window
            && self.fingerprint % self.avg == self.avg - 1
    }

    fn close(&mut self) -> ClosedSegment {
        let digest = SegmentDigest::from_raw(self.seg_hash.finalize_reset().into());

        // NOTE: Truncation is okay, seg_len is bounded by max
        #[allow(clippy::cast_possible_truncation)]
        let segment = ClosedSegment {
            offset: self.offset,
            length: self.seg_len as u32,
            digest,
        };

        self.offset += u64::from(segment.length);
        self.seg_len = 0;
        self.fingerprint = 0;
        self.hasher.reset();

        segment
    }

    /// Closes the in-progress bytes as one final segment.
    pub fn take_residual(&mut self) -> Option<ClosedSegment> {
        (self.seg_len > 0).then(|| self.close())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RabinHash;

    const AVG: usize = 64;
    const WINDOW: usize = 16;

    fn segment_all(input: &[u8]) -> (Vec<ClosedSegment>, Option<ClosedSegment>) {
        let mut segmenter = Segmenter::new(RabinHash::new(WINDOW), AVG, WINDOW);
        let closed = segmenter.feed(input).expect("segmenting should work");
        (closed, segmenter.take_residual())
    }

    #[test]
    fn segmenter_empty_input() {
        let (closed, residual) = segment_all(&[]);
        assert!(closed.is_empty());
        assert!(residual.is_none());
    }

    #[test]
    fn segmenter_respects_length_bounds() {
        let input = (0..u8::MAX).cycle().take(10_000).collect::<Vec<_>>();
        let (closed, _) = segment_all(&input);

        assert!(!closed.is_empty());

        for segment in &closed {
            assert!((segment.length as usize) >= AVG - AVG / 16);
            assert!((segment.length as usize) <= AVG + AVG / 16);
        }
    }

    #[test]
    fn segmenter_offsets_are_cumulative() {
        let input = (0..u8::MAX).cycle().take(1_000).collect::<Vec<_>>();
        let (closed, residual) = segment_all(&input);

        let mut expected = 0;

        for segment in closed.iter().chain(residual.iter()) {
            assert_eq!(expected, segment.offset);
            expected += u64::from(segment.length);
        }

        assert_eq!(input.len() as u64, expected);
    }

    #[test]
    fn segmenter_is_deterministic() {
        let input = (7..).map(|x: u32| (x * 31) as u8).take(5_000).collect::<Vec<_>>();

        let (a, a_rest) = segment_all(&input);
        let (b, b_rest) = segment_all(&input);

        assert_eq!(a, b);
        assert_eq!(a_rest, b_rest);
    }

    #[test]
    fn segmenter_digest_matches_content() {
        let input = (0..u8::MAX).cycle().take(2_000).collect::<Vec<_>>();
        let (closed, _) = segment_all(&input);

        let first = closed.first().expect("should have closed a segment");
        let body = &input[..first.length as usize];

        assert_eq!(SegmentDigest::of(body), first.digest);
    }

    #[test]
    fn segmenter_feed_boundaries_do_not_matter() {
        let input = (3..).map(|x: u32| (x * 17) as u8).take(4_000).collect::<Vec<_>>();

        let (whole, whole_rest) = segment_all(&input);

        let mut segmenter = Segmenter::new(RabinHash::new(WINDOW), AVG, WINDOW);
        let mut pieces = Vec::new();

        for chunk in input.chunks(7) {
            pieces.extend(segmenter.feed(chunk).expect("segmenting should work"));
        }

        assert_eq!(whole, pieces);
        assert_eq!(whole_rest, segmenter.take_residual());
    }
}
