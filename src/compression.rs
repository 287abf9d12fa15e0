use flate2::Compression;
use std::io::{Read, Write};

/// Streams exactly `n` uncompressed bytes from `src`, writing the
/// deflated output to `dst`. Returns the compressed length.
pub(crate) fn deflate<R: Read, W: Write>(src: R, dst: &mut W, n: u64) -> crate::Result<u64> {
    let mut encoder = flate2::read::DeflateEncoder::new(src.take(n), Compression::default());

    std::io::copy(&mut encoder, dst).map_err(|e| {
        if is_corrupt_stream(&e) {
            crate::Error::Compress
        } else {
            crate::Error::Io(e)
        }
    })
}

/// Streams the full inflated output of `src` into `dst`. Returns the
/// uncompressed length.
pub(crate) fn inflate<R: Read, W: Write>(src: R, dst: &mut W) -> crate::Result<u64> {
    let mut decoder = flate2::read::DeflateDecoder::new(src);

    std::io::copy(&mut decoder, dst).map_err(|e| {
        if is_corrupt_stream(&e) {
            crate::Error::Decompress
        } else {
            crate::Error::Io(e)
        }
    })
}

/// Wraps a writer so that compressed bytes written into it come out
/// inflated on the other side. Used as the download sink for
/// compressed segments; call `finish` to flush the trailing block.
pub(crate) fn decompress_sink<W: Write>(dst: W) -> flate2::write::DeflateDecoder<W> {
    flate2::write::DeflateDecoder::new(dst)
}

pub(crate) fn is_corrupt_stream(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData
    )
}
