//! Byte-stream compressor
//!
//! Gzips fetched image bytes. Output is deterministic for identical input
//! (the gzip header carries no timestamp), which keeps re-uploads under the
//! same derived key byte-identical.

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Write};

#[derive(Clone)]
pub struct Compressor {
    level: Compression,
}

impl Compressor {
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }

    /// Compress a full in-memory buffer. Only fails on writer I/O errors.
    pub fn compress(&self, input: &[u8]) -> io::Result<Bytes> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(input.len() / 2), self.level);
        encoder.write_all(input)?;
        Ok(Bytes::from(encoder.finish()?))
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn produces_a_gzip_stream() {
        let out = Compressor::new().compress(b"some image bytes").unwrap();
        assert_eq!(&out[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn output_is_deterministic_for_identical_input() {
        let compressor = Compressor::new();
        let a = compressor.compress(b"pixel data").unwrap();
        let b = compressor.compress(b"pixel data").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn compressed_stream_decodes_to_the_original() {
        let input = b"not actually a png, but the compressor does not care";
        let out = Compressor::new().compress(input).unwrap();

        let mut decoded = Vec::new();
        GzDecoder::new(&out[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, input);
    }
}
