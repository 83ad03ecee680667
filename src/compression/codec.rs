//! Adapter around the bzip2 block codec.
//!
//! The rest of the crate only sees a streaming encoder that reports byte counts and
//! a streaming decoder; block layout stays inside the `bzip2` crate.

use std::io::{Read, Write};

use bzip2::read::MultiBzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;

/// Lowest and highest block size tier (100k .. 900k).
pub const MIN_LEVEL: u32 = 1;
pub const MAX_LEVEL: u32 = 9;
pub const DEFAULT_LEVEL: u32 = 9;

/// Encoder writing compressed bytes into `out`. After `try_finish`, `total_in` and
/// `total_out` hold the final raw and compressed byte counts.
pub fn encode_stream<W: Write>(out: W, level: u32) -> BzEncoder<W> {
    BzEncoder::new(out, Compression::new(level.clamp(MIN_LEVEL, MAX_LEVEL)))
}

/// Decoder reading compressed bytes from `input`. Concatenated streams (as written
/// by `-c` over several files) decode as one.
pub fn decode_stream<R: Read>(input: R) -> MultiBzDecoder<R> {
    MultiBzDecoder::new(input)
}
