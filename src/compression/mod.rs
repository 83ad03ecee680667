//! The compression module connects the bzip2 codec to files.
//!
//! - codec: Streaming encoder/decoder constructors from the `bzip2` crate.
//! - job: One input path from validation to cleanup. Compression and decompression
//!   go through the stream bridge; integrity tests decode straight into a sink.
//!
//! Compression writes `<file>.<suffix>` and removes `<file>` unless -k or -c is
//! given. Decompression reverses the naming, or appends `.out` when the suffix is
//! missing.

pub mod codec;
pub mod job;
