//! Parallel front end for bzip2 compression.
//!
//! Compresses, decompresses or tests many files at once, one job per file, with
//! at most `--cores` jobs running. Each job streams its file through the codec on
//! a pair of threads joined by a bounded in-memory pipe, so memory use does not
//! grow with file size.
//!
//! Basic usage to compress a file is as follows:
//!
//! `$> bzip2-cli test.txt`
//!
//! This will compress the file and create the file test.txt.bz2.
//! The original file will be deleted.
//!
pub mod compression;
pub mod error;
pub mod pipeline;
pub mod tools;
