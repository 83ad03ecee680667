//! The tools module holds everything around the codec for the parallel bzip2 command.
//!
//! The tools are:
//! - cli: Command line options and their validation.
//! - naming: Output names and the overwrite policy.
//! - report: Run context with the shared failure flag and diagnostic lock.
//! - walker: Expansion of arguments (and directories with -r) into input files.
//! - dispatch: Bounded parallel execution of per-file jobs.
//!
pub mod cli;
pub mod dispatch;
pub mod naming;
pub mod report;
pub mod walker;
