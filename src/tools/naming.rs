//! Output naming and the overwrite policy.
//!
//! Nothing here reads or writes file contents. The only I/O is an existence check
//! on the destination and, with `force`, removal of the file in the way.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{BzError, BzResult};

/// Where a job reads from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Stdin,
    File(PathBuf),
}

/// Where a job writes to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    Stdout,
    File {
        path: PathBuf,
        /// An existing file was removed to make room (`-f`).
        replaced_existing: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub input: Source,
    pub output: Destination,
}

/// An output name derived from an input name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedName {
    pub path: PathBuf,
    /// The input lacked the suffix and `.out` was appended instead.
    pub guessed: bool,
}

/// `<input>.<suffix>`, unless the input already carries the suffix.
pub fn compressed_name(input: &Path, suffix: &str) -> BzResult<DerivedName> {
    if has_suffix(input, suffix) {
        return Err(BzError::path(format!(
            "input file {} already has .{} suffix",
            input.display(),
            suffix
        )));
    }
    Ok(DerivedName {
        path: append_extension(input, suffix),
        guessed: false,
    })
}

/// Strip `.<suffix>` from the input. Without the suffix, fall back to
/// `<input>.out` and flag the name as guessed.
pub fn decompressed_name(input: &Path, suffix: &str) -> BzResult<DerivedName> {
    let ext = format!(".{}", suffix);
    match input.file_name().and_then(|n| strip_suffix(n, &ext)) {
        Some(stem) if stem.is_empty() => Err(BzError::path(format!(
            "can't strip suffix .{} from file {}",
            suffix,
            input.display()
        ))),
        Some(stem) => Ok(DerivedName {
            path: input.with_file_name(stem),
            guessed: false,
        }),
        None => Ok(DerivedName {
            path: append_extension(input, "out"),
            guessed: true,
        }),
    }
}

fn has_suffix(input: &Path, suffix: &str) -> bool {
    input
        .file_name()
        .and_then(|n| strip_suffix(n, &format!(".{}", suffix)))
        .is_some()
}

/// Compare raw bytes so names that are not valid UTF-8 still match.
#[cfg(unix)]
fn strip_suffix(name: &OsStr, ext: &str) -> Option<OsString> {
    use std::os::unix::ffi::OsStrExt;

    name.as_bytes()
        .strip_suffix(ext.as_bytes())
        .map(|stem| OsStr::from_bytes(stem).to_owned())
}

#[cfg(not(unix))]
fn strip_suffix(name: &OsStr, ext: &str) -> Option<OsString> {
    name.to_string_lossy().strip_suffix(ext).map(OsString::from)
}

fn append_extension(input: &Path, ext: &str) -> PathBuf {
    let mut name: OsString = input.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Make sure `output` may be written. Returns whether an existing file was
/// removed to make room.
pub fn claim_destination(output: &Path, force: bool) -> BzResult<bool> {
    let meta = match fs::symlink_metadata(output) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if meta.is_dir() {
        return Err(BzError::path(format!(
            "output file {} is a directory",
            output.display()
        )));
    }
    if !force {
        return Err(BzError::path(format!(
            "output file {} exists. use -f to overwrite",
            output.display()
        )));
    }
    debug!("removing existing {}", output.display());
    fs::remove_file(output)?;
    Ok(true)
}

/// Full resolution for one file input: derive the name, then apply the overwrite
/// policy. Returns the derived name alongside so the caller can warn on guesses.
pub fn resolve_file(
    input: &Path,
    unzip: bool,
    suffix: &str,
    force: bool,
) -> BzResult<(ResolvedPaths, DerivedName)> {
    let derived = if unzip {
        decompressed_name(input, suffix)?
    } else {
        compressed_name(input, suffix)?
    };
    if derived.path == input {
        return Err(BzError::path(format!(
            "output would overwrite input {}",
            input.display()
        )));
    }
    let replaced_existing = claim_destination(&derived.path, force)?;
    let paths = ResolvedPaths {
        input: Source::File(input.to_path_buf()),
        output: Destination::File {
            path: derived.path.clone(),
            replaced_existing,
        },
    };
    Ok((paths, derived))
}
