//! One input path end to end: validate, resolve the output, run the bridge,
//! report, then remove the original.
//!
//! A failure in any step ends the job with an error; nothing is retried and other
//! jobs are not affected.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use log::{debug, warn};

use crate::compression::codec::decode_stream;
use crate::error::{BzError, BzResult};
use crate::pipeline::bridge::{bridge, Direction, TransferResult};
use crate::tools::cli::{BzOpts, Mode};
use crate::tools::naming::{self, Destination, ResolvedPaths, Source};
use crate::tools::report::RunContext;

/// The unit of work handed to the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobSpec {
    pub input: Source,
    pub mode: Mode,
}

impl JobSpec {
    pub fn new(input: Source, mode: Mode) -> Self {
        Self { input, mode }
    }

    /// Name used in reports and diagnostics.
    pub fn name(&self) -> String {
        match &self.input {
            Source::Stdin => "(stdin)".to_string(),
            Source::File(path) => path.display().to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Validating,
    Resolving,
    Transferring,
    Reporting,
    CleaningUp,
    Done,
    Failed,
}

pub(crate) fn enter(name: &str, state: JobState) {
    debug!("{}: {:?}", name, state);
}

/// Run one job to completion.
pub fn run_job(spec: &JobSpec, opts: &BzOpts, ctx: &RunContext) -> BzResult<()> {
    let name = spec.name();

    enter(&name, JobState::Validating);
    validate(spec, opts)?;

    if spec.mode == Mode::Test {
        enter(&name, JobState::Transferring);
        test_integrity(&spec.input)?;
        enter(&name, JobState::Reporting);
        if opts.is_verbose() {
            ctx.write_line(format!("{}: OK", name));
        }
        enter(&name, JobState::Done);
        return Ok(());
    }

    enter(&name, JobState::Resolving);
    let paths = resolve(spec, opts, ctx)?;

    enter(&name, JobState::Transferring);
    let direction = if spec.mode == Mode::Unzip {
        Direction::Decode
    } else {
        Direction::Encode(opts.block_size)
    };
    let counts = transfer(&paths, direction)?;

    enter(&name, JobState::Reporting);
    if opts.is_verbose() {
        match spec.mode {
            Mode::Zip => ctx.write_line(format_summary(&name, &counts)),
            _ if !opts.to_stdout() => ctx.write_line(format!("{}: done", name)),
            _ => {}
        }
    }

    enter(&name, JobState::CleaningUp);
    remove_original(&paths, opts)?;

    enter(&name, JobState::Done);
    Ok(())
}

/// Checks that depend on the individual input.
fn validate(spec: &JobSpec, opts: &BzOpts) -> BzResult<()> {
    match &spec.input {
        Source::Stdin => {
            if spec.mode == Mode::Test {
                return Ok(());
            }
            if !opts.to_stdout() {
                return Err(BzError::path("reading from stdin, can write only to stdout"));
            }
            if opts.suffix_set {
                return Err(BzError::path("reading from stdin, suffix not needed"));
            }
            Ok(())
        }
        Source::File(path) => {
            if fs::metadata(path)?.is_dir() {
                return Err(BzError::path(format!("{} is a directory", path.display())));
            }
            Ok(())
        }
    }
}

fn resolve(spec: &JobSpec, opts: &BzOpts, ctx: &RunContext) -> BzResult<ResolvedPaths> {
    let path = match (&spec.input, opts.to_stdout()) {
        (input, true) => {
            return Ok(ResolvedPaths {
                input: input.clone(),
                output: Destination::Stdout,
            })
        }
        (Source::File(path), false) => path,
        (Source::Stdin, false) => {
            return Err(BzError::path("reading from stdin, can write only to stdout"))
        }
    };
    let (paths, derived) = naming::resolve_file(
        path,
        spec.mode == Mode::Unzip,
        &opts.suffix,
        opts.force_overwrite,
    )?;
    if derived.guessed {
        ctx.write_line(format!(
            "file {} doesn't have suffix .{}\ncan't guess original name for {} -- using {}",
            path.display(),
            opts.suffix,
            path.display(),
            derived.path.display()
        ));
    }
    Ok(paths)
}

fn open_source(input: &Source) -> io::Result<Box<dyn Read + Send>> {
    Ok(match input {
        Source::Stdin => Box::new(io::stdin()),
        Source::File(path) => Box::new(File::open(path)?),
    })
}

fn transfer(paths: &ResolvedPaths, direction: Direction) -> BzResult<TransferResult> {
    let source = open_source(&paths.input)?;
    match &paths.output {
        // Holding the lock for the whole transfer keeps concurrent `-c` jobs
        // from interleaving their streams.
        Destination::Stdout => Ok(bridge(source, io::stdout().lock(), direction)?),
        Destination::File {
            path,
            replaced_existing,
        } => {
            if *replaced_existing {
                debug!("{} replaces an existing file", path.display());
            }
            let out = OpenOptions::new().write(true).create_new(true).open(path)?;
            into_file(source, out, path, direction)
        }
    }
}

fn into_file<W: Write>(
    source: Box<dyn Read + Send>,
    out: W,
    path: &Path,
    direction: Direction,
) -> BzResult<TransferResult> {
    bridge(source, out, direction).map_err(|e| {
        discard_partial(path);
        e.into()
    })
}

/// An output file from a failed transfer is incomplete; do not leave it behind.
fn discard_partial(path: &Path) {
    debug!("removing incomplete {}", path.display());
    if let Err(e) = fs::remove_file(path) {
        warn!("could not remove incomplete {}: {}", path.display(), e);
    }
}

fn remove_original(paths: &ResolvedPaths, opts: &BzOpts) -> BzResult<()> {
    if opts.keep_input_files {
        return Ok(());
    }
    if let (Source::File(input), Destination::File { .. }) = (&paths.input, &paths.output) {
        debug!("removing original {}", input.display());
        fs::remove_file(input)?;
    }
    Ok(())
}

/// Decode the whole input into a discard sink.
fn test_integrity(input: &Source) -> BzResult<u64> {
    let source = open_source(input)?;
    let mut decoder = decode_stream(source);
    io::copy(&mut decoder, &mut io::sink()).map_err(BzError::Codec)
}

/// The `-v` line for a compressed file.
pub fn format_summary(name: &str, counts: &TransferResult) -> String {
    let ratio = counts.bytes_in as f64 / counts.bytes_out as f64;
    format!(
        "{}: {:6.3}:1, {:6.3} bits/byte, {:5.2}% saved, {} in, {} out.",
        name,
        ratio,
        8.0 / ratio,
        100.0 * (1.0 - 1.0 / ratio),
        counts.bytes_in,
        counts.bytes_out
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tools::cli::Output;
    use crate::tools::report::SharedBuffer;
    use std::path::PathBuf;

    fn ctx() -> (RunContext, SharedBuffer) {
        let buf = SharedBuffer::new();
        (RunContext::new(Box::new(buf.clone())), buf)
    }

    fn opts() -> BzOpts {
        BzOpts::new(vec![])
    }

    fn job(path: &Path, mode: Mode) -> JobSpec {
        JobSpec::new(Source::File(path.to_path_buf()), mode)
    }

    #[test]
    fn summary_format() {
        let line = format_summary(
            "r.txt",
            &TransferResult {
                bytes_in: 1000,
                bytes_out: 250,
            },
        );
        assert_eq!(
            line,
            "r.txt:  4.000:1,  2.000 bits/byte, 75.00% saved, 1000 in, 250 out."
        );
    }

    #[test]
    fn compress_replaces_original() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("report.txt");
        let data = b"hello world".repeat(1000);
        fs::write(&input, &data).unwrap();
        let (ctx, buf) = ctx();
        let mut o = opts();
        o.verbose = crate::tools::cli::Verbosity::Info;

        run_job(&job(&input, Mode::Zip), &o, &ctx).unwrap();
        assert!(!input.exists());
        let packed = dir.path().join("report.txt.bz2");
        assert!(packed.exists());
        assert!(buf.contents().starts_with(&format!("{}: ", input.display())));
        assert!(buf.contents().contains("11000 in"));

        let mut o = opts();
        o.op_mode = Mode::Unzip;
        o.keep_input_files = true;
        run_job(&job(&packed, Mode::Unzip), &o, &ctx).unwrap();
        assert_eq!(fs::read(&input).unwrap(), data);
        assert!(packed.exists());
        assert!(!ctx.failed());
    }

    #[test]
    fn compress_refuses_suffixed_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.bz2");
        fs::write(&input, b"abc").unwrap();
        let (ctx, _) = ctx();
        let err = run_job(&job(&input, Mode::Zip), &opts(), &ctx).unwrap_err();
        assert!(matches!(err, BzError::Path(_)));
        assert_eq!(fs::read(&input).unwrap(), b"abc");
        assert!(!dir.path().join("a.bz2.bz2").exists());
    }

    #[test]
    fn decompress_without_suffix_warns_and_writes_out() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("data");
        fs::write(&raw, b"payload").unwrap();
        let (ctx, buf) = ctx();
        let mut o = opts();
        o.keep_input_files = true;
        run_job(&job(&raw, Mode::Zip), &o, &ctx).unwrap();

        let odd = dir.path().join("data.packed");
        fs::rename(dir.path().join("data.bz2"), &odd).unwrap();
        run_job(&job(&odd, Mode::Unzip), &o, &ctx).unwrap();

        assert_eq!(fs::read(dir.path().join("data.packed.out")).unwrap(), b"payload");
        assert!(odd.exists());
        assert!(buf.contents().contains("doesn't have suffix .bz2"));
    }

    #[test]
    fn existing_output_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("f.txt");
        let output = dir.path().join("f.txt.bz2");
        fs::write(&input, b"fresh").unwrap();
        fs::write(&output, b"stale").unwrap();
        let (ctx, _) = ctx();

        let err = run_job(&job(&input, Mode::Zip), &opts(), &ctx).unwrap_err();
        assert!(matches!(err, BzError::Path(_)));
        assert_eq!(fs::read(&output).unwrap(), b"stale");
        assert_eq!(fs::read(&input).unwrap(), b"fresh");

        let mut o = opts();
        o.force_overwrite = true;
        run_job(&job(&input, Mode::Zip), &o, &ctx).unwrap();
        assert!(!input.exists());
        assert_ne!(fs::read(&output).unwrap(), b"stale");
    }

    #[test]
    fn corrupt_decompress_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.txt.bz2");
        fs::write(&bad, b"BZh9 this is not a real stream").unwrap();
        let (ctx, _) = ctx();
        let err = run_job(&job(&bad, Mode::Unzip), &opts(), &ctx).unwrap_err();
        assert!(matches!(err, BzError::Codec(_)));
        assert!(!dir.path().join("bad.txt").exists());
        assert!(bad.exists());
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_write_discards_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("w.txt.bz2");
        fs::write(&output, b"").unwrap();
        let data = b"sink goes away ".repeat(10_000);

        let err = into_file(
            Box::new(io::Cursor::new(data)),
            BrokenSink,
            &output,
            Direction::Encode(9),
        )
        .unwrap_err();
        assert!(matches!(err, BzError::Io(_)));
        assert!(!output.exists());
    }

    #[test]
    fn removing_a_missing_original_fails() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ResolvedPaths {
            input: Source::File(dir.path().join("vanished.txt")),
            output: Destination::File {
                path: dir.path().join("vanished.txt.bz2"),
                replaced_existing: false,
            },
        };
        let err = remove_original(&paths, &opts()).unwrap_err();
        assert!(matches!(err, BzError::Io(_)));

        let mut o = opts();
        o.keep_input_files = true;
        assert!(remove_original(&paths, &o).is_ok());
    }

    // The writer unlinks the fifo before closing it, so the transfer completes
    // and only the final removal of the input fails.
    #[cfg(unix)]
    #[test]
    fn cleanup_failure_fails_the_job() {
        use crate::tools::dispatch::Dispatcher;
        use std::process::Command;

        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("feed.txt");
        let made = Command::new("mkfifo").arg(&fifo).status().unwrap();
        assert!(made.success());

        let (ctx, buf) = ctx();
        let o = opts();
        std::thread::scope(|s| {
            let writer = {
                let fifo = fifo.clone();
                s.spawn(move || {
                    let mut pipe = OpenOptions::new().write(true).open(&fifo).unwrap();
                    pipe.write_all(&b"through a fifo ".repeat(500)).unwrap();
                    fs::remove_file(&fifo).unwrap();
                })
            };
            Dispatcher::new(&o, &ctx).run(vec![Ok(Source::File(fifo.clone()))]);
            writer.join().unwrap();
        });

        assert!(ctx.failed());
        assert_eq!(ctx.exit_code(), 1);
        assert!(buf.contents().contains(&format!("{}: ", fifo.display())));
        let packed = dir.path().join("feed.txt.bz2");
        let mut restored = Vec::new();
        decode_stream(File::open(&packed).unwrap())
            .read_to_end(&mut restored)
            .unwrap();
        assert_eq!(restored, b"through a fifo ".repeat(500));
    }

    #[test]
    fn test_mode_reports_ok_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("t.txt");
        fs::write(&input, b"check me").unwrap();
        let (ctx, buf) = ctx();
        run_job(&job(&input, Mode::Zip), &opts(), &ctx).unwrap();
        let packed = dir.path().join("t.txt.bz2");

        let mut o = opts();
        o.op_mode = Mode::Test;
        o.verbose = crate::tools::cli::Verbosity::Info;
        run_job(&job(&packed, Mode::Test), &o, &ctx).unwrap();
        assert!(buf.contents().contains(&format!("{}: OK", packed.display())));
        assert!(packed.exists());
        assert!(!input.exists());

        let mut bytes = fs::read(&packed).unwrap();
        bytes.truncate(bytes.len() - 8);
        fs::write(&packed, bytes).unwrap();
        let err = run_job(&job(&packed, Mode::Test), &o, &ctx).unwrap_err();
        assert!(matches!(err, BzError::Codec(_)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn directories_and_missing_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = ctx();
        let err = run_job(&job(dir.path(), Mode::Zip), &opts(), &ctx).unwrap_err();
        assert!(matches!(err, BzError::Path(_)));
        let err = run_job(&job(&dir.path().join("gone"), Mode::Zip), &opts(), &ctx).unwrap_err();
        assert!(matches!(err, BzError::Io(_)));
    }

    #[test]
    fn stdin_needs_stdout() {
        let (ctx, _) = ctx();
        let spec = JobSpec::new(Source::Stdin, Mode::Zip);
        assert!(run_job(&spec, &opts(), &ctx).is_err());

        let mut o = opts();
        o.output = Output::Stdout;
        o.suffix_set = true;
        assert!(matches!(validate(&spec, &o), Err(BzError::Path(_))));
        o.suffix_set = false;
        assert!(validate(&spec, &o).is_ok());
    }

    #[test]
    fn name_of_stdin() {
        assert_eq!(JobSpec::new(Source::Stdin, Mode::Zip).name(), "(stdin)");
        let spec = JobSpec::new(Source::File(PathBuf::from("a/b")), Mode::Zip);
        assert_eq!(spec.name(), "a/b");
    }
}
