use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use log::{info, warn, LevelFilter};

use crate::compression::codec::{DEFAULT_LEVEL, MAX_LEVEL, MIN_LEVEL};
use crate::error::{BzError, BzResult};

/// Suffix used for compressed names when `-S` is not given.
pub const DEFAULT_SUFFIX: &str = "bz2";
/// Upper bound accepted for `--cores`.
pub const MAX_CORES: usize = 32;

/// Verbosity of user information
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Warnings,
    Info,
    Debug,
    Trace,
}

impl Verbosity {
    /// One step per `-v`.
    pub fn from_count(count: u64) -> Self {
        match count {
            0 => Verbosity::Warnings,
            1 => Verbosity::Info,
            2 => Verbosity::Debug,
            _ => Verbosity::Trace,
        }
    }

    pub fn level_filter(self) -> LevelFilter {
        match self {
            Verbosity::Warnings => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
            Verbosity::Trace => LevelFilter::Trace,
        }
    }
}

/// Zip, Unzip, Test
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Zip,
    Unzip,
    Test,
}
impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Define the two output channels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Output {
    File,
    Stdout,
}
impl Display for Output {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Command line as clap sees it, after `normalize_args`.
#[derive(Parser, Debug)]
#[clap(
    name = "bzip2-cli",
    version,
    about = "Compress or uncompress FILEs in parallel (by default, compress FILEs in-place).",
    after_help = "With no FILE, or when FILE is -, read standard input."
)]
pub struct Args {
    /// Files or directories to process (`-` is standard input)
    #[clap(value_name = "FILE", parse(from_os_str))]
    pub files: Vec<PathBuf>,

    /// Write on standard output, keep original files unchanged
    #[clap(short = 'c', long = "stdout")]
    pub stdout: bool,

    /// Decompress; see also -c and -k
    #[clap(short = 'd', long = "decompress")]
    pub decompress: bool,

    /// Compress file(s) (the default)
    #[clap(short = 'z', long = "compress")]
    pub compress: bool,

    /// Force overwrite of output file
    #[clap(short = 'f', long = "force")]
    pub force: bool,

    /// Keep original files unchanged
    #[clap(short = 'k', long = "keep")]
    pub keep: bool,

    /// Operate recursively on directories
    #[clap(short = 'r', long = "recursive")]
    pub recursive: bool,

    /// Test compressed file integrity
    #[clap(short = 't', long = "test")]
    pub test: bool,

    /// Be verbose (a 2nd -v gives more)
    #[clap(short = 'v', long = "verbose", parse(from_occurrences))]
    pub verbose: u64,

    /// Use less memory; accepted for backwards compatibility
    #[clap(short = 's', long = "small")]
    pub small: bool,

    /// Use provided suffix on compressed files
    #[clap(short = 'S', long = "suffix", value_name = "SUFFIX")]
    pub suffix: Option<String>,

    /// Compression level (1 = fastest, 9 = best); -1 .. -9 also work
    #[clap(short = 'l', long = "level", value_name = "1..9")]
    pub level: Option<u32>,

    /// Block size presets collected from -1 .. -9, --fast and --best
    #[clap(long = "preset", hide = true, number_of_values = 1)]
    pub presets: Vec<u32>,

    /// Number of cores to use for parallelization (default: all)
    #[clap(long = "cores", value_name = "1..32")]
    pub cores: Option<usize>,
}

/// Rewrite the classic single-dash spellings into something clap parses.
///
/// `-cores 4` becomes `--cores 4`, clusters such as `-dkv9` are split, digits
/// become level presets, and `-S`/`-l` inside a cluster take the rest of it as
/// their value. Everything after `--` is passed through untouched.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut out = Vec::new();
    let mut args = args.into_iter().map(Into::into);
    if let Some(program) = args.next() {
        out.push(program);
    }
    let mut literal = false;
    for arg in args {
        let text = match (literal, arg.to_str().map(str::to_string)) {
            (false, Some(text)) => text,
            _ => {
                out.push(arg);
                continue;
            }
        };
        match text.as_str() {
            "--" => {
                literal = true;
                out.push(arg);
            }
            "-" => out.push(arg),
            "--fast" => out.push("--preset=1".into()),
            "--best" => out.push("--preset=9".into()),
            "-cores" => out.push("--cores".into()),
            s if s.starts_with("-cores=") => out.push(format!("-{}", s).into()),
            s if s.starts_with("--") => out.push(arg),
            s if s.starts_with('-') => split_cluster(&s[1..], &mut out),
            _ => out.push(arg),
        }
    }
    out
}

fn split_cluster(body: &str, out: &mut Vec<OsString>) {
    for (i, c) in body.char_indices() {
        match c {
            '1'..='9' => out.push(format!("--preset={}", c).into()),
            'S' | 'l' => {
                out.push(format!("-{}", c).into());
                let rest = &body[i + c.len_utf8()..];
                if !rest.is_empty() {
                    out.push(rest.into());
                }
                return;
            }
            other => out.push(format!("-{}", other).into()),
        }
    }
}

/// Resolved, immutable run options shared by every job.
#[derive(Clone, Debug)]
pub struct BzOpts {
    /// Inputs as given; `-` means standard input
    pub files: Vec<PathBuf>,
    /// Compress/Decompress/Test
    pub op_mode: Mode,
    /// Location where output is sent
    pub output: Output,
    /// Silently overwrite existing files with the same name
    pub force_overwrite: bool,
    /// Don't remove input files after processing
    pub keep_input_files: bool,
    /// Descend into directory arguments
    pub recursive: bool,
    /// Verbosity of user information
    pub verbose: Verbosity,
    /// Suffix of compressed files, without the dot
    pub suffix: String,
    /// Whether `-S` was given explicitly
    pub suffix_set: bool,
    /// Block size tier, 1..9
    pub block_size: u32,
    /// Number of jobs allowed to run at once
    pub cores: usize,
}

impl BzOpts {
    /// Defaults for a plain compression run over `files`.
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            op_mode: Mode::Zip,
            output: Output::File,
            force_overwrite: false,
            keep_input_files: false,
            recursive: false,
            verbose: Verbosity::Warnings,
            suffix: DEFAULT_SUFFIX.to_string(),
            suffix_set: false,
            block_size: DEFAULT_LEVEL,
            cores: default_cores(),
        }
    }

    /// Validate the parsed flags and fold them into run options.
    ///
    /// `stdout_is_terminal` decides whether a run with no file arguments writes
    /// to standard output implicitly.
    pub fn from_args(args: Args, stdout_is_terminal: bool) -> BzResult<Self> {
        let block_size = args
            .level
            .or_else(|| args.presets.last().copied())
            .unwrap_or(DEFAULT_LEVEL);
        if !(MIN_LEVEL..=MAX_LEVEL).contains(&block_size) {
            return Err(BzError::usage(
                "invalid compression level: must be between 1 and 9",
            ));
        }

        let cores = match args.cores {
            Some(n) if (1..=MAX_CORES).contains(&n) => n,
            Some(_) => return Err(BzError::usage("invalid number of cores")),
            None => default_cores(),
        };

        let op_mode = if args.test {
            Mode::Test
        } else if args.decompress {
            Mode::Unzip
        } else {
            Mode::Zip
        };

        let mut output = if args.stdout {
            Output::Stdout
        } else {
            Output::File
        };
        let mut files = args.files;
        if files.is_empty() {
            files.push(PathBuf::from("-"));
            if !stdout_is_terminal {
                output = Output::Stdout;
            }
        }

        if output == Output::Stdout {
            if args.suffix.is_some() {
                return Err(BzError::usage("stdout set, suffix not used"));
            }
            if args.force {
                return Err(BzError::usage("stdout set, force not used"));
            }
            if args.keep {
                return Err(BzError::usage("stdout set, keep is redundant"));
            }
        }

        let suffix_set = args.suffix.is_some();
        let suffix = args.suffix.unwrap_or_else(|| DEFAULT_SUFFIX.to_string());
        if suffix.is_empty() && output == Output::File && op_mode != Mode::Test {
            return Err(BzError::usage("suffix can't be an empty string"));
        }

        Ok(Self {
            files,
            op_mode,
            output,
            force_overwrite: args.force,
            keep_input_files: args.keep,
            recursive: args.recursive,
            verbose: Verbosity::from_count(args.verbose),
            suffix,
            suffix_set,
            block_size,
            cores,
        })
    }

    /// Per-file summaries are printed from the first `-v` on.
    pub fn is_verbose(&self) -> bool {
        self.verbose >= Verbosity::Info
    }

    pub fn to_stdout(&self) -> bool {
        self.output == Output::Stdout
    }

    /// Report initialization status to the user
    pub fn log_summary(&self) {
        info!("Verbosity set to {}", log::max_level());
        info!("Operational mode set to {}", self.op_mode);
        info!("Sending output to {}", self.output);
        info!("Block size set to {}", self.block_size);
        info!("Using up to {} cores", self.cores);
        if self.force_overwrite {
            info!("Forcing file overwriting")
        };
        if self.keep_input_files {
            info!("Keeping input files")
        };
        if self.suffix_set {
            info!("Suffix set to .{}", self.suffix)
        };
    }
}

fn default_cores() -> usize {
    num_cpus::get().max(1)
}

/// Print the usage text on standard error.
pub fn print_usage() {
    if let Err(e) = Args::command().write_help(&mut io::stderr()) {
        warn!("Could not print usage: {}", e);
    }
}
