//Enable more cargo lint tests
#![warn(rust_2018_idioms)]
#![warn(clippy::disallowed_types)]

use std::process::exit;

use clap::Parser;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use bzip2_cli::tools::cli::{normalize_args, print_usage, Args, BzOpts, Verbosity};
use bzip2_cli::tools::dispatch::Dispatcher;
use bzip2_cli::tools::report::RunContext;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn main() {
    let args = Args::parse_from(normalize_args(std::env::args_os()));

    // Log to stderr: stdout may be carrying compressed data.
    if let Err(e) = TermLogger::init(
        Verbosity::from_count(args.verbose).level_filter(),
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("bzip2-cli: logging unavailable: {}", e);
    }

    let options = match BzOpts::from_args(args, atty::is(atty::Stream::Stdout)) {
        Ok(options) => options,
        Err(e) => {
            if e.is_usage() {
                print_usage();
                eprintln!();
            }
            eprintln!("bzip2-cli: check args: {}", e);
            exit(1);
        }
    };
    options.log_summary();

    //----- Run every job, then report the aggregate outcome
    let ctx = RunContext::stderr();
    let code = Dispatcher::new(&options, &ctx).run_all();
    exit(code);
}
