//! Command-line interface for libcoredump.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use libcoredump::dump_log::{self, LogHandler};
use libcoredump::{AllDumper, SelfDumper, limits};
use log::{LevelFilter, info, warn};

/// Top-level argument parser describing the dumper interface.
#[derive(Parser, Debug)]
#[command(name = "coredump", version, about = "Dump core of this process without killing it", long_about = None)]
struct Cli {
    /// Log every dump record, regardless of RUST_LOG.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

/// Subcommands exposed by the frontend.
#[derive(Subcommand, Debug)]
enum Command {
    /// Dump the calling thread through a forked duplicate.
    #[command(name = "self")]
    SelfDump {
        /// Raise the soft core size limit to the hard limit first.
        #[arg(long)]
        raise_limit: bool,
    },
    /// Dump all threads with an external snapshot utility.
    All {
        /// Core file path prefix handed to the utility.
        #[arg(short = 'o', long)]
        prefix: Option<String>,
        #[arg(long, env = "COREDUMP_UTILITY", default_value = libcoredump::all_dump::DEFAULT_UTILITY)]
        utility: String,
    },
    /// Report whether the kernel will write core files.
    Check,
    /// Display version information for diagnostics.
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut logger = env_logger::Builder::from_default_env();
    if cli.verbose {
        logger.filter_module("coredump", LevelFilter::Debug);
    }
    logger.init();
    dump_log::set_handler(LogHandler);

    match cli.cmd {
        Command::SelfDump { raise_limit } => dump_self(raise_limit),
        Command::All { prefix, utility } => dump_all(prefix.as_deref(), &utility),
        Command::Check => check(),
        Command::Version => {
            println!("coredump {}", libcoredump::version());
            Ok(())
        }
    }
}

fn dump_self(raise_limit: bool) -> Result<()> {
    if raise_limit {
        let limit = limits::raise_core_limit().context("raising core size limit")?;
        info!("core size limit now {limit}");
    }
    let dump = SelfDumper::new().dump()?;
    if !dump.core_dumped() {
        warn!("duplicate {} terminated without a core: {:?}", dump.pid, dump.status);
    }
    println!("{}", dump.pid);
    Ok(())
}

fn dump_all(prefix: Option<&str>, utility: &str) -> Result<()> {
    let dumper = AllDumper::with_utility(utility);
    let dump = match prefix {
        Some(prefix) => dumper.dump_to(prefix),
        None => dumper.dump(),
    }?;
    info!("{utility} output: {}", dump.output.trim_end());
    println!("{}", dump.pid);
    Ok(())
}

fn check() -> Result<()> {
    let limit = limits::core_limit()?;
    println!("RLIMIT_CORE {limit}");
    match limits::core_pattern() {
        Ok(pattern) => println!("core_pattern {pattern}"),
        Err(err) => warn!("cannot read core pattern: {err}"),
    }
    limits::ensure_core_dumps_enabled()?;
    Ok(())
}
