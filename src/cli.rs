use crate::command::Command;
use clap::{ArgAction, Parser};
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "fstrans", version, about = "Modify a directory tree atomically")]
pub struct Cli {
    /// Log more (-v for progress, -vv for every filesystem step)
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log errors only
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Installs the `env_logger` backend. `RUST_LOG` overrides the flags.
pub fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Warn,
        (false, 1) => LevelFilter::Info,
        (false, _) => LevelFilter::Debug,
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}
