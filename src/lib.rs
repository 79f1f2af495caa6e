#![doc = include_str!("../README.md")]

pub mod cli;
pub mod command;
pub mod error;
pub mod fs;

pub use error::*;

/// Parses the command line, runs the command, and returns the exit code.
pub fn run() -> Result<i32> {
    use clap::Parser;
    use command::Command;

    let cli = cli::Cli::parse();
    cli::init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Exec(args) => command::exec::execute(args),
        Command::Put(args) => command::put::execute(args),
    }
}
