pub mod exec;
pub mod put;

use crate::fs::TransactionOptions;
use clap::{Args, Subcommand};
use std::time::Duration;

#[derive(Subcommand)]
pub enum Command {
    Exec(exec::ExecArgs),
    Put(put::PutArgs),
}

/// Locking and snapshot flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct TransactionArgs {
    /// Seconds to wait while another transaction holds the tree
    #[arg(long, value_name = "SECS", value_parser = parse_seconds, default_value = "30")]
    pub timeout: Duration,

    /// Keep the previous tree under this strftime-formatted name on commit
    ///
    /// The name is created next to DIR, e.g. `--snapshot 'site-%Y%m%d'`.
    #[arg(long, value_name = "FORMAT")]
    pub snapshot: Option<String>,
}

impl TransactionArgs {
    pub fn options(&self) -> TransactionOptions {
        let options = TransactionOptions::default().with_timeout(self.timeout);
        match &self.snapshot {
            Some(pattern) => options.with_snapshot(pattern.clone()),
            None => options,
        }
    }
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", s))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid timeout '{}': {}", s, e))
}
