use crate::command::TransactionArgs;
use crate::error::{Result, TransactionError};
use crate::fs::Transaction;
use clap::Parser;
use colored::Colorize;
use std::path::{self, PathBuf};

#[derive(Parser, Debug, Clone)]
pub struct PutArgs {
    #[command(flatten)]
    pub txn: TransactionArgs,

    /// Directory tree to modify
    pub dir: PathBuf,

    /// Destination, relative to DIR
    pub dest: PathBuf,

    /// File whose content and metadata replace DEST
    pub source: PathBuf,
}

pub fn execute(args: PutArgs) -> Result<i32> {
    let source = path::absolute(&args.source)
        .map_err(|e| TransactionError::io("resolve", &args.source, e))?;
    let mut txn = Transaction::new(&args.dir, args.txn.options())?;

    txn.run(|txn| txn.putfile(&args.dest, &source))?;

    eprintln!(
        "{} {}",
        "✓ Updated".green().bold(),
        txn.tree().join(&args.dest).display()
    );
    Ok(0)
}
