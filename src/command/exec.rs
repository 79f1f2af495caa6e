use crate::command::TransactionArgs;
use crate::error::Result;
use crate::fs::Transaction;
use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug, Clone)]
#[clap(verbatim_doc_comment)]
pub struct ExecArgs {
    #[command(flatten)]
    pub txn: TransactionArgs,

    /// Directory tree to modify
    pub dir: PathBuf,

    /// Program and arguments to run inside the working copy
    ///
    /// The program starts in the working copy, with FSTRANS_ROOT set to it
    /// and FSTRANS_TREE set to the original tree. Exit status 0 commits;
    /// anything else rolls back and is passed through.
    ///
    /// Example:
    ///   fstrans exec site -- sh -c 'sed -i s/old/new/ index.html'
    #[arg(last = true, required = true, value_name = "COMMAND", verbatim_doc_comment)]
    pub command: Vec<OsString>,
}

pub fn execute(args: ExecArgs) -> Result<i32> {
    let mut txn = Transaction::new(&args.dir, args.txn.options())?;
    let Some((program, rest)) = args.command.split_first() else {
        return Err(anyhow::anyhow!("No command given").into());
    };

    let guard = txn.begin()?;
    let root = guard.root();
    log::info!(
        "Running {} in {}",
        program.to_string_lossy(),
        root.display()
    );

    // Dropping the guard on a spawn error rolls back.
    let status = process::Command::new(program)
        .args(rest)
        .current_dir(&root)
        .env("FSTRANS_ROOT", &root)
        .env("FSTRANS_TREE", guard.tree())
        .status()
        .with_context(|| format!("Failed to run {}", program.to_string_lossy()))?;

    let tree = guard.tree();
    if status.success() {
        guard.commit()?;
        eprintln!("{} {}", "✓ Committed".green().bold(), tree.display());
        Ok(0)
    } else {
        guard.rollback()?;
        eprintln!(
            "{} {} ({})",
            "✗ Rolled back".yellow().bold(),
            tree.display(),
            status
        );
        Ok(status.code().unwrap_or(1))
    }
}
