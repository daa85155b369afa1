//! CLI struct definitions for the changegate command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "changegate",
    version = env!("CARGO_PKG_VERSION"),
    about = "Policy gate for AI-proposed code edits: validate change sets, hold edits to an approved plan, and undo them from checkpoints."
)]
pub(crate) struct Cli {
    /// Project root (defaults to the nearest directory holding `.changegate`,
    /// else the current directory).
    #[clap(long, global = true)]
    pub root: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Validate a change set (JSON array of file changes).
    Check(CheckCli),
    /// Plan lifecycle and scope lock.
    Plan(PlanCli),
    /// Snapshots and rollback.
    Checkpoint(CheckpointCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct CheckCli {
    /// Path to the change-set JSON, or '-' for stdin.
    #[clap(long)]
    pub changes: String,
    /// Pipeline mode: strict, fast, frontend, backend, database, security or
    /// custom:<id>,<id>. Defaults to the configured mode.
    #[clap(long)]
    pub mode: Option<String>,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct PlanCli {
    #[clap(subcommand)]
    pub command: PlanCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum PlanCommand {
    /// Register a draft plan from a JSON spec file.
    Create {
        #[clap(long)]
        spec: PathBuf,
    },
    /// Approve a draft plan and install its scope lock.
    Approve { id: String },
    /// Start executing an approved plan.
    Start { id: String },
    /// Complete the current phase.
    CompletePhase {
        id: String,
        #[clap(long, default_value_t = 0)]
        tokens: u64,
    },
    /// Fail the current phase and pause the plan.
    FailPhase {
        id: String,
        #[clap(long)]
        error: String,
    },
    /// Resume a paused plan.
    Resume { id: String },
    /// Cancel a plan and release its lock.
    Cancel { id: String },
    /// Show one plan.
    Show {
        id: String,
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// List plans.
    List {
        #[clap(long, default_value = "text")]
        format: String,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct CheckpointCli {
    #[clap(subcommand)]
    pub command: CheckpointCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CheckpointCommand {
    /// Snapshot files before editing them.
    Create {
        #[clap(long = "file", required = true)]
        files: Vec<String>,
        #[clap(long)]
        description: Option<String>,
    },
    /// List checkpoints, newest first.
    List {
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Restore the files of a checkpoint.
    Rollback {
        #[clap(long)]
        id: String,
    },
    /// Evict checkpoints beyond the configured limit.
    Cleanup,
}
