//! changegate: a policy gate for AI-proposed code edits.
//!
//! An editing agent proposes a change set; changegate decides whether it may
//! be applied and keeps a way back.
//!
//! # Architecture
//!
//! - **Validation pipeline** ([`core::pipeline`]): six stages (scope,
//!   quality, integrity, compliance, specialist, accuracy) of stateless
//!   [`validators`], selected by mode and run sequentially. A security error
//!   stops the run early.
//! - **Plan lifecycle** ([`core::plan`]): multi-phase plans move from draft
//!   through approval and execution. An approved plan installs a scope lock
//!   that restricts which files (and functions) an edit may touch.
//! - **Checkpoints** ([`core::checkpoint`]): affected files are snapshotted
//!   before a change is applied, via `git stash` when possible and
//!   content-addressed file backups otherwise.
//! - **Gate** ([`core::gate`]): one review cycle tying the three together.
//!
//! All state lives under `<project>/.changegate/`; every mutation leaves one
//! line in `audit.events.jsonl`.
//!
//! # Examples
//!
//! ```bash
//! changegate plan create --spec plan.json
//! changegate plan approve plan_01J...
//! changegate check --changes changes.json --mode backend
//! changegate checkpoint rollback --id cp_01J...
//! ```

pub mod cli;
pub mod core;
pub mod validators;

use anyhow::{Context, bail};
use clap::Parser;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::cli::{CheckCli, CheckpointCommand, Cli, Command, PlanCommand};
use crate::core::change::FileChange;
use crate::core::checkpoint::CheckpointOptions;
use crate::core::gate::{Gate, ReviewOptions};
use crate::core::output;
use crate::core::pipeline::Mode;
use crate::core::plan::PlanSpec;
use crate::core::store::find_project_root;
use crate::core::trace;

fn project_root(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(root) = explicit {
        return Ok(root);
    }
    let cwd = std::env::current_dir().context("reading current directory")?;
    Ok(find_project_root(&cwd).unwrap_or(cwd))
}

fn read_changes(source: &str) -> anyhow::Result<Vec<FileChange>> {
    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading change set from stdin")?;
        buf
    } else {
        fs::read_to_string(source).with_context(|| format!("reading change set {source}"))?
    };
    serde_json::from_str(&raw).context("parsing change set JSON")
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_value(value)?;
    println!("{}", serde_json::to_string_pretty(&trace::redact(rendered))?);
    Ok(())
}

fn wants_json(format: &str) -> anyhow::Result<bool> {
    match format {
        "json" => Ok(true),
        "text" => Ok(false),
        other => bail!("unknown format '{other}' (expected text or json)"),
    }
}

fn run_check(gate: &mut Gate, args: CheckCli) -> anyhow::Result<bool> {
    let json = wants_json(&args.format)?;
    let changes = read_changes(&args.changes)?;
    let mode = args
        .mode
        .as_deref()
        .map(str::parse::<Mode>)
        .transpose()
        .context("parsing --mode")?;
    let result = gate.review(
        changes,
        ReviewOptions {
            mode,
            ..ReviewOptions::default()
        },
    );
    if json {
        print_json(&result)?;
    } else {
        print!("{}", output::render_report(&result));
    }
    Ok(result.passed)
}

fn run_plan(gate: &mut Gate, command: PlanCommand) -> anyhow::Result<()> {
    let plans = gate.plans_mut();
    let outcome = match command {
        PlanCommand::Create { spec } => {
            let raw = fs::read_to_string(&spec)
                .with_context(|| format!("reading plan spec {}", spec.display()))?;
            let spec: PlanSpec = serde_json::from_str(&raw).context("parsing plan spec")?;
            let plan = plans.create_plan(spec);
            println!("{}", plan.id);
            for issue in plans.validate_plan(&plan.id) {
                eprintln!("warning: {issue}");
            }
            true
        }
        PlanCommand::Approve { id } => {
            let approved = plans.approve_plan(&id);
            if !approved {
                for issue in plans.validate_plan(&id) {
                    eprintln!("  {issue}");
                }
            }
            approved
        }
        PlanCommand::Start { id } => plans.start_execution(&id),
        PlanCommand::CompletePhase { id, tokens } => {
            let known = plans.get_plan(&id).is_some();
            match plans.complete_phase(&id, tokens) {
                Some(next) => println!("current phase: {} {}", next.index + 1, next.title),
                None if known => println!("no further phase"),
                None => {}
            }
            known
        }
        PlanCommand::FailPhase { id, error } => plans.fail_phase(&id, &error),
        PlanCommand::Resume { id } => plans.resume_plan(&id),
        PlanCommand::Cancel { id } => plans.cancel_plan(&id),
        PlanCommand::Show { id, format } => {
            let plan = plans
                .get_plan(&id)
                .with_context(|| format!("plan {id} not found"))?;
            if wants_json(&format)? {
                print_json(plan)?;
            } else {
                print!("{}", output::render_plan(plan));
            }
            true
        }
        PlanCommand::List { format } => {
            let all = plans.list_plans();
            if wants_json(&format)? {
                print_json(&all)?;
            } else {
                for plan in all {
                    println!("{} [{}] {}", plan.id, plan.status, output::compact_line(&plan.title, 60));
                }
            }
            true
        }
    };
    let persist_errors = plans.take_persist_errors();
    if !persist_errors.is_empty() {
        bail!("plan store: {}", output::preview_messages(&persist_errors, 3, 120));
    }
    if !outcome {
        bail!("transition rejected");
    }
    Ok(())
}

fn run_checkpoint(gate: &mut Gate, command: CheckpointCommand) -> anyhow::Result<()> {
    match command {
        CheckpointCommand::Create { files, description } => {
            let active = gate.plans().active_view();
            let opts = CheckpointOptions {
                plan_id: active.as_ref().map(|v| v.plan_id.clone()),
                phase_id: active.as_ref().and_then(|v| v.phase_id.clone()),
                description,
            };
            let cp = gate
                .checkpoints_mut()
                .create_checkpoint(&files, opts)
                .context("creating checkpoint")?;
            println!("{}", output::render_checkpoint(&cp));
        }
        CheckpointCommand::List { format } => {
            let all = gate.checkpoints().list_checkpoints()?;
            if wants_json(&format)? {
                print_json(&all)?;
            } else {
                for cp in &all {
                    println!("{}", output::render_checkpoint(cp));
                }
            }
        }
        CheckpointCommand::Rollback { id } => {
            let outcome = gate.undo(&id).with_context(|| format!("rolling back {id}"))?;
            print_json(&outcome)?;
            if !outcome.success {
                bail!(
                    "rollback incomplete: {}",
                    output::preview_messages(&outcome.errors, 3, 120)
                );
            }
        }
        CheckpointCommand::Cleanup => {
            let evicted = gate.checkpoints().cleanup()?;
            println!("evicted {} checkpoint(s)", evicted.len());
        }
    }
    Ok(())
}

/// Entry point of the `changegate` binary. Returns `Ok(false)` when a check
/// ran but the change set was rejected.
pub fn run() -> anyhow::Result<bool> {
    let cli = Cli::parse();
    let root = project_root(cli.root)?;
    let mut gate = open_gate(&root)?;
    match cli.command {
        Command::Check(args) => run_check(&mut gate, args),
        Command::Plan(plan) => run_plan(&mut gate, plan.command).map(|_| true),
        Command::Checkpoint(cp) => run_checkpoint(&mut gate, cp.command).map(|_| true),
    }
}

fn open_gate(root: &Path) -> anyhow::Result<Gate> {
    Gate::open(root).with_context(|| format!("opening changegate store in {}", root.display()))
}
