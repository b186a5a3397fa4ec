//! quire: reference pipeline CLI
//!
//! Drives runs through the reference runtime (deterministic stages over the
//! sample corpus) with the file-backed tracer and store, so every command
//! works across process restarts.
//!
//! Usage:
//!   cargo run -p demo -- run --request "Proposal for ACME" --customer "retailer"
//!   cargo run -p demo -- approve <run_id> --resolver alice
//!   cargo run -p demo -- status <run_id>
//!   cargo run -p demo -- trace <run_id> --verify
//!   cargo run -p demo -- runs

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use quire_contracts::{
    config::QuireConfig,
    error::{QuireError, QuireResult},
    run::{RunId, WorkflowState, WorkflowStatus},
};
use quire_ref::{Runtime, RuntimeBuilder};

// ── CLI definition ────────────────────────────────────────────────────────────

/// quire: plan → research → write → critique → revise → approve → finalize.
#[derive(Parser)]
#[command(
    name = "quire",
    about = "Run coordinator for the quire content pipeline",
    long_about = "Drives proposal runs through the reference pipeline with guardrails,\n\
                  a human approval checkpoint, and a hash-chained trace log."
)]
struct Cli {
    /// TOML config file. A missing file means built-in defaults.
    #[arg(long, global = true, default_value = "quire.toml")]
    config: PathBuf,

    /// Override `trace.runs_dir` and allow writes beneath it.
    #[arg(long, global = true)]
    runs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a run and drive it until it completes, fails, or awaits approval.
    Run {
        #[arg(long)]
        request: String,
        #[arg(long, default_value = "")]
        customer: String,
        #[arg(long)]
        run_id: Option<String>,
        /// Approve the draft automatically.
        #[arg(long)]
        auto_approve: bool,
    },
    /// Approve a run awaiting approval, then finalize it.
    Approve {
        run_id: String,
        #[arg(long, default_value = "cli")]
        resolver: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Reject a run awaiting approval. The run stays suspended.
    Reject {
        run_id: String,
        #[arg(long, default_value = "cli")]
        resolver: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Finalize an already approved run.
    Resume { run_id: String },
    /// Show one run's state.
    Status {
        run_id: String,
        #[arg(long)]
        json: bool,
    },
    /// List runs, newest first.
    Runs,
    /// Print a run's trace from its persisted log.
    Trace {
        run_id: String,
        /// Check the log's hash chain.
        #[arg(long)]
        verify: bool,
        #[arg(long)]
        json: bool,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("quire error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> QuireResult<()> {
    let mut config = load_config(&cli)?;

    match cli.command {
        Command::Run {
            request,
            customer,
            run_id,
            auto_approve,
        } => {
            if auto_approve {
                config.approval.auto_approve = true;
            }
            let rt = RuntimeBuilder::new(config).build()?;
            let state = rt
                .coordinator
                .start(&request, &customer, run_id.map(RunId::from));
            finish(&state)
        }
        Command::Approve {
            run_id,
            resolver,
            comment,
        } => {
            let rt = RuntimeBuilder::new(config).build()?;
            let approved =
                rt.coordinator
                    .approve(&RunId::from(run_id), &resolver, comment.as_deref())?;
            let state = rt.coordinator.resume(approved);
            finish(&state)
        }
        Command::Reject {
            run_id,
            resolver,
            comment,
        } => {
            let rt = RuntimeBuilder::new(config).build()?;
            let id = RunId::from(run_id);
            rt.coordinator.reject(&id, &resolver, comment.as_deref())?;
            println!("Run {} rejected by {}; it remains awaiting approval.", id, resolver);
            Ok(())
        }
        Command::Resume { run_id } => {
            let rt = RuntimeBuilder::new(config).build()?;
            let state = load_run(&rt, &RunId::from(run_id))?;
            let state = rt.coordinator.resume(state);
            finish(&state)
        }
        Command::Status { run_id, json } => {
            let rt = RuntimeBuilder::new(config).build()?;
            let state = load_run(&rt, &RunId::from(run_id))?;
            if json {
                println!("{}", to_json(&state)?);
            } else {
                print_status(&state);
            }
            Ok(())
        }
        Command::Runs => {
            let rt = RuntimeBuilder::new(config).build()?;
            let runs = rt.store.list_runs()?;
            if runs.is_empty() {
                println!("No runs under {}", rt.store.runs_dir().display());
            }
            for r in runs {
                println!(
                    "  {:<10} {:<18} approved={:<5} final={:<5} {}",
                    r.run_id,
                    r.status.map(|s| s.as_str()).unwrap_or("unknown"),
                    r.approved,
                    r.has_final,
                    r.created_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                );
            }
            Ok(())
        }
        Command::Trace {
            run_id,
            verify,
            json,
        } => {
            let rt = RuntimeBuilder::new(config).build()?;
            let id = RunId::from(run_id);
            let entries = rt.tracer.replay(&id)?;
            if json {
                println!("{}", to_json(&entries)?);
            } else {
                for e in &entries {
                    println!(
                        "  [{:>2}] {:<11} {:<19} {:<4} {}",
                        e.step,
                        e.agent,
                        e.action,
                        if e.success { "ok" } else { "FAIL" },
                        e.error.as_deref().unwrap_or(""),
                    );
                }
            }
            if verify {
                let intact = rt.tracer.verify_integrity(&id)?;
                println!(
                    "Hash chain for {} ({} entries): {}",
                    id,
                    entries.len(),
                    if intact { "VALID" } else { "BROKEN" }
                );
                if !intact {
                    std::process::exit(2);
                }
            }
            Ok(())
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn load_config(cli: &Cli) -> QuireResult<QuireConfig> {
    let mut config = if cli.config.exists() {
        quire_policy::config::from_file(&cli.config)?
    } else {
        debug!(path = %cli.config.display(), "no config file, using defaults");
        QuireConfig::default()
    };
    if let Some(dir) = &cli.runs_dir {
        config.trace.runs_dir = dir.clone();
        config.guardrails.allowed_write_paths.push(dir.clone());
    }
    Ok(config)
}

fn load_run(rt: &Runtime, run_id: &RunId) -> QuireResult<WorkflowState> {
    rt.coordinator
        .load(run_id)?
        .ok_or_else(|| QuireError::StoreFailed {
            reason: format!("run {} not found", run_id),
        })
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> QuireResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| QuireError::StoreFailed {
        reason: format!("could not encode output: {}", e),
    })
}

/// Print the run and turn a Failed run into a non-zero exit.
fn finish(state: &WorkflowState) -> QuireResult<()> {
    print_outcome(state);
    match state.status {
        WorkflowStatus::Failed => Err(QuireError::state(format!(
            "run {} failed: {}",
            state.run_id,
            state.error.as_deref().unwrap_or("unknown error")
        ))),
        _ => Ok(()),
    }
}

fn print_outcome(state: &WorkflowState) {
    print_status(state);
    match state.status {
        WorkflowStatus::AwaitingApproval => {
            println!();
            println!("  Awaiting approval. Next: quire approve {}", state.run_id);
        }
        WorkflowStatus::Completed => {
            println!();
            println!("{}", state.final_draft);
        }
        _ => {}
    }
}

fn print_status(state: &WorkflowState) {
    println!("Run {}", state.run_id);
    println!("  Status:         {}", state.status);
    println!("  Step:           {}/{}", state.current_step, state.max_steps);
    println!("  Draft version:  {}", state.draft_version);
    println!("  Critique score: {}", state.critique_score);
    println!("  Replans:        {}", state.replan_count);
    println!("  Approved:       {}", state.approved);
    if !state.missing_info.is_empty() {
        println!("  Missing info:   {}", state.missing_info.join(", "));
    }
    if let Some(err) = &state.error {
        println!("  Error:          {}", err);
    }
}
