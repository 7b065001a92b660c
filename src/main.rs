//! Async Command - cancel/reset cycle demo
//!
//! Starts a batch of concurrent invocations of one command, cancels the
//! whole group, waits for it to drain, resets, and repeats. Prints a
//! per-cycle summary as JSON or text.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_command::core::error::{CommandError, Result};
use async_command::{AsyncCommand, DemoConfig, InvocationContext, PropertyName};
use clap::Parser;
use rand::Rng;
use serde::Serialize;
use tokio::runtime::Runtime;

/// Run start/cancel/drain/reset cycles against one async command
#[derive(Parser, Debug)]
#[command(name = "async-command")]
#[command(about = "Exercise group cancellation of a multi-execution async command")]
struct Args {
    /// TOML config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Concurrent invocations per cycle
    #[arg(long)]
    invocations: Option<usize>,

    /// Number of cycles
    #[arg(long)]
    cycles: Option<usize>,

    /// Output format: json or text
    #[arg(long, default_value = "text")]
    format: String,
}

#[derive(Debug, Default)]
struct Tally {
    completed: AtomicUsize,
    cancelled: AtomicUsize,
    failed: AtomicUsize,
}

#[derive(Serialize)]
struct CycleReport {
    cycle: usize,
    started: usize,
    cancelled: usize,
    completed: usize,
    failed: usize,
    drain_ms: u128,
    leaked: usize,
}

#[derive(Serialize)]
struct Summary {
    command: String,
    cycles: Vec<CycleReport>,
    executing_transitions: usize,
    final_run_completed: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DemoConfig::load(path)?,
        None => DemoConfig::default(),
    };
    if let Some(invocations) = args.invocations {
        config.invocations = invocations;
    }
    if let Some(cycles) = args.cycles {
        config.cycles = cycles;
    }
    config.validate().map_err(CommandError::Config)?;

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_filter.clone());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Async command demo starting...");

    let rt = Runtime::new()?;
    let summary = rt.block_on(run(&config))?;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => print_text(&summary),
    }

    Ok(())
}

async fn run(config: &DemoConfig) -> Result<Summary> {
    let poll = config.poll_interval_ms;
    let iterations = config.work_iterations;

    let command = AsyncCommand::builder(move |_cycle: usize, ctx: InvocationContext| async move {
        for _ in 0..iterations {
            ctx.check_cancelled()?;
            let jitter = rand::thread_rng().gen_range(0..=poll);
            tokio::time::sleep(Duration::from_millis(poll + jitter)).await;
        }
        Ok(())
    })
    .config(config.command.clone())
    .build();

    let transitions = Arc::new(AtomicUsize::new(0));
    {
        let transitions = transitions.clone();
        command.subscribe_property_changed(move |property| {
            if property == PropertyName::IsExecuting {
                transitions.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
    command.subscribe_failed(|error| tracing::error!("invocation failed: {}", error));

    let mut cycles = Vec::with_capacity(config.cycles);
    for cycle in 0..config.cycles {
        let tally = Arc::new(Tally::default());
        let mut tasks = Vec::with_capacity(config.invocations);
        for _ in 0..config.invocations {
            let invocation = command.execute_async(cycle);
            let tally = tally.clone();
            tasks.push(tokio::spawn(async move {
                match invocation.await {
                    Ok(()) => tally.completed.fetch_add(1, Ordering::Relaxed),
                    Err(CommandError::Cancelled) => tally.cancelled.fetch_add(1, Ordering::Relaxed),
                    Err(_) => tally.failed.fetch_add(1, Ordering::Relaxed),
                };
            }));
        }
        let started = command.executing_count();

        // Let every invocation get into its polling loop before cancelling
        tokio::time::sleep(Duration::from_millis(poll * 2)).await;

        let drain_start = Instant::now();
        command.cancel_and_wait().await?;
        let drain_ms = drain_start.elapsed().as_millis();
        command.reset_cancel();

        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("invocation task ended abnormally: {}", e);
            }
        }

        cycles.push(CycleReport {
            cycle,
            started,
            cancelled: tally.cancelled.load(Ordering::Relaxed),
            completed: tally.completed.load(Ordering::Relaxed),
            failed: tally.failed.load(Ordering::Relaxed),
            drain_ms,
            leaked: command.executing_count(),
        });
    }

    // After a reset, a fresh invocation runs uncancelled. Bound it so the
    // demo never hangs on a large work_iterations.
    let final_run = command.execute_async(config.cycles);
    let final_budget = Duration::from_millis(poll * 2 * (u64::from(iterations) + 1));
    let final_run_completed = matches!(
        tokio::time::timeout(final_budget, final_run).await,
        Ok(Ok(()))
    );

    Ok(Summary {
        command: command.name().to_string(),
        cycles,
        executing_transitions: transitions.load(Ordering::Relaxed),
        final_run_completed,
    })
}

fn print_text(summary: &Summary) {
    println!("\n=== {} ===", summary.command);
    for c in &summary.cycles {
        println!(
            "cycle {:>3}: started {:>3}  cancelled {:>3}  completed {:>3}  failed {:>3}  drained in {:>4}ms  leaked {}",
            c.cycle, c.started, c.cancelled, c.completed, c.failed, c.drain_ms, c.leaked
        );
    }
    println!("IsExecuting transitions: {}", summary.executing_transitions);
    println!("Final uncancelled run completed: {}", summary.final_run_completed);
}
