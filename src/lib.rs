// src/lib.rs

pub mod actions;
pub mod cli;
pub mod config;
pub mod dag;
pub mod db;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod target;
pub mod task;

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Days, Local, NaiveDate, NaiveDateTime};
use tracing::info;

use crate::actions::{ActionContext, PipelineRunner};
use crate::cli::CliArgs;
use crate::config::{load_and_validate, Config};
use crate::dag::TaskGraph;
use crate::db::Database;
use crate::engine::{RunReport, RunState, Runtime, RuntimeEvent, RuntimeOptions, Scheduler};
use crate::errors::{PipelineError, Result};
use crate::task::kind::ParamShape;
use crate::task::{TaskId, TaskKind, TaskParams};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - root requests from the CLI and graph resolution
/// - database and per-city table setup
/// - runtime + worker pool
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<RunReport> {
    let cfg = Arc::new(load_and_validate(&args.config)?);

    let roots = root_tasks(&args, &cfg)?;
    info!(roots = roots.len(), "resolving task graph from requested roots");
    let graph = TaskGraph::resolve(&roots, &cfg)?;

    if args.dry_run {
        print_dry_run(&graph);
        // Report with every instance untouched; nothing executed.
        return Ok(Scheduler::new(graph).report());
    }

    let db = Database::open(&cfg.database.path)?;
    for city in cities_for(&args, &cfg) {
        if let Some(city_cfg) = cfg.city(&city) {
            db.init_city_tables(&city_cfg.schema)?;
        }
    }

    let runner = PipelineRunner::new(ActionContext::new(Arc::clone(&cfg), db.clone()));
    let options = RuntimeOptions {
        workers: args.workers.unwrap_or(cfg.pipeline.workers),
    };
    let runtime = Runtime::new(graph, Arc::new(runner), db, options);

    // Ctrl-C -> graceful shutdown: stop dispatching, let in-flight finish.
    {
        let tx = runtime.shutdown_handle();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let report = runtime.run().await?;
    print_report(&report);
    Ok(report)
}

/// The root task identities requested on the command line: one instance
/// of `--task` per city, bound to `--date` / `--timestamp` as its
/// parameter shape requires.
fn root_tasks(args: &CliArgs, cfg: &Config) -> Result<Vec<TaskId>> {
    let kind = TaskKind::from_str(&args.task).map_err(PipelineError::Configuration)?;
    let date = args.date.unwrap_or_else(default_date);
    let interval = cfg.pipeline.availability_interval_minutes;

    let mut roots = Vec::new();
    for city in cities_for(args, cfg) {
        let params = match kind.param_shape() {
            ParamShape::CityOnly => TaskParams::for_city(city),
            ParamShape::CityAndTimestamp => {
                let ts = args.timestamp.unwrap_or_else(default_timestamp);
                TaskParams::for_snapshot(city, ts, interval)
            }
            ParamShape::CityAndDate => TaskParams::for_date(city, date),
        };
        roots.push(TaskId::new(kind, params));
    }
    Ok(roots)
}

fn cities_for(args: &CliArgs, cfg: &Config) -> Vec<String> {
    if args.city.is_empty() {
        cfg.city.keys().cloned().collect()
    } else {
        args.city.clone()
    }
}

/// Yesterday: the latest day with a complete set of availability buckets.
fn default_date() -> NaiveDate {
    let today = Local::now().date_naive();
    today.checked_sub_days(Days::new(1)).unwrap_or(today)
}

fn default_timestamp() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Dry-run output: execution order, dependency counts, targets.
fn print_dry_run(graph: &TaskGraph) {
    println!("velodag dry-run");
    println!("tasks ({}), in execution order:", graph.len());
    for id in graph.order() {
        let Some(spec) = graph.spec(id) else { continue };
        println!("  - {id}");
        if !spec.deps.is_empty() {
            println!("      deps: {}", spec.deps.len());
        }
        println!("      target: {}", spec.target.describe());
    }
}

/// Failure details after a run; the per-state totals are already logged
/// by the runtime.
fn print_report(report: &RunReport) {
    for (id, status) in &report.tasks {
        if status.state == RunState::Failed {
            match &status.error {
                Some(error) => println!("FAILED {id}: {error}"),
                None => println!("FAILED {id}"),
            }
        }
    }
    let upstream = report.count(RunState::UpstreamFailed);
    if upstream > 0 {
        println!("{upstream} task(s) not started because an upstream task failed");
    }
}
