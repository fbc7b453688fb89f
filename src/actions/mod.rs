// src/actions/mod.rs

//! Per-city run-action adapters.
//!
//! These are the thin bodies behind each task kind: HTTP fetches, the
//! archive extraction, the external shapefile loader subprocess, and the
//! SQL steps. Each adapter receives its inputs explicitly (config,
//! upstream target paths, database handle) and finishes by materializing
//! its own target through the atomic primitives, `FileTarget::materialize`
//! or `Database::commit_with_marker`. Every adapter is safe to repeat:
//! files are overwritten on retry, database rows are replaced within the
//! scope of the task's own identity.

pub mod availability;
pub mod stations;
pub mod transactions;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};

use crate::config::{CityConfig, Config};
use crate::db::Database;
use crate::engine::{RunFuture, TaskRunner};
use crate::target::{FileTarget, MarkerTarget, Target};
use crate::task::{TaskKind, TaskSpec};

/// Explicit inputs shared by all adapters. Immutable; cloned per worker.
#[derive(Clone)]
pub struct ActionContext {
    pub config: Arc<Config>,
    pub db: Database,
    pub http: reqwest::Client,
}

impl ActionContext {
    pub fn new(config: Arc<Config>, db: Database) -> Self {
        Self {
            config,
            db,
            http: reqwest::Client::new(),
        }
    }

    fn city_config(&self, city: &str) -> Result<&CityConfig> {
        self.config
            .city(city)
            .ok_or_else(|| anyhow!("'{city}' is an unknown city"))
    }
}

/// Production [`TaskRunner`]: dispatches each claimed spec to the adapter
/// for its kind.
pub struct PipelineRunner {
    ctx: ActionContext,
}

impl PipelineRunner {
    pub fn new(ctx: ActionContext) -> Self {
        Self { ctx }
    }
}

impl TaskRunner for PipelineRunner {
    fn run(&self, spec: TaskSpec) -> RunFuture {
        let ctx = self.ctx.clone();
        Box::pin(async move {
            match spec.id.kind {
                TaskKind::FetchStations => stations::fetch_stations(&ctx, &spec).await,
                TaskKind::UnzipStations => stations::unzip_stations(&ctx, &spec).await,
                TaskKind::LoadStationsShapefile => {
                    stations::load_stations_shapefile(&ctx, &spec).await
                }
                TaskKind::NormalizeStations => stations::normalize_stations(&ctx, &spec).await,
                TaskKind::FetchAvailability => {
                    availability::fetch_availability(&ctx, &spec).await
                }
                TaskKind::AvailabilityToCsv => {
                    availability::availability_to_csv(&ctx, &spec).await
                }
                TaskKind::AvailabilityToDb => {
                    availability::availability_to_db(&ctx, &spec).await
                }
                TaskKind::AggregateTransactions => {
                    transactions::aggregate_transactions(&ctx, &spec).await
                }
                TaskKind::TransactionsToDb => {
                    transactions::transactions_to_db(&ctx, &spec).await
                }
            }
        })
    }
}

/// The spec's target as a file target; adapters for file-backed kinds
/// rely on the construction table never pairing them with a marker.
fn file_target(spec: &TaskSpec) -> Result<&FileTarget> {
    match &spec.target {
        Target::File(f) => Ok(f),
        Target::Marker(_) => bail!("task '{}' expected a file target", spec.id),
    }
}

fn marker_target(spec: &TaskSpec) -> Result<&MarkerTarget> {
    match &spec.target {
        Target::Marker(m) => Ok(m),
        Target::File(_) => bail!("task '{}' expected a marker target", spec.id),
    }
}

/// Path of an upstream file target, recomputed from the dependency's
/// identity. Targets are deterministic per identity, so this always
/// matches what the upstream task materialized.
fn upstream_file_path(ctx: &ActionContext, spec: &TaskSpec, kind: TaskKind) -> Result<PathBuf> {
    let dep = spec
        .deps
        .iter()
        .find(|d| d.kind == kind)
        .ok_or_else(|| anyhow!("task '{}' has no '{kind}' dependency", spec.id))?;
    let dep_spec = TaskSpec::build(dep.kind, &dep.params, &ctx.config)
        .with_context(|| format!("rebuilding upstream spec '{dep}'"))?;
    match dep_spec.target {
        Target::File(f) => Ok(f.path().to_path_buf()),
        Target::Marker(_) => bail!("upstream '{dep}' is not file-backed"),
    }
}

/// HTTP GET returning the response body; non-2xx is an error.
async fn fetch_bytes(ctx: &ActionContext, url: &str) -> Result<Vec<u8>> {
    let response = ctx
        .http
        .get(url)
        .send()
        .await
        .with_context(|| format!("requesting {url}"))?
        .error_for_status()
        .with_context(|| format!("fetching {url}"))?;
    let body = response
        .bytes()
        .await
        .with_context(|| format!("reading body of {url}"))?;
    Ok(body.to_vec())
}
