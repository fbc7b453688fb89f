// src/task/spec.rs

use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime, Timelike};

use crate::config::{CityConfig, Config};
use crate::errors::{PipelineError, Result};
use crate::target::{FileTarget, MarkerTarget, Target};
use crate::task::kind::{ParamShape, TaskKind};
use crate::task::params::{quantize, TaskId, TaskParams};

/// Immutable description of one unit of work: identity, upstream
/// dependencies (as identities, expanded by the graph resolver), and the
/// target its run action materializes.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub id: TaskId,
    pub deps: Vec<TaskId>,
    pub target: Target,
}

impl TaskSpec {
    /// Assemble a spec directly from parts. Production code goes through
    /// [`TaskSpec::build`]; this constructor exists for callers (and
    /// tests) that need graphs outside the built-in kind table.
    pub fn new(id: TaskId, deps: Vec<TaskId>, target: Target) -> Self {
        Self { id, deps, target }
    }

    /// Build the spec for `(kind, params)` against the given config.
    ///
    /// Fails with `ConfigurationError` if the city is not in the
    /// supported set or a required parameter is missing. The parameter
    /// binding is normalized here (timestamp quantized, irrelevant
    /// parameters dropped), so equal identities always produce equal
    /// targets.
    pub fn build(kind: TaskKind, params: &TaskParams, cfg: &Config) -> Result<Self> {
        let city_cfg = cfg.city(&params.city).ok_or_else(|| {
            PipelineError::Configuration(format!("'{}' is an unknown city", params.city))
        })?;

        let interval = cfg.pipeline.availability_interval_minutes;
        let params = normalize_params(kind, params, interval)?;
        let id = TaskId::new(kind, params.clone());

        let deps = dependencies(kind, &params, interval);
        let target = target_for(kind, &id, &params, cfg, city_cfg);

        Ok(Self { id, deps, target })
    }
}

/// Enforce the kind's parameter shape and quantize the timestamp.
fn normalize_params(kind: TaskKind, params: &TaskParams, interval: u32) -> Result<TaskParams> {
    let missing = |what: &str| {
        PipelineError::Configuration(format!(
            "task kind '{kind}' requires a {what} parameter for city '{}'",
            params.city
        ))
    };

    match kind.param_shape() {
        ParamShape::CityOnly => Ok(TaskParams::for_city(params.city.clone())),
        ParamShape::CityAndTimestamp => {
            let ts = params.timestamp.ok_or_else(|| missing("timestamp"))?;
            Ok(TaskParams::for_snapshot(params.city.clone(), ts, interval))
        }
        ParamShape::CityAndDate => {
            let date = params.date.ok_or_else(|| missing("date"))?;
            Ok(TaskParams::for_date(params.city.clone(), date))
        }
    }
}

/// The fixed dependency shape of each kind. Station steps form a chain
/// per city; availability steps chain per `(city, bucket)`; daily
/// aggregation depends on every availability bucket of its date.
fn dependencies(kind: TaskKind, params: &TaskParams, interval: u32) -> Vec<TaskId> {
    let city = params.city.clone();
    let city_id = |k: TaskKind| TaskId::new(k, TaskParams::for_city(city.clone()));
    let snapshot_id = |k: TaskKind, ts: NaiveDateTime| {
        TaskId::new(
            k,
            TaskParams::for_snapshot(city.clone(), ts, interval),
        )
    };

    match kind {
        TaskKind::FetchStations => vec![],
        TaskKind::UnzipStations => vec![city_id(TaskKind::FetchStations)],
        TaskKind::LoadStationsShapefile => vec![city_id(TaskKind::UnzipStations)],
        TaskKind::NormalizeStations => vec![city_id(TaskKind::LoadStationsShapefile)],
        TaskKind::FetchAvailability => vec![city_id(TaskKind::NormalizeStations)],
        TaskKind::AvailabilityToCsv => {
            // normalize_params guarantees the timestamp is present
            let ts = params.timestamp.unwrap_or_default();
            vec![snapshot_id(TaskKind::FetchAvailability, ts)]
        }
        TaskKind::AvailabilityToDb => {
            let ts = params.timestamp.unwrap_or_default();
            vec![snapshot_id(TaskKind::AvailabilityToCsv, ts)]
        }
        TaskKind::AggregateTransactions => {
            let date = params.date.unwrap_or_default();
            day_buckets(date, interval)
                .map(|ts| snapshot_id(TaskKind::AvailabilityToDb, ts))
                .collect()
        }
        TaskKind::TransactionsToDb => {
            let date = params.date.unwrap_or_default();
            vec![TaskId::new(
                TaskKind::AggregateTransactions,
                TaskParams::for_date(city.clone(), date),
            )]
        }
    }
}

/// All bucket start times covering one day, at the configured width.
fn day_buckets(date: NaiveDate, interval: u32) -> impl Iterator<Item = NaiveDateTime> {
    let interval = interval.max(1);
    (0..1440)
        .step_by(interval as usize)
        .filter_map(move |minutes| date.and_hms_opt(minutes / 60, minutes % 60, 0))
}

/// The deterministic target of each kind, templated by its parameters.
fn target_for(
    kind: TaskKind,
    id: &TaskId,
    params: &TaskParams,
    cfg: &Config,
    city_cfg: &CityConfig,
) -> Target {
    let city_dir = cfg.pipeline.data_dir.join(&params.city);
    let marker = || Target::Marker(MarkerTarget::new(id.to_string(), &city_cfg.schema));

    match kind {
        TaskKind::FetchStations => Target::File(FileTarget::new(
            city_dir.join(format!("{}-stations.zip", params.city)),
        )),
        TaskKind::UnzipStations => Target::File(FileTarget::new(city_dir.join("unzip.done"))),
        TaskKind::LoadStationsShapefile => Target::File(FileTarget::new(
            city_dir.join(format!("shp2db_raw_stations_{}.done", city_cfg.srid)),
        )),
        TaskKind::NormalizeStations => marker(),
        TaskKind::FetchAvailability => {
            let ts = params.timestamp.unwrap_or_default();
            Target::File(FileTarget::new(snapshot_path(
                &city_dir,
                ts,
                city_cfg.availability_format.extension(),
            )))
        }
        TaskKind::AvailabilityToCsv => {
            let ts = params.timestamp.unwrap_or_default();
            Target::File(FileTarget::new(snapshot_path(&city_dir, ts, "csv")))
        }
        TaskKind::AvailabilityToDb => marker(),
        TaskKind::AggregateTransactions => {
            let date = params.date.unwrap_or_default();
            Target::File(FileTarget::new(
                day_dir(&city_dir, date).join("transactions.csv"),
            ))
        }
        TaskKind::TransactionsToDb => marker(),
    }
}

fn day_dir(city_dir: &PathBuf, date: NaiveDate) -> PathBuf {
    city_dir.join(date.format("%Y/%m/%d").to_string())
}

/// `<city>/<Y>/<m>/<d>/<HH>H<MM>.<ext>`, e.g. `.../16H35.json`.
fn snapshot_path(city_dir: &PathBuf, ts: NaiveDateTime, ext: &str) -> PathBuf {
    day_dir(city_dir, ts.date()).join(format!("{:02}H{:02}.{ext}", ts.hour(), ts.minute()))
}
