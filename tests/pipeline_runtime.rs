use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

use velodag::config::{CityConfig, Config, FeedFormat};
use velodag::dag::TaskGraph;
use velodag::db::Database;
use velodag::engine::{RunFuture, RunState, Runtime, RuntimeOptions, TaskRunner};
use velodag::target::Target;
use velodag::task::{TaskId, TaskKind, TaskParams, TaskSpec};

type TestResult = Result<(), Box<dyn Error>>;

/// Fake runner: records every invocation and materializes the claimed
/// target itself, without touching the network or spawning processes.
/// Injected failures and withheld targets drive the failure paths.
struct RecordingRunner {
    invocations: Arc<Mutex<Vec<TaskId>>>,
    db: Database,
    fail: Vec<TaskId>,
    withhold: Vec<TaskId>,
}

impl RecordingRunner {
    fn new(db: Database) -> Self {
        Self {
            invocations: Arc::new(Mutex::new(Vec::new())),
            db,
            fail: Vec::new(),
            withhold: Vec::new(),
        }
    }

    fn invocations(&self) -> Arc<Mutex<Vec<TaskId>>> {
        Arc::clone(&self.invocations)
    }
}

impl TaskRunner for RecordingRunner {
    fn run(&self, spec: TaskSpec) -> RunFuture {
        let invocations = Arc::clone(&self.invocations);
        let db = self.db.clone();
        let fail = self.fail.clone();
        let withhold = self.withhold.clone();

        Box::pin(async move {
            invocations.lock().unwrap().push(spec.id.clone());
            if fail.contains(&spec.id) {
                anyhow::bail!("injected failure");
            }
            if withhold.contains(&spec.id) {
                // Claim success without producing the target.
                return Ok(());
            }
            match &spec.target {
                Target::File(f) => f.materialize(b"ok")?,
                Target::Marker(m) => {
                    db.commit_with_marker(&m.identity, &m.schema, |_tx| Ok(()))?
                }
            }
            Ok(())
        })
    }
}

fn city_config(schema: &str) -> CityConfig {
    let features = CityConfig::STATION_COLUMNS
        .iter()
        .map(|c| (c.to_string(), c.to_uppercase()))
        .collect();
    let availability_features = CityConfig::AVAILABILITY_COLUMNS
        .iter()
        .map(|c| (c.to_string(), c.to_uppercase()))
        .collect();

    CityConfig {
        schema: schema.into(),
        srid: "2154".into(),
        typename: "CI_STVEL_P".into(),
        stations_url: "http://example.invalid/stations.zip".into(),
        availability_url: "http://example.invalid/feed".into(),
        availability_format: FeedFormat::Json,
        features,
        availability_features,
    }
}

/// Config rooted in a temp directory with 480-minute buckets, so a full
/// day is three availability chains instead of 288.
fn test_config(data_dir: &Path, cities: &[&str]) -> Config {
    let mut city = BTreeMap::new();
    for name in cities {
        city.insert(name.to_string(), city_config(name));
    }

    let mut cfg = Config {
        pipeline: Default::default(),
        database: Default::default(),
        city,
    };
    cfg.pipeline.data_dir = data_dir.to_path_buf();
    cfg.pipeline.availability_interval_minutes = 480;
    cfg
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2018, 5, 1).unwrap()
}

fn daily_root(city: &str) -> TaskId {
    TaskId::new(
        TaskKind::TransactionsToDb,
        TaskParams::for_date(city, date()),
    )
}

async fn run_once(
    roots: &[TaskId],
    cfg: &Config,
    db: &Database,
    runner: RecordingRunner,
) -> Result<velodag::engine::RunReport, Box<dyn Error>> {
    let graph = TaskGraph::resolve(roots, cfg)?;
    let runtime = Runtime::new(
        graph,
        Arc::new(runner),
        db.clone(),
        RuntimeOptions { workers: 4 },
    );
    Ok(runtime.run().await?)
}

#[tokio::test]
async fn full_pipeline_runs_once_then_skips_everything() -> TestResult {
    let dir = tempfile::tempdir()?;
    let cfg = test_config(dir.path(), &["bordeaux"]);
    let db = Database::open_in_memory()?;
    let roots = [daily_root("bordeaux")];

    let first = RecordingRunner::new(db.clone());
    let first_invocations = first.invocations();
    let report = run_once(&roots, &cfg, &db, first).await?;

    // 4 station steps + 3 buckets x 3 availability steps + 2 daily steps
    assert!(report.is_success());
    assert_eq!(report.count(RunState::Done), 15);
    let ran = first_invocations.lock().unwrap().clone();
    assert_eq!(ran.len(), 15);
    assert_eq!(ran.iter().collect::<BTreeSet<_>>().len(), 15);

    // Same request again: every target exists, nothing is invoked.
    let second = RecordingRunner::new(db.clone());
    let second_invocations = second.invocations();
    let report = run_once(&roots, &cfg, &db, second).await?;

    assert!(report.is_success());
    assert_eq!(report.count(RunState::Skipped), 15);
    assert_eq!(report.count(RunState::Done), 0);
    assert!(second_invocations.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn failure_in_one_city_leaves_the_other_untouched() -> TestResult {
    let dir = tempfile::tempdir()?;
    let cfg = test_config(dir.path(), &["bordeaux", "lyon"]);
    let db = Database::open_in_memory()?;

    let roots = [
        TaskId::new(
            TaskKind::NormalizeStations,
            TaskParams::for_city("bordeaux"),
        ),
        TaskId::new(TaskKind::NormalizeStations, TaskParams::for_city("lyon")),
    ];

    let mut runner = RecordingRunner::new(db.clone());
    runner.fail = vec![TaskId::new(
        TaskKind::FetchStations,
        TaskParams::for_city("bordeaux"),
    )];
    let report = run_once(&roots, &cfg, &db, runner).await?;

    assert!(!report.is_success());
    assert_eq!(report.count(RunState::Failed), 1);
    assert_eq!(report.count(RunState::UpstreamFailed), 3);
    assert_eq!(report.count(RunState::Done), 4);

    for (id, status) in &report.tasks {
        if id.params.city == "lyon" {
            assert_eq!(status.state, RunState::Done, "lyon task {id} affected");
        }
    }
    let failed = TaskId::new(TaskKind::FetchStations, TaskParams::for_city("bordeaux"));
    assert!(report.tasks[&failed]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("injected failure")));
    Ok(())
}

#[tokio::test]
async fn retry_reruns_only_unfinished_work() -> TestResult {
    let dir = tempfile::tempdir()?;
    let cfg = test_config(dir.path(), &["bordeaux"]);
    let db = Database::open_in_memory()?;
    let roots = [daily_root("bordeaux")];

    let bad_bucket = TaskId::new(
        TaskKind::AvailabilityToCsv,
        TaskParams::for_snapshot("bordeaux", date().and_hms_opt(8, 0, 0).unwrap(), 480),
    );

    let mut first = RecordingRunner::new(db.clone());
    first.fail = vec![bad_bucket.clone()];
    let report = run_once(&roots, &cfg, &db, first).await?;

    assert!(!report.is_success());
    assert_eq!(report.count(RunState::Failed), 1);
    // availability-to-db for the bucket, aggregate, transactions-to-db
    assert_eq!(report.count(RunState::UpstreamFailed), 3);
    assert_eq!(report.count(RunState::Done), 11);

    let unfinished: BTreeSet<TaskId> = report
        .tasks
        .iter()
        .filter(|(_, s)| matches!(s.state, RunState::Failed | RunState::UpstreamFailed))
        .map(|(id, _)| id.clone())
        .collect();

    let second = RecordingRunner::new(db.clone());
    let second_invocations = second.invocations();
    let report = run_once(&roots, &cfg, &db, second).await?;

    assert!(report.is_success());
    assert_eq!(report.count(RunState::Done), 4);
    assert_eq!(report.count(RunState::Skipped), 11);

    let rerun: BTreeSet<TaskId> = second_invocations.lock().unwrap().iter().cloned().collect();
    assert_eq!(rerun, unfinished);
    Ok(())
}

#[tokio::test]
async fn success_without_a_target_counts_as_failure() -> TestResult {
    let dir = tempfile::tempdir()?;
    let cfg = test_config(dir.path(), &["bordeaux"]);
    let db = Database::open_in_memory()?;

    let roots = [TaskId::new(
        TaskKind::NormalizeStations,
        TaskParams::for_city("bordeaux"),
    )];

    let mut runner = RecordingRunner::new(db.clone());
    runner.withhold = vec![TaskId::new(
        TaskKind::FetchStations,
        TaskParams::for_city("bordeaux"),
    )];
    let report = run_once(&roots, &cfg, &db, runner).await?;

    assert!(!report.is_success());
    let withheld = TaskId::new(TaskKind::FetchStations, TaskParams::for_city("bordeaux"));
    assert_eq!(report.tasks[&withheld].state, RunState::Failed);
    assert!(report.tasks[&withheld]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("not materialized")));
    assert_eq!(report.count(RunState::UpstreamFailed), 3);
    Ok(())
}
