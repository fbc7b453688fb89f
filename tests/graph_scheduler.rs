use std::collections::BTreeMap;
use std::error::Error;

use chrono::NaiveDate;

use velodag::config::{CityConfig, Config, FeedFormat};
use velodag::dag::TaskGraph;
use velodag::engine::{RunState, Scheduler, TaskOutcome};
use velodag::errors::PipelineError;
use velodag::target::{FileTarget, Target};
use velodag::task::{TaskId, TaskKind, TaskParams, TaskSpec};

type TestResult = Result<(), Box<dyn Error>>;

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

fn test_config() -> Config {
    let mut city = BTreeMap::new();
    city.insert("bordeaux".to_string(), city_config("bordeaux"));

    let mut cfg = Config {
        pipeline: Default::default(),
        database: Default::default(),
        city,
    };
    // 480-minute buckets: 3 availability chains per day.
    cfg.pipeline.availability_interval_minutes = 480;
    cfg
}

fn city_task(kind: TaskKind) -> TaskId {
    TaskId::new(kind, TaskParams::for_city("bordeaux"))
}

/// Hand-built spec with a file target named after the kind; for driving
/// the scheduler without the built-in dependency table.
fn manual_spec(kind: TaskKind, deps: Vec<TaskKind>) -> TaskSpec {
    TaskSpec::new(
        city_task(kind),
        deps.into_iter().map(city_task).collect(),
        Target::File(FileTarget::new(format!("/tmp/{kind}.done"))),
    )
}

#[test]
fn resolution_is_deterministic_with_dependencies_first() -> TestResult {
    let cfg = test_config();
    let date = NaiveDate::from_ymd_opt(2018, 5, 1).unwrap();
    let root = TaskId::new(
        TaskKind::TransactionsToDb,
        TaskParams::for_date("bordeaux", date),
    );

    let graph = TaskGraph::resolve(&[root.clone()], &cfg)?;
    // 4 station steps + 3 buckets x 3 availability steps + 2 daily steps
    assert_eq!(graph.len(), 15);
    assert_eq!(graph.order()[0].kind, TaskKind::FetchStations);
    assert_eq!(graph.order().last(), Some(&root));

    let positions: BTreeMap<&TaskId, usize> = graph
        .order()
        .iter()
        .enumerate()
        .map(|(i, id)| (id, i))
        .collect();
    for id in graph.order() {
        let spec = graph.spec(id).unwrap();
        for dep in &spec.deps {
            assert!(positions[dep] < positions[id], "{dep} must precede {id}");
        }
    }

    let again = TaskGraph::resolve(&[root], &cfg)?;
    assert_eq!(graph.order(), again.order());
    Ok(())
}

#[test]
fn overlapping_roots_intern_shared_instances() -> TestResult {
    let cfg = test_config();
    let date = NaiveDate::from_ymd_opt(2018, 5, 1).unwrap();
    let ts = date.and_hms_opt(8, 3, 0).unwrap();

    let daily = TaskId::new(
        TaskKind::TransactionsToDb,
        TaskParams::for_date("bordeaux", date),
    );
    let snapshot = TaskId::new(
        TaskKind::AvailabilityToDb,
        TaskParams::for_snapshot("bordeaux", ts, 480),
    );

    // The snapshot chain is already inside the daily closure, so adding
    // it as a second root must not add any instance.
    let graph = TaskGraph::resolve(&[daily.clone(), snapshot], &cfg)?;
    let alone = TaskGraph::resolve(&[daily], &cfg)?;
    assert_eq!(graph.len(), alone.len());
    Ok(())
}

#[test]
fn dependency_cycle_is_rejected_and_named() {
    let specs = vec![
        manual_spec(TaskKind::FetchStations, vec![TaskKind::UnzipStations]),
        manual_spec(TaskKind::UnzipStations, vec![TaskKind::FetchStations]),
    ];

    let err = TaskGraph::from_specs(specs).unwrap_err();
    match err {
        PipelineError::CyclicDependency(cycle) => {
            assert!(cycle.contains("fetch-stations"), "got: {cycle}");
            assert!(cycle.contains(" -> "), "got: {cycle}");
        }
        other => panic!("expected a cycle error, got {other:?}"),
    }
}

#[test]
fn missing_dependency_is_a_configuration_error() {
    let specs = vec![manual_spec(
        TaskKind::UnzipStations,
        vec![TaskKind::FetchStations],
    )];

    let err = TaskGraph::from_specs(specs).unwrap_err();
    assert!(matches!(err, PipelineError::Configuration(_)));
}

#[test]
fn chain_is_claimed_in_dependency_order() -> TestResult {
    let graph = TaskGraph::from_specs(vec![
        manual_spec(TaskKind::FetchStations, vec![]),
        manual_spec(TaskKind::UnzipStations, vec![TaskKind::FetchStations]),
        manual_spec(TaskKind::LoadStationsShapefile, vec![TaskKind::UnzipStations]),
    ])?;
    let mut scheduler = Scheduler::new(graph);

    let ready = scheduler.claim_ready();
    assert_eq!(ready, vec![city_task(TaskKind::FetchStations)]);
    // A claimed id is never handed out again.
    assert!(scheduler.claim_ready().is_empty());

    scheduler.handle_completion(&city_task(TaskKind::FetchStations), TaskOutcome::Success);
    let ready = scheduler.claim_ready();
    assert_eq!(ready, vec![city_task(TaskKind::UnzipStations)]);

    scheduler.handle_completion(&city_task(TaskKind::UnzipStations), TaskOutcome::Success);
    let ready = scheduler.claim_ready();
    assert_eq!(ready, vec![city_task(TaskKind::LoadStationsShapefile)]);

    scheduler.handle_completion(
        &city_task(TaskKind::LoadStationsShapefile),
        TaskOutcome::Success,
    );
    assert!(scheduler.is_idle());
    assert!(scheduler.report().is_success());
    Ok(())
}

#[test]
fn failure_marks_transitive_dependents_distinctly() -> TestResult {
    let graph = TaskGraph::from_specs(vec![
        manual_spec(TaskKind::FetchStations, vec![]),
        manual_spec(TaskKind::UnzipStations, vec![TaskKind::FetchStations]),
        manual_spec(TaskKind::LoadStationsShapefile, vec![TaskKind::UnzipStations]),
    ])?;
    let mut scheduler = Scheduler::new(graph);

    scheduler.claim_ready();
    scheduler.handle_completion(
        &city_task(TaskKind::FetchStations),
        TaskOutcome::Failed("network down".into()),
    );

    assert!(scheduler.is_idle());
    let report = scheduler.report();
    assert!(!report.is_success());
    assert_eq!(
        report.tasks[&city_task(TaskKind::FetchStations)].state,
        RunState::Failed
    );
    assert_eq!(
        report.tasks[&city_task(TaskKind::FetchStations)]
            .error
            .as_deref(),
        Some("network down")
    );
    assert_eq!(
        report.tasks[&city_task(TaskKind::UnzipStations)].state,
        RunState::UpstreamFailed
    );
    assert_eq!(
        report.tasks[&city_task(TaskKind::LoadStationsShapefile)].state,
        RunState::UpstreamFailed
    );
    Ok(())
}

#[test]
fn cancellation_spares_running_tasks() -> TestResult {
    let graph = TaskGraph::from_specs(vec![
        manual_spec(TaskKind::FetchStations, vec![]),
        manual_spec(TaskKind::UnzipStations, vec![TaskKind::FetchStations]),
    ])?;
    let mut scheduler = Scheduler::new(graph);

    scheduler.claim_ready();
    scheduler.cancel_pending();

    assert_eq!(
        scheduler.state(&city_task(TaskKind::FetchStations)),
        Some(RunState::Running)
    );
    assert_eq!(
        scheduler.state(&city_task(TaskKind::UnzipStations)),
        Some(RunState::Cancelled)
    );

    // The in-flight task still completes normally.
    scheduler.handle_completion(&city_task(TaskKind::FetchStations), TaskOutcome::Success);
    let report = scheduler.report();
    assert_eq!(
        report.tasks[&city_task(TaskKind::FetchStations)].state,
        RunState::Done
    );
    assert!(report.is_success());
    Ok(())
}
