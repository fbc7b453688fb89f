// src/actions/transactions.rs

//! Daily transaction-count steps: aggregate one day of timeseries rows
//! into per-station activity counts, then load the counts.
//!
//! A "transaction" is any change in the number of available bikes
//! between two consecutive samples of the same station. The daily count
//! is the sum of absolute deltas over the day.

use std::collections::BTreeMap;
use std::fs;

use anyhow::{bail, Context, Result};
use chrono::{Days, NaiveDate};
use tracing::info;

use crate::actions::{file_target, marker_target, upstream_file_path, ActionContext};
use crate::task::{TaskKind, TaskSpec};

/// Station statuses that count as "in service"; samples in any other
/// status are excluded from the aggregation.
const ACTIVE_STATUSES: [&str; 2] = ["OPEN", "CONNECTEE"];

/// One timeseries sample, as read back for aggregation.
struct Sample {
    id: i64,
    available_bikes: i64,
    status: String,
}

/// Aggregate one day of `<schema>_timeseries` into a per-station
/// `id,transactions` CSV.
pub async fn aggregate_transactions(ctx: &ActionContext, spec: &TaskSpec) -> Result<()> {
    let city = ctx.city_config(&spec.id.params.city)?;
    let date = spec
        .id
        .params
        .date
        .context("aggregate task is missing its date parameter")?;

    let samples = day_samples(ctx, &city.schema, date).await?;
    let counts = transaction_counts(&samples);

    let mut csv = String::from("id,transactions\n");
    for (id, count) in &counts {
        csv.push_str(&format!("{id},{count}\n"));
    }

    info!(
        task = %spec.id,
        samples = samples.len(),
        stations = counts.len(),
        "aggregated daily transactions"
    );
    file_target(spec)?.materialize(csv.as_bytes())?;
    Ok(())
}

/// All in-day samples ordered by timestamp then id; ordering is what
/// makes consecutive-sample deltas per station well defined.
async fn day_samples(ctx: &ActionContext, schema: &str, date: NaiveDate) -> Result<Vec<Sample>> {
    let start = format!("{} 00:00:00", date.format("%Y-%m-%d"));
    let next = date
        .checked_add_days(Days::new(1))
        .context("date out of range")?;
    let stop = format!("{} 00:00:00", next.format("%Y-%m-%d"));

    let sql = format!(
        "SELECT DISTINCT id, timestamp, available_bikes, status
         FROM {schema}_timeseries
         WHERE timestamp >= ?1 AND timestamp < ?2
         ORDER BY timestamp, id"
    );

    let db = ctx.db.clone();
    let samples = tokio::task::spawn_blocking(move || {
        db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([&start, &stop], |row| {
                Ok(Sample {
                    id: row.get(0)?,
                    available_bikes: row.get(2)?,
                    status: row.get(3)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<Sample>>>()
        })
    })
    .await
    .context("aggregation query cancelled")??;
    Ok(samples)
}

/// Per-station sum of absolute bike-count deltas between consecutive
/// in-service samples. Stations with fewer than two samples are omitted
/// rather than reported as zero.
fn transaction_counts(samples: &[Sample]) -> BTreeMap<i64, f64> {
    let mut previous: BTreeMap<i64, i64> = BTreeMap::new();
    let mut sums: BTreeMap<i64, (f64, usize)> = BTreeMap::new();

    for sample in samples {
        if !ACTIVE_STATUSES.contains(&sample.status.as_str()) {
            continue;
        }
        let entry = sums.entry(sample.id).or_insert((0.0, 0));
        if let Some(prev) = previous.insert(sample.id, sample.available_bikes) {
            entry.0 += (sample.available_bikes - prev).abs() as f64;
        }
        entry.1 += 1;
    }

    sums.into_iter()
        .filter(|(_, (_, seen))| *seen >= 2)
        .map(|(id, (sum, _))| (id, sum))
        .collect()
}

/// Load the daily transactions CSV into `<schema>_transactions`, marker
/// and rows in one transaction. Re-running replaces the day's rows.
pub async fn transactions_to_db(ctx: &ActionContext, spec: &TaskSpec) -> Result<()> {
    let city = ctx.city_config(&spec.id.params.city)?;
    let date = spec
        .id
        .params
        .date
        .context("load task is missing its date parameter")?;
    let csv_path = upstream_file_path(ctx, spec, TaskKind::AggregateTransactions)?;
    let csv = fs::read_to_string(&csv_path)
        .with_context(|| format!("reading transactions CSV {:?}", csv_path))?;

    let mut rows: Vec<(i64, f64)> = Vec::new();
    for (lineno, line) in csv.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let Some((id, count)) = line.split_once(',') else {
            bail!("malformed CSV line {}: '{line}'", lineno + 1);
        };
        rows.push((
            id.parse()
                .with_context(|| format!("bad id on line {}", lineno + 1))?,
            count
                .parse()
                .with_context(|| format!("bad count on line {}", lineno + 1))?,
        ));
    }

    let schema = city.schema.clone();
    let marker = marker_target(spec)?.clone();
    let day = date.format("%Y-%m-%d").to_string();

    info!(task = %spec.id, rows = rows.len(), date = %day, "loading daily transactions");
    let db = ctx.db.clone();
    tokio::task::spawn_blocking(move || {
        db.commit_with_marker(&marker.identity, &marker.schema, |tx| {
            tx.execute(
                &format!("DELETE FROM {schema}_transactions WHERE date = ?1"),
                [day.as_str()],
            )?;
            let mut insert = tx.prepare_cached(&format!(
                "INSERT INTO {schema}_transactions (id, number, date) VALUES (?1, ?2, ?3)"
            ))?;
            for (id, count) in &rows {
                insert.execute((id, count, day.as_str()))?;
            }
            Ok(())
        })
    })
    .await
    .context("transactions insert cancelled")??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: i64, bikes: i64, status: &str) -> Sample {
        Sample {
            id,
            available_bikes: bikes,
            status: status.to_string(),
        }
    }

    #[test]
    fn counts_sum_absolute_deltas_per_station() {
        let samples = vec![
            sample(1, 10, "OPEN"),
            sample(2, 4, "OPEN"),
            sample(1, 7, "OPEN"),
            sample(2, 4, "OPEN"),
            sample(1, 9, "OPEN"),
        ];
        let counts = transaction_counts(&samples);
        // station 1: |7-10| + |9-7| = 5; station 2: no change
        assert_eq!(counts[&1], 5.0);
        assert_eq!(counts[&2], 0.0);
    }

    #[test]
    fn out_of_service_samples_are_excluded() {
        let samples = vec![
            sample(1, 10, "OPEN"),
            sample(1, 0, "CLOSED"),
            sample(1, 10, "OPEN"),
        ];
        let counts = transaction_counts(&samples);
        assert_eq!(counts[&1], 0.0);
    }

    #[test]
    fn singleton_stations_are_omitted() {
        let samples = vec![sample(1, 10, "OPEN"), sample(2, 3, "OPEN"), sample(2, 5, "OPEN")];
        let counts = transaction_counts(&samples);
        assert!(!counts.contains_key(&1));
        assert_eq!(counts[&2], 2.0);
    }

    #[test]
    fn connectee_status_counts_as_active() {
        let samples = vec![sample(7, 2, "CONNECTEE"), sample(7, 6, "CONNECTEE")];
        let counts = transaction_counts(&samples);
        assert_eq!(counts[&7], 4.0);
    }
}
