// src/actions/availability.rs

//! Real-time availability steps: snapshot the feed, normalize one
//! snapshot into CSV, insert the CSV into the timeseries table.
//!
//! Feed payloads are parsed just deeply enough to pull the configured
//! source fields out; everything else about the wire format stays opaque.

use std::collections::BTreeMap;
use std::fs;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDateTime};
use regex::Regex;
use serde_json::Value;
use tracing::info;

use crate::actions::{fetch_bytes, file_target, marker_target, upstream_file_path, ActionContext};
use crate::config::FeedFormat;
use crate::task::{TaskKind, TaskSpec};

/// Snapshot the real-time availability feed for this time bucket.
pub async fn fetch_availability(ctx: &ActionContext, spec: &TaskSpec) -> Result<()> {
    let city = ctx.city_config(&spec.id.params.city)?;
    info!(task = %spec.id, url = %city.availability_url, "fetching availability feed");

    let body = fetch_bytes(ctx, &city.availability_url).await?;
    file_target(spec)?.materialize(&body)?;
    Ok(())
}

/// Normalize one raw snapshot into
/// `id,timestamp,available_stands,available_bikes,status` CSV.
pub async fn availability_to_csv(ctx: &ActionContext, spec: &TaskSpec) -> Result<()> {
    let city = ctx.city_config(&spec.id.params.city)?;
    let raw_path = upstream_file_path(ctx, spec, TaskKind::FetchAvailability)?;
    let raw = fs::read_to_string(&raw_path)
        .with_context(|| format!("reading snapshot {:?}", raw_path))?;

    let records = match city.availability_format {
        FeedFormat::Json => parse_json_records(&raw, &city.availability_features)?,
        FeedFormat::Xml => parse_xml_records(&raw, &city.availability_features)?,
    };

    let mut rows: Vec<AvailabilityRow> = Vec::with_capacity(records.len());
    for record in records {
        match AvailabilityRow::from_record(&record) {
            Some(row) => rows.push(row),
            // Rows with a missing status or stands value are dropped,
            // not treated as malformed.
            None => continue,
        }
    }
    rows.sort_by_key(|r| r.id);

    let mut csv = String::from("id,timestamp,available_stands,available_bikes,status\n");
    for row in &rows {
        csv.push_str(&format!(
            "{},{},{},{},{}\n",
            row.id, row.timestamp, row.available_stands, row.available_bikes, row.status
        ));
    }

    info!(task = %spec.id, rows = rows.len(), "normalized availability snapshot");
    file_target(spec)?.materialize(csv.as_bytes())?;
    Ok(())
}

/// Insert one snapshot CSV into `<schema>_timeseries`, together with the
/// marker, in a single transaction. Re-running replaces any rows with the
/// same feed timestamps, so a retry converges instead of duplicating.
pub async fn availability_to_db(ctx: &ActionContext, spec: &TaskSpec) -> Result<()> {
    let city = ctx.city_config(&spec.id.params.city)?;
    let csv_path = upstream_file_path(ctx, spec, TaskKind::AvailabilityToCsv)?;
    let csv = fs::read_to_string(&csv_path)
        .with_context(|| format!("reading availability CSV {:?}", csv_path))?;

    let rows = parse_csv_rows(&csv)?;
    let schema = city.schema.clone();
    let marker = marker_target(spec)?.clone();

    info!(task = %spec.id, rows = rows.len(), "inserting availability into timeseries");
    let db = ctx.db.clone();
    tokio::task::spawn_blocking(move || {
        db.commit_with_marker(&marker.identity, &marker.schema, |tx| {
            let mut delete = tx.prepare_cached(&format!(
                "DELETE FROM {schema}_timeseries WHERE timestamp = ?1"
            ))?;
            let mut insert = tx.prepare_cached(&format!(
                "INSERT INTO {schema}_timeseries
                     (id, timestamp, available_stands, available_bikes, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            ))?;

            let mut seen_timestamps: Vec<&str> = Vec::new();
            for row in &rows {
                if !seen_timestamps.contains(&row.timestamp.as_str()) {
                    delete.execute([row.timestamp.as_str()])?;
                    seen_timestamps.push(&row.timestamp);
                }
                insert.execute((
                    row.id,
                    &row.timestamp,
                    row.available_stands,
                    row.available_bikes,
                    &row.status,
                ))?;
            }
            Ok(())
        })
    })
    .await
    .context("availability insert cancelled")??;
    Ok(())
}

/// One normalized availability record.
struct AvailabilityRow {
    id: i64,
    timestamp: String,
    available_stands: i64,
    available_bikes: i64,
    status: String,
}

impl AvailabilityRow {
    /// Build from a parsed record; `None` means the row should be
    /// dropped (missing status/stands), any other defect is an error
    /// surfaced by the caller through the CSV parse below.
    fn from_record(record: &BTreeMap<String, String>) -> Option<Self> {
        let get = |k: &str| record.get(k).map(String::as_str).unwrap_or("");

        let status = get("status");
        let stands = get("available_stands");
        if status.is_empty() || status == "None" || stands.is_empty() || stands == "None" {
            return None;
        }

        Some(Self {
            id: get("id").parse().ok()?,
            timestamp: normalize_timestamp(get("timestamp")).ok()?,
            available_stands: stands.parse().ok()?,
            available_bikes: get("available_bikes").parse().ok()?,
            status: status.to_string(),
        })
    }
}

/// Canonicalize feed timestamps to `%Y-%m-%d %H:%M:%S` so the database
/// can compare them lexicographically.
fn normalize_timestamp(raw: &str) -> Result<String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_local().format("%Y-%m-%d %H:%M:%S").to_string());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt.format("%Y-%m-%d %H:%M:%S").to_string());
        }
    }
    bail!("unrecognized timestamp '{raw}' in availability feed")
}

/// Pull the configured source fields out of a JSON payload. Two layouts
/// are understood: a tabular `{"fields": [...], "values": [[...]]}`
/// object, and a plain array of records (possibly under a `values` key).
fn parse_json_records(
    raw: &str,
    mapping: &BTreeMap<String, String>,
) -> Result<Vec<BTreeMap<String, String>>> {
    let value: Value = serde_json::from_str(raw).context("parsing availability JSON")?;

    let objects: Vec<&serde_json::Map<String, Value>> = match &value {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        Value::Object(map) => {
            if let (Some(fields), Some(rows)) = (
                map.get("fields").and_then(Value::as_array),
                map.get("values").and_then(Value::as_array),
            ) {
                return parse_json_tabular(fields, rows, mapping);
            }
            map.get("values")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(Value::as_object).collect())
                .ok_or_else(|| anyhow!("unrecognized availability JSON layout"))?
        }
        _ => bail!("unrecognized availability JSON layout"),
    };

    let mut records = Vec::with_capacity(objects.len());
    for obj in objects {
        let mut record = BTreeMap::new();
        for (column, source) in mapping {
            if let Some(v) = obj.get(source) {
                record.insert(column.clone(), json_scalar(v));
            }
        }
        records.push(record);
    }
    Ok(records)
}

/// The `{"fields": [...], "values": [[...]]}` layout: columns by
/// position.
fn parse_json_tabular(
    fields: &[Value],
    rows: &[Value],
    mapping: &BTreeMap<String, String>,
) -> Result<Vec<BTreeMap<String, String>>> {
    let field_names: Vec<&str> = fields.iter().filter_map(Value::as_str).collect();

    let mut positions: BTreeMap<String, usize> = BTreeMap::new();
    for (column, source) in mapping {
        let idx = field_names
            .iter()
            .position(|f| f == source)
            .ok_or_else(|| anyhow!("feed is missing field '{source}'"))?;
        positions.insert(column.clone(), idx);
    }

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let cells = row
            .as_array()
            .ok_or_else(|| anyhow!("tabular feed row is not an array"))?;
        let mut record = BTreeMap::new();
        for (column, &idx) in &positions {
            let cell = cells
                .get(idx)
                .ok_or_else(|| anyhow!("tabular feed row is missing column {idx}"))?;
            record.insert(column.clone(), json_scalar(cell));
        }
        records.push(record);
    }
    Ok(records)
}

fn json_scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Pull the configured source fields out of an XML/GML payload by tag
/// name, one match list per field, zipped positionally. The namespace
/// prefix is ignored.
fn parse_xml_records(
    raw: &str,
    mapping: &BTreeMap<String, String>,
) -> Result<Vec<BTreeMap<String, String>>> {
    let mut columns: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut expected_len: Option<usize> = None;

    for (column, source) in mapping {
        let pattern = format!(r"<(?:\w+:)?{}>([^<]*)</", regex::escape(source));
        let re = Regex::new(&pattern).context("building XML field pattern")?;
        let values: Vec<String> = re
            .captures_iter(raw)
            .map(|c| c[1].trim().to_string())
            .collect();

        match expected_len {
            None => expected_len = Some(values.len()),
            Some(n) if n != values.len() => bail!(
                "field '{source}' appears {} times, expected {n}",
                values.len()
            ),
            Some(_) => {}
        }
        columns.insert(column.clone(), values);
    }

    let len = expected_len.unwrap_or(0);
    let mut records = Vec::with_capacity(len);
    for i in 0..len {
        let mut record = BTreeMap::new();
        for (column, values) in &columns {
            record.insert(column.clone(), values[i].clone());
        }
        records.push(record);
    }
    Ok(records)
}

/// Parse a normalized availability CSV back into rows; a malformed line
/// is an error, not a silent drop.
fn parse_csv_rows(csv: &str) -> Result<Vec<AvailabilityRow>> {
    let mut rows = Vec::new();
    for (lineno, line) in csv.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 5 {
            bail!("malformed CSV line {}: '{line}'", lineno + 1);
        }
        rows.push(AvailabilityRow {
            id: fields[0]
                .parse()
                .with_context(|| format!("bad id on line {}", lineno + 1))?,
            timestamp: fields[1].to_string(),
            available_stands: fields[2]
                .parse()
                .with_context(|| format!("bad stands count on line {}", lineno + 1))?,
            available_bikes: fields[3]
                .parse()
                .with_context(|| format!("bad bikes count on line {}", lineno + 1))?,
            status: fields[4].to_string(),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CityConfig;

    fn mapping() -> BTreeMap<String, String> {
        CityConfig::AVAILABILITY_COLUMNS
            .iter()
            .map(|c| (c.to_string(), c.to_uppercase()))
            .collect()
    }

    #[test]
    fn json_array_of_records() {
        let raw = r#"[
            {"ID": 2, "TIMESTAMP": "2018-05-01T10:05:00", "AVAILABLE_STANDS": 5,
             "AVAILABLE_BIKES": 7, "STATUS": "OPEN"},
            {"ID": 1, "TIMESTAMP": "2018-05-01T10:05:00", "AVAILABLE_STANDS": 3,
             "AVAILABLE_BIKES": 0, "STATUS": "OPEN"}
        ]"#;
        let records = parse_json_records(raw, &mapping()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["id"], "2");
        assert_eq!(records[1]["available_stands"], "3");
    }

    #[test]
    fn json_tabular_layout() {
        let raw = r#"{"fields": ["ID", "TIMESTAMP", "AVAILABLE_STANDS",
                                 "AVAILABLE_BIKES", "STATUS"],
                      "values": [[1, "2018-05-01 10:05:00", 4, 6, "OPEN"]]}"#;
        let records = parse_json_records(raw, &mapping()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["available_bikes"], "6");
        assert_eq!(records[0]["status"], "OPEN");
    }

    #[test]
    fn xml_records_by_tag() {
        let raw = "<wfs:member><bm:ID>12</bm:ID><bm:TIMESTAMP>2018-05-01T10:05:00</bm:TIMESTAMP>\
                   <bm:AVAILABLE_STANDS>5</bm:AVAILABLE_STANDS>\
                   <bm:AVAILABLE_BIKES>2</bm:AVAILABLE_BIKES><bm:STATUS>CONNECTEE</bm:STATUS>\
                   </wfs:member>";
        let records = parse_xml_records(raw, &mapping()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], "12");
        assert_eq!(records[0]["status"], "CONNECTEE");
    }

    #[test]
    fn rows_with_missing_status_are_dropped() {
        let mut record: BTreeMap<String, String> = BTreeMap::new();
        record.insert("id".into(), "3".into());
        record.insert("timestamp".into(), "2018-05-01 10:05:00".into());
        record.insert("available_stands".into(), "None".into());
        record.insert("available_bikes".into(), "1".into());
        record.insert("status".into(), "OPEN".into());
        assert!(AvailabilityRow::from_record(&record).is_none());
    }

    #[test]
    fn timestamps_are_canonicalized() {
        assert_eq!(
            normalize_timestamp("2018-05-01T16:35:00").unwrap(),
            "2018-05-01 16:35:00"
        );
        assert!(normalize_timestamp("five past four").is_err());
    }
}
