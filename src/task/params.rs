// src/task/params.rs

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, Timelike};

use crate::task::kind::TaskKind;

/// Parameter binding for one task instance.
///
/// `timestamp` is always quantized down to the availability bucket width,
/// so two requests inside the same bucket carry the same binding and
/// collapse to one task identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskParams {
    pub city: String,
    pub timestamp: Option<NaiveDateTime>,
    pub date: Option<NaiveDate>,
}

impl TaskParams {
    /// Binding for city-scoped station steps.
    pub fn for_city(city: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            timestamp: None,
            date: None,
        }
    }

    /// Binding for availability steps; `timestamp` is quantized to the
    /// enclosing `interval_minutes` bucket.
    pub fn for_snapshot(
        city: impl Into<String>,
        timestamp: NaiveDateTime,
        interval_minutes: u32,
    ) -> Self {
        Self {
            city: city.into(),
            timestamp: Some(quantize(timestamp, interval_minutes)),
            date: None,
        }
    }

    /// Binding for daily aggregation steps.
    pub fn for_date(city: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            city: city.into(),
            timestamp: None,
            date: Some(date),
        }
    }
}

/// Quantize a timestamp down to its enclosing bucket: seconds dropped,
/// minutes-of-day floored to a multiple of `interval_minutes`. Bucket
/// starts line up with the day grid for any width that divides a day.
pub fn quantize(ts: NaiveDateTime, interval_minutes: u32) -> NaiveDateTime {
    let interval = interval_minutes.max(1);
    let minutes = ts.hour() * 60 + ts.minute();
    let bucket = minutes - minutes % interval;
    ts.date()
        .and_hms_opt(bucket / 60, bucket % 60, 0)
        .unwrap_or(ts)
}

/// Unique identity of one unit of work: `(kind, parameter binding)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId {
    pub kind: TaskKind,
    pub params: TaskParams,
}

impl TaskId {
    pub fn new(kind: TaskKind, params: TaskParams) -> Self {
        Self { kind, params }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}", self.kind, self.params.city)?;
        if let Some(ts) = self.params.timestamp {
            write!(f, ", {}", ts.format("%Y-%m-%dT%H:%M"))?;
        }
        if let Some(date) = self.params.date {
            write!(f, ", {date}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn quantize_floors_to_bucket() {
        assert_eq!(quantize(ts(10, 7, 42), 5), ts(10, 5, 0));
        assert_eq!(quantize(ts(10, 5, 0), 5), ts(10, 5, 0));
        assert_eq!(quantize(ts(10, 4, 59), 5), ts(10, 0, 0));
    }

    #[test]
    fn wide_buckets_floor_across_hours() {
        assert_eq!(quantize(ts(9, 30, 0), 480), ts(8, 0, 0));
        assert_eq!(quantize(ts(16, 0, 0), 480), ts(16, 0, 0));
    }

    #[test]
    fn same_bucket_collapses_to_one_identity() {
        let a = TaskParams::for_snapshot("bordeaux", ts(10, 6, 1), 5);
        let b = TaskParams::for_snapshot("bordeaux", ts(10, 9, 59), 5);
        assert_eq!(
            TaskId::new(TaskKind::FetchAvailability, a),
            TaskId::new(TaskKind::FetchAvailability, b)
        );
    }

    #[test]
    fn identity_display_names_kind_and_binding() {
        let id = TaskId::new(
            TaskKind::FetchAvailability,
            TaskParams::for_snapshot("lyon", ts(16, 35, 0), 5),
        );
        assert_eq!(id.to_string(), "fetch-availability(lyon, 2018-05-01T16:35)");
    }
}
