// src/task/kind.rs

use std::fmt;
use std::str::FromStr;

/// The closed set of pipeline step types.
///
/// Station steps are parameterized by city only; availability steps add a
/// time bucket; aggregation steps add a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskKind {
    /// Download the stations shapefile archive for a city.
    FetchStations,
    /// Extract the downloaded archive.
    UnzipStations,
    /// Load the extracted shapefile into `<schema>_raw_stations` via the
    /// external loader subprocess.
    LoadStationsShapefile,
    /// Rebuild the normalized `<schema>_stations` table.
    NormalizeStations,
    /// Snapshot the real-time availability feed for one time bucket.
    FetchAvailability,
    /// Normalize one availability snapshot into CSV.
    AvailabilityToCsv,
    /// Insert one availability CSV into `<schema>_timeseries`.
    AvailabilityToDb,
    /// Aggregate one day of timeseries into per-station transaction counts.
    AggregateTransactions,
    /// Insert one day of transaction counts into `<schema>_transactions`.
    TransactionsToDb,
}

/// Which parameters a task kind binds, beyond the city.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamShape {
    CityOnly,
    CityAndTimestamp,
    CityAndDate,
}

impl TaskKind {
    pub fn param_shape(self) -> ParamShape {
        match self {
            TaskKind::FetchStations
            | TaskKind::UnzipStations
            | TaskKind::LoadStationsShapefile
            | TaskKind::NormalizeStations => ParamShape::CityOnly,
            TaskKind::FetchAvailability
            | TaskKind::AvailabilityToCsv
            | TaskKind::AvailabilityToDb => ParamShape::CityAndTimestamp,
            TaskKind::AggregateTransactions | TaskKind::TransactionsToDb => ParamShape::CityAndDate,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TaskKind::FetchStations => "fetch-stations",
            TaskKind::UnzipStations => "unzip-stations",
            TaskKind::LoadStationsShapefile => "load-stations-shapefile",
            TaskKind::NormalizeStations => "normalize-stations",
            TaskKind::FetchAvailability => "fetch-availability",
            TaskKind::AvailabilityToCsv => "availability-to-csv",
            TaskKind::AvailabilityToDb => "availability-to-db",
            TaskKind::AggregateTransactions => "aggregate-transactions",
            TaskKind::TransactionsToDb => "transactions-to-db",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fetch-stations" => Ok(TaskKind::FetchStations),
            "unzip-stations" => Ok(TaskKind::UnzipStations),
            "load-stations-shapefile" => Ok(TaskKind::LoadStationsShapefile),
            "normalize-stations" => Ok(TaskKind::NormalizeStations),
            "fetch-availability" => Ok(TaskKind::FetchAvailability),
            "availability-to-csv" => Ok(TaskKind::AvailabilityToCsv),
            "availability-to-db" => Ok(TaskKind::AvailabilityToDb),
            "aggregate-transactions" => Ok(TaskKind::AggregateTransactions),
            "transactions-to-db" => Ok(TaskKind::TransactionsToDb),
            other => Err(format!("unknown task kind: {other}")),
        }
    }
}
