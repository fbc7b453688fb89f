// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [pipeline]
/// data_dir = "datarepo"
/// workers = 4
/// availability_interval_minutes = 5
/// shapefile_loader = "shp2sqlite"
///
/// [database]
/// path = "velodag.db"
///
/// [city.bordeaux]
/// schema = "bordeaux"
/// srid = "2154"
/// typename = "CI_STVEL_P"
/// stations_url = "https://..."
/// availability_url = "https://..."
/// availability_format = "xml"
/// ```
///
/// All sections except `[city.*]` are optional and have defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub database: DatabaseSection,

    /// All supported cities from `[city.<name>]`. Keys are city names
    /// (e.g. `"bordeaux"`, `"lyon"`); requesting a city not listed here
    /// is a configuration error.
    #[serde(default)]
    pub city: BTreeMap<String, CityConfig>,
}

impl Config {
    /// Look up a city; `None` means the city is not supported.
    pub fn city(&self, name: &str) -> Option<&CityConfig> {
        self.city.get(name)
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Root directory for all file targets and intermediate artifacts.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Maximum number of task instances executing concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Width of the availability time bucket, in minutes. Two requests
    /// within the same bucket collapse to one task identity.
    #[serde(default = "default_interval")]
    pub availability_interval_minutes: u32,

    /// External shapefile-to-table loader program. Invoked as
    /// `<loader> <srid> <shapefile> <table> <db path>`.
    #[serde(default = "default_shapefile_loader")]
    pub shapefile_loader: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("datarepo")
}

fn default_workers() -> usize {
    4
}

fn default_interval() -> u32 {
    5
}

fn default_shapefile_loader() -> String {
    "shp2sqlite".to_string()
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            workers: default_workers(),
            availability_interval_minutes: default_interval(),
            shapefile_loader: default_shapefile_loader(),
        }
    }
}

/// `[database]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("velodag.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Format of a city's real-time availability feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    Xml,
    Json,
}

impl FeedFormat {
    /// File extension used for the raw feed snapshot.
    pub fn extension(self) -> &'static str {
        match self {
            FeedFormat::Xml => "xml",
            FeedFormat::Json => "json",
        }
    }
}

/// `[city.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CityConfig {
    /// Namespace for this city's tables (`<schema>_stations`, ...) and for
    /// database marker rows.
    pub schema: String,

    /// Projection code passed to the external shapefile loader.
    pub srid: String,

    /// Layer name of the stations shapefile inside the downloaded archive.
    pub typename: String,

    /// URL of the stations shapefile archive.
    pub stations_url: String,

    /// URL of the real-time availability feed.
    pub availability_url: String,

    /// Wire format of the availability feed.
    pub availability_format: FeedFormat,

    /// Source-column names for the normalized `stations` table, keyed by
    /// normalized column name (`id`, `name`, `address`, `city`,
    /// `nb_stations`).
    #[serde(default)]
    pub features: BTreeMap<String, String>,

    /// Source-field names in the availability feed, keyed by normalized
    /// column name (`id`, `timestamp`, `available_stands`,
    /// `available_bikes`, `status`).
    #[serde(default)]
    pub availability_features: BTreeMap<String, String>,
}

impl CityConfig {
    /// Columns of the normalized `stations` table, in order.
    pub const STATION_COLUMNS: [&'static str; 5] =
        ["id", "name", "address", "city", "nb_stations"];

    /// Columns of the normalized availability CSV / `timeseries` table.
    pub const AVAILABILITY_COLUMNS: [&'static str; 5] = [
        "id",
        "timestamp",
        "available_stands",
        "available_bikes",
        "status",
    ];
}
