//! Append-only SQLite store for weather records.
//!
//! `WeatherStore` owns at most one connection. It is not meant to be shared
//! across threads; concurrent workers should each open their own store.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rusqlite::{
    Connection, OptionalExtension, Row, RowIndex, functions::FunctionFlags, named_params,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{error::LoadError, model::WeatherRecord, transform::round2};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS weather_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    city_id INTEGER,
    city_name TEXT NOT NULL CHECK (length(city_name) > 0),
    country_code TEXT,
    latitude REAL,
    longitude REAL,
    temperature REAL,
    temperature_feels_like REAL,
    temperature_min REAL,
    temperature_max REAL,
    pressure INTEGER,
    humidity INTEGER,
    sea_level_pressure INTEGER,
    ground_level_pressure INTEGER,
    weather_main TEXT,
    weather_description TEXT,
    weather_icon TEXT,
    wind_speed REAL,
    wind_direction INTEGER,
    wind_gust REAL,
    cloudiness INTEGER,
    visibility INTEGER,
    data_timestamp TEXT,
    sunrise TEXT,
    sunset TEXT,
    extracted_at TEXT,
    processed_at TEXT,
    timezone_offset INTEGER,
    heat_index REAL,
    temperature_category TEXT,
    humidity_category TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_weather_city_name ON weather_data(city_name);
CREATE INDEX IF NOT EXISTS idx_weather_data_timestamp ON weather_data(data_timestamp);
CREATE INDEX IF NOT EXISTS idx_weather_created_at ON weather_data(created_at);
"#;

const INSERT: &str = r#"
INSERT INTO weather_data (
    city_id, city_name, country_code, latitude, longitude,
    temperature, temperature_feels_like, temperature_min, temperature_max,
    pressure, humidity, sea_level_pressure, ground_level_pressure,
    weather_main, weather_description, weather_icon,
    wind_speed, wind_direction, wind_gust,
    cloudiness, visibility,
    data_timestamp, sunrise, sunset, extracted_at, processed_at,
    timezone_offset, heat_index, temperature_category, humidity_category
) VALUES (
    :city_id, :city_name, :country_code, :latitude, :longitude,
    :temperature, :feels_like, :temp_min, :temp_max,
    :pressure, :humidity, :sea_level_pressure, :ground_level_pressure,
    :weather_main, :weather_description, :weather_icon,
    :wind_speed, :wind_direction, :wind_gust,
    :cloudiness, :visibility,
    :data_timestamp, :sunrise, :sunset, :extracted_at, :processed_at,
    :timezone_offset, :heat_index, :temperature_category, :humidity_category
)
"#;

/// Fixed-width UTC format: lexical order equals chronological order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub const MAX_QUERY_LIMIT: usize = 100;

/// Aggregate view over the whole table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_records: i64,
    pub total_cities: i64,
    pub oldest_data: Option<DateTime<Utc>>,
    pub newest_data: Option<DateTime<Utc>>,
    pub average_temperature: Option<f64>,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub average_humidity: Option<f64>,
    /// Sorted by record count, largest first.
    pub cities: Vec<CityStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityStats {
    pub name: String,
    pub record_count: i64,
    pub avg_temperature: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct WeatherStore {
    path: PathBuf,
    conn: Option<Connection>,
}

impl WeatherStore {
    /// Create a store for the database at `path`. No connection is opened yet.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf(), conn: None }
    }

    /// Store backed by a private in-memory database.
    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connect(&mut self) -> Result<(), LoadError> {
        if self.conn.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                LoadError::ConnectionLost(format!(
                    "cannot create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let conn = Connection::open(&self.path)?;
        conn.create_scalar_function(
            "casefold",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let value: Option<String> = ctx.get(0)?;
                Ok(value.map(|v| v.to_lowercase()))
            },
        )?;

        tracing::info!(path = %self.path.display(), "store connected");
        self.conn = Some(conn);
        Ok(())
    }

    /// Close the connection. Safe to call when already disconnected.
    pub fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, err)) = conn.close() {
                tracing::warn!(error = %err, "error while closing store connection");
            }
            tracing::info!("store disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Round-trip probe used by health checks.
    pub fn ping(&self) -> bool {
        self.conn
            .as_ref()
            .is_some_and(|c| c.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok())
    }

    /// Create the table and indexes if they are absent.
    pub fn ensure_schema(&self) -> Result<(), LoadError> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Append one record. Returns the new row id.
    pub fn insert(&self, record: &WeatherRecord) -> Result<i64, LoadError> {
        let conn = self.conn()?;

        conn.execute(
            INSERT,
            named_params! {
                ":city_id": record.city_id,
                ":city_name": record.city_name,
                ":country_code": record.country_code,
                ":latitude": record.latitude,
                ":longitude": record.longitude,
                ":temperature": record.temperature,
                ":feels_like": record.feels_like,
                ":temp_min": record.temp_min,
                ":temp_max": record.temp_max,
                ":pressure": record.pressure,
                ":humidity": record.humidity,
                ":sea_level_pressure": record.sea_level_pressure,
                ":ground_level_pressure": record.ground_level_pressure,
                ":weather_main": record.weather_main,
                ":weather_description": record.weather_description,
                ":weather_icon": record.weather_icon,
                ":wind_speed": record.wind_speed,
                ":wind_direction": record.wind_direction,
                ":wind_gust": record.wind_gust,
                ":cloudiness": record.cloudiness,
                ":visibility": record.visibility,
                ":data_timestamp": record.data_timestamp.map(format_timestamp),
                ":sunrise": record.sunrise.map(format_timestamp),
                ":sunset": record.sunset.map(format_timestamp),
                ":extracted_at": record.extracted_at.map(format_timestamp),
                ":processed_at": record.processed_at.map(format_timestamp),
                ":timezone_offset": record.timezone_offset,
                ":heat_index": record.heat_index,
                ":temperature_category": record.temperature_category.map(|c| c.as_str()),
                ":humidity_category": record.humidity_category.map(|c| c.as_str()),
            },
        )?;

        let id = conn.last_insert_rowid();
        tracing::info!(city = %record.city_name, id, "record loaded");
        Ok(id)
    }

    /// Insert records one by one; a failed record does not stop the batch.
    /// Returns how many were stored.
    pub fn insert_many(&self, records: &[WeatherRecord]) -> usize {
        let loaded = records
            .iter()
            .filter(|record| match self.insert(record) {
                Ok(_) => true,
                Err(err) => {
                    tracing::error!(city = %record.city_name, error = %err, "failed to load record");
                    false
                }
            })
            .count();

        tracing::info!(loaded, total = records.len(), "batch load finished");
        loaded
    }

    /// Most recent record by observation time, optionally for one exact city name.
    pub fn latest(&self, city: Option<&str>) -> Result<Option<WeatherRecord>, LoadError> {
        let conn = self.conn()?;

        let record = match city {
            Some(city) => conn
                .query_row(
                    "SELECT * FROM weather_data WHERE city_name = ?1 \
                     ORDER BY data_timestamp DESC, id DESC LIMIT 1",
                    [city],
                    row_to_record,
                )
                .optional()?,
            None => conn
                .query_row(
                    "SELECT * FROM weather_data ORDER BY data_timestamp DESC, id DESC LIMIT 1",
                    [],
                    row_to_record,
                )
                .optional()?,
        };

        Ok(record)
    }

    /// Case-insensitive substring search on city name, newest first.
    /// `limit` is clamped into `1..=100`.
    pub fn by_city(&self, substring: &str, limit: usize) -> Result<Vec<WeatherRecord>, LoadError> {
        let limit = limit.clamp(1, MAX_QUERY_LIMIT) as i64;
        let needle = substring.to_lowercase();

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM weather_data WHERE instr(casefold(city_name), ?1) > 0 \
             ORDER BY data_timestamp DESC, id DESC LIMIT ?2",
        )?;
        let records = stmt
            .query_map(rusqlite::params![needle, limit], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    pub fn distinct_city_names(&self) -> Result<Vec<String>, LoadError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT city_name FROM weather_data ORDER BY city_name")?;
        let names = stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn aggregate_stats(&self) -> Result<StoreStats, LoadError> {
        let conn = self.conn()?;

        let mut stats = conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT city_name), MIN(data_timestamp), MAX(data_timestamp), \
                    AVG(temperature), MIN(temperature), MAX(temperature), AVG(humidity) \
             FROM weather_data",
            [],
            |row| {
                Ok(StoreStats {
                    total_records: row.get(0)?,
                    total_cities: row.get(1)?,
                    oldest_data: get_timestamp(row, 2)?,
                    newest_data: get_timestamp(row, 3)?,
                    average_temperature: row.get::<_, Option<f64>>(4)?.map(round2),
                    min_temperature: row.get(5)?,
                    max_temperature: row.get(6)?,
                    average_humidity: row.get::<_, Option<f64>>(7)?.map(round2),
                    cities: Vec::new(),
                })
            },
        )?;

        let mut stmt = conn.prepare(
            "SELECT city_name, COUNT(*) AS record_count, AVG(temperature), MAX(data_timestamp) \
             FROM weather_data GROUP BY city_name ORDER BY record_count DESC, city_name",
        )?;
        stats.cities = stmt
            .query_map([], |row| {
                Ok(CityStats {
                    name: row.get(0)?,
                    record_count: row.get(1)?,
                    avg_temperature: row.get::<_, Option<f64>>(2)?.map(round2),
                    last_update: get_timestamp(row, 3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(stats)
    }

    /// Delete rows whose `created_at` is more than `days` days old.
    ///
    /// A window reaching past the earliest representable date deletes nothing.
    pub fn purge_older_than(&self, days: u32) -> Result<usize, LoadError> {
        let cutoff = Duration::try_days(i64::from(days))
            .and_then(|window| Utc::now().checked_sub_signed(window));

        match cutoff {
            Some(cutoff) => self.purge_created_before(cutoff),
            None => {
                self.conn()?;
                tracing::info!(days, "retention window predates every record, nothing purged");
                Ok(0)
            }
        }
    }

    fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize, LoadError> {
        let removed = self.conn()?.execute(
            "DELETE FROM weather_data WHERE created_at < ?1",
            [format_timestamp(cutoff)],
        )?;

        tracing::info!(removed, cutoff = %cutoff, "old records purged");
        Ok(removed)
    }

    fn conn(&self) -> Result<&Connection, LoadError> {
        self.conn.as_ref().ok_or_else(LoadError::not_connected)
    }
}

impl Drop for WeatherStore {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Unparseable values are coerced to `None` instead of failing the row.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").ok().map(|n| n.and_utc())
        })
}

fn get_timestamp<I: RowIndex>(row: &Row<'_>, idx: I) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row.get::<_, Option<String>>(idx)?.as_deref().and_then(parse_timestamp))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<WeatherRecord> {
    let temperature_category: Option<String> = row.get("temperature_category")?;
    let humidity_category: Option<String> = row.get("humidity_category")?;

    Ok(WeatherRecord {
        id: row.get("id")?,
        city_id: row.get("city_id")?,
        city_name: row.get("city_name")?,
        country_code: row.get("country_code")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        temperature: row.get("temperature")?,
        feels_like: row.get("temperature_feels_like")?,
        temp_min: row.get("temperature_min")?,
        temp_max: row.get("temperature_max")?,
        pressure: row.get("pressure")?,
        humidity: row.get("humidity")?,
        sea_level_pressure: row.get("sea_level_pressure")?,
        ground_level_pressure: row.get("ground_level_pressure")?,
        weather_main: row.get("weather_main")?,
        weather_description: row.get("weather_description")?,
        weather_icon: row.get("weather_icon")?,
        wind_speed: row.get("wind_speed")?,
        wind_direction: row.get("wind_direction")?,
        wind_gust: row.get("wind_gust")?,
        cloudiness: row.get("cloudiness")?,
        visibility: row.get("visibility")?,
        data_timestamp: get_timestamp(row, "data_timestamp")?,
        sunrise: get_timestamp(row, "sunrise")?,
        sunset: get_timestamp(row, "sunset")?,
        extracted_at: get_timestamp(row, "extracted_at")?,
        processed_at: get_timestamp(row, "processed_at")?,
        timezone_offset: row.get("timezone_offset")?,
        heat_index: row.get("heat_index")?,
        temperature_category: temperature_category.and_then(|c| c.parse().ok()),
        humidity_category: humidity_category.and_then(|c| c.parse().ok()),
        created_at: get_timestamp(row, "created_at")?,
    })
}
