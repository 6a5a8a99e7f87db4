use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::{fmt, str::FromStr};

/// One provider response for one city, plus the time it was fetched.
///
/// Transient: produced by a provider and consumed by the transformer within
/// a single run.
#[derive(Debug, Clone)]
pub struct RawObservation {
    pub payload: OwPayload,
    pub extracted_at: DateTime<Utc>,
}

/// OpenWeather current-weather payload. Every field is optional so decoding
/// only fails on malformed JSON or type mismatches, never on absent keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwPayload {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub coord: Option<OwCoord>,
    pub main: Option<OwMain>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub weather: Vec<OwWeather>,
    pub wind: Option<OwWind>,
    pub clouds: Option<OwClouds>,
    pub sys: Option<OwSys>,
    pub visibility: Option<i64>,
    pub dt: Option<i64>,
    pub timezone: Option<i64>,
}

/// `"weather": null` reads as an empty list, like an absent key.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwCoord {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwMain {
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub pressure: Option<i64>,
    pub humidity: Option<i64>,
    pub sea_level: Option<i64>,
    pub grnd_level: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwWeather {
    pub main: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwWind {
    pub speed: Option<f64>,
    pub deg: Option<i64>,
    pub gust: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwClouds {
    pub all: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwSys {
    pub country: Option<String>,
    pub sunrise: Option<i64>,
    pub sunset: Option<i64>,
}

/// Normalized, validated weather row as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    /// Store surrogate key; `None` until inserted.
    pub id: Option<i64>,

    pub city_id: Option<i64>,
    pub city_name: String,
    pub country_code: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    pub temperature: f64,
    pub feels_like: Option<f64>,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub pressure: i64,
    pub humidity: i64,
    pub sea_level_pressure: Option<i64>,
    pub ground_level_pressure: Option<i64>,

    pub weather_main: String,
    pub weather_description: Option<String>,
    pub weather_icon: Option<String>,

    pub wind_speed: Option<f64>,
    pub wind_direction: Option<i64>,
    pub wind_gust: Option<f64>,

    pub cloudiness: Option<i64>,
    pub visibility: Option<i64>,

    pub data_timestamp: Option<DateTime<Utc>>,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
    pub extracted_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub timezone_offset: Option<i64>,

    pub heat_index: Option<f64>,
    pub temperature_category: Option<TemperatureCategory>,
    pub humidity_category: Option<HumidityCategory>,

    /// Assigned by the store on insert.
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureCategory {
    Cold,
    Mild,
    Hot,
    VeryHot,
}

impl TemperatureCategory {
    /// Both band edges at 10 and 25 belong to `Mild`; 35 belongs to `Hot`.
    pub fn from_celsius(temp: f64) -> Self {
        if temp < 10.0 {
            TemperatureCategory::Cold
        } else if temp <= 25.0 {
            TemperatureCategory::Mild
        } else if temp <= 35.0 {
            TemperatureCategory::Hot
        } else {
            TemperatureCategory::VeryHot
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureCategory::Cold => "Cold",
            TemperatureCategory::Mild => "Mild",
            TemperatureCategory::Hot => "Hot",
            TemperatureCategory::VeryHot => "VeryHot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HumidityCategory {
    Low,
    Moderate,
    High,
}

impl HumidityCategory {
    pub fn from_percent(humidity: f64) -> Self {
        if humidity <= 30.0 {
            HumidityCategory::Low
        } else if humidity < 60.0 {
            HumidityCategory::Moderate
        } else {
            HumidityCategory::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HumidityCategory::Low => "Low",
            HumidityCategory::Moderate => "Moderate",
            HumidityCategory::High => "High",
        }
    }
}

impl fmt::Display for TemperatureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for HumidityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemperatureCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Cold" => Ok(TemperatureCategory::Cold),
            "Mild" => Ok(TemperatureCategory::Mild),
            "Hot" => Ok(TemperatureCategory::Hot),
            "VeryHot" => Ok(TemperatureCategory::VeryHot),
            _ => Err(anyhow::anyhow!("Unknown temperature category '{s}'")),
        }
    }
}

impl FromStr for HumidityCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(HumidityCategory::Low),
            "Moderate" => Ok(HumidityCategory::Moderate),
            "High" => Ok(HumidityCategory::High),
            _ => Err(anyhow::anyhow!("Unknown humidity category '{s}'")),
        }
    }
}
