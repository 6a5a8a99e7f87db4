use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// api_key = "..."
/// cities = ["São Paulo", "Rio de Janeiro"]
/// schedule_interval_minutes = 60
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// OpenWeather API key.
    pub api_key: Option<String>,
    pub cities: Vec<String>,
    /// Country appended to every city query, e.g. `q=São Paulo,BR`.
    pub country_code: String,
    pub lang: String,
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Pause between cities inside one run, to stay under provider rate limits.
    pub city_delay_ms: u64,
    pub schedule_interval_minutes: u64,
    pub retention_days: u32,
    /// SQLite database file; `None` resolves to the platform data directory.
    pub database_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            cities: vec![
                "São Paulo".to_string(),
                "Rio de Janeiro".to_string(),
                "Belo Horizonte".to_string(),
            ],
            country_code: "BR".to_string(),
            lang: "pt_br".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 30,
            city_delay_ms: 1000,
            schedule_interval_minutes: 60,
            retention_days: 30,
            database_path: None,
            log_dir: None,
        }
    }
}

impl Config {
    /// Load config from `path`, or return defaults if it doesn't exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return defaults.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// Apply overrides from an arbitrary key lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENWEATHER_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(cities) = get("CITIES") {
            self.cities = parse_city_list(&cities);
        }
        if let Some(code) = get("COUNTRY_CODE") {
            self.country_code = code.trim().to_string();
        }
        if let Some(minutes) = get("SCHEDULE_INTERVAL_MINUTES") {
            self.schedule_interval_minutes = parse_number("SCHEDULE_INTERVAL_MINUTES", &minutes)?;
        }
        if let Some(days) = get("CLEANUP_DAYS") {
            self.retention_days = parse_number("CLEANUP_DAYS", &days)?;
        }
        if let Some(path) = get("WEATHER_DB_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }

        Ok(())
    }

    /// Returns the API key or a hint on how to configure one.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty()).ok_or_else(|| {
            anyhow!(
                "No OpenWeather API key configured.\n\
                 Hint: run `weather-etl configure` or set OPENWEATHER_API_KEY."
            )
        })
    }

    /// Database location, falling back to `weather.db` in the platform data directory.
    pub fn resolved_database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join("weather.db")),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn city_delay(&self) -> Duration {
        Duration::from_millis(self.city_delay_ms)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_minutes.max(1) * 60)
    }
}

/// Split a comma separated city list, trimming blanks.
pub fn parse_city_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>(var: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid value for {var}: '{value}' is not a valid number"))
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("dev", "weather-etl", "weather-etl")
        .ok_or_else(|| anyhow!("Could not determine platform config directory"))
}
