use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::time::MissedTickBehavior;

use weather_etl_core::{
    Config, LoadError, Pipeline, RunReport, WeatherStore,
    config::parse_city_list,
    provider_from_config,
    schedule::{self, SweepTracker},
};

use crate::logging;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-etl", version, about = "Weather ETL pipeline")]
pub struct Cli {
    /// Path to the config file; defaults to the platform config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactively set the API key and city list.
    Configure,

    /// Run the pipeline for every configured city.
    Run {
        /// Keep running at the configured interval instead of exiting after one run.
        #[arg(long)]
        schedule: bool,
    },

    /// Delete records older than the retention window.
    Cleanup {
        /// Days to keep; defaults to `retention_days` from config.
        #[arg(long)]
        days: Option<u32>,
    },

    /// Show the most recent observation.
    Latest {
        /// Exact city name.
        #[arg(long)]
        city: Option<String>,
    },

    /// Search observations by city name (case-insensitive substring).
    Search {
        city: String,

        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(1..=100))]
        limit: u16,
    },

    /// List every city with stored observations.
    Cities,

    /// Aggregate statistics over all stored observations.
    Stats,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config_path = match &self.config {
            Some(path) => path.clone(),
            None => Config::config_file_path()?,
        };

        let config = Config::load_from(&config_path)?;
        let config = with_env_overrides(&self.command, config, |key| std::env::var(key).ok())?;

        let _log_guard = logging::init(config.log_dir.as_deref())?;

        match self.command {
            Command::Configure => configure(config, &config_path),
            Command::Run { schedule: false } => run_once(&config).await,
            Command::Run { schedule: true } => run_scheduled(&config).await,
            Command::Cleanup { days } => {
                let days = days.unwrap_or(config.retention_days);
                let store = open_store(&config)?;
                let removed = store.purge_older_than(days).map_err(store_error)?;
                println!("Removed {removed} records older than {days} days");
                Ok(())
            }
            Command::Latest { city } => {
                let store = open_store(&config)?;
                match store.latest(city.as_deref()).map_err(store_error)? {
                    Some(record) => print_json(&record),
                    None => Err(not_found(city.as_deref())),
                }
            }
            Command::Search { city, limit } => {
                let store = open_store(&config)?;
                let records = store.by_city(&city, usize::from(limit)).map_err(store_error)?;
                if records.is_empty() {
                    return Err(not_found(Some(&city)));
                }
                print_json(&records)
            }
            Command::Cities => {
                let store = open_store(&config)?;
                print_json(&store.distinct_city_names().map_err(store_error)?)
            }
            Command::Stats => {
                let store = open_store(&config)?;
                print_json(&store.aggregate_stats().map_err(store_error)?)
            }
        }
    }
}

/// Environment overrides apply to the running process only. `configure` works
/// on the file contents so the overrides are never written back.
fn with_env_overrides<F>(command: &Command, mut config: Config, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    if !matches!(command, Command::Configure) {
        config.apply_overrides(lookup)?;
    }
    Ok(config)
}

fn configure(mut config: Config, path: &Path) -> Result<()> {
    let api_key = inquire::Password::new("OpenWeather API key:")
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;

    let cities = inquire::Text::new("Cities (comma separated):")
        .with_default(&config.cities.join(", "))
        .prompt()
        .context("Failed to read city list")?;

    let country_code = inquire::Text::new("Country code:")
        .with_default(&config.country_code)
        .prompt()
        .context("Failed to read country code")?;

    config.api_key = Some(api_key.trim().to_string());
    config.cities = parse_city_list(&cities);
    config.country_code = country_code.trim().to_string();
    config.save_to(path)?;

    println!("Configuration saved to {}", path.display());
    Ok(())
}

fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let provider = provider_from_config(config)?;
    let store = WeatherStore::new(config.resolved_database_path()?);
    Ok(Pipeline::new(provider, store).with_city_delay(config.city_delay()))
}

async fn run_once(config: &Config) -> Result<()> {
    let mut pipeline = build_pipeline(config)?;
    let report = pipeline.run_all(&config.cities).await;
    print_json(&report)?;

    if report.success {
        Ok(())
    } else {
        Err(anyhow!("No city was processed successfully"))
    }
}

async fn run_scheduled(config: &Config) -> Result<()> {
    let mut pipeline = build_pipeline(config)?;
    let mut sweeps = SweepTracker::default();

    let mut interval = tokio::time::interval(config.schedule_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tracing::info!(
        interval_minutes = config.schedule_interval_minutes,
        cities = config.cities.len(),
        "scheduled mode started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let outcome = schedule::tick(
                    &mut pipeline,
                    &config.cities,
                    config.retention_days,
                    Utc::now(),
                    &mut sweeps,
                )
                .await;

                log_report(&outcome.report);
                match outcome.sweep {
                    Some(Ok(removed)) => tracing::info!(removed, "weekly retention sweep done"),
                    Some(Err(err)) => tracing::error!(error = %err, "scheduled invocation failed"),
                    None => {}
                }

                let health = pipeline.health();
                tracing::info!(
                    healthy = health.healthy,
                    database_connected = health.database_connected,
                    "health"
                );
            }
            result = &mut shutdown => {
                result.context("Failed to listen for shutdown signal")?;
                tracing::info!("shutdown requested, stopping scheduler");
                return Ok(());
            }
        }
    }
}

fn log_report(report: &RunReport) {
    match serde_json::to_string(report) {
        Ok(json) => tracing::info!(report = %json, "run report"),
        Err(err) => tracing::warn!(error = %err, "could not serialize run report"),
    }
}

fn open_store(config: &Config) -> Result<WeatherStore> {
    let mut store = WeatherStore::new(config.resolved_database_path()?);
    store.connect().map_err(store_error)?;
    store.ensure_schema().map_err(store_error)?;
    Ok(store)
}

/// Short, user-facing message; the full error goes to the log.
fn store_error(err: LoadError) -> anyhow::Error {
    tracing::error!(error = %err, "store operation failed");
    match err {
        LoadError::ConnectionLost(_) => anyhow!("Store unavailable"),
        _ => anyhow!("Internal store error"),
    }
}

fn not_found(city: Option<&str>) -> anyhow::Error {
    match city {
        Some(city) => anyhow!("No weather data found for {city}"),
        None => anyhow!("No weather data found"),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn search_limit_is_bounded() {
        assert!(Cli::try_parse_from(["weather-etl", "search", "paulo", "--limit", "100"]).is_ok());
        assert!(Cli::try_parse_from(["weather-etl", "search", "paulo", "--limit", "0"]).is_err());
        assert!(Cli::try_parse_from(["weather-etl", "search", "paulo", "--limit", "101"]).is_err());
    }

    #[test]
    fn run_defaults_to_single_execution() {
        let cli = Cli::try_parse_from(["weather-etl", "run"]).unwrap();
        assert!(matches!(cli.command, Command::Run { schedule: false }));

        let cli =
            Cli::try_parse_from(["weather-etl", "--config", "/tmp/c.toml", "run", "--schedule"])
                .unwrap();
        assert!(matches!(cli.command, Command::Run { schedule: true }));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
    }

    #[test]
    fn configure_ignores_environment_overrides() {
        let lookup = |key: &str| match key {
            "WEATHER_DB_PATH" => Some("/tmp/override.db".to_string()),
            "CLEANUP_DAYS" => Some("7".to_string()),
            _ => None,
        };

        let cfg = with_env_overrides(&Command::Configure, Config::default(), lookup).unwrap();
        assert_eq!(cfg, Config::default());

        let cfg = with_env_overrides(&Command::Cities, Config::default(), lookup).unwrap();
        assert_eq!(cfg.database_path, Some(PathBuf::from("/tmp/override.db")));
        assert_eq!(cfg.retention_days, 7);
    }

    #[test]
    fn store_errors_hide_internal_detail() {
        let err = store_error(LoadError::Unknown("disk I/O at page 42".into()));
        assert_eq!(err.to_string(), "Internal store error");

        let err = store_error(LoadError::not_connected());
        assert_eq!(err.to_string(), "Store unavailable");
    }
}
