//! Core library for the `weather-etl` pipeline.
//!
//! This crate defines:
//! - Configuration loading and environment overrides
//! - Extraction of current observations from OpenWeather
//! - Transformation and enrichment into canonical weather records
//! - The append-only SQLite store and its read queries
//! - Orchestration of runs, retention sweeps and health reporting
//!
//! It is used by `weather-etl` (the CLI), but the read queries on
//! [`WeatherStore`] are also meant for any service exposing the data.

pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod schedule;
pub mod store;
pub mod transform;

pub use config::Config;
pub use error::{ExtractError, LoadError, PipelineError, ScheduleError, ValidationError};
pub use model::{HumidityCategory, RawObservation, TemperatureCategory, WeatherRecord};
pub use pipeline::{HealthStatus, Pipeline, PipelineStats, RunReport, RunState};
pub use provider::{WeatherProvider, provider_from_config};
pub use store::{StoreStats, WeatherStore};
