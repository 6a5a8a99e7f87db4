//! Extract → transform → load orchestration.
//!
//! A [`Pipeline`] processes cities strictly one after another. Every stage
//! failure is caught here and recorded against its city; nothing escapes
//! [`Pipeline::run_all`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};

use crate::{
    error::{LoadError, PipelineError},
    provider::WeatherProvider,
    store::WeatherStore,
    transform,
};

/// A run older than this makes the pipeline unhealthy.
const HEALTHY_RUN_AGE_HOURS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    PartiallyFailed,
}

/// Lifetime counters, kept in memory for the life of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_runs: u64,
    pub successful_extractions: u64,
    pub failed_extractions: u64,
    pub failed_transformations: u64,
    pub successful_loads: u64,
    pub failed_loads: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityOutcome {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one `run_all` execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub execution_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub success: bool,
    pub status: RunState,
    pub successful_cities: usize,
    pub total_cities: usize,
    pub city_results: BTreeMap<String, CityOutcome>,
    pub statistics: PipelineStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub database_connected: bool,
    pub last_run_recent: bool,
    pub statistics: PipelineStats,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Pipeline {
    provider: Box<dyn WeatherProvider>,
    store: WeatherStore,
    city_delay: Duration,
    state: RunState,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(provider: Box<dyn WeatherProvider>, store: WeatherStore) -> Self {
        Self {
            provider,
            store,
            city_delay: Duration::from_secs(1),
            state: RunState::Idle,
            stats: PipelineStats::default(),
        }
    }

    /// Pause between consecutive cities within a run.
    pub fn with_city_delay(mut self, delay: Duration) -> Self {
        self.city_delay = delay;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn store(&self) -> &WeatherStore {
        &self.store
    }

    /// Connect and create the schema if no connection is open.
    pub fn ensure_store(&mut self) -> Result<(), LoadError> {
        if self.store.is_connected() {
            return Ok(());
        }

        self.store.connect()?;
        if let Err(err) = self.store.ensure_schema() {
            self.store.disconnect();
            return Err(err);
        }

        tracing::info!("store ready");
        Ok(())
    }

    /// Run extract → transform → enrich → load for one city.
    pub async fn run_one(&mut self, city: &str) -> bool {
        self.run_city(city).await.is_ok()
    }

    async fn run_city(&mut self, city: &str) -> Result<i64, PipelineError> {
        tracing::info!(city = %city, "starting city");

        let raw = match self.provider.extract(city, None).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(city = %city, error = %err, "extraction failed");
                self.stats.failed_extractions += 1;
                return Err(err.into());
            }
        };
        self.stats.successful_extractions += 1;

        let record = match transform::transform(&raw) {
            Ok(record) => transform::enrich(record),
            Err(err) => {
                tracing::warn!(city = %city, error = %err, "observation rejected");
                self.stats.failed_transformations += 1;
                return Err(err.into());
            }
        };

        match self.store.insert(&record) {
            Ok(id) => {
                self.stats.successful_loads += 1;
                tracing::info!(city = %city, id, "city completed");
                Ok(id)
            }
            Err(err) => {
                tracing::error!(city = %city, error = %err, "load failed");
                self.stats.failed_loads += 1;
                Err(err.into())
            }
        }
    }

    /// Process every city in order and report the outcome.
    ///
    /// The run succeeds when at least one city was loaded. A store that
    /// cannot be reached yields a failed report with no city results.
    pub async fn run_all(&mut self, cities: &[String]) -> RunReport {
        let start_time = Utc::now();
        self.state = RunState::Running;
        self.stats.total_runs += 1;
        self.stats.last_run = Some(start_time);

        tracing::info!(cities = cities.len(), "pipeline run started");

        if let Err(err) = self.ensure_store() {
            tracing::error!(error = %err, "store unavailable, skipping run");
            self.state = RunState::PartiallyFailed;
            return self.report(start_time, BTreeMap::new(), 0, cities.len());
        }

        let mut results = BTreeMap::new();
        let mut successful_cities = 0;
        let mut lost_connection = false;

        for (idx, city) in cities.iter().enumerate() {
            if idx > 0 && !self.city_delay.is_zero() {
                tokio::time::sleep(self.city_delay).await;
            }

            let outcome = match self.run_city(city).await {
                Ok(_) => {
                    successful_cities += 1;
                    CityOutcome { success: true, timestamp: Utc::now(), error: None }
                }
                Err(err) => {
                    lost_connection |=
                        matches!(&err, PipelineError::Load(load) if load.is_connection_lost());
                    CityOutcome {
                        success: false,
                        timestamp: Utc::now(),
                        error: Some(err.to_string()),
                    }
                }
            };
            results.insert(city.clone(), outcome);
        }

        if lost_connection {
            tracing::warn!("store connection lost during run, reconnecting on next run");
            self.store.disconnect();
        }

        let report = self.report(start_time, results, successful_cities, cities.len());
        self.state =
            if report.successful_cities == report.total_cities && report.total_cities > 0 {
                RunState::Completed
            } else {
                RunState::PartiallyFailed
            };

        tracing::info!(
            successful = report.successful_cities,
            total = report.total_cities,
            "pipeline run finished"
        );

        RunReport { status: self.state, ..report }
    }

    fn report(
        &mut self,
        start_time: DateTime<Utc>,
        city_results: BTreeMap<String, CityOutcome>,
        successful_cities: usize,
        total_cities: usize,
    ) -> RunReport {
        let end_time = Utc::now();
        let success = successful_cities > 0;

        if success {
            self.stats.last_success = Some(end_time);
        }

        RunReport {
            execution_id: format!("etl_{}", start_time.timestamp()),
            start_time,
            end_time,
            duration_seconds: (end_time - start_time).num_milliseconds() as f64 / 1000.0,
            success,
            status: self.state,
            successful_cities,
            total_cities,
            city_results,
            statistics: self.stats.clone(),
        }
    }

    /// Delete records older than `days_to_keep` days.
    pub fn retention_sweep(&mut self, days_to_keep: u32) -> Result<usize, LoadError> {
        self.ensure_store()?;

        let removed = self.store.purge_older_than(days_to_keep)?;
        tracing::info!(removed, days_to_keep, "retention sweep finished");
        Ok(removed)
    }

    pub fn health(&self) -> HealthStatus {
        let now = Utc::now();
        let database_connected = self.store.ping();
        let last_run_recent = self
            .stats
            .last_run
            .is_some_and(|last| now - last < ChronoDuration::hours(HEALTHY_RUN_AGE_HOURS));

        HealthStatus {
            healthy: database_connected && last_run_recent,
            database_connected,
            last_run_recent,
            statistics: self.stats.clone(),
            timestamp: now,
        }
    }
}
