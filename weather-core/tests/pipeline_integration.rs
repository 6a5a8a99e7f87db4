//! End-to-end pipeline tests: wiremock provider, file-backed SQLite store.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use weather_etl_core::{
    Pipeline, RunState, WeatherStore,
    provider::openweather::{OpenWeatherOptions, OpenWeatherProvider},
    schedule::{SweepTracker, tick},
    transform,
};
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn current_weather(name: &str, temp: f64, humidity: i64) -> serde_json::Value {
    serde_json::json!({
        "coord": {"lon": -46.6361, "lat": -23.5475},
        "weather": [{"id": 803, "main": "Clouds", "description": "nublado", "icon": "04d"}],
        "main": {
            "temp": temp, "feels_like": 26.2, "temp_min": 23.1, "temp_max": 28.3,
            "pressure": 1013, "humidity": humidity, "sea_level": 1013, "grnd_level": 925
        },
        "visibility": 10000,
        "wind": {"speed": 3.5, "deg": 180, "gust": 6.2},
        "clouds": {"all": 75},
        "dt": 1700000000,
        "sys": {"country": "BR", "sunrise": 1699947000, "sunset": 1699994000},
        "timezone": -10800,
        "id": 3448439,
        "name": name,
        "cod": 200
    })
}

async fn mock_provider(server: &MockServer) -> OpenWeatherProvider {
    Mock::given(method("GET"))
        .and(query_param("q", "São Paulo,BR"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(current_weather("São Paulo", 25.5, 65)),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("q", "Atlantis,BR"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(serde_json::json!({"cod": "404", "message": "city not found"})),
        )
        .mount(server)
        .await;

    let options = OpenWeatherOptions { base_url: server.uri(), ..OpenWeatherOptions::default() };
    OpenWeatherProvider::new("test-key".to_string(), options).unwrap()
}

fn cities(names: &[&str]) -> Vec<String> {
    names.iter().map(|c| c.to_string()).collect()
}

#[tokio::test]
async fn test_run_all_isolates_failed_city() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let store = WeatherStore::new(dir.path().join("weather.db"));
    let mut pipeline = Pipeline::new(Box::new(mock_provider(&server).await), store)
        .with_city_delay(Duration::ZERO);

    let report = pipeline.run_all(&cities(&["São Paulo", "Atlantis"])).await;

    assert!(report.success);
    assert_eq!(report.status, RunState::PartiallyFailed);
    assert_eq!(report.successful_cities, 1);
    assert_eq!(report.total_cities, 2);
    assert!(report.city_results["São Paulo"].success);
    assert!(!report.city_results["Atlantis"].success);
    assert_eq!(report.statistics.failed_extractions, 1);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["city_results"]["Atlantis"]["success"], false);
    assert_eq!(json["statistics"]["successful_loads"], 1);
}

#[tokio::test]
async fn test_loaded_record_round_trips_measurements() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("weather.db");
    let mut pipeline =
        Pipeline::new(Box::new(mock_provider(&server).await), WeatherStore::new(&db_path))
            .with_city_delay(Duration::ZERO);

    pipeline.run_all(&cities(&["São Paulo"])).await;
    drop(pipeline);

    // Fresh connection to the same file, as a reader would open it.
    let mut reader = WeatherStore::new(&db_path);
    reader.connect().unwrap();
    let record = reader.latest(Some("São Paulo")).unwrap().unwrap();

    assert_eq!(record.temperature, 25.5);
    assert_eq!(record.feels_like, Some(26.2));
    assert_eq!(record.temp_min, Some(23.1));
    assert_eq!(record.temp_max, Some(28.3));
    assert_eq!(record.pressure, 1013);
    assert_eq!(record.humidity, 65);
    assert_eq!(record.sea_level_pressure, Some(1013));
    assert_eq!(record.ground_level_pressure, Some(925));
    assert_eq!(record.wind_speed, Some(3.5));
    assert_eq!(record.wind_gust, Some(6.2));
    assert_eq!(record.cloudiness, Some(75));
    assert_eq!(record.data_timestamp, Some(Utc.timestamp_opt(1700000000, 0).unwrap()));
    assert_eq!(record.heat_index, Some(transform::heat_index(25.5, 65.0)));
    assert_eq!(record.temperature_category.map(|c| c.as_str()), Some("Hot"));
    assert_eq!(record.humidity_category.map(|c| c.as_str()), Some("High"));

    assert_eq!(reader.by_city("paulo", 5).unwrap().len(), 1);
    assert_eq!(reader.distinct_city_names().unwrap(), ["São Paulo"]);
    assert_eq!(reader.aggregate_stats().unwrap().total_records, 1);
}

#[tokio::test]
async fn test_tick_sweeps_on_sunday_only() {
    let server = MockServer::start().await;
    let mut pipeline =
        Pipeline::new(Box::new(mock_provider(&server).await), WeatherStore::in_memory())
            .with_city_delay(Duration::ZERO);
    let mut sweeps = SweepTracker::default();
    let saturday = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let sunday = Utc.with_ymd_and_hms(2024, 6, 2, 12, 0, 0).unwrap();

    let outcome = tick(&mut pipeline, &cities(&["São Paulo"]), 30, saturday, &mut sweeps).await;
    assert!(outcome.report.success);
    assert!(outcome.sweep.is_none());

    let outcome = tick(&mut pipeline, &cities(&["São Paulo"]), 30, sunday, &mut sweeps).await;
    assert_eq!(outcome.sweep.map(|r| r.unwrap()), Some(0));

    let outcome = tick(&mut pipeline, &cities(&["São Paulo"]), 30, sunday, &mut sweeps).await;
    assert!(outcome.sweep.is_none());
    assert_eq!(pipeline.stats().total_runs, 3);
    assert_eq!(pipeline.stats().successful_loads, 3);
}
