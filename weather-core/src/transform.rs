//! Flattening, validation and enrichment of raw provider observations.
//!
//! [`transform`] is a pure function over [`OwPayload`]: it either produces a
//! [`WeatherRecord`] that satisfies every store invariant or a
//! [`ValidationError`] naming the first violated rule. [`enrich`] adds the
//! derived fields and never fails.

use chrono::{DateTime, Utc};

use crate::{
    error::ValidationError,
    model::{HumidityCategory, OwPayload, RawObservation, TemperatureCategory, WeatherRecord},
};

pub const TEMPERATURE_RANGE: (f64, f64) = (-100.0, 60.0);
pub const HUMIDITY_RANGE: (i64, i64) = (0, 100);

/// Map a raw observation into a validated canonical record.
pub fn transform(raw: &RawObservation) -> Result<WeatherRecord, ValidationError> {
    let record = flatten(raw)?;
    validate_ranges(&record)?;

    tracing::info!(city = %record.city_name, "observation transformed");
    Ok(record)
}

fn flatten(raw: &RawObservation) -> Result<WeatherRecord, ValidationError> {
    let payload: &OwPayload = &raw.payload;
    let main = payload.main.as_ref().ok_or(ValidationError::MissingField("main"))?;
    let weather = payload.weather.first();
    let wind = payload.wind.as_ref();
    let sys = payload.sys.as_ref();
    let coord = payload.coord.as_ref();

    let city_name = payload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or(ValidationError::MissingField("city_name"))?;
    let country_code = sys
        .and_then(|s| s.country.clone())
        .ok_or(ValidationError::MissingField("country_code"))?;
    let temperature = main.temp.ok_or(ValidationError::MissingField("temperature"))?;
    let humidity = main.humidity.ok_or(ValidationError::MissingField("humidity"))?;
    let pressure = main.pressure.ok_or(ValidationError::MissingField("pressure"))?;
    let weather_main = weather
        .and_then(|w| w.main.clone())
        .ok_or(ValidationError::MissingField("weather_main"))?;

    Ok(WeatherRecord {
        id: None,
        city_id: payload.id,
        city_name: city_name.to_string(),
        country_code,
        latitude: coord.and_then(|c| c.lat),
        longitude: coord.and_then(|c| c.lon),
        temperature,
        feels_like: main.feels_like,
        temp_min: main.temp_min,
        temp_max: main.temp_max,
        pressure,
        humidity,
        sea_level_pressure: main.sea_level,
        ground_level_pressure: main.grnd_level,
        weather_main,
        weather_description: weather.and_then(|w| w.description.clone()),
        weather_icon: weather.and_then(|w| w.icon.clone()),
        wind_speed: wind.and_then(|w| w.speed),
        wind_direction: wind.and_then(|w| w.deg),
        wind_gust: wind.and_then(|w| w.gust),
        cloudiness: payload.clouds.as_ref().and_then(|c| c.all),
        visibility: payload.visibility,
        data_timestamp: payload.dt.and_then(epoch_to_utc),
        sunrise: sys.and_then(|s| s.sunrise).filter(|ts| *ts != 0).and_then(epoch_to_utc),
        sunset: sys.and_then(|s| s.sunset).filter(|ts| *ts != 0).and_then(epoch_to_utc),
        extracted_at: Some(raw.extracted_at),
        processed_at: Some(Utc::now()),
        timezone_offset: payload.timezone,
        heat_index: None,
        temperature_category: None,
        humidity_category: None,
        created_at: None,
    })
}

fn validate_ranges(record: &WeatherRecord) -> Result<(), ValidationError> {
    let (t_min, t_max) = TEMPERATURE_RANGE;
    if !(t_min..=t_max).contains(&record.temperature) {
        return Err(ValidationError::OutOfRange {
            field: "temperature",
            value: record.temperature,
        });
    }

    let (h_min, h_max) = HUMIDITY_RANGE;
    if !(h_min..=h_max).contains(&record.humidity) {
        return Err(ValidationError::OutOfRange {
            field: "humidity",
            value: record.humidity as f64,
        });
    }

    Ok(())
}

/// Add heat index and temperature/humidity categories.
///
/// The heat index is only computed when temperature and humidity are both
/// non-zero: an observation of exactly 0 °C or 0 % humidity gets no heat
/// index. Records whose temperature is not finite are returned unmodified.
pub fn enrich(mut record: WeatherRecord) -> WeatherRecord {
    if !record.temperature.is_finite() {
        tracing::warn!(city = %record.city_name, "skipping enrichment: temperature is not finite");
        return record;
    }

    let temperature = record.temperature;
    let humidity = record.humidity as f64;

    if temperature != 0.0 && record.humidity != 0 {
        record.heat_index = Some(heat_index(temperature, humidity));
    }
    record.temperature_category = Some(TemperatureCategory::from_celsius(temperature));
    record.humidity_category = Some(HumidityCategory::from_percent(humidity));

    record
}

/// Simplified heat index: `t + 0.5 * (h - 50)`, rounded to 2 decimals.
pub fn heat_index(temperature: f64, humidity: f64) -> f64 {
    round2(temperature + 0.5 * (humidity - 50.0))
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn epoch_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OwClouds, OwCoord, OwMain, OwSys, OwWeather, OwWind};
    use chrono::TimeZone;

    fn sao_paulo() -> RawObservation {
        RawObservation {
            payload: OwPayload {
                id: Some(3448439),
                name: Some("São Paulo".into()),
                coord: Some(OwCoord { lat: Some(-23.5475), lon: Some(-46.6361) }),
                main: Some(OwMain {
                    temp: Some(25.5),
                    feels_like: Some(26.2),
                    temp_min: Some(23.1),
                    temp_max: Some(28.3),
                    pressure: Some(1013),
                    humidity: Some(65),
                    sea_level: None,
                    grnd_level: None,
                }),
                weather: vec![OwWeather {
                    main: Some("Clear".into()),
                    description: Some("céu limpo".into()),
                    icon: Some("01d".into()),
                }],
                wind: Some(OwWind { speed: Some(3.5), deg: Some(180), gust: None }),
                clouds: Some(OwClouds { all: Some(0) }),
                sys: Some(OwSys {
                    country: Some("BR".into()),
                    sunrise: Some(1640944800),
                    sunset: Some(0),
                }),
                visibility: Some(10000),
                dt: Some(1640995200),
                timezone: Some(-10800),
            },
            extracted_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        }
    }

    fn with_main(f: impl FnOnce(&mut OwMain)) -> RawObservation {
        let mut raw = sao_paulo();
        if let Some(main) = raw.payload.main.as_mut() {
            f(main);
        }
        raw
    }

    #[test]
    fn flattens_nested_sections() {
        let record = transform(&sao_paulo()).unwrap();

        assert_eq!(record.city_id, Some(3448439));
        assert_eq!(record.city_name, "São Paulo");
        assert_eq!(record.country_code, "BR");
        assert_eq!(record.latitude, Some(-23.5475));
        assert_eq!(record.temperature, 25.5);
        assert_eq!(record.pressure, 1013);
        assert_eq!(record.humidity, 65);
        assert_eq!(record.sea_level_pressure, None);
        assert_eq!(record.weather_main, "Clear");
        assert_eq!(record.weather_icon.as_deref(), Some("01d"));
        assert_eq!(record.wind_direction, Some(180));
        assert_eq!(record.wind_gust, None);
        assert_eq!(record.cloudiness, Some(0));
        assert_eq!(record.visibility, Some(10000));
        assert_eq!(record.timezone_offset, Some(-10800));
        assert!(record.heat_index.is_none());
        assert!(record.processed_at.is_some());
    }

    #[test]
    fn converts_epochs_to_utc_and_nulls_zero_sun_times() {
        let raw = sao_paulo();
        let record = transform(&raw).unwrap();

        assert_eq!(record.data_timestamp, Some(Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(record.sunrise, Some(Utc.with_ymd_and_hms(2021, 12, 31, 10, 0, 0).unwrap()));
        assert_eq!(record.sunset, None);
        assert_eq!(record.extracted_at, Some(raw.extracted_at));
    }

    #[test]
    fn rejects_payload_without_main_section() {
        let mut raw = sao_paulo();
        raw.payload.main = None;

        for _ in 0..2 {
            assert_eq!(transform(&raw), Err(ValidationError::MissingField("main")));
        }
    }

    #[test]
    fn rejects_missing_required_fields() {
        let mut raw = sao_paulo();
        raw.payload.sys = None;
        assert_eq!(transform(&raw), Err(ValidationError::MissingField("country_code")));

        let mut raw = sao_paulo();
        raw.payload.weather.clear();
        assert_eq!(transform(&raw), Err(ValidationError::MissingField("weather_main")));

        let mut raw = sao_paulo();
        raw.payload.name = Some("   ".into());
        assert_eq!(transform(&raw), Err(ValidationError::MissingField("city_name")));

        let raw = with_main(|m| m.pressure = None);
        assert_eq!(transform(&raw), Err(ValidationError::MissingField("pressure")));
    }

    #[test]
    fn rejects_out_of_range_measurements() {
        let raw = with_main(|m| m.temp = Some(60.5));
        assert!(matches!(
            transform(&raw),
            Err(ValidationError::OutOfRange { field: "temperature", .. })
        ));

        let raw = with_main(|m| m.humidity = Some(101));
        assert!(matches!(transform(&raw), Err(ValidationError::OutOfRange { field: "humidity", .. })));

        let raw = with_main(|m| m.temp = Some(-100.0));
        assert!(transform(&raw).is_ok());
    }

    #[test]
    fn enrich_adds_heat_index_and_categories() {
        let record = enrich(transform(&sao_paulo()).unwrap());

        assert_eq!(record.heat_index, Some(33.0));
        assert_eq!(record.temperature_category, Some(TemperatureCategory::Hot));
        assert_eq!(record.humidity_category, Some(HumidityCategory::High));
    }

    #[test]
    fn heat_index_matches_formula() {
        for (t, h) in [(25.5, 65.0), (-3.333, 12.0), (31.17, 49.0), (12.005, 100.0)] {
            let expected = ((t + 0.5 * (h - 50.0)) * 100.0_f64).round() / 100.0;
            assert_eq!(heat_index(t, h), expected);
        }
    }

    #[test]
    fn zero_temperature_or_humidity_skips_heat_index() {
        let record = enrich(transform(&with_main(|m| m.temp = Some(0.0))).unwrap());
        assert_eq!(record.heat_index, None);
        assert_eq!(record.temperature_category, Some(TemperatureCategory::Cold));

        let record = enrich(transform(&with_main(|m| m.humidity = Some(0))).unwrap());
        assert_eq!(record.heat_index, None);
        assert_eq!(record.humidity_category, Some(HumidityCategory::Low));
    }

    #[test]
    fn enrich_leaves_non_finite_temperature_untouched() {
        let mut record = transform(&sao_paulo()).unwrap();
        record.temperature = f64::NAN;

        let enriched = enrich(record);
        assert!(enriched.heat_index.is_none());
        assert!(enriched.temperature_category.is_none());
    }
}
