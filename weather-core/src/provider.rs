use crate::{
    Config, RawObservation,
    error::ExtractError,
    provider::openweather::{OpenWeatherOptions, OpenWeatherProvider},
};
use async_trait::async_trait;
use std::{collections::BTreeMap, fmt::Debug};

pub mod openweather;

/// Source of raw observations for a single city.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    /// Fetch the current observation for `city`. `None` uses the provider's
    /// default country code.
    async fn extract(
        &self,
        city: &str,
        country_code: Option<&str>,
    ) -> Result<RawObservation, ExtractError>;

    /// Fetch every city independently. Failed cities are logged and left out
    /// of the result.
    async fn extract_many(&self, cities: &[String]) -> BTreeMap<String, RawObservation> {
        let mut results = BTreeMap::new();

        for city in cities {
            match self.extract(city, None).await {
                Ok(raw) => {
                    results.insert(city.clone(), raw);
                }
                Err(err) => tracing::warn!(city = %city, error = %err, "extraction failed"),
            }
        }

        results
    }
}

/// Construct the OpenWeather provider from config.
pub fn provider_from_config(config: &Config) -> anyhow::Result<Box<dyn WeatherProvider>> {
    let api_key = config.require_api_key()?;

    let options = OpenWeatherOptions {
        base_url: config.base_url.clone(),
        country_code: config.country_code.clone(),
        lang: config.lang.clone(),
        timeout: config.request_timeout(),
    };
    let provider = OpenWeatherProvider::new(api_key.to_owned(), options)?;

    Ok(Box::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OwPayload;
    use chrono::Utc;

    #[derive(Debug)]
    struct OnlyCity(&'static str);

    #[async_trait]
    impl WeatherProvider for OnlyCity {
        async fn extract(
            &self,
            city: &str,
            _country_code: Option<&str>,
        ) -> Result<RawObservation, ExtractError> {
            if city == self.0 {
                Ok(RawObservation { payload: OwPayload::default(), extracted_at: Utc::now() })
            } else {
                Err(ExtractError::http(404, "city not found"))
            }
        }
    }

    #[tokio::test]
    async fn extract_many_omits_failed_cities() {
        let provider = OnlyCity("Recife");
        let cities = vec!["Atlantis".to_string(), "Recife".to_string(), "El Dorado".to_string()];

        let results = provider.extract_many(&cities).await;

        assert_eq!(results.len(), 1);
        assert!(results.contains_key("Recife"));
    }

    #[test]
    fn provider_from_config_errors_when_missing_api_key() {
        let cfg = Config::default();
        let err = provider_from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("No OpenWeather API key configured"));
    }

    #[test]
    fn provider_from_config_works_when_configured() {
        let cfg = Config { api_key: Some("KEY".to_string()), ..Config::default() };
        assert!(provider_from_config(&cfg).is_ok());
    }
}
