use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use std::time::Duration;

use crate::{
    config::DEFAULT_BASE_URL,
    error::ExtractError,
    model::{OwPayload, RawObservation},
};

use super::WeatherProvider;

/// Request settings for the OpenWeather current-weather endpoint.
#[derive(Debug, Clone)]
pub struct OpenWeatherOptions {
    pub base_url: String,
    pub country_code: String,
    pub lang: String,
    pub timeout: Duration,
}

impl Default for OpenWeatherOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            country_code: "BR".to_string(),
            lang: "pt_br".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    options: OpenWeatherOptions,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String, options: OpenWeatherOptions) -> Result<Self, ExtractError> {
        let http = Client::builder().timeout(options.timeout).build()?;

        Ok(Self { api_key, options, http })
    }

    pub fn default_country(&self) -> &str {
        &self.options.country_code
    }

    async fn fetch_current(&self, city: &str, country_code: &str) -> Result<OwPayload, ExtractError> {
        let query = format!("{city},{country_code}");

        let res = self
            .http
            .get(&self.options.base_url)
            .query(&[
                ("q", query.as_str()),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
                ("lang", self.options.lang.as_str()),
            ])
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            return Err(ExtractError::http(status.as_u16(), &body));
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    async fn extract(
        &self,
        city: &str,
        country_code: Option<&str>,
    ) -> Result<RawObservation, ExtractError> {
        let country_code = country_code.unwrap_or(self.default_country());
        tracing::info!(city = %city, country = %country_code, "extracting current weather");

        let payload = self.fetch_current(city, country_code).await?;

        tracing::info!(city = %city, "extraction succeeded");
        Ok(RawObservation { payload, extracted_at: Utc::now() })
    }
}
