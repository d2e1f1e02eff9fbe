use crate::config::{env_or, Settings};
use crate::domain::Ticker;
use crate::market::types::{DailyClose, DividendEvent, InfoField, Period, PriceTable};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;

/// Source of prices, dividends and descriptive fields. Every call may fail per ticker;
/// callers degrade instead of aborting.
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Daily closes over `period`, oldest first.
    async fn get_price(&self, ticker: &str, period: Period) -> Result<Vec<DailyClose>>;

    async fn get_dividends(&self, ticker: &str, period: Period) -> Result<Vec<DividendEvent>>;

    /// `Ok(None)` when the provider knows the ticker but not the field.
    async fn get_info_field(&self, ticker: &str, field: InfoField) -> Result<Option<Value>>;

    async fn get_info_field_or(
        &self,
        ticker: &str,
        field: InfoField,
        default: Value,
    ) -> Result<Value> {
        Ok(self
            .get_info_field(ticker, field)
            .await?
            .filter(|v| !v.is_null())
            .unwrap_or(default))
    }

    /// Daily closes for all `tickers` between `start` and `end` inclusive.
    async fn get_price_history(
        &self,
        tickers: &[Ticker],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceTable>;
}

#[derive(Debug, Deserialize)]
struct PricesResponse {
    closes: Vec<DailyClose>,
}

#[derive(Debug, Deserialize)]
struct DividendsResponse {
    dividends: Vec<DividendEvent>,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    #[serde(default)]
    fields: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    series: BTreeMap<Ticker, Vec<DailyClose>>,
}

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("{0:#}")]
    Retryable(anyhow::Error),
    #[error("{0:#}")]
    Fatal(anyhow::Error),
}

impl FetchError {
    fn into_inner(self) -> anyhow::Error {
        match self {
            FetchError::Retryable(e) | FetchError::Fatal(e) => e,
        }
    }
}

/// JSON-over-HTTP market data vendor.
#[derive(Debug, Clone)]
pub struct HttpJsonMarketData {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retries: u32,
}

impl HttpJsonMarketData {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_data_provider_base_url()?.to_string();
        let api_key = settings.data_provider_api_key.clone();

        let timeout_secs = env_or("DATA_PROVIDER_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS);
        let retries = env_or("DATA_PROVIDER_RETRIES", DEFAULT_RETRIES).max(1);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build data provider http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            retries,
        })
    }

    fn url(&self, path: &str) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn fetch_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<T, FetchError> {
        let headers = self.headers().map_err(FetchError::Fatal)?;

        let res = self
            .http
            .get(self.url(path))
            .headers(headers)
            .query(query)
            .send()
            .await
            .context("data provider request failed")
            .map_err(FetchError::Retryable)?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read provider response")
            .map_err(FetchError::Retryable)?;

        if !status.is_success() {
            let err = anyhow::anyhow!("data provider HTTP {status} for {path}: {text}");
            return Err(if is_retryable_status(status) {
                FetchError::Retryable(err)
            } else {
                FetchError::Fatal(err)
            });
        }

        serde_json::from_str::<T>(&text)
            .with_context(|| format!("failed to parse provider response for {path}: {text}"))
            .map_err(FetchError::Retryable)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once::<T>(path, query).await {
                Ok(parsed) => return Ok(parsed),
                Err(FetchError::Retryable(err)) if attempt < self.retries => {
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, path, ?backoff, error = %err, "data provider fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err.into_inner()),
            }
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait::async_trait]
impl MarketDataProvider for HttpJsonMarketData {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn get_price(&self, ticker: &str, period: Period) -> Result<Vec<DailyClose>> {
        let resp: PricesResponse = self
            .get_json(
                &format!("/v1/prices/{ticker}"),
                &[("period", period.as_query().to_string())],
            )
            .await?;
        Ok(resp.closes)
    }

    async fn get_dividends(&self, ticker: &str, period: Period) -> Result<Vec<DividendEvent>> {
        let resp: DividendsResponse = self
            .get_json(
                &format!("/v1/dividends/{ticker}"),
                &[("period", period.as_query().to_string())],
            )
            .await?;
        Ok(resp.dividends)
    }

    async fn get_info_field(&self, ticker: &str, field: InfoField) -> Result<Option<Value>> {
        let mut resp: InfoResponse = self.get_json(&format!("/v1/info/{ticker}"), &[]).await?;
        Ok(resp.fields.remove(field.key()))
    }

    async fn get_price_history(
        &self,
        tickers: &[Ticker],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceTable> {
        let resp: HistoryResponse = self
            .get_json(
                "/v1/history",
                &[
                    ("tickers", tickers.join(",")),
                    ("start", start.to_string()),
                    ("end", end.to_string()),
                ],
            )
            .await?;
        Ok(PriceTable::from_series(tickers, &resp.series))
    }
}
