pub mod fixture;
pub mod provider;
pub mod types;

pub use fixture::StaticMarketData;
pub use provider::{HttpJsonMarketData, MarketDataProvider};

use crate::config::Settings;
use std::sync::Arc;

/// Fixture file when `MARKET_DATA_FIXTURE` is set, otherwise the HTTP provider (which
/// requires `DATA_PROVIDER_BASE_URL`).
pub fn provider_from_settings(settings: &Settings) -> anyhow::Result<Arc<dyn MarketDataProvider>> {
    if let Some(path) = settings.market_data_fixture.as_deref() {
        tracing::info!(path, "using static market data fixture");
        return Ok(Arc::new(StaticMarketData::from_json_file(path)?));
    }
    Ok(Arc::new(HttpJsonMarketData::from_settings(settings)?))
}
