pub mod analytics;
pub mod cache;
pub mod domain;
pub mod error;
pub mod market;
pub mod planner;
pub mod recommend;
pub mod time;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone, Default)]
    pub struct Settings {
        pub sentry_dsn: Option<String>,
        pub data_provider_base_url: Option<String>,
        pub data_provider_api_key: Option<String>,
        pub market_data_fixture: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                sentry_dsn: non_blank_var("SENTRY_DSN"),
                data_provider_base_url: non_blank_var("DATA_PROVIDER_BASE_URL"),
                data_provider_api_key: non_blank_var("DATA_PROVIDER_API_KEY"),
                market_data_fixture: non_blank_var("MARKET_DATA_FIXTURE"),
            })
        }

        pub fn require_data_provider_base_url(&self) -> anyhow::Result<&str> {
            self.data_provider_base_url
                .as_deref()
                .context("DATA_PROVIDER_BASE_URL is required")
        }
    }

    /// Parses `key` from the environment, falling back to `default` when it is unset or
    /// unparsable.
    pub fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
        std::env::var(key)
            .ok()
            .and_then(|s| s.trim().parse::<T>().ok())
            .unwrap_or(default)
    }

    fn non_blank_var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|s| !s.trim().is_empty())
    }
}
