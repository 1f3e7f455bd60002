//! Runtime configuration, read from the environment.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStoreKind {
    Postgres,
    Memory,
}

impl FromStr for EventStoreKind {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "postgres" => Ok(EventStoreKind::Postgres),
            "memory" => Ok(EventStoreKind::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub event_store: EventStoreKind,
    /// When unset the connection is configured from the `PG*` variables.
    pub database_url: Option<String>,
    pub storage_root: PathBuf,
    pub public_base_url: String,
    pub admin_api_key: String,
    pub hyperpay_webhook_secret: String,
    pub clickpay_webhook_secret: String,
    pub listener_poll: Duration,
    pub listener_batch_size: usize,
}

impl Config {
    /// Reads the configuration from the environment, after loading a `.env` file if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));
        fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value })
        }

        Ok(Self {
            bind_address: parse(
                "BIND_ADDRESS",
                var("BIND_ADDRESS").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            )?,
            event_store: parse(
                "EVENT_STORE",
                var("EVENT_STORE").unwrap_or_else(|| "postgres".to_string()),
            )?,
            database_url: var("DATABASE_URL"),
            storage_root: var("STORAGE_ROOT")
                .unwrap_or_else(|| "./storage".to_string())
                .into(),
            public_base_url: var("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8080".to_string())
                .trim_end_matches('/')
                .to_string(),
            admin_api_key: required("ADMIN_API_KEY")?,
            hyperpay_webhook_secret: required("HYPERPAY_WEBHOOK_SECRET")?,
            clickpay_webhook_secret: required("CLICKPAY_WEBHOOK_SECRET")?,
            listener_poll: Duration::from_millis(parse(
                "LISTENER_POLL_MS",
                var("LISTENER_POLL_MS").unwrap_or_else(|| "500".to_string()),
            )?),
            listener_batch_size: parse(
                "LISTENER_BATCH_SIZE",
                var("LISTENER_BATCH_SIZE").unwrap_or_else(|| "100".to_string()),
            )?,
        })
    }
}
