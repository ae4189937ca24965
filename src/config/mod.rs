//! Application configuration management

use std::env;
use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address
    pub host: IpAddr,

    /// Server port
    pub port: u16,

    /// SQLite URL, e.g. `sqlite::memory:` or `sqlite://./data/linkfeed.db`
    pub database_url: String,

    /// Per-subscription queue cap (None = unbounded)
    pub subscription_queue_cap: Option<usize>,

    /// Deployment environment; `production` disables introspection
    pub app_env: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let queue_cap: usize = lookup("SUBSCRIPTION_QUEUE_CAP")
            .unwrap_or_else(|| "10000".to_string())
            .parse()
            .context("Invalid SUBSCRIPTION_QUEUE_CAP")?;

        Ok(Self {
            host: lookup("HOST")
                .unwrap_or_else(|| "0.0.0.0".to_string())
                .parse()
                .context("Invalid HOST")?,

            port: lookup("PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse()
                .context("Invalid PORT")?,

            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "sqlite::memory:".to_string()),

            // 0 means no cap
            subscription_queue_cap: (queue_cap > 0).then_some(queue_cap),

            app_env: lookup("APP_ENV").unwrap_or_else(|| "development".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
