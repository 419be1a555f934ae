/// Reporting configuration, read from `REPORTER_*` environment variables
///
/// Database settings come from `db-pool` (`DATABASE_URL`, `DB_*`).
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ReporterConfig {
    #[serde(default = "default_http_host")]
    pub http_host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Upper bound for one report's queries
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Rows returned by the top-N location and country breakdowns
    #[serde(default = "default_top_locations")]
    pub top_locations: i64,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8082
}

fn default_query_timeout_ms() -> u64 {
    10_000
}

fn default_top_locations() -> i64 {
    10
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
            query_timeout_ms: default_query_timeout_ms(),
            top_locations: default_top_locations(),
        }
    }
}

impl ReporterConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("REPORTER_").from_env()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.query_timeout_ms == 0 {
            return Err("REPORTER_QUERY_TIMEOUT_MS must be greater than 0".to_string());
        }
        if self.top_locations <= 0 {
            return Err("REPORTER_TOP_LOCATIONS must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}
