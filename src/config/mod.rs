use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/campus_food";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_MAPBOX_BASE_URL: &str = "https://api.mapbox.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Which backing store the shared catalog lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" | "inmemory" | "in-memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{}', use 'postgres' or 'memory'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub store_backend: StoreBackend,
    pub bind_addr: SocketAddr,
    pub mapbox_token: Option<String>,
    pub mapbox_base_url: String,
    pub cors_allowed_origins: Option<String>,
    pub production: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_backend = env::var("STORE_BACKEND")
            .unwrap_or_default()
            .parse()
            .map_err(|message| ConfigError::Invalid {
                key: "STORE_BACKEND",
                message,
            })?;

        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "BIND_ADDR",
                message: e.to_string(),
            })?;

        let mapbox_token = env::var("MAPBOX_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());
        if mapbox_token.is_none() {
            tracing::warn!("MAPBOX_TOKEN not set, proximity lookups will be unavailable");
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            store_backend,
            bind_addr,
            mapbox_token,
            mapbox_base_url: env::var("MAPBOX_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_MAPBOX_BASE_URL.to_string()),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS").ok(),
            production: env::var("RUST_ENV")
                .map(|v| v.to_lowercase() == "production")
                .unwrap_or(false),
        })
    }

    /// Settings for tests and local runs: in-memory store, no Mapbox token.
    pub fn local() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            store_backend: StoreBackend::Memory,
            bind_addr: DEFAULT_BIND_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 3001))),
            mapbox_token: None,
            mapbox_base_url: DEFAULT_MAPBOX_BASE_URL.to_string(),
            cors_allowed_origins: None,
            production: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_backend_parsing() {
        assert_eq!("".parse::<StoreBackend>(), Ok(StoreBackend::Postgres));
        assert_eq!("Memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_local_config_uses_memory_store() {
        let config = Config::local();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.bind_addr.port(), 3001);
        assert!(config.mapbox_token.is_none());
    }
}
