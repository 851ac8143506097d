//! Configuration module for riskguard.
//!
//! Structured configuration loading from environment variables, organized
//! by concern: monitoring engine knobs and per-venue routing.

mod monitoring_config;
mod venue_config;

pub use monitoring_config::MonitoringEnvConfig;
pub use venue_config::{VenueEndpoints, VenueEnvConfig};

use anyhow::Result;
use std::env;

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub monitoring: MonitoringEnvConfig,
    pub venues: VenueEnvConfig,
    pub database_url: String,
    pub http_bind_addr: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            monitoring: MonitoringEnvConfig::from_env()?,
            venues: VenueEnvConfig::from_env()?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/riskguard.db".to_string()),
            http_bind_addr: env::var("HTTP_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        })
    }
}
