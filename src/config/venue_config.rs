//! Venue routing configuration parsing from environment variables.

use anyhow::{Context, Result};
use std::env;
use url::Url;

/// Endpoint set for one venue with a demo/live switch.
#[derive(Debug, Clone)]
pub struct VenueEndpoints {
    pub base_url: String,
    pub demo_url: String,
    pub use_demo: bool,
    pub ws_url: String,
}

impl VenueEndpoints {
    /// The REST URL requests should actually hit.
    pub fn effective_url(&self) -> &str {
        if self.use_demo {
            &self.demo_url
        } else {
            &self.base_url
        }
    }

    fn validate(&self, venue: &str) -> Result<()> {
        for (label, raw) in [
            ("base", &self.base_url),
            ("demo", &self.demo_url),
            ("ws", &self.ws_url),
        ] {
            Url::parse(raw)
                .with_context(|| format!("Invalid {} {} URL: {}", venue, label, raw))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct VenueEnvConfig {
    pub futures: VenueEndpoints,
    pub spot: VenueEndpoints,
}

impl VenueEnvConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            futures: VenueEndpoints {
                base_url: env::var("FUTURES_BASE_URL")
                    .unwrap_or_else(|_| "https://api.futures.example.com".to_string()),
                demo_url: env::var("FUTURES_DEMO_URL")
                    .unwrap_or_else(|_| "https://demo.futures.example.com".to_string()),
                use_demo: parse_bool("FUTURES_USE_DEMO", false),
                ws_url: env::var("FUTURES_WS_URL")
                    .unwrap_or_else(|_| "wss://stream.futures.example.com".to_string()),
            },
            spot: VenueEndpoints {
                base_url: env::var("SPOT_BASE_URL")
                    .unwrap_or_else(|_| "https://api.spot.example.com".to_string()),
                demo_url: env::var("SPOT_DEMO_URL")
                    .unwrap_or_else(|_| "https://demo.spot.example.com".to_string()),
                use_demo: parse_bool("SPOT_USE_DEMO", false),
                ws_url: env::var("SPOT_WS_URL")
                    .unwrap_or_else(|_| "wss://stream.spot.example.com".to_string()),
            },
        };
        config.futures.validate("futures")?;
        config.spot.validate("spot")?;
        Ok(config)
    }
}

fn parse_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|raw| matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_url_honors_demo_switch() {
        let endpoints = VenueEndpoints {
            base_url: "https://live".to_string(),
            demo_url: "https://demo".to_string(),
            use_demo: true,
            ws_url: "wss://ws".to_string(),
        };
        assert_eq!(endpoints.effective_url(), "https://demo");

        let live = VenueEndpoints {
            use_demo: false,
            ..endpoints
        };
        assert_eq!(live.effective_url(), "https://live");
    }

    #[test]
    fn test_malformed_url_is_rejected() {
        let endpoints = VenueEndpoints {
            base_url: "not a url".to_string(),
            demo_url: "https://demo".to_string(),
            use_demo: false,
            ws_url: "wss://ws".to_string(),
        };
        assert!(endpoints.validate("futures").is_err());
    }
}
