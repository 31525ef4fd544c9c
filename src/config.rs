// src/config.rs
use crate::indicators::IndicatorParams;
use crate::throttle::{DEFAULT_MAX_RATE_LIMIT_RETRIES, ThrottleSettings};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "market_signals=info".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UpstreamConfig {
    pub coingecko_base_url: String,
    pub binance_base_url: String,
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            coingecko_base_url: "https://api.coingecko.com/api/v3".into(),
            binance_base_url: "https://api.binance.com".into(),
            user_agent: concat!("market-signals/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ThrottleConfig {
    pub max_rate_limit_retries: u32,
    /// Keep retrying 429s forever, ignoring `max_rate_limit_retries`.
    pub unbounded_rate_limit_retries: bool,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            unbounded_rate_limit_retries: false,
        }
    }
}

impl ThrottleConfig {
    pub fn settings(&self) -> ThrottleSettings {
        ThrottleSettings {
            max_rate_limit_retries: if self.unbounded_rate_limit_retries {
                None
            } else {
                Some(self.max_rate_limit_retries)
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
    pub logging: LoggingConfig,
    pub upstream: UpstreamConfig,
    pub indicators: IndicatorParams,
    pub throttle: ThrottleConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").into(),
            environment: "development".into(),
            logging: LoggingConfig::default(),
            upstream: UpstreamConfig::default(),
            indicators: IndicatorParams::default(),
            throttle: ThrottleConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_dir("config")
    }

    /// Layers `{dir}/default.toml`, `{dir}/{RUN_MODE}.toml` and `APP__*`
    /// environment variables. Missing files fall back to built-in defaults.
    pub fn from_dir(dir: &str) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(
                File::new(&format!("{}/default.toml", dir), FileFormat::Toml).required(false),
            )
            .add_source(
                File::new(&format!("{}/{}.toml", dir, run_mode), FileFormat::Toml)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = AppConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.indicators, IndicatorParams::default());
        assert_eq!(cfg.throttle.settings(), ThrottleSettings::default());
        assert_eq!(cfg.upstream.coingecko_base_url, "https://api.coingecko.com/api/v3");
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = AppConfig::from_toml_str(
            r#"
            environment = "production"

            [indicators]
            rsi_period = 10
            macd_slow = 26

            [throttle]
            unbounded_rate_limit_retries = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.environment, "production");
        assert_eq!(cfg.indicators.rsi_period, 10);
        assert_eq!(cfg.indicators.macd_slow, 26);
        assert_eq!(cfg.indicators.macd_fast, 8);
        assert_eq!(cfg.throttle.settings().max_rate_limit_retries, None);
    }

    #[test]
    fn missing_config_dir_is_not_an_error() {
        let cfg = AppConfig::from_dir("does/not/exist").unwrap();
        assert_eq!(cfg.throttle.max_rate_limit_retries, DEFAULT_MAX_RATE_LIMIT_RETRIES);
    }
}
