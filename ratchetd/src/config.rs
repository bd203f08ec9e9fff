//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{DaemonError, DaemonResult};
use ratchet_domain::LadderConfig;
use ratchet_engine::RiskParameterStore;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Monitoring loop configuration
    pub monitor: MonitorConfig,

    /// Risk management configuration
    pub risk: RiskConfig,

    /// Emit JSON logs instead of human-readable lines
    pub log_json: bool,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// Monitoring loop configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between scans of the registry
    pub poll_interval: Duration,
    /// Deadline for a single gateway call
    pub call_timeout: Duration,
}

/// Risk management configuration.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Attach a take-profit ladder to new positions
    pub take_profit_enabled: bool,
    /// Recalculate trailing stops on every scan
    pub trailing_enabled: bool,
    /// JSON parameter file, built-in table when absent
    pub risk_params_path: Option<PathBuf>,
    /// Rung layout for new ladders
    pub ladder: LadderConfig,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let monitor = Self::load_monitor_config()?;
        let risk = Self::load_risk_config()?;
        let log_json = match env::var("RATCHET_LOG_JSON") {
            Ok(val) => parse_bool("RATCHET_LOG_JSON", &val)?,
            Err(_) => false,
        };

        Ok(Self {
            monitor,
            risk,
            log_json,
            environment,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            monitor: MonitorConfig {
                poll_interval: Duration::from_millis(100),
                call_timeout: Duration::from_secs(1),
            },
            risk: RiskConfig {
                take_profit_enabled: true,
                trailing_enabled: true,
                risk_params_path: None,
                ladder: LadderConfig::default(),
            },
            log_json: false,
            environment: Environment::Test,
        }
    }

    /// Build the parameter store from the configured file or the built-in table.
    pub fn risk_store(&self) -> DaemonResult<RiskParameterStore> {
        match &self.risk.risk_params_path {
            Some(path) => RiskParameterStore::from_json_file(path).map_err(|e| {
                DaemonError::Config(format!("Risk parameters at {}: {e}", path.display()))
            }),
            None => Ok(RiskParameterStore::builtin()),
        }
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("RATCHET_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid RATCHET_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_monitor_config() -> DaemonResult<MonitorConfig> {
        let poll_secs = Self::load_u64_env("RATCHET_POLL_INTERVAL_SECS", 10)?;
        let timeout_secs = Self::load_u64_env("RATCHET_CALL_TIMEOUT_SECS", 5)?;

        if poll_secs == 0 || timeout_secs == 0 {
            return Err(DaemonError::Config(
                "RATCHET_POLL_INTERVAL_SECS and RATCHET_CALL_TIMEOUT_SECS must be positive"
                    .to_string(),
            ));
        }

        Ok(MonitorConfig {
            poll_interval: Duration::from_secs(poll_secs),
            call_timeout: Duration::from_secs(timeout_secs),
        })
    }

    fn load_risk_config() -> DaemonResult<RiskConfig> {
        let take_profit_enabled = Self::load_bool_env("RATCHET_TAKE_PROFIT_ENABLED", true)?;
        let trailing_enabled = Self::load_bool_env("RATCHET_TRAILING_ENABLED", true)?;
        let risk_params_path = env::var("RATCHET_RISK_PARAMS_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Ok(RiskConfig {
            take_profit_enabled,
            trailing_enabled,
            risk_params_path,
            ladder: LadderConfig::default(),
        })
    }

    fn load_u64_env(key: &str, default: u64) -> DaemonResult<u64> {
        match env::var(key) {
            Ok(val) => val
                .trim()
                .parse::<u64>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }

    fn load_bool_env(key: &str, default: bool) -> DaemonResult<bool> {
        match env::var(key) {
            Ok(val) => parse_bool(key, &val),
            Err(_) => Ok(default),
        }
    }
}

fn parse_bool(key: &str, raw: &str) -> DaemonResult<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DaemonError::Config(format!("Invalid {} value: {}", key, other))),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig {
                poll_interval: Duration::from_secs(10),
                call_timeout: Duration::from_secs(5),
            },
            risk: RiskConfig {
                take_profit_enabled: true,
                trailing_enabled: true,
                risk_params_path: None,
                ladder: LadderConfig::default(),
            },
            log_json: false,
            environment: Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
