use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration as StdDuration;

use crate::escrow::fees::{FeeError, FeeSchedule};
use crate::escrow::service::EscrowPolicy;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the escrow service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub escrow: EscrowSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                ansi: environment == AppEnvironment::Development,
            },
            escrow: EscrowSettings::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Colored output for local terminals; off for log shippers.
    pub ansi: bool,
}

/// One leap year; longer review windows are treated as misconfiguration.
pub const MAX_REVIEW_WINDOW_HOURS: u32 = 8_784;

/// Business dials for the escrow engine.
#[derive(Debug, Clone)]
pub struct EscrowSettings {
    pub fee_rate_bps: u32,
    pub minimum_fee: Option<i64>,
    pub maximum_fee: Option<i64>,
    pub review_window_hours: u32,
    pub sweep_interval_secs: u64,
    /// JSON snapshot location; the ledger stays in memory when unset.
    pub ledger_path: Option<PathBuf>,
}

impl Default for EscrowSettings {
    fn default() -> Self {
        Self {
            fee_rate_bps: 1_000,
            minimum_fee: None,
            maximum_fee: None,
            review_window_hours: 72,
            sweep_interval_secs: 300,
            ledger_path: None,
        }
    }
}

impl EscrowSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let fee_rate_bps = parse_var("ESCROW_FEE_BPS")?.unwrap_or(defaults.fee_rate_bps);
        let minimum_fee = parse_var("ESCROW_FEE_MIN")?;
        let maximum_fee = parse_var("ESCROW_FEE_MAX")?;
        let review_window_hours =
            parse_var("ESCROW_REVIEW_WINDOW_HOURS")?.unwrap_or(defaults.review_window_hours);
        if review_window_hours > MAX_REVIEW_WINDOW_HOURS {
            return Err(ConfigError::InvalidValue {
                name: "ESCROW_REVIEW_WINDOW_HOURS",
                value: review_window_hours.to_string(),
            });
        }
        let sweep_interval_secs =
            parse_var("ESCROW_SWEEP_INTERVAL_SECS")?.unwrap_or(defaults.sweep_interval_secs);
        if sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "ESCROW_SWEEP_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }
        let ledger_path = env::var("ESCROW_LEDGER_PATH")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        let settings = Self {
            fee_rate_bps,
            minimum_fee,
            maximum_fee,
            review_window_hours,
            sweep_interval_secs,
            ledger_path,
        };
        settings.fee_schedule()?;
        Ok(settings)
    }

    pub fn fee_schedule(&self) -> Result<FeeSchedule, ConfigError> {
        FeeSchedule::percentage(self.fee_rate_bps)
            .and_then(|schedule| schedule.with_bounds(self.minimum_fee, self.maximum_fee))
            .map_err(ConfigError::FeeSchedule)
    }

    pub fn policy(&self) -> Result<EscrowPolicy, ConfigError> {
        Ok(EscrowPolicy {
            fees: self.fee_schedule()?,
            review_window: chrono::Duration::hours(i64::from(self.review_window_hours)),
        })
    }

    pub fn sweep_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.sweep_interval_secs)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(None),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { name: &'static str, value: String },
    FeeSchedule(FeeError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { name, value } => {
                write!(f, "{name} has an invalid value '{value}'")
            }
            ConfigError::FeeSchedule(err) => write!(f, "invalid fee schedule: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidValue { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::FeeSchedule(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for name in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "ESCROW_FEE_BPS",
            "ESCROW_FEE_MIN",
            "ESCROW_FEE_MAX",
            "ESCROW_REVIEW_WINDOW_HOURS",
            "ESCROW_SWEEP_INTERVAL_SECS",
            "ESCROW_LEDGER_PATH",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.escrow.fee_rate_bps, 1_000);
        assert_eq!(config.escrow.review_window_hours, 72);
        assert!(config.escrow.ledger_path.is_none());

        let policy = config.escrow.policy().expect("default policy");
        assert_eq!(policy, EscrowPolicy::default());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn escrow_settings_read_from_env() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("ESCROW_FEE_BPS", "750");
        env::set_var("ESCROW_FEE_MIN", "500");
        env::set_var("ESCROW_REVIEW_WINDOW_HOURS", "24");
        env::set_var("ESCROW_LEDGER_PATH", "/var/lib/escrow/ledger.json");

        let config = AppConfig::load().expect("config loads");
        let schedule = config.escrow.fee_schedule().expect("schedule");
        assert_eq!(schedule.rate_bps(), 750);
        assert_eq!(schedule.minimum_fee(), Some(500));
        assert_eq!(
            config.escrow.policy().expect("policy").review_window,
            chrono::Duration::hours(24)
        );
        assert_eq!(
            config.escrow.ledger_path,
            Some(PathBuf::from("/var/lib/escrow/ledger.json"))
        );
        reset_env();
    }

    #[test]
    fn rejects_out_of_range_fee_rate() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("ESCROW_FEE_BPS", "12000");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::FeeSchedule(FeeError::RateOutOfRange(12_000)))
        ));

        env::set_var("ESCROW_FEE_BPS", "ten percent");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidValue {
                name: "ESCROW_FEE_BPS",
                ..
            })
        ));
        reset_env();
    }

    #[test]
    fn rejects_review_window_beyond_a_year() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("ESCROW_REVIEW_WINDOW_HOURS", "4000000000");
        match AppConfig::load() {
            Err(ConfigError::InvalidValue { name, value }) => {
                assert_eq!(name, "ESCROW_REVIEW_WINDOW_HOURS");
                assert_eq!(value, "4000000000");
            }
            other => panic!("expected invalid review window, got {other:?}"),
        }

        env::set_var("ESCROW_REVIEW_WINDOW_HOURS", "8784");
        let config = AppConfig::load().expect("a full year is accepted");
        assert_eq!(
            config.escrow.policy().expect("policy").review_window,
            chrono::Duration::days(366)
        );
        reset_env();
    }
}
