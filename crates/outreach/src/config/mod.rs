use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::workflows::applications::{
    ClassifierConfig, EngineSettings, RateLimits, RetryPolicy, ScreeningPolicy,
};

/// Distinguishes runtime behavior for different stages of the tool.
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

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub telemetry: TelemetryConfig,
    pub outreach: OutreachConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );
        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            telemetry: TelemetryConfig { log_level },
            outreach: OutreachConfig::from_env()?,
        })
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Limits and switches for outreach runs.
#[derive(Debug, Clone)]
pub struct OutreachConfig {
    pub data_dir: PathBuf,
    pub rate_limits: RateLimits,
    pub classification_threshold: f64,
    pub require_manual_review: bool,
    pub wait_for_cooldown: bool,
    pub retry: RetryPolicy,
}

impl OutreachConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let data_dir = env::var("OUTREACH_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));

        let max_applications_per_day = parse_var("OUTREACH_MAX_APPLICATIONS_PER_DAY", 25u32)?;
        ensure(
            "OUTREACH_MAX_APPLICATIONS_PER_DAY",
            max_applications_per_day,
            (1..=50).contains(&max_applications_per_day),
            "between 1 and 50",
        )?;

        let max_companies_per_day = parse_var("OUTREACH_MAX_COMPANIES_PER_DAY", 40u32)?;
        ensure(
            "OUTREACH_MAX_COMPANIES_PER_DAY",
            max_companies_per_day,
            (1..=100).contains(&max_companies_per_day),
            "between 1 and 100",
        )?;

        let max_applications_per_run = match env::var("OUTREACH_MAX_APPLICATIONS_PER_RUN") {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_value(
                "OUTREACH_MAX_APPLICATIONS_PER_RUN",
                &raw,
            )?),
            _ => None,
        };

        let application_delay_secs = parse_var("OUTREACH_APPLICATION_DELAY_SECS", 90u64)?;
        ensure(
            "OUTREACH_APPLICATION_DELAY_SECS",
            application_delay_secs,
            application_delay_secs >= 30,
            "at least 30",
        )?;
        let company_delay_secs = parse_var("OUTREACH_COMPANY_DELAY_SECS", 180u64)?;

        let classification_threshold = parse_var("OUTREACH_CLASSIFICATION_THRESHOLD", 0.6f64)?;
        ensure(
            "OUTREACH_CLASSIFICATION_THRESHOLD",
            classification_threshold,
            (0.0..=1.0).contains(&classification_threshold),
            "between 0 and 1",
        )?;

        let retry_attempts = parse_var("OUTREACH_RETRY_ATTEMPTS", 3u32)?;
        ensure(
            "OUTREACH_RETRY_ATTEMPTS",
            retry_attempts,
            retry_attempts >= 1,
            "at least 1",
        )?;
        let retry_base_ms = parse_var("OUTREACH_RETRY_BASE_MS", 1000u64)?;

        Ok(Self {
            data_dir,
            rate_limits: RateLimits {
                max_applications_per_day,
                max_companies_per_day,
                max_applications_per_run,
                application_delay: Duration::from_secs(application_delay_secs),
                company_visit_delay: Duration::from_secs(company_delay_secs),
            },
            classification_threshold,
            require_manual_review: parse_flag("OUTREACH_REQUIRE_MANUAL_REVIEW", true)?,
            wait_for_cooldown: parse_flag("OUTREACH_WAIT_FOR_COOLDOWN", true)?,
            retry: RetryPolicy {
                max_attempts: retry_attempts,
                initial_delay: Duration::from_millis(retry_base_ms),
                ..RetryPolicy::default()
            },
        })
    }

    pub fn classifier(&self) -> ClassifierConfig {
        ClassifierConfig {
            acceptance_threshold: self.classification_threshold,
            ..ClassifierConfig::default()
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            require_manual_review: self.require_manual_review,
            wait_for_cooldown: self.wait_for_cooldown,
            screening: ScreeningPolicy::default(),
            retry: self.retry.clone(),
        }
    }
}

fn parse_var<T: FromStr>(variable: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(variable) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(variable, &raw),
        _ => Ok(default),
    }
}

fn parse_value<T: FromStr>(variable: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        variable,
        value: raw.to_string(),
    })
}

fn parse_flag(variable: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Ok(raw) = env::var(variable) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            variable,
            value: raw,
        }),
    }
}

fn ensure<T: fmt::Display>(
    variable: &'static str,
    value: T,
    valid: bool,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if valid {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            variable,
            value: value.to_string(),
            expected,
        })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue {
        variable: &'static str,
        value: String,
    },
    OutOfRange {
        variable: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue { variable, value } => {
                write!(f, "{variable} has an unparseable value '{value}'")
            }
            ConfigError::OutOfRange {
                variable,
                value,
                expected,
            } => write!(f, "{variable} must be {expected}, got {value}"),
        }
    }
}

impl std::error::Error for ConfigError {}

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
        for variable in [
            "APP_ENV",
            "APP_LOG_LEVEL",
            "OUTREACH_DATA_DIR",
            "OUTREACH_MAX_APPLICATIONS_PER_DAY",
            "OUTREACH_MAX_COMPANIES_PER_DAY",
            "OUTREACH_MAX_APPLICATIONS_PER_RUN",
            "OUTREACH_APPLICATION_DELAY_SECS",
            "OUTREACH_COMPANY_DELAY_SECS",
            "OUTREACH_CLASSIFICATION_THRESHOLD",
            "OUTREACH_REQUIRE_MANUAL_REVIEW",
            "OUTREACH_RETRY_ATTEMPTS",
            "OUTREACH_RETRY_BASE_MS",
            "OUTREACH_WAIT_FOR_COOLDOWN",
        ] {
            env::remove_var(variable);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");

        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.telemetry.log_level, "info");
        let outreach = config.outreach;
        assert_eq!(outreach.data_dir, PathBuf::from("data"));
        assert_eq!(outreach.rate_limits, RateLimits::default());
        assert_eq!(outreach.classification_threshold, 0.6);
        assert!(outreach.require_manual_review);
        assert!(outreach.wait_for_cooldown);
        assert_eq!(outreach.retry, RetryPolicy::default());
    }

    #[test]
    fn overrides_flow_into_limits_and_settings() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_ENV", "prod");
        env::set_var("OUTREACH_MAX_APPLICATIONS_PER_DAY", "10");
        env::set_var("OUTREACH_MAX_APPLICATIONS_PER_RUN", "3");
        env::set_var("OUTREACH_APPLICATION_DELAY_SECS", "120");
        env::set_var("OUTREACH_REQUIRE_MANUAL_REVIEW", "false");
        env::set_var("OUTREACH_CLASSIFICATION_THRESHOLD", "0.7");

        let config = AppConfig::load().expect("config loads");
        reset_env();

        assert_eq!(config.environment, AppEnvironment::Production);
        let limits = &config.outreach.rate_limits;
        assert_eq!(limits.max_applications_per_day, 10);
        assert_eq!(limits.max_applications_per_run, Some(3));
        assert_eq!(limits.application_delay, Duration::from_secs(120));
        assert!(!config.outreach.engine_settings().require_manual_review);
        assert_eq!(config.outreach.classifier().acceptance_threshold, 0.7);
    }

    #[test]
    fn rejects_limits_outside_safe_bounds() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("OUTREACH_MAX_APPLICATIONS_PER_DAY", "80");
        let err = AppConfig::load().expect_err("daily ceiling above 50");
        assert!(err.to_string().contains("OUTREACH_MAX_APPLICATIONS_PER_DAY"));

        reset_env();
        env::set_var("OUTREACH_APPLICATION_DELAY_SECS", "5");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::OutOfRange {
                variable: "OUTREACH_APPLICATION_DELAY_SECS",
                ..
            })
        ));

        reset_env();
        env::set_var("OUTREACH_WAIT_FOR_COOLDOWN", "sometimes");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidValue { .. })
        ));
        reset_env();
    }
}
