//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    /// HTTP/WebSocket listen port.
    pub port: u16,
    /// libSQL file holding session snapshots. `None` keeps sessions in memory only.
    pub db_path: Option<PathBuf>,
    /// Minimum password score (0..=3) accepted by the register step.
    pub min_password_score: u8,
    /// Run the per-step gates inside the store.
    pub enforce_gates: bool,
    pub collaborators: CollaboratorConfig,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: Some(PathBuf::from("./data/onboarding.db")),
            min_password_score: 2,
            enforce_gates: true,
            collaborators: CollaboratorConfig::default(),
        }
    }
}

impl OnboardingConfig {
    /// Build from `SCRIBE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = env_parse("SCRIBE_PORT", defaults.port)?;

        let db_path = match std::env::var("SCRIBE_DB_PATH") {
            Ok(p) if p.is_empty() || p == "none" => None,
            Ok(p) => Some(PathBuf::from(p)),
            Err(_) => defaults.db_path,
        };

        let min_password_score: u8 = env_parse("SCRIBE_MIN_PASSWORD_SCORE", defaults.min_password_score)?;
        if min_password_score > 3 {
            return Err(ConfigError::InvalidValue {
                key: "SCRIBE_MIN_PASSWORD_SCORE".to_string(),
                message: format!("must be between 0 and 3, got {min_password_score}"),
            });
        }

        let enforce_gates = env_parse("SCRIBE_ENFORCE_GATES", defaults.enforce_gates)?;

        Ok(Self {
            port,
            db_path,
            min_password_score,
            enforce_gates,
            collaborators: CollaboratorConfig::from_env()?,
        })
    }
}

/// Behaviour of the mock external services.
#[derive(Debug, Clone)]
pub struct CollaboratorConfig {
    /// Simulated round-trip latency for every call.
    pub latency: Duration,
    pub sso_failure_rate: f64,
    pub calendar_failure_rate: f64,
    pub registration_failure_rate: f64,
    pub access_request_failure_rate: f64,
    /// Fixed RNG seed for reproducible failures (tests, demos).
    pub seed: Option<u64>,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(1500),
            sso_failure_rate: 0.10,
            calendar_failure_rate: 0.05,
            registration_failure_rate: 0.0,
            access_request_failure_rate: 0.0,
            seed: None,
        }
    }
}

impl CollaboratorConfig {
    /// Instant, never-failing services.
    pub fn reliable() -> Self {
        Self {
            latency: Duration::ZERO,
            sso_failure_rate: 0.0,
            calendar_failure_rate: 0.0,
            registration_failure_rate: 0.0,
            access_request_failure_rate: 0.0,
            seed: Some(0),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let latency_ms: u64 = env_parse("SCRIBE_MOCK_LATENCY_MS", defaults.latency.as_millis() as u64)?;

        Ok(Self {
            latency: Duration::from_millis(latency_ms),
            sso_failure_rate: env_rate("SCRIBE_SSO_FAILURE_RATE", defaults.sso_failure_rate)?,
            calendar_failure_rate: env_rate(
                "SCRIBE_CALENDAR_FAILURE_RATE",
                defaults.calendar_failure_rate,
            )?,
            registration_failure_rate: env_rate(
                "SCRIBE_REGISTRATION_FAILURE_RATE",
                defaults.registration_failure_rate,
            )?,
            access_request_failure_rate: env_rate(
                "SCRIBE_ACCESS_REQUEST_FAILURE_RATE",
                defaults.access_request_failure_rate,
            )?,
            seed: std::env::var("SCRIBE_MOCK_SEED")
                .ok()
                .and_then(|s| s.parse().ok()),
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_rate(key: &str, default: f64) -> Result<f64, ConfigError> {
    let rate: f64 = env_parse(key, default)?;
    if !(0.0..=1.0).contains(&rate) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be between 0.0 and 1.0, got {rate}"),
        });
    }
    Ok(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let config = OnboardingConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.min_password_score, 2);
        assert!(config.enforce_gates);
        assert_eq!(config.collaborators.sso_failure_rate, 0.10);
        assert_eq!(config.collaborators.calendar_failure_rate, 0.05);
        assert_eq!(config.collaborators.latency, Duration::from_millis(1500));
    }

    #[test]
    fn reliable_services_never_fail() {
        let config = CollaboratorConfig::reliable();
        assert_eq!(config.latency, Duration::ZERO);
        assert_eq!(config.sso_failure_rate, 0.0);
        assert_eq!(config.calendar_failure_rate, 0.0);
    }

    #[test]
    fn env_parse_falls_back_when_unset() {
        let value: u16 = env_parse("SCRIBE_TEST_SURELY_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }
}
