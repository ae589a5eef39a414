//! Conference Controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address for the RPC surface and WebSocket signaling.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default join window: admission opens this many minutes before start.
pub const DEFAULT_JOIN_WINDOW_MINUTES: i64 = 10;

/// Default participant cap when a schedule request omits one.
pub const DEFAULT_MAX_PARTICIPANTS: u32 = 50;

/// Hard upper bound on `max_participants` for any session.
pub const MAX_PARTICIPANTS_LIMIT: u32 = 100;

/// Default per-connection outbound queue capacity.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Default telemetry interval in milliseconds.
pub const DEFAULT_TELEMETRY_INTERVAL_MS: u64 = 1000;

/// Default consecutive samples required before a quality transition.
pub const DEFAULT_QUALITY_HYSTERESIS_SAMPLES: u32 = 3;

/// Smallest hysteresis window accepted.
pub const MIN_QUALITY_HYSTERESIS_SAMPLES: u32 = 3;

/// Default recording availability SLA in minutes.
pub const DEFAULT_RECORDING_SLA_MINUTES: i64 = 30;

/// Default upload attempts before a recording is marked FAILED.
pub const DEFAULT_RECORDING_MAX_ATTEMPTS: u32 = 3;

/// Default timeout for a single upload attempt in seconds.
pub const DEFAULT_RECORDING_UPLOAD_TIMEOUT_SECONDS: u64 = 120;

/// Default recording watchdog sweep interval in seconds.
pub const DEFAULT_RECORDING_WATCHDOG_INTERVAL_SECONDS: u64 = 30;

/// Default timeout for invitation delivery in seconds.
pub const DEFAULT_INVITATION_TIMEOUT_SECONDS: u64 = 10;

/// Default ICE servers handed to clients on join.
pub const DEFAULT_ICE_SERVERS: &str = "stun:stun.l.google.com:19302";

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "cc";

/// Conference Controller configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Unique identifier for this controller instance.
    pub instance_id: String,

    /// HTTP bind address for RPC and WebSocket (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Base URL for session join links; the session ID is appended.
    pub join_url_base: String,

    /// Minutes before start when admission opens (default: 10).
    pub join_window_minutes: i64,

    /// Participant cap used when a schedule request omits one (default: 50).
    pub default_max_participants: u32,

    /// Bounded outbound queue per connection (default: 64).
    pub outbound_queue_capacity: usize,

    /// Quality controller sampling period in milliseconds (default: 1000).
    pub telemetry_interval_ms: u64,

    /// Consecutive qualifying samples before a tier change (default: 3, min 3).
    pub quality_hysteresis_samples: u32,

    /// Object storage bucket for recordings.
    pub recording_bucket: String,

    /// Availability SLA after session completion in minutes (default: 30).
    pub recording_sla_minutes: i64,

    /// Upload attempts before FAILED (default: 3).
    pub recording_max_attempts: u32,

    /// Timeout for one upload attempt in seconds (default: 120).
    pub recording_upload_timeout_seconds: u64,

    /// Watchdog sweep interval in seconds (default: 30).
    pub recording_watchdog_interval_seconds: u64,

    /// Timeout for invitation delivery in seconds (default: 10).
    pub invitation_timeout_seconds: u64,

    /// STUN/TURN URLs handed to clients.
    pub ice_servers: Vec<String>,

    /// Object storage credentials.
    /// Protected by `SecretString` to prevent accidental logging.
    pub storage_credentials: Option<SecretString>,

    /// Emit JSON logs instead of human-readable lines.
    pub log_json: bool,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("instance_id", &self.instance_id)
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("join_url_base", &self.join_url_base)
            .field("join_window_minutes", &self.join_window_minutes)
            .field("default_max_participants", &self.default_max_participants)
            .field("outbound_queue_capacity", &self.outbound_queue_capacity)
            .field("telemetry_interval_ms", &self.telemetry_interval_ms)
            .field(
                "quality_hysteresis_samples",
                &self.quality_hysteresis_samples,
            )
            .field("recording_bucket", &self.recording_bucket)
            .field("recording_sla_minutes", &self.recording_sla_minutes)
            .field("recording_max_attempts", &self.recording_max_attempts)
            .field(
                "recording_upload_timeout_seconds",
                &self.recording_upload_timeout_seconds,
            )
            .field(
                "recording_watchdog_interval_seconds",
                &self.recording_watchdog_interval_seconds,
            )
            .field(
                "invitation_timeout_seconds",
                &self.invitation_timeout_seconds,
            )
            .field("ice_servers", &self.ice_servers)
            .field(
                "storage_credentials",
                &self.storage_credentials.as_ref().map(|_| "[REDACTED]"),
            )
            .field("log_json", &self.log_json)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let join_url_base = vars
            .get("CC_JOIN_URL_BASE")
            .ok_or_else(|| ConfigError::MissingEnvVar("CC_JOIN_URL_BASE".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let recording_bucket = vars
            .get("CC_RECORDING_BUCKET")
            .ok_or_else(|| ConfigError::MissingEnvVar("CC_RECORDING_BUCKET".to_string()))?
            .clone();

        let bind_address = vars
            .get("CC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("CC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let join_window_minutes = vars
            .get("CC_JOIN_WINDOW_MINUTES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_JOIN_WINDOW_MINUTES);

        let default_max_participants = vars
            .get("CC_DEFAULT_MAX_PARTICIPANTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_PARTICIPANTS);

        let outbound_queue_capacity = vars
            .get("CC_OUTBOUND_QUEUE_CAPACITY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_OUTBOUND_QUEUE_CAPACITY);

        let telemetry_interval_ms = vars
            .get("CC_TELEMETRY_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TELEMETRY_INTERVAL_MS);

        let quality_hysteresis_samples = vars
            .get("CC_QUALITY_HYSTERESIS_SAMPLES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_QUALITY_HYSTERESIS_SAMPLES);

        let recording_sla_minutes = vars
            .get("CC_RECORDING_SLA_MINUTES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECORDING_SLA_MINUTES);

        let recording_max_attempts = vars
            .get("CC_RECORDING_MAX_ATTEMPTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECORDING_MAX_ATTEMPTS);

        let recording_upload_timeout_seconds = vars
            .get("CC_RECORDING_UPLOAD_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECORDING_UPLOAD_TIMEOUT_SECONDS);

        let recording_watchdog_interval_seconds = vars
            .get("CC_RECORDING_WATCHDOG_INTERVAL_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECORDING_WATCHDOG_INTERVAL_SECONDS);

        let invitation_timeout_seconds = vars
            .get("CC_INVITATION_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_INVITATION_TIMEOUT_SECONDS);

        let ice_servers = vars
            .get("CC_ICE_SERVERS")
            .map_or(DEFAULT_ICE_SERVERS, String::as_str)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();

        let storage_credentials = vars
            .get("CC_STORAGE_CREDENTIALS")
            .map(|s| SecretString::from(s.clone()));

        let log_json = vars
            .get("CC_LOG_JSON")
            .is_some_and(|s| s.eq_ignore_ascii_case("true") || s == "1");

        // Generate instance ID
        let instance_id = vars.get("CC_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        let config = Config {
            instance_id,
            bind_address,
            health_bind_address,
            join_url_base,
            join_window_minutes,
            default_max_participants,
            outbound_queue_capacity,
            telemetry_interval_ms,
            quality_hysteresis_samples,
            recording_bucket,
            recording_sla_minutes,
            recording_max_attempts,
            recording_upload_timeout_seconds,
            recording_watchdog_interval_seconds,
            invitation_timeout_seconds,
            ice_servers,
            storage_credentials,
            log_json,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.quality_hysteresis_samples < MIN_QUALITY_HYSTERESIS_SAMPLES {
            return Err(ConfigError::InvalidValue(format!(
                "CC_QUALITY_HYSTERESIS_SAMPLES must be at least {MIN_QUALITY_HYSTERESIS_SAMPLES}, got {}",
                self.quality_hysteresis_samples
            )));
        }
        if self.default_max_participants == 0
            || self.default_max_participants > MAX_PARTICIPANTS_LIMIT
        {
            return Err(ConfigError::InvalidValue(format!(
                "CC_DEFAULT_MAX_PARTICIPANTS must be within 1..={MAX_PARTICIPANTS_LIMIT}, got {}",
                self.default_max_participants
            )));
        }
        if self.join_window_minutes < 0 {
            return Err(ConfigError::InvalidValue(
                "CC_JOIN_WINDOW_MINUTES must not be negative".to_string(),
            ));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "CC_OUTBOUND_QUEUE_CAPACITY must be positive".to_string(),
            ));
        }
        if self.telemetry_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "CC_TELEMETRY_INTERVAL_MS must be positive".to_string(),
            ));
        }
        if self.recording_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "CC_RECORDING_MAX_ATTEMPTS must be positive".to_string(),
            ));
        }
        if self.recording_sla_minutes <= 0 {
            return Err(ConfigError::InvalidValue(
                "CC_RECORDING_SLA_MINUTES must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Join window as a chrono duration.
    #[must_use]
    pub fn join_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.join_window_minutes)
    }

    /// Recording SLA as a chrono duration.
    #[must_use]
    pub fn recording_sla(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.recording_sla_minutes)
    }

    /// Quality controller sampling period.
    #[must_use]
    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }

    /// Timeout for one upload attempt.
    #[must_use]
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.recording_upload_timeout_seconds)
    }

    /// Watchdog sweep interval.
    #[must_use]
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.recording_watchdog_interval_seconds)
    }

    /// Timeout for invitation delivery.
    #[must_use]
    pub fn invitation_timeout(&self) -> Duration {
        Duration::from_secs(self.invitation_timeout_seconds)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "CC_JOIN_URL_BASE".to_string(),
                "https://meet.example.com/s/".to_string(),
            ),
            (
                "CC_RECORDING_BUCKET".to_string(),
                "class-recordings".to_string(),
            ),
        ])
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.join_url_base, "https://meet.example.com/s");
        assert_eq!(config.join_window_minutes, 10);
        assert_eq!(config.default_max_participants, 50);
        assert_eq!(config.quality_hysteresis_samples, 3);
        assert_eq!(config.recording_sla_minutes, 30);
        assert_eq!(config.recording_max_attempts, 3);
        assert_eq!(config.ice_servers, vec![DEFAULT_ICE_SERVERS.to_string()]);
        assert!(config.storage_credentials.is_none());
        assert!(!config.log_json);
        assert!(config.instance_id.starts_with("cc-"));
    }

    #[test]
    fn test_from_vars_overrides() {
        let mut vars = base_vars();
        vars.insert("CC_INSTANCE_ID".to_string(), "cc-test-01".to_string());
        vars.insert("CC_JOIN_WINDOW_MINUTES".to_string(), "15".to_string());
        vars.insert("CC_QUALITY_HYSTERESIS_SAMPLES".to_string(), "5".to_string());
        vars.insert(
            "CC_ICE_SERVERS".to_string(),
            "stun:a.example:3478, turn:b.example:3478".to_string(),
        );
        vars.insert("CC_LOG_JSON".to_string(), "true".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.instance_id, "cc-test-01");
        assert_eq!(config.join_window(), chrono::Duration::minutes(15));
        assert_eq!(config.quality_hysteresis_samples, 5);
        assert_eq!(
            config.ice_servers,
            vec!["stun:a.example:3478", "turn:b.example:3478"]
        );
        assert!(config.log_json);
    }

    #[test]
    fn test_missing_required_vars() {
        let mut vars = base_vars();
        vars.remove("CC_RECORDING_BUCKET");

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar(ref v)) if v == "CC_RECORDING_BUCKET")
        );
    }

    #[test]
    fn test_hysteresis_below_minimum_rejected() {
        let mut vars = base_vars();
        vars.insert("CC_QUALITY_HYSTERESIS_SAMPLES".to_string(), "2".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_default_max_participants_bounded() {
        let mut vars = base_vars();
        vars.insert("CC_DEFAULT_MAX_PARTICIPANTS".to_string(), "101".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_defaults() {
        let mut vars = base_vars();
        vars.insert("CC_TELEMETRY_INTERVAL_MS".to_string(), "fast".to_string());

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.telemetry_interval_ms, DEFAULT_TELEMETRY_INTERVAL_MS);
    }

    #[test]
    fn test_debug_redacts_storage_credentials() {
        let mut vars = base_vars();
        vars.insert(
            "CC_STORAGE_CREDENTIALS".to_string(),
            "super-secret-key".to_string(),
        );

        let config = Config::from_vars(&vars).unwrap();
        let debug = format!("{config:?}");

        assert!(!debug.contains("super-secret-key"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(
            config.storage_credentials.unwrap().expose_secret(),
            "super-secret-key"
        );
    }
}
