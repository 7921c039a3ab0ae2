use crate::error::AppError;
use chrono::NaiveTime;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Settings for the deferred delivery sweep
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often queued `outside_time_boundary` messages are re-checked
    pub sweep_interval: Duration,
}

/// Settings for the delivery policy evaluator
#[derive(Debug, Clone, Copy)]
pub struct PolicyConfig {
    /// Local time used when no configured boundary is found within a week
    pub fallback_delivery_time: NaiveTime,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            fallback_delivery_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

/// WebSocket session settings
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: usize,
    pub port: u16,
    pub jwt_public_key_pem: String,
    pub max_message_length: usize,
    pub state_event_buffer: usize,
    pub scheduler: SchedulerConfig,
    pub policy: PolicyConfig,
    pub ws: WsConfig,
}

impl Config {
    fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError> {
        match env::var(name) {
            Ok(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw}"))),
            _ => Ok(default),
        }
    }

    fn parse_time_of_day(name: &str, raw: &str) -> Result<NaiveTime, AppError> {
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map_err(|_| AppError::Config(format!("{name} must be HH:MM, got {raw}")))
    }

    fn load_jwt_public_key() -> Result<String, AppError> {
        if let Ok(pem) = env::var("JWT_PUBLIC_KEY_PEM") {
            if !pem.trim().is_empty() {
                return Ok(pem);
            }
        }

        let path = env::var("JWT_PUBLIC_KEY_FILE").map_err(|_| {
            AppError::Config("JWT_PUBLIC_KEY_PEM or JWT_PUBLIC_KEY_FILE missing".into())
        })?;
        tracing::info!(jwt_public_key_file = %path, "loading JWT public key from file");
        std::fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("read jwt public key file {path}: {e}")))
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?;
        let database_max_connections = Self::parse_var("DATABASE_MAX_CONNECTIONS", 16usize)?;
        let port = Self::parse_var("PORT", 8080u16)?;
        let jwt_public_key_pem = Self::load_jwt_public_key()?;
        let max_message_length = Self::parse_var("MAX_MESSAGE_LENGTH", 4000usize)?;
        let state_event_buffer = Self::parse_var("STATE_EVENT_BUFFER", 256usize)?;

        let sweep_interval_secs = Self::parse_var("SWEEP_INTERVAL_SECS", 60u64)?;
        if sweep_interval_secs == 0 {
            return Err(AppError::Config("SWEEP_INTERVAL_SECS must be positive".into()));
        }

        let fallback_delivery_time = match env::var("FALLBACK_DELIVERY_TIME") {
            Ok(raw) if !raw.trim().is_empty() => {
                Self::parse_time_of_day("FALLBACK_DELIVERY_TIME", &raw)?
            }
            _ => PolicyConfig::default().fallback_delivery_time,
        };

        let heartbeat_secs = Self::parse_var("WS_HEARTBEAT_INTERVAL_SECS", 5u64)?;
        let client_timeout_secs = Self::parse_var("WS_CLIENT_TIMEOUT_SECS", 30u64)?;
        if client_timeout_secs <= heartbeat_secs {
            return Err(AppError::Config(
                "WS_CLIENT_TIMEOUT_SECS must be greater than WS_HEARTBEAT_INTERVAL_SECS".into(),
            ));
        }

        Ok(Self {
            database_url,
            database_max_connections,
            port,
            jwt_public_key_pem,
            max_message_length,
            state_event_buffer,
            scheduler: SchedulerConfig {
                sweep_interval: Duration::from_secs(sweep_interval_secs),
            },
            policy: PolicyConfig {
                fallback_delivery_time,
            },
            ws: WsConfig {
                heartbeat_interval: Duration::from_secs(heartbeat_secs),
                client_timeout: Duration::from_secs(client_timeout_secs),
            },
        })
    }

    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/delivery_test".into(),
            database_max_connections: 4,
            port: 8080,
            jwt_public_key_pem: String::new(),
            max_message_length: 4000,
            state_event_buffer: 16,
            scheduler: SchedulerConfig {
                sweep_interval: Duration::from_secs(60),
            },
            policy: PolicyConfig::default(),
            ws: WsConfig {
                heartbeat_interval: Duration::from_secs(5),
                client_timeout: Duration::from_secs(30),
            },
        }
    }
}
