//! Daemon configuration from `RELAY_*` environment variables.

use directories::ProjectDirs;
use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use crate::{
    error::ConfigError,
    ffmpeg::builder::EncoderCommand,
    monitor::{RestartPolicy, DEFAULT_CHECK_INTERVAL_SECS},
    supervisor::{SupervisorSettings, DEFAULT_LOG_LINES},
};

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub bind_addr: SocketAddr,
    pub streams_file: PathBuf,
    pub health_interval: Duration,
    pub supervisor: SupervisorSettings,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &'static str| lookup(name).filter(|value| !value.trim().is_empty());

        let bind_addr = parse_or(var("RELAY_BIND"), "RELAY_BIND", SocketAddr::from(([0, 0, 0, 0], 8080)))?;

        let streams_file = var("RELAY_STREAMS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(default_streams_file);

        let encoder = match var("RELAY_ENCODER") {
            Some(command) => EncoderCommand::parse(&command).ok_or(ConfigError::InvalidVar {
                name: "RELAY_ENCODER",
                value: command.clone(),
                reason: "empty command".to_string(),
            })?,
            None => EncoderCommand::default(),
        };

        let log_capacity: usize = parse_or(var("RELAY_LOG_LINES"), "RELAY_LOG_LINES", DEFAULT_LOG_LINES)?;
        if log_capacity == 0 {
            return Err(ConfigError::InvalidVar {
                name: "RELAY_LOG_LINES",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let health_interval = secs_or(
            var("RELAY_HEALTH_INTERVAL_SECS"),
            "RELAY_HEALTH_INTERVAL_SECS",
            DEFAULT_CHECK_INTERVAL_SECS,
        )?;
        if health_interval.is_zero() {
            return Err(ConfigError::InvalidVar {
                name: "RELAY_HEALTH_INTERVAL_SECS",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let defaults = RestartPolicy::default();
        let restart = RestartPolicy {
            max_attempts: parse_or(var("RELAY_MAX_RESTARTS"), "RELAY_MAX_RESTARTS", defaults.max_attempts)?,
            base_backoff: secs_or(
                var("RELAY_RESTART_BACKOFF_SECS"),
                "RELAY_RESTART_BACKOFF_SECS",
                defaults.base_backoff.as_secs(),
            )?,
            max_backoff: secs_or(
                var("RELAY_RESTART_BACKOFF_MAX_SECS"),
                "RELAY_RESTART_BACKOFF_MAX_SECS",
                defaults.max_backoff.as_secs(),
            )?,
            stable_after: secs_or(
                var("RELAY_STABLE_AFTER_SECS"),
                "RELAY_STABLE_AFTER_SECS",
                defaults.stable_after.as_secs(),
            )?,
        };

        let supervisor_defaults = SupervisorSettings::default();
        let supervisor = SupervisorSettings {
            encoder,
            log_capacity,
            stop_grace: secs_or(
                var("RELAY_STOP_GRACE_SECS"),
                "RELAY_STOP_GRACE_SECS",
                supervisor_defaults.stop_grace.as_secs(),
            )?,
            default_destination: var("RELAY_DEFAULT_DESTINATION")
                .unwrap_or(supervisor_defaults.default_destination),
            restart,
        };

        Ok(Self {
            bind_addr,
            streams_file,
            health_interval,
            supervisor,
        })
    }
}

pub fn default_streams_file() -> PathBuf {
    ProjectDirs::from("com", "relay", "relay")
        .map(|project| project.data_dir().join("streams.json"))
        .unwrap_or_else(|| PathBuf::from("streams.json"))
}

fn parse_or<T>(value: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::InvalidVar {
            name,
            value: raw.clone(),
            reason: err.to_string(),
        }),
    }
}

fn secs_or(value: Option<String>, name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    parse_or(value, name, default).map(Duration::from_secs)
}
