//! Settings read from the environment (after `.env`, see `main`).

use crate::differ::DEFAULT_MEMORY;
use crate::session::{
    SessionConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_RESPONSE_DEADLINE,
};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_CHAT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_RELAY_TAG: &str = "[bridge]";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub status_interval: Duration,
    pub chat_interval: Duration,
    pub chat_memory: usize,
    pub relay_tag: String,
}

fn parse<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

/// Seconds, fractional allowed. Zero is rejected: a zero socket timeout
/// means "block forever" to the OS.
fn seconds(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::Invalid {
        key,
        value: raw.to_string(),
    };
    let secs: f64 = parse(key, raw)?;
    if secs <= 0.0 {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(secs).map_err(|_| invalid())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let password = get("RCON_PASSWORD").ok_or(ConfigError::Missing("RCON_PASSWORD"))?;
        let host = get("RCON_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match get("RCON_PORT") {
            Some(raw) => parse("RCON_PORT", &raw)?,
            None => DEFAULT_PORT,
        };

        let duration = |key: &'static str, default: Duration| match get(key) {
            Some(raw) => seconds(key, &raw),
            None => Ok(default),
        };

        let mut session = SessionConfig::new(host, port, password);
        session.connect_timeout = duration("RCON_CONNECT_TIMEOUT", DEFAULT_CONNECT_TIMEOUT)?;
        session.read_timeout = duration("RCON_READ_TIMEOUT", DEFAULT_READ_TIMEOUT)?;
        session.response_deadline =
            duration("RCON_RESPONSE_DEADLINE", DEFAULT_RESPONSE_DEADLINE)?;
        session.silent_grace_windows = match get("RCON_SILENT_GRACE") {
            Some(raw) => parse("RCON_SILENT_GRACE", &raw)?,
            None => 0,
        };

        let chat_memory = match get("CHAT_MEMORY") {
            Some(raw) => match parse::<usize>("CHAT_MEMORY", &raw)? {
                0 => {
                    return Err(ConfigError::Invalid {
                        key: "CHAT_MEMORY",
                        value: raw,
                    })
                }
                n => n,
            },
            None => DEFAULT_MEMORY,
        };

        Ok(Self {
            session,
            status_interval: duration("STATUS_INTERVAL", DEFAULT_STATUS_INTERVAL)?,
            chat_interval: duration("CHAT_POLL_INTERVAL", DEFAULT_CHAT_INTERVAL)?,
            chat_memory,
            relay_tag: get("RELAY_TAG").unwrap_or_else(|| DEFAULT_RELAY_TAG.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[("RCON_PASSWORD", "pw")]).unwrap();
        assert_eq!(config.session.host, DEFAULT_HOST);
        assert_eq!(config.session.port, 8888);
        assert_eq!(config.session.password, "pw");
        assert_eq!(config.session.read_timeout, Duration::from_millis(3500));
        assert_eq!(config.session.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.session.silent_grace_windows, 0);
        assert_eq!(config.status_interval, Duration::from_secs(30));
        assert_eq!(config.chat_interval, Duration::from_secs(10));
        assert_eq!(config.chat_memory, DEFAULT_MEMORY);
        assert_eq!(config.relay_tag, "[bridge]");
    }

    #[test]
    fn password_required() {
        assert_eq!(
            load(&[]).err(),
            Some(ConfigError::Missing("RCON_PASSWORD"))
        );
        assert_eq!(
            load(&[("RCON_PASSWORD", "  ")]).err(),
            Some(ConfigError::Missing("RCON_PASSWORD"))
        );
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("RCON_PASSWORD", "pw"),
            ("RCON_HOST", "10.0.0.5"),
            ("RCON_PORT", "27015"),
            ("RCON_READ_TIMEOUT", "1.5"),
            ("RCON_SILENT_GRACE", "1"),
            ("CHAT_MEMORY", "64"),
            ("RELAY_TAG", "[Discord]"),
        ])
        .unwrap();
        assert_eq!(config.session.host, "10.0.0.5");
        assert_eq!(config.session.port, 27015);
        assert_eq!(config.session.read_timeout, Duration::from_millis(1500));
        assert_eq!(config.session.silent_grace_windows, 1);
        assert_eq!(config.chat_memory, 64);
        assert_eq!(config.relay_tag, "[Discord]");
    }

    #[test]
    fn invalid_values() {
        for (key, value) in [
            ("RCON_PORT", "99999"),
            ("RCON_READ_TIMEOUT", "0"),
            ("RCON_READ_TIMEOUT", "soon"),
            ("STATUS_INTERVAL", "-3"),
            ("CHAT_MEMORY", "0"),
        ] {
            let err = load(&[("RCON_PASSWORD", "pw"), (key, value)]).err();
            assert_eq!(
                err,
                Some(ConfigError::Invalid {
                    key,
                    value: value.to_string()
                }),
                "{}={}",
                key,
                value
            );
        }
    }
}
