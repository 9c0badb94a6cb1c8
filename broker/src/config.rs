// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Configuration (C10): a TOML file feeding every other component's
//! tunables, with a programmatic default for every field so a missing or
//! partial file still yields a runnable broker.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, ErrorKind};

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    #[serde(default = "General::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "General::default_pub_ack_timeout_ms")]
    pub pub_ack_timeout_ms: u64,

    #[serde(default = "General::default_pub_max_retries")]
    pub pub_max_retries: u32,

    #[serde(default = "General::default_read_buf")]
    pub read_buf: usize,

    #[serde(default = "General::default_write_buf")]
    pub write_buf: usize,
}

impl General {
    const fn default_connect_timeout_ms() -> u64 {
        10_000
    }
    const fn default_pub_ack_timeout_ms() -> u64 {
        crate::session::DEFAULT_PUB_ACK_TIMEOUT_MS
    }
    const fn default_pub_max_retries() -> u32 {
        crate::session::DEFAULT_PUB_MAX_RETRIES
    }
    const fn default_read_buf() -> usize {
        256
    }
    const fn default_write_buf() -> usize {
        256
    }
}

impl Default for General {
    fn default() -> Self {
        Self {
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            pub_ack_timeout_ms: Self::default_pub_ack_timeout_ms(),
            pub_max_retries: Self::default_pub_max_retries(),
            read_buf: Self::default_read_buf(),
            write_buf: Self::default_write_buf(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Listener {
    #[serde(default = "Listener::default_address")]
    pub address: String,

    #[serde(default = "Listener::default_port")]
    pub port: u16,
}

impl Listener {
    fn default_address() -> String {
        "0.0.0.0".to_string()
    }
    const fn default_port() -> u16 {
        1883
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            address: Self::default_address(),
            port: Self::default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Security {
    #[serde(default = "Security::default_auth_service")]
    pub auth_service: String,

    #[serde(default)]
    pub password_file: Option<PathBuf>,

    #[serde(default)]
    pub allow_anonymous: bool,
}

impl Security {
    fn default_auth_service() -> String {
        "accept_all".to_string()
    }
}

impl Default for Security {
    fn default() -> Self {
        Self {
            auth_service: Self::default_auth_service(),
            password_file: None,
            allow_anonymous: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    #[serde(default = "Log::default_file")]
    pub file: PathBuf,

    #[serde(default = "Log::default_level")]
    pub level: String,
}

impl Log {
    fn default_file() -> PathBuf {
        PathBuf::from("/var/log/mqttd.log")
    }
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            file: Self::default_file(),
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub listener: Listener,
    #[serde(default)]
    pub security: Security,
    #[serde(default)]
    pub log: Log,
}

impl Config {
    /// Parse and validate a TOML config file. Missing sections/fields fall
    /// back to defaults; a missing file entirely also yields defaults
    /// rather than an error (only present on the CLI, see C12).
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.listener.port == 0 {
            return Err(Error::new(ErrorKind::ConfigError, "listener.port must be non-zero"));
        }
        if self.general.connect_timeout_ms == 0 {
            return Err(Error::new(
                ErrorKind::ConfigError,
                "general.connect_timeout_ms must be non-zero",
            ));
        }
        if self.general.pub_ack_timeout_ms == 0 {
            return Err(Error::new(
                ErrorKind::ConfigError,
                "general.pub_ack_timeout_ms must be non-zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_runnable() {
        let config = Config::default();
        assert_eq!(config.listener.port, 1883);
        assert_eq!(config.security.auth_service, "accept_all");
    }

    #[test]
    fn test_partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str("[listener]\nport = 18830\n").unwrap();
        assert_eq!(config.listener.port, 18830);
        assert_eq!(config.listener.address, "0.0.0.0");
        assert_eq!(config.general.connect_timeout_ms, 10_000);
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut config = Config::default();
        config.listener.port = 0;
        assert!(config.validate().is_err());
    }
}
