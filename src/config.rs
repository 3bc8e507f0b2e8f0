//! Process settings, persisted as TOML.
//!
//! ```toml
//! [engine]
//! invoke_timeout_ms = 2000
//!
//! [server]
//! bind = "0.0.0.0"
//! port = 8300
//! ```
//!
//! Every table and key is optional. `RULENET_BIND` and `RULENET_PORT` override
//! the server address after the file is read.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::error::ConfigError;

pub const BIND_VAR: &str = "RULENET_BIND";
pub const PORT_VAR: &str = "RULENET_PORT";

/// Where the HTTP host listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8300,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e| ConfigError::Parse {
                message: format!("bad server address {}:{}: {e}", self.bind, self.port),
            })
    }

    /// Base URL other processes use to reach this host.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.bind, self.port)
    }
}

/// Everything a `rulenet` process reads at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub server: ServerConfig,
}

impl Settings {
    /// Load from a TOML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |var| std::env::var(var).ok())
    }

    /// [`Self::load`] with overrides looked up through `lookup`.
    pub fn load_with(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let mut settings = Self::from_toml_str(&content)?;
        settings.apply_overrides(lookup)?;
        tracing::debug!(path = %path.display(), ?settings, "loaded settings");
        Ok(settings)
    }

    /// Defaults plus environment overrides, for runs without a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        settings.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Apply `RULENET_*` overrides looked up through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(bind) = lookup(BIND_VAR) {
            self.server.bind = bind;
        }
        if let Some(port) = lookup(PORT_VAR) {
            self.server.port = port.trim().parse().map_err(|e| ConfigError::Parse {
                message: format!("{PORT_VAR}={port}: {e}"),
            })?;
        }
        Ok(())
    }
}
