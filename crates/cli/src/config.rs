//! Server configuration: a TOML file, then environment overrides, then flags.
//!
//! ```toml
//! [server]
//! port = 8080
//! rate_limit = 60
//! rescan_window_ms = 2000
//!
//! [[operators]]
//! token = "gate-1-secret"
//! name = "Gate 1"
//! role = "security"
//!
//! [[operators]]
//! token = "a101-secret"
//! name = "Anil"
//! role = "resident"
//! flat_no = "A-101"
//!
//! [[residents]]
//! flat_no = "A-101"
//! name = "Anil"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gatehouse_core::{Actor, Role};
use gatehouse_engine::{
    AnyFlat, Resident, ResidentDirectory, StaticIdentityProvider, StaticResidentDirectory,
    DEFAULT_RESCAN_WINDOW,
};
use serde::Deserialize;

pub(crate) const DEFAULT_PORT: u16 = 8080;

/// Default rate limit: 60 requests per minute per IP.
pub(crate) const DEFAULT_RATE_LIMIT: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {var}: '{value}' is not a valid {expected}")]
    Env {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ServerConfig {
    pub(crate) port: u16,
    /// Requests per minute per client IP.
    pub(crate) rate_limit: u64,
    /// A second scan of one credential within this many milliseconds of an
    /// entry or exit is refused as a repeat. 0 disables the check.
    pub(crate) rescan_window_ms: u64,
}

impl ServerConfig {
    pub(crate) fn rescan_window(&self) -> Duration {
        Duration::from_millis(self.rescan_window_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: DEFAULT_PORT,
            rate_limit: DEFAULT_RATE_LIMIT,
            rescan_window_ms: DEFAULT_RESCAN_WINDOW.as_millis() as u64,
        }
    }
}

/// A bearer token and the operator it identifies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct OperatorConfig {
    pub(crate) token: String,
    pub(crate) name: String,
    pub(crate) role: Role,
    #[serde(default)]
    pub(crate) flat_no: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Config {
    pub(crate) server: ServerConfig,
    pub(crate) operators: Vec<OperatorConfig>,
    pub(crate) residents: Vec<Resident>,
}

impl Config {
    /// Read and validate `path`. Without a path the defaults apply: no
    /// operators, every flat accepted.
    pub(crate) fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply `GATEHOUSE_PORT` and `GATEHOUSE_RATE_LIMIT` from `lookup`, then
    /// validate the result.
    pub(crate) fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("GATEHOUSE_PORT") {
            self.server.port = value.trim().parse().map_err(|_| ConfigError::Env {
                var: "GATEHOUSE_PORT",
                value,
                expected: "port number",
            })?;
        }
        if let Some(value) = lookup("GATEHOUSE_RATE_LIMIT") {
            self.server.rate_limit = value.trim().parse().map_err(|_| ConfigError::Env {
                var: "GATEHOUSE_RATE_LIMIT",
                value,
                expected: "request count",
            })?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut tokens = HashSet::new();
        for op in &self.operators {
            if op.token.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "operator '{}' has an empty token",
                    op.name
                )));
            }
            if !tokens.insert(op.token.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "operator '{}' reuses a token already assigned",
                    op.name
                )));
            }
            if op.role == Role::Resident && op.flat_no.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "resident operator '{}' needs a flat_no",
                    op.name
                )));
            }
        }
        if self.server.rate_limit == 0 {
            return Err(ConfigError::Invalid("rate_limit must be at least 1".into()));
        }
        Ok(())
    }

    pub(crate) fn identity(&self) -> StaticIdentityProvider {
        self.operators
            .iter()
            .fold(StaticIdentityProvider::new(), |provider, op| {
                let actor = match (op.role, &op.flat_no) {
                    (Role::Resident, Some(flat)) => Actor::resident(&op.name, flat),
                    (role, _) => Actor::new(&op.name, role),
                };
                provider.with_operator(&op.token, actor)
            })
    }

    /// With no residents configured, any flat number is accepted.
    pub(crate) fn directory(&self) -> Arc<dyn ResidentDirectory> {
        if self.residents.is_empty() {
            Arc::new(AnyFlat)
        } else {
            Arc::new(StaticResidentDirectory::new(self.residents.iter().cloned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        port = 9090

        [[operators]]
        token = "gate"
        name = "Gate 1"
        role = "security"

        [[operators]]
        token = "anil"
        name = "Anil"
        role = "resident"
        flat_no = "A-101"

        [[residents]]
        flat_no = "A-101"
        name = "Anil"
        phone = "9876543210"
    "#;

    #[test]
    fn parses_sample_with_defaults() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.rate_limit, DEFAULT_RATE_LIMIT);
        assert_eq!(config.operators.len(), 2);
        assert_eq!(config.operators[1].role, Role::Resident);
        assert_eq!(config.identity().len(), 2);
    }

    #[test]
    fn env_overrides_file() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config
            .apply_env(|var| match var {
                "GATEHOUSE_PORT" => Some("7000".into()),
                "GATEHOUSE_RATE_LIMIT" => Some(" 5 ".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.rate_limit, 5);
    }

    #[test]
    fn bad_env_value_is_reported() {
        let mut config = Config::default();
        let err = config
            .apply_env(|var| (var == "GATEHOUSE_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("GATEHOUSE_PORT"), "{err}");
    }

    #[test]
    fn zero_rate_limit_from_env_is_rejected() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        let err = config
            .apply_env(|var| (var == "GATEHOUSE_RATE_LIMIT").then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
        assert!(err.to_string().contains("rate_limit"), "{err}");
    }

    #[test]
    fn rescan_window_defaults_and_overrides() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.server.rescan_window(), DEFAULT_RESCAN_WINDOW);
        let config: Config = toml::from_str("[server]\nrescan_window_ms = 0\n").unwrap();
        assert_eq!(config.server.rescan_window(), Duration::ZERO);
    }

    #[test]
    fn resident_operator_needs_flat() {
        let config: Config = toml::from_str(
            r#"
            [[operators]]
            token = "x"
            name = "Anil"
            role = "resident"
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn duplicate_tokens_rejected() {
        let config: Config = toml::from_str(
            r#"
            [[operators]]
            token = "same"
            name = "Gate 1"
            role = "security"

            [[operators]]
            token = "same"
            name = "Gate 2"
            role = "security"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("[server]\nhost = \"x\"\n").is_err());
    }
}
