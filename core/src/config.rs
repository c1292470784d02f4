//! Agent and controller configuration loading, both backed by `toml` plus
//! `serde`'s derived `Deserialize`. [`AgentConfig`] carries a listen
//! address and log format; [`ControllerConfig`] carries the `run-all`
//! target list.

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

fn default_addr() -> SocketAddr {
    "0.0.0.0:8090".parse().expect("valid default address")
}

fn default_log_format() -> LogFormat {
    LogFormat::Plain
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

/// The agent's listen address and log format, loadable from a TOML file or
/// overridden from the command line.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_addr")]
    pub address: SocketAddr,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            address: default_addr(),
            log_format: default_log_format(),
        }
    }
}

impl AgentConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&text)?)
    }
}

/// One agent target a controller knows about by name, loadable from a TOML
/// file of `[[targets]]` tables.
#[derive(Debug, Clone, Deserialize)]
pub struct Target {
    pub name: String,
    pub address: SocketAddr,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControllerConfig {
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl ControllerConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_config_defaults() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.address.port(), 8090);
        assert_eq!(cfg.log_format, LogFormat::Plain);
    }

    #[test]
    fn agent_config_parses_toml() {
        let cfg: AgentConfig = toml::from_str(
            r#"address = "127.0.0.1:9000"
log_format = "json"
"#,
        )
        .unwrap();
        assert_eq!(cfg.address.port(), 9000);
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn controller_config_parses_targets() {
        let cfg: ControllerConfig = toml::from_str(
            r#"
[[targets]]
name = "a"
address = "127.0.0.1:8090"
"#,
        )
        .unwrap();
        assert_eq!(cfg.targets.len(), 1);
        assert_eq!(cfg.targets[0].name, "a");
    }
}
