//! Process configuration: a serde/TOML shape covering the fields this
//! core's surfaces actually need.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub imap: ImapConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// The name the greeting advertises: `* OK <ServerName> IMAP4rev2
    /// server ready`.
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ImapConfig {
    pub bind_addr: SocketAddr,
    /// TLS wiring is out of scope, but the config surface is
    /// kept so a deployment can grow into it without a config-format
    /// break.
    pub tls: Option<TlsConfig>,
    /// Inactivity beyond this drives `* BYE Session timeout`.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthConfig {
    /// The per-user live-connection cap shared across IMAP and POP3.
    #[serde(default = "default_connection_cap")]
    pub connection_cap: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            connection_cap: default_connection_cap(),
        }
    }
}

fn default_connection_cap() -> u32 {
    20
}

fn default_session_timeout_secs() -> u64 {
    30 * 60
}

fn default_server_name() -> String {
    "mailcore".to_string()
}

pub fn read_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {:?}", path))?;
    toml::from_str(&raw).with_context(|| format!("parsing config file {:?}", path))
}
