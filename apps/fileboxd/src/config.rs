//! Daemon configuration.
//!
//! Stored as TOML and loaded only when `--config` is given; every key is
//! optional. Command-line flags are applied on top afterwards.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use filebox_server::{ServerConfig, SessionConfig};
use serde::{Deserialize, Serialize};

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// TCP port to listen on (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Interface address to bind.
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// Storage root holding every user namespace.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Worker threads for the runtime (unset = one per core).
    #[serde(default)]
    pub threads: Option<usize>,

    /// Expect a user name as the first header of every connection.
    #[serde(default = "default_true")]
    pub multi_user: bool,

    /// Answer downloads of missing files with an error reply instead of
    /// dropping the request silently.
    #[serde(default)]
    pub reply_on_missing: bool,

    /// Close connections idle for this many seconds (unset = never).
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

fn default_port() -> u16 {
    9000
}

fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_root() -> PathBuf {
    PathBuf::from("storage")
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            root: default_root(),
            threads: None,
            multi_user: default_true(),
            reply_on_missing: false,
            idle_timeout_secs: None,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Rejects values the runtime cannot start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.threads == Some(0) {
            anyhow::bail!("threads must be at least 1");
        }
        if self.idle_timeout_secs == Some(0) {
            anyhow::bail!("idle_timeout_secs must be at least 1; leave it unset to disable");
        }
        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            listen: SocketAddr::new(self.bind, self.port),
            storage_root: self.root.clone(),
            session: SessionConfig {
                multi_user: self.multi_user,
                reply_on_missing: self.reply_on_missing,
                idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
            },
        }
    }
}
