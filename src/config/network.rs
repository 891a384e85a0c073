use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_CHANNEL: &str = "alt.test";
pub const DEFAULT_NNTPS_PORT: u16 = 563;
pub const DEFAULT_SCAN_LIMIT: u64 = 50;

/// Login details for the news server.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Plaintext NNTP is only meant for local test servers.
    #[serde(default = "default_tls")]
    pub tls: bool,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("tls", &self.tls)
            .finish()
    }
}

fn default_port() -> u16 {
    DEFAULT_NNTPS_PORT
}

fn default_tls() -> bool {
    true
}

/// Network settings, read from a TOML file:
///
/// ```toml
/// channel = "alt.test"
/// scan_limit = 50
///
/// [server]
/// host = "news.example.net"
/// port = 563
/// username = "me"
/// password = "secret"
/// ```
///
/// Without a `[server]` table every network operation reports
/// [`Error::MissingCredentials`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    #[serde(rename = "server", skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    pub channel: String,
    pub scan_limit: u64,
    /// `From:` header on posted packets.
    pub from: String,
    pub timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            channel: DEFAULT_CHANNEL.to_string(),
            scan_limit: DEFAULT_SCAN_LIMIT,
            from: "Deep Sea <deepsea@localhost>".to_string(),
            timeout_secs: 30,
        }
    }
}

impl NetworkConfig {
    /// Loads the config at `path`. A missing file is not an error; it yields
    /// the defaults with no credentials.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No network config at {}, network disabled", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(format!("network config: {e}")))?;
        if config.scan_limit == 0 {
            return Err(Error::Config("scan_limit must be positive".to_string()));
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn require_credentials(&self) -> Result<&Credentials> {
        self.credentials.as_ref().ok_or(Error::MissingCredentials)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}
