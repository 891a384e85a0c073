use std::net::SocketAddr;
use std::path::PathBuf;

use super::network::DEFAULT_CHANNEL;

/// 100 MiB per issued key unless the issuer says otherwise.
pub const DEFAULT_QUOTA_BYTES: i64 = 100 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    /// Local mirror of ingested commits.
    #[must_use]
    pub fn commits_db_path(&self) -> PathBuf {
        self.data_dir.join("commits.db")
    }

    /// Keys, quotas, usage and ownership.
    #[must_use]
    pub fn gateway_db_path(&self) -> PathBuf {
        self.data_dir.join("gateway.db")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexConfig {
    /// Reject packets whose attached digest does not match their content.
    pub verify_digest: bool,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub default_quota_bytes: i64,
    pub default_channel: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_quota_bytes: DEFAULT_QUOTA_BYTES,
            default_channel: DEFAULT_CHANNEL.to_string(),
        }
    }
}
