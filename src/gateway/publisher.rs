use crate::config::NetworkConfig;
use crate::error::Result;
use crate::nntp::Session;
use crate::packet::Packet;

/// Where accepted packets go. The gateway only needs to know whether the
/// post was taken.
pub trait Publisher: Send + Sync {
    fn publish(&self, packet: &Packet, channel: &str) -> Result<bool>;
}

/// Posts over a fresh NNTP session per packet.
pub struct NetworkPublisher {
    config: NetworkConfig,
}

impl NetworkPublisher {
    pub fn new(config: NetworkConfig) -> Self {
        Self { config }
    }
}

impl Publisher for NetworkPublisher {
    fn publish(&self, packet: &Packet, channel: &str) -> Result<bool> {
        let wire = packet.to_wire()?;
        let mut session = Session::open(&self.config)?;
        let accepted = session.publish(&wire, &packet.subject(), channel, &self.config.from)?;
        if let Err(e) = session.quit() {
            tracing::debug!("QUIT failed: {e}");
        }

        if accepted {
            tracing::info!(
                "Published {} ({} bytes) to {channel}",
                packet.repo_name,
                wire.len()
            );
        }
        Ok(accepted)
    }
}
