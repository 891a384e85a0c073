mod network;
mod server;

pub use network::{Credentials, NetworkConfig};
pub use server::{GatewayConfig, IndexConfig, ServerConfig};
