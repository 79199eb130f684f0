//! Runtime configuration for the bootstrap server.

use std::path::PathBuf;

/// Listen address used when none is configured.
pub const DEFAULT_ADDRESS: &str = "8008";

/// Per-device rate limit applied to the bootstrap service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 20,
            burst: 50,
        }
    }
}

/// Everything `BootzServer::start` needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// `[ip:]port` to listen on.
    pub address: String,
    /// Overrides the inventory's `options.artifact_dir`.
    pub artifact_dir: Option<PathBuf>,
    /// Inventory file. `None` serves an empty inventory.
    pub inventory: Option<PathBuf>,
    /// Interface the external DHCP service runs on.
    pub dhcp_intf: Option<String>,
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            artifact_dir: None,
            inventory: None,
            dhcp_intf: None,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl ServerConfig {
    /// The address to bind, with bare ports mapped to localhost.
    pub fn listen_address(&self) -> String {
        convert_address(&self.address)
    }
}

/// Map a bare port to `localhost:<port>`; anything with a host is kept.
pub fn convert_address(addr: &str) -> String {
    if addr.contains(':') {
        addr.to_string()
    } else {
        format!("localhost:{}", addr)
    }
}
