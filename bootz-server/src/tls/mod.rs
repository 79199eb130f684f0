//! TLS configuration for the bootstrap listener.
//!
//! Devices have no client identity at bootstrap time, so the listener is
//! server-auth only. The server presents the Pinned Domain Certificate.

mod connect_info;
mod identity;
mod server;

pub use connect_info::{TlsConnectInfo, TlsConnection};
pub use identity::TlsIdentity;
pub use server::{TlsConfigError, TlsServerConfig};
