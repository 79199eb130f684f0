//! rustls configuration for the bootstrap listener.

use super::TlsIdentity;
use rustls::ServerConfig;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// gRPC runs over HTTP/2 only.
const ALPN_H2: &[u8] = b"h2";

/// Server-auth-only TLS settings presenting the PDC.
pub struct TlsServerConfig {
    pub config: Arc<ServerConfig>,
}

impl TlsServerConfig {
    /// TLS 1.2 and 1.3, no client certificates, single PDC chain.
    pub fn for_identity(identity: &TlsIdentity) -> Result<Self, TlsConfigError> {
        let mut config = ServerConfig::builder_with_protocol_versions(&[
            &rustls::version::TLS13,
            &rustls::version::TLS12,
        ])
        .with_no_client_auth()
        .with_single_cert(identity.cert_chain.clone(), identity.key.clone_key())
        .map_err(|e| TlsConfigError::Config(e.to_string()))?;
        config.alpn_protocols = vec![ALPN_H2.to_vec()];

        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.config.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("bad TLS certificate: {0}")]
    InvalidCert(String),

    #[error("bad TLS private key: {0}")]
    InvalidKey(String),

    #[error("rustls rejected the identity: {0}")]
    Config(String),
}
