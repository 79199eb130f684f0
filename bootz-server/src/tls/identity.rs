//! Server TLS identity derived from a PEM key pair.

use super::TlsConfigError;
use bootz_auth::Fingerprint;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// Certificate chain and private key in DER form, ready for rustls.
pub struct TlsIdentity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
    /// Fingerprint of the leaf certificate.
    pub fingerprint: Fingerprint,
}

impl TlsIdentity {
    /// Parse a PEM certificate chain (leaf first) and its private key.
    ///
    /// The key may be PKCS#1, PKCS#8 or SEC1.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, TlsConfigError> {
        let cert_chain = CertificateDer::pem_slice_iter(cert_pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsConfigError::InvalidCert(format!("{:?}", e)))?;
        let leaf = cert_chain
            .first()
            .ok_or_else(|| TlsConfigError::InvalidCert("no certificate found".to_string()))?;
        let fingerprint = Fingerprint::from_cert_der(leaf.as_ref());

        let key = PrivateKeyDer::from_pem_slice(key_pem.as_bytes())
            .map_err(|e| TlsConfigError::InvalidKey(format!("{:?}", e)))?;

        Ok(Self {
            cert_chain,
            key,
            fingerprint,
        })
    }
}

impl Clone for TlsIdentity {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            key: self.key.clone_key(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

impl std::fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("fingerprint", &self.fingerprint)
            .field("chain_len", &self.cert_chain.len())
            .finish()
    }
}
