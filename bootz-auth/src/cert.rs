//! X.509 helpers for the OC, PDC and vendor CA certificates.
//!
//! Certificates above [`MAX_CERT_LEN`] are refused before any ASN.1 parsing.

use thiserror::Error;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

/// Upper bound on a DER certificate.
pub const MAX_CERT_LEN: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertError {
    #[error("certificate is {0} bytes, limit is {MAX_CERT_LEN}")]
    TooLarge(usize),

    #[error("bad PEM certificate: {0}")]
    Pem(String),

    #[error("bad X.509 certificate: {0}")]
    Der(String),

    #[error("certificate not valid before {not_before} (now {now})")]
    NotYetValid { not_before: i64, now: i64 },

    #[error("certificate expired at {not_after} (now {now})")]
    Expired { not_after: i64, now: i64 },
}

/// Decode the first PEM `CERTIFICATE` block into DER bytes.
pub fn pem_to_der(cert_pem: &str) -> Result<Vec<u8>, CertError> {
    let (_, pem) =
        parse_x509_pem(cert_pem.as_bytes()).map_err(|e| CertError::Pem(format!("{:?}", e)))?;
    if pem.label != "CERTIFICATE" {
        return Err(CertError::Pem(format!("unexpected PEM label {}", pem.label)));
    }
    if pem.contents.len() > MAX_CERT_LEN {
        return Err(CertError::TooLarge(pem.contents.len()));
    }
    Ok(pem.contents)
}

fn parse(cert_der: &[u8]) -> Result<X509Certificate<'_>, CertError> {
    if cert_der.len() > MAX_CERT_LEN {
        return Err(CertError::TooLarge(cert_der.len()));
    }
    X509Certificate::from_der(cert_der)
        .map(|(_, cert)| cert)
        .map_err(|e| CertError::Der(format!("{:?}", e)))
}

/// Extract the DER `SubjectPublicKeyInfo` (algorithm + key) from a certificate.
pub(crate) fn extract_spki_from_cert(cert_der: &[u8]) -> Result<Vec<u8>, CertError> {
    Ok(parse(cert_der)?.public_key().raw.to_vec())
}

/// Subject distinguished name, rendered RFC 4514 style.
pub fn subject(cert_der: &[u8]) -> Result<String, CertError> {
    Ok(parse(cert_der)?.subject().to_string())
}

/// Check the certificate's validity window against `now` (Unix seconds).
pub fn check_validity(cert_der: &[u8], now: i64) -> Result<(), CertError> {
    let cert = parse(cert_der)?;
    let validity = cert.validity();

    let not_before = validity.not_before.timestamp();
    let not_after = validity.not_after.timestamp();

    if now < not_before {
        return Err(CertError::NotYetValid { not_before, now });
    }
    if now > not_after {
        return Err(CertError::Expired { not_after, now });
    }
    Ok(())
}
