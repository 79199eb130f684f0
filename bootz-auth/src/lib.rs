//! Pure signing and trust-chain library for the bootz server.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No logging
//!
//! Callers hand it PEM text and byte buffers; it hands back parsed keys,
//! signatures and vouchers. Loading those inputs from disk is the server's job.
//!
//! # Example
//!
//! ```ignore
//! use bootz_auth::identity::{SigningKey, VerifyingKey};
//!
//! let key = SigningKey::from_pem(&oc_key_pem)?;
//! let signature = key.sign(payload)?;
//!
//! let verifier = VerifyingKey::from_cert_pem(&oc_cert_pem)?;
//! verifier.verify(payload, &signature)?;
//! ```

pub mod cert;
pub mod identity;
pub mod voucher;

pub use cert::{check_validity, pem_to_der, subject, CertError};
pub use identity::{Fingerprint, KeyError, KeyPair, SignError, Signature, SigningKey, VerifyingKey};
pub use voucher::{OwnershipVoucher, VoucherError};
