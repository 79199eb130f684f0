//! RSA key material used to sign bootstrap responses.

mod keys;

pub use keys::{Fingerprint, KeyError, KeyPair, SignError, Signature, SigningKey, VerifyingKey};
