//! Security artifacts: the key material the server signs and serves with.
//!
//! An artifact directory holds `{name}_pub.pem` / `{name}_priv.pem` pairs
//! for `oc`, `pdc` and `vendorca`, plus one `ov_<serial>.txt` file per
//! control card containing its base64 encoded Ownership Voucher.

use crate::tls::{TlsConfigError, TlsIdentity};
use bootz_auth::{pem_to_der, KeyError, KeyPair, OwnershipVoucher, SigningKey, VoucherError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const VOUCHER_PREFIX: &str = "ov_";
const VOUCHER_SUFFIX: &str = ".txt";

/// Errors that can occur while loading security artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("unable to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {name} key pair: {source}")]
    Key {
        name: &'static str,
        #[source]
        source: KeyError,
    },

    #[error("OC private key does not match the OC certificate")]
    OcKeyMismatch,

    #[error("found no ownership vouchers in {}", .0.display())]
    NoVouchers(PathBuf),

    #[error("invalid ownership voucher {}: {source}", path.display())]
    Voucher {
        path: PathBuf,
        #[source]
        source: VoucherError,
    },

    #[error("unable to derive server TLS identity from PDC: {0}")]
    Tls(#[from] TlsConfigError),
}

/// Signing and trust material, loaded once and shared read-only.
pub struct SecurityArtifacts {
    /// Ownership Certificate; its key signs bootstrap responses.
    pub oc: KeyPair,
    /// Pinned Domain Certificate; also the server's TLS identity.
    pub pdc: KeyPair,
    /// Vendor CA that signed the vouchers.
    pub vendor_ca: KeyPair,
    /// Ownership Vouchers keyed by control card serial.
    pub ovs: HashMap<String, OwnershipVoucher>,
    /// TLS identity derived from the PDC.
    pub tls: TlsIdentity,
    oc_signer: SigningKey,
    pdc_cert_der: Vec<u8>,
}

impl SecurityArtifacts {
    /// Validate key pairs and derive what the request path needs.
    pub fn new(
        oc: KeyPair,
        pdc: KeyPair,
        vendor_ca: KeyPair,
        ovs: HashMap<String, OwnershipVoucher>,
    ) -> Result<Self, ArtifactError> {
        let consistent = oc
            .is_consistent()
            .map_err(|source| ArtifactError::Key { name: "oc", source })?;
        if !consistent {
            return Err(ArtifactError::OcKeyMismatch);
        }
        let oc_signer = oc
            .signing_key()
            .map_err(|source| ArtifactError::Key { name: "oc", source })?;

        let pdc_cert_der = pem_to_der(pdc.cert_pem()).map_err(|e| ArtifactError::Key {
            name: "pdc",
            source: KeyError::Certificate(e),
        })?;
        vendor_ca
            .verifying_key()
            .map_err(|source| ArtifactError::Key {
                name: "vendorca",
                source,
            })?;

        let tls = TlsIdentity::from_pem(pdc.cert_pem(), pdc.key_pem())?;

        Ok(Self {
            oc,
            pdc,
            vendor_ca,
            ovs,
            tls,
            oc_signer,
            pdc_cert_der,
        })
    }

    /// Load everything from an artifact directory.
    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        let oc = read_keypair(dir, "oc")?;
        let pdc = read_keypair(dir, "pdc")?;
        let vendor_ca = read_keypair(dir, "vendorca")?;
        let ovs = read_vouchers(dir)?;
        Self::new(oc, pdc, vendor_ca, ovs)
    }

    /// The key that signs bootstrap responses.
    pub fn oc_signer(&self) -> &SigningKey {
        &self.oc_signer
    }

    /// DER encoding of the PDC certificate.
    pub fn pdc_cert_der(&self) -> &[u8] {
        &self.pdc_cert_der
    }

    pub fn voucher(&self, serial: &str) -> Option<&OwnershipVoucher> {
        self.ovs.get(serial)
    }
}

impl std::fmt::Debug for SecurityArtifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut serials: Vec<&str> = self.ovs.keys().map(String::as_str).collect();
        serials.sort_unstable();
        f.debug_struct("SecurityArtifacts")
            .field("oc", &self.oc)
            .field("pdc", &self.pdc)
            .field("vendor_ca", &self.vendor_ca)
            .field("ovs", &serials)
            .field("tls", &self.tls)
            .finish()
    }
}

fn read_file(path: PathBuf) -> Result<String, ArtifactError> {
    std::fs::read_to_string(&path).map_err(|source| ArtifactError::Io { path, source })
}

/// Read `{name}_pub.pem` and `{name}_priv.pem`.
fn read_keypair(dir: &Path, name: &str) -> Result<KeyPair, ArtifactError> {
    let cert = read_file(dir.join(format!("{}_pub.pem", name)))?;
    let key = read_file(dir.join(format!("{}_priv.pem", name)))?;
    Ok(KeyPair::new(cert, key))
}

/// Read every `ov_<serial>.txt` in `dir`.
fn read_vouchers(dir: &Path) -> Result<HashMap<String, OwnershipVoucher>, ArtifactError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ArtifactError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut ovs = HashMap::new();
    for entry in entries {
        let entry = entry.map_err(|source| ArtifactError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(serial) = name.strip_prefix(VOUCHER_PREFIX) else {
            continue;
        };
        let serial = serial.strip_suffix(VOUCHER_SUFFIX).unwrap_or(serial);

        let path = entry.path();
        let text = read_file(path.clone())?;
        let voucher = OwnershipVoucher::from_base64(&text)
            .map_err(|source| ArtifactError::Voucher { path, source })?;
        ovs.insert(serial.to_string(), voucher);
    }

    if ovs.is_empty() {
        return Err(ArtifactError::NoVouchers(dir.to_path_buf()));
    }
    Ok(ovs)
}
