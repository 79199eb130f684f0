//! Ownership vouchers.
//!
//! A voucher is a CMS (PKCS#7) SignedData message produced by the vendor CA.
//! It binds one control card serial to the owner's Pinned Domain Certificate,
//! which lets the device trust the Ownership Certificate without calling home.
//! This crate treats the message as opaque bytes; verifying it is the
//! device's job.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// DER tag for a constructed SEQUENCE, the outer type of a CMS ContentInfo.
const DER_SEQUENCE: u8 = 0x30;

/// Errors that can occur when decoding a voucher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum VoucherError {
    #[error("voucher is empty")]
    Empty,

    #[error("voucher is not valid base64")]
    Encoding,

    #[error("voucher is not a DER encoded CMS message")]
    NotDer,
}

/// Raw ownership voucher bytes for one control card.
#[derive(Clone, PartialEq, Eq)]
pub struct OwnershipVoucher(Vec<u8>);

impl OwnershipVoucher {
    /// Wrap DER bytes.
    pub fn from_der(der: Vec<u8>) -> Result<Self, VoucherError> {
        match der.first() {
            None => Err(VoucherError::Empty),
            Some(&DER_SEQUENCE) => Ok(Self(der)),
            Some(_) => Err(VoucherError::NotDer),
        }
    }

    /// Decode base64 text as stored by artifact bundles.
    ///
    /// Line breaks and other ASCII whitespace are ignored.
    pub fn from_base64(text: &str) -> Result<Self, VoucherError> {
        let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        if compact.is_empty() {
            return Err(VoucherError::Empty);
        }
        let der = STANDARD
            .decode(compact)
            .map_err(|_| VoucherError::Encoding)?;
        Self::from_der(der)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for OwnershipVoucher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OwnershipVoucher({} bytes)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OV_123A: &str = include_str!("../../testdata/ov_123A.txt");

    #[test]
    fn test_decode_wrapped_base64() {
        // The fixture is wrapped at 76 columns
        assert!(OV_123A.contains('\n'));

        let voucher = OwnershipVoucher::from_base64(OV_123A).unwrap();
        assert_eq!(voucher.as_bytes()[0], DER_SEQUENCE);
        assert!(!voucher.is_empty());
    }

    #[test]
    fn test_reject_empty() {
        assert_eq!(OwnershipVoucher::from_base64(" \n"), Err(VoucherError::Empty));
        assert_eq!(OwnershipVoucher::from_der(vec![]), Err(VoucherError::Empty));
    }

    #[test]
    fn test_reject_non_der() {
        // "aGVsbG8=" is base64 for "hello"
        assert_eq!(
            OwnershipVoucher::from_base64("aGVsbG8="),
            Err(VoucherError::NotDer)
        );
        assert_eq!(
            OwnershipVoucher::from_base64("***"),
            Err(VoucherError::Encoding)
        );
    }

    #[test]
    fn test_debug_shows_length_only() {
        let voucher = OwnershipVoucher::from_der(vec![0x30, 0x00]).unwrap();
        assert_eq!(format!("{:?}", voucher), "OwnershipVoucher(2 bytes)");
    }
}
