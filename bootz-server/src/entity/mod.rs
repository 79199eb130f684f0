//! Device identity resolution and bootstrap payload assembly.
//!
//! [`EntityManager`] is the seam between the gRPC orchestrator and whatever
//! knows about devices. [`InMemoryEntityManager`] serves a static inventory
//! loaded from a TOML file.

mod boot_config;
mod memory;

pub use boot_config::{populate_boot_config, BootConfigError};
pub use memory::{AddressAssignment, ChassisHandle, InMemoryEntityManager};

use crate::artifacts::ArtifactError;
use bootz_core::{ChassisEntity, EntityLookup, ErrorList};
use bootz_proto::{BootstrapDataResponse, ControlCard, GetBootstrapDataResponse, ReportStatusRequest};
use std::path::PathBuf;
use thiserror::Error;
use tonic::Status;

/// Errors raised by entity managers.
#[derive(Debug, Error)]
pub enum EntityError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),

    #[error("unable to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("unable to load security artifacts from {}: {source}", dir.display())]
    Artifacts {
        dir: PathBuf,
        #[source]
        source: ArtifactError,
    },

    /// Several independent failures, e.g. one per control card.
    #[error(transparent)]
    Multiple(ErrorList<EntityError>),
}

impl EntityError {
    pub fn not_found_chassis(lookup: &EntityLookup) -> Self {
        Self::NotFound(format!(
            "could not find chassis with serial#: {} and manufacturer: {}",
            lookup.serial_number, lookup.manufacturer
        ))
    }
}

impl From<ErrorList<EntityError>> for EntityError {
    fn from(errors: ErrorList<EntityError>) -> Self {
        Self::Multiple(errors)
    }
}

impl From<EntityError> for Status {
    fn from(err: EntityError) -> Self {
        let message = err.to_string();
        match err {
            EntityError::InvalidArgument(_) => Status::invalid_argument(message),
            EntityError::NotFound(_) => Status::not_found(message),
            EntityError::Internal(_)
            | EntityError::Io { .. }
            | EntityError::Parse { .. }
            | EntityError::Artifacts { .. }
            | EntityError::Multiple(_) => Status::internal(message),
        }
    }
}

/// Everything the bootstrap orchestrator needs to know about devices.
///
/// Implementations must be safe to share across request handlers.
pub trait EntityManager: Send + Sync {
    /// Find the chassis named by `lookup`.
    ///
    /// When `lookup.serial_number` is empty, implementations may locate the
    /// chassis through `card_serial` instead.
    fn resolve_chassis(
        &self,
        lookup: &EntityLookup,
        card_serial: &str,
    ) -> Result<ChassisEntity, EntityError>;

    /// Assemble the unsigned payload for one control card, or for the
    /// chassis itself when `card` is `None`.
    fn get_bootstrap_data(
        &self,
        lookup: &EntityLookup,
        card: Option<&ControlCard>,
    ) -> Result<BootstrapDataResponse, EntityError>;

    /// Validate a status report.
    fn set_status(&self, report: &ReportStatusRequest) -> Result<(), EntityError>;

    /// Sign `response.signed_response` in place and attach the Ownership
    /// Certificate and the voucher for `card_serial`.
    fn sign(
        &self,
        response: &mut GetBootstrapDataResponse,
        lookup: &EntityLookup,
        card_serial: &str,
    ) -> Result<(), EntityError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_status_codes() {
        let cases = [
            (EntityError::InvalidArgument("x".into()), Code::InvalidArgument),
            (EntityError::NotFound("x".into()), Code::NotFound),
            (EntityError::Internal("x".into()), Code::Internal),
            (
                EntityError::Parse {
                    path: PathBuf::from("oc.json"),
                    reason: "x".into(),
                },
                Code::Internal,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(Status::from(err).code(), code);
        }
    }

    #[test]
    fn test_multiple_keeps_every_message() {
        let mut errors = ErrorList::new();
        errors.add(EntityError::NotFound("card 123C missing".into()));
        errors.add(EntityError::Internal("bad config".into()));

        let status = Status::from(EntityError::from(errors));
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("card 123C missing; bad config"));
    }

    #[test]
    fn test_not_found_chassis_message() {
        let err = EntityError::not_found_chassis(&EntityLookup::new("cisco", "1234"));
        assert_eq!(
            err.to_string(),
            "could not find chassis with serial#: 1234 and manufacturer: cisco"
        );
    }
}
