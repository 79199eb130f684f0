//! Type conversions between core types and protobuf types.
//!
//! Due to Rust's orphan rules, we can't implement From traits between
//! types from different crates. Instead, we provide conversion functions.

use bootz_core::{ControlCardStatus as CoreStatus, SoftwareImage};
use bootz_proto::control_card_state::ControlCardStatus as ProtoStatus;
use bootz_proto::SoftwareImage as ProtoSoftwareImage;

/// Convert a wire status. Unknown values read as `Unspecified`.
pub fn status_from_proto(status: ProtoStatus) -> CoreStatus {
    match status {
        ProtoStatus::Unspecified => CoreStatus::Unspecified,
        ProtoStatus::NotInitialized => CoreStatus::NotInitialized,
        ProtoStatus::Initialized => CoreStatus::Initialized,
    }
}

pub fn software_image_to_proto(image: &SoftwareImage) -> ProtoSoftwareImage {
    ProtoSoftwareImage {
        name: image.name.clone(),
        version: image.version.clone(),
        url: image.url.clone(),
        os_image_hash: image.os_image_hash.clone(),
        hash_algorithm: image.hash_algorithm.clone(),
    }
}
