//! Bootz Protocol - Protobuf types for device-server bootstrap communication

/// Generated protobuf types
pub mod bootz {
    tonic::include_proto!("bootz");
}

pub use bootz::*;

/// File descriptor set for gRPC reflection
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("bootz_descriptor");
