//! # Bootz Core
//!
//! Pure domain types for the bootz bootstrap server.
//!
//! ## Design Principles
//!
//! This crate is intentionally **IO-free**:
//! - No filesystem operations
//! - No network calls
//! - No protobuf types
//!
//! All types are plain Rust structs/enums with serde serialization. Reading
//! inventory files, loading security artifacts and serving gRPC live in
//! `bootz-server`.
//!
//! ## Modules
//!
//! - [`entity`] - Chassis identity, boot mode and control card status
//! - [`inventory`] - The static chassis/control card inventory model
//! - [`errlist`] - Aggregation of independent failures

pub mod entity;
pub mod errlist;
pub mod inventory;

// Re-export commonly used types at crate root for convenience.

pub use entity::{BootMode, ChassisEntity, ControlCardStatus, EntityLookup};
pub use errlist::ErrorList;
pub use inventory::{
    BootConfigFiles, Chassis, ChassisConfig, ControlCard, DhcpConfig, Inventory, InventoryError,
    Options, SoftwareImage,
};
