//! # Bootz Server
//!
//! Answers bootstrap requests from unprovisioned network device control
//! cards. Each answer carries the device's intended image and boot
//! configuration, and when the device supplies a nonce, a signature made
//! with the Ownership Certificate key plus the Ownership Voucher the device
//! needs to trust that certificate.
//!
//! ## Layout
//!
//! - [`entity`] - the `EntityManager` contract and its in-memory inventory
//! - [`artifacts`] - signing material loaded from an artifact directory
//! - [`service`] - the gRPC orchestrator and its lifecycle ledger
//! - [`server`] - TLS listener and start/stop/reload lifecycle
//! - [`config`] - runtime configuration
//! - [`tls`] - rustls configuration and connection metadata

pub mod artifacts;
pub mod config;
pub mod convert;
pub mod entity;
pub mod server;
pub mod service;
pub mod tls;

pub use artifacts::{ArtifactError, SecurityArtifacts};
pub use config::{convert_address, RateLimitConfig, ServerConfig};
pub use entity::{EntityError, EntityManager, InMemoryEntityManager};
pub use server::{BootzServer, ServerError, ServerStatus};
pub use service::{BootLog, BootstrapService, Ledger};
