//! Shared fixtures for the integration tests.

mod harness;

#[allow(unused_imports)]
pub use harness::*;
