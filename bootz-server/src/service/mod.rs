//! gRPC service implementations.

mod bootstrap;
mod ledger;
mod rate_limit;

pub use bootstrap::BootstrapService;
pub use ledger::{BootLog, Ledger, LedgerState};
pub use rate_limit::{BootstrapRateLimiter, RateLimitInterceptor};
