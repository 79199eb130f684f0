//! Per-device throttling for the bootstrap endpoint.
//!
//! Devices are keyed by the peer IP of their TLS connection. Requests that
//! carry no connection info (in-process transports) share one bucket.
//! Buckets of peers that have gone quiet are dropped every
//! [`PRUNE_INTERVAL`] checks.

use crate::config::RateLimitConfig;
use crate::tls::TlsConnectInfo;
use governor::{DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tonic::{Request, Status};

const DEFAULT_PER_SECOND: NonZeroU32 = match NonZeroU32::new(20) {
    Some(n) => n,
    None => unreachable!(),
};
const DEFAULT_BURST: NonZeroU32 = match NonZeroU32::new(50) {
    Some(n) => n,
    None => unreachable!(),
};

/// Checks between sweeps of the per-peer map.
pub const PRUNE_INTERVAL: u64 = 1024;

struct Buckets {
    per_peer: DefaultKeyedRateLimiter<IpAddr>,
    unattributed: DefaultDirectRateLimiter,
    checks: AtomicU64,
}

/// Token buckets shared by every clone.
#[derive(Clone)]
pub struct BootstrapRateLimiter {
    buckets: Arc<Buckets>,
}

impl BootstrapRateLimiter {
    /// Zero values fall back to the defaults (20/s, burst 50).
    pub fn new(config: RateLimitConfig) -> Self {
        let per_second = NonZeroU32::new(config.per_second).unwrap_or(DEFAULT_PER_SECOND);
        let burst = NonZeroU32::new(config.burst).unwrap_or(DEFAULT_BURST);
        let quota = Quota::per_second(per_second).allow_burst(burst);

        Self {
            buckets: Arc::new(Buckets {
                per_peer: RateLimiter::keyed(quota),
                unattributed: RateLimiter::direct(quota),
                checks: AtomicU64::new(0),
            }),
        }
    }

    /// Spend one token from `peer`'s bucket.
    pub fn check(&self, peer: Option<IpAddr>) -> Result<(), Status> {
        let allowed = match peer {
            Some(ip) => self.buckets.per_peer.check_key(&ip).is_ok(),
            None => self.buckets.unattributed.check().is_ok(),
        };
        if self.buckets.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_INTERVAL
            == PRUNE_INTERVAL - 1
        {
            self.prune();
        }
        if allowed {
            return Ok(());
        }

        tracing::warn!(peer = ?peer, "Bootstrap rate limit exceeded");
        Err(Status::resource_exhausted(
            "too many bootstrap requests, retry later",
        ))
    }
}

impl BootstrapRateLimiter {
    /// Drop buckets that have refilled completely.
    fn prune(&self) {
        let before = self.buckets.per_peer.len();
        self.buckets.per_peer.retain_recent();
        self.buckets.per_peer.shrink_to_fit();
        tracing::debug!(
            before,
            after = self.buckets.per_peer.len(),
            "Pruned idle rate limit buckets"
        );
    }
}

impl Default for BootstrapRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Applies [`BootstrapRateLimiter`] ahead of the bootstrap service.
#[derive(Clone)]
pub struct RateLimitInterceptor {
    limiter: BootstrapRateLimiter,
}

impl RateLimitInterceptor {
    pub fn new(limiter: BootstrapRateLimiter) -> Self {
        Self { limiter }
    }
}

impl tonic::service::Interceptor for RateLimitInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let peer = request
            .extensions()
            .get::<TlsConnectInfo>()
            .and_then(|info| info.remote_addr)
            .map(|addr| addr.ip());
        self.limiter.check(peer)?;
        Ok(request)
    }
}
