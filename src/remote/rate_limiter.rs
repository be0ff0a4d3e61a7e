//! Lock-free global token-bucket rate limiter for the remote notebook API.
//!
//! Adapted from the teacher's per-domain `crawl_engine::rate_limiter`: that
//! limiter keys a `DashMap` of domains, each with its own cache-line-aligned
//! atomic bucket. The remote API here is a single account against a single
//! host, so one bucket suffices — the packed-`AtomicU128`-state, fixed-point
//! token arithmetic, and CAS-retry-with-spin-loop are kept verbatim.

use std::sync::atomic::{AtomicU128, Ordering};
use std::time::{Duration, Instant};

const TOKEN_SCALE: u64 = 1000;
const RATE_SCALE: u64 = 1_000_000;

#[inline(always)]
fn pack_state(tokens: u64, last_refill_nanos: u64) -> u128 {
    ((tokens as u128) << 64) | (last_refill_nanos as u128)
}

#[inline(always)]
fn unpack_state(packed: u128) -> (u64, u64) {
    let tokens = (packed >> 64) as u64;
    let last_refill_nanos = (packed & 0xFFFF_FFFF_FFFF_FFFF) as u64;
    (tokens, last_refill_nanos)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow,
    Deny { retry_after: Duration },
}

/// Cache-line aligned so concurrent callers never false-share the bucket.
#[repr(C, align(64))]
struct BucketState {
    state: AtomicU128,
    rate_per_nano: u64,
    max_tokens: u64,
    _padding: [u8; 32],
}

impl BucketState {
    fn new(rate_per_sec: f64, max_tokens_unscaled: f64, base_time: &Instant) -> Self {
        let max_tokens = (max_tokens_unscaled.max(1.0) * TOKEN_SCALE as f64) as u64;
        let rate_per_nano =
            ((rate_per_sec * TOKEN_SCALE as f64 * RATE_SCALE as f64) / 1_000_000_000.0) as u64;
        let now_nanos = base_time.elapsed().as_nanos() as u64;
        Self {
            state: AtomicU128::new(pack_state(max_tokens, now_nanos)),
            rate_per_nano,
            max_tokens,
            _padding: [0u8; 32],
        }
    }

    fn refill(&self, now_nanos: u64) {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            let (tokens, last_refill) = unpack_state(current);
            if now_nanos <= last_refill {
                return;
            }
            let elapsed = now_nanos.saturating_sub(last_refill);
            let tokens_to_add = (elapsed.saturating_mul(self.rate_per_nano)) / RATE_SCALE;
            let time_credited = if self.rate_per_nano > 0 {
                (tokens_to_add.saturating_mul(RATE_SCALE)) / self.rate_per_nano
            } else {
                0
            };
            let new_last_refill = last_refill.saturating_add(time_credited);
            let new_tokens = if tokens_to_add > 0 {
                tokens.saturating_add(tokens_to_add).min(self.max_tokens)
            } else {
                tokens
            };
            match self.state.compare_exchange_weak(
                current,
                pack_state(new_tokens, new_last_refill),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => {
                    current = actual;
                    std::hint::spin_loop();
                }
            }
        }
    }

    fn try_consume(&self, base_time: &Instant) -> RateLimitDecision {
        let now_nanos = base_time.elapsed().as_nanos() as u64;
        self.refill(now_nanos);

        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            let (tokens, last_refill) = unpack_state(current);
            if tokens < TOKEN_SCALE {
                let needed = TOKEN_SCALE.saturating_sub(tokens);
                let nanos_needed = if self.rate_per_nano > 0 {
                    (needed.saturating_mul(RATE_SCALE)) / self.rate_per_nano
                } else {
                    1_000_000
                };
                return RateLimitDecision::Deny {
                    retry_after: Duration::from_nanos(nanos_needed),
                };
            }
            let new_tokens = tokens - TOKEN_SCALE;
            match self.state.compare_exchange_weak(
                current,
                pack_state(new_tokens, last_refill),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return RateLimitDecision::Allow,
                Err(actual) => {
                    current = actual;
                    std::hint::spin_loop();
                }
            }
        }
    }
}

/// Global token bucket shared by every outbound request from `RemoteClient`.
pub struct GlobalRateLimiter {
    bucket: BucketState,
    base_time: Instant,
}

impl GlobalRateLimiter {
    /// `requests_per_window`/`window_seconds` set the sustained rate; `burst`
    /// sets the bucket capacity (how many requests can fire back-to-back).
    #[must_use]
    pub fn new(requests_per_window: u32, window_seconds: u64, burst: u32) -> Self {
        let base_time = Instant::now();
        let rate_per_sec = if window_seconds > 0 {
            f64::from(requests_per_window) / window_seconds as f64
        } else {
            f64::from(requests_per_window)
        };
        Self {
            bucket: BucketState::new(rate_per_sec, f64::from(burst), &base_time),
            base_time,
        }
    }

    #[must_use]
    pub fn check(&self) -> RateLimitDecision {
        self.bucket.try_consume(&self.base_time)
    }

    /// Blocks (via `tokio::time::sleep`) until a token is available.
    pub async fn acquire(&self) {
        loop {
            match self.check() {
                RateLimitDecision::Allow => return,
                RateLimitDecision::Deny { retry_after } => {
                    tokio::time::sleep(retry_after).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_allowed_then_denied_when_burst_exhausted() {
        let limiter = GlobalRateLimiter::new(60, 60, 1);
        assert_eq!(limiter.check(), RateLimitDecision::Allow);
        assert!(matches!(limiter.check(), RateLimitDecision::Deny { .. }));
    }

    #[tokio::test]
    async fn acquire_eventually_succeeds_after_waiting() {
        let limiter = GlobalRateLimiter::new(1000, 1, 1);
        limiter.acquire().await;
        tokio::time::timeout(Duration::from_secs(2), limiter.acquire())
            .await
            .expect("acquire should not hang once tokens refill");
    }
}
