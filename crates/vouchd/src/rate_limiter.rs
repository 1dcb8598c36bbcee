use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::config::Config;

/// Failure budget for the verify endpoint, tracked per source address.
///
/// Every failed verification is timestamped. Once `max_failures` of them
/// fall inside `window`, the address is locked out for `lockout` and its
/// history is discarded. Callers feed in only completed analyses;
/// challenge-lifecycle and infrastructure errors never reach the limiter.
pub struct RateLimiter {
    max_failures: usize,
    window: Duration,
    lockout: Duration,
    sources: HashMap<IpAddr, SourceState>,
}

#[derive(Default)]
struct SourceState {
    failures: VecDeque<Instant>,
    locked_until: Option<Instant>,
}

impl SourceState {
    fn expire(&mut self, now: Instant, window: Duration) {
        while self
            .failures
            .front()
            .is_some_and(|&t| now.duration_since(t) > window)
        {
            self.failures.pop_front();
        }
    }

    fn is_idle(&self) -> bool {
        self.failures.is_empty() && self.locked_until.is_none()
    }
}

impl RateLimiter {
    pub fn new(max_failures: usize, window: Duration, lockout: Duration) -> Self {
        Self {
            max_failures,
            window,
            lockout,
            sources: HashMap::new(),
        }
    }

    /// Limiter with the caps from `VOUCH_RATE_LIMIT_*` configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.rate_limit_max_failures as usize,
            Duration::from_secs(config.rate_limit_window_secs),
            Duration::from_secs(config.rate_limit_lockout_secs),
        )
    }

    /// Gate a verification attempt. `Err` carries the whole seconds left
    /// on an active lockout.
    pub fn admit(&mut self, ip: IpAddr) -> Result<(), u64> {
        let now = Instant::now();
        let Some(state) = self.sources.get_mut(&ip) else {
            return Ok(());
        };

        if let Some(until) = state.locked_until {
            if now < until {
                return Err(until.duration_since(now).as_secs().max(1));
            }
            state.locked_until = None;
        }

        state.expire(now, self.window);
        if state.is_idle() {
            self.sources.remove(&ip);
        }
        Ok(())
    }

    /// Feed back the outcome of a completed analysis. A pass wipes the
    /// address's history; a failure may trip the lockout.
    pub fn observe(&mut self, ip: IpAddr, passed: bool) {
        if passed {
            self.sources.remove(&ip);
            return;
        }
        // A cap of zero disables limiting.
        if self.max_failures == 0 {
            return;
        }

        let now = Instant::now();
        let state = self.sources.entry(ip).or_default();
        state.expire(now, self.window);
        state.failures.push_back(now);

        if state.failures.len() >= self.max_failures {
            state.failures.clear();
            state.locked_until = Some(now + self.lockout);
            tracing::warn!(
                %ip,
                lockout_secs = self.lockout.as_secs(),
                "failed-verification cap reached; locking source address"
            );
        } else {
            tracing::debug!(
                %ip,
                failures = state.failures.len(),
                cap = self.max_failures,
                "failed verification counted against source address"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_failures: usize) -> RateLimiter {
        RateLimiter::new(
            max_failures,
            Duration::from_secs(60),
            Duration::from_secs(300),
        )
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([192, 0, 2, last])
    }

    #[test]
    fn admits_while_under_the_cap() {
        let mut rl = limiter(3);
        for _ in 0..2 {
            rl.observe(ip(1), false);
            assert!(rl.admit(ip(1)).is_ok());
        }
    }

    #[test]
    fn cap_trips_a_lockout_with_remaining_seconds() {
        let mut rl = limiter(3);
        for _ in 0..3 {
            rl.observe(ip(1), false);
        }
        let remaining = rl.admit(ip(1)).unwrap_err();
        assert!((1..=300).contains(&remaining));
    }

    #[test]
    fn a_pass_wipes_the_failure_history() {
        let mut rl = limiter(3);
        rl.observe(ip(1), false);
        rl.observe(ip(1), false);
        rl.observe(ip(1), true);
        rl.observe(ip(1), false);
        rl.observe(ip(1), false);
        assert!(rl.admit(ip(1)).is_ok());
    }

    #[test]
    fn sources_do_not_share_a_budget() {
        let mut rl = limiter(1);
        rl.observe(ip(1), false);
        assert!(rl.admit(ip(1)).is_err());
        assert!(rl.admit(ip(2)).is_ok());
    }

    #[test]
    fn zero_cap_disables_limiting() {
        let mut rl = limiter(0);
        for _ in 0..10 {
            rl.observe(ip(1), false);
        }
        assert!(rl.admit(ip(1)).is_ok());
    }

    #[test]
    fn lapsed_lockout_readmits_and_prunes_the_entry() {
        let mut rl = RateLimiter::new(1, Duration::from_secs(60), Duration::ZERO);
        rl.observe(ip(1), false);
        // Zero-length lockout has lapsed by the time we ask again.
        assert!(rl.admit(ip(1)).is_ok());
        assert!(rl.sources.is_empty());
    }
}
