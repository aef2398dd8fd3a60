use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Limits applied at the socket edge, before anything reaches the coordinator.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_connections_total: usize,
    pub max_connections_per_ip: usize,
    pub max_commands_per_second: u32,
    pub max_input_length: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_connections_total: 1000,
            max_connections_per_ip: 8,
            max_commands_per_second: 20,
            max_input_length: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitRejection {
    #[error("server at max connections")]
    TotalLimitReached,
    #[error("too many connections from this IP")]
    IpLimitReached,
}

#[derive(Debug)]
struct LimiterState {
    total: usize,
    per_ip: BTreeMap<IpAddr, usize>,
}

/// Tracks connection counts per IP and in total, shared across socket tasks.
#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    max_total: usize,
    max_per_ip: usize,
    state: Arc<Mutex<LimiterState>>,
}

/// Holds a connection slot; the slot is released when the permit drops.
#[derive(Debug)]
pub struct ConnectionPermit {
    ip: IpAddr,
    state: Arc<Mutex<LimiterState>>,
}

impl ConnectionLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_total: config.max_connections_total,
            max_per_ip: config.max_connections_per_ip,
            state: Arc::new(Mutex::new(LimiterState {
                total: 0,
                per_ip: BTreeMap::new(),
            })),
        }
    }

    /// Try to admit a new connection from `ip`.
    pub fn try_admit(&self, ip: IpAddr) -> Result<ConnectionPermit, RateLimitRejection> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.total >= self.max_total {
            return Err(RateLimitRejection::TotalLimitReached);
        }
        let count = state.per_ip.entry(ip).or_insert(0);
        if *count >= self.max_per_ip {
            return Err(RateLimitRejection::IpLimitReached);
        }
        *count += 1;
        state.total += 1;
        Ok(ConnectionPermit {
            ip,
            state: Arc::clone(&self.state),
        })
    }

    pub fn total_connections(&self) -> usize {
        self.state.lock().map(|s| s.total).unwrap_or(0)
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = state.per_ip.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.per_ip.remove(&self.ip);
            }
        }
        state.total = state.total.saturating_sub(1);
    }
}

/// Per-connection token bucket for inbound frames.
#[derive(Debug)]
pub struct CommandThrottle {
    max_per_second: u32,
    tokens: u32,
    last_refill: Instant,
}

impl CommandThrottle {
    pub fn new(max_per_second: u32, now: Instant) -> Self {
        Self {
            max_per_second,
            tokens: max_per_second,
            last_refill: now,
        }
    }

    /// Try to consume one token at `now`. Returns true if the frame is allowed.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let new_tokens = (elapsed.as_secs_f64() * self.max_per_second as f64) as u32;
        if new_tokens > 0 {
            self.tokens = self.tokens.saturating_add(new_tokens).min(self.max_per_second);
            self.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn limiter(total: usize, per_ip: usize) -> ConnectionLimiter {
        ConnectionLimiter::new(&RateLimitConfig {
            max_connections_total: total,
            max_connections_per_ip: per_ip,
            ..Default::default()
        })
    }

    #[test]
    fn admits_within_limit() {
        let limiter = limiter(10, 3);
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let _a = limiter.try_admit(ip).unwrap();
        let _b = limiter.try_admit(ip).unwrap();
        let _c = limiter.try_admit(ip).unwrap();
        assert_eq!(limiter.total_connections(), 3);
    }

    #[test]
    fn rejects_per_ip() {
        let limiter = limiter(100, 2);
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let _a = limiter.try_admit(ip).unwrap();
        let _b = limiter.try_admit(ip).unwrap();
        assert_eq!(
            limiter.try_admit(ip).unwrap_err(),
            RateLimitRejection::IpLimitReached
        );
    }

    #[test]
    fn rejects_total() {
        let limiter = limiter(2, 10);
        let _a = limiter.try_admit(IpAddr::V4(Ipv4Addr::new(1, 0, 0, 1))).unwrap();
        let _b = limiter.try_admit(IpAddr::V4(Ipv4Addr::new(2, 0, 0, 2))).unwrap();
        assert_eq!(
            limiter
                .try_admit(IpAddr::V4(Ipv4Addr::new(3, 0, 0, 3)))
                .unwrap_err(),
            RateLimitRejection::TotalLimitReached
        );
    }

    #[test]
    fn dropping_permit_releases_slot() {
        let limiter = limiter(10, 1);
        let ip = IpAddr::V4(Ipv4Addr::new(5, 5, 5, 5));
        let permit = limiter.try_admit(ip).unwrap();
        assert!(limiter.try_admit(ip).is_err());
        drop(permit);
        assert_eq!(limiter.total_connections(), 0);
        assert!(limiter.try_admit(ip).is_ok());
    }

    #[test]
    fn throttle_allows_burst_then_blocks() {
        let now = Instant::now();
        let mut throttle = CommandThrottle::new(5, now);
        for _ in 0..5 {
            assert!(throttle.try_consume(now));
        }
        assert!(!throttle.try_consume(now));
    }

    #[test]
    fn throttle_refills_over_time() {
        let now = Instant::now();
        let mut throttle = CommandThrottle::new(10, now);
        for _ in 0..10 {
            assert!(throttle.try_consume(now));
        }
        assert!(!throttle.try_consume(now));
        assert!(throttle.try_consume(now + Duration::from_secs(1)));
    }
}
