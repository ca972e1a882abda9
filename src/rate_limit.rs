use std::{net::IpAddr, num::NonZeroU32, time::Duration};

use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use thiserror::Error;

/// Login attempts allowed per minute, per client IP and per username.
const LOGIN_ATTEMPTS_PER_MINUTE: NonZeroU32 = match NonZeroU32::new(5) {
    Some(burst) => burst,
    None => unreachable!(),
};

type KeyedLimiter<K> = RateLimiter<K, DashMapStateStore<K>, DefaultClock>;

/// Rate limiter shared for login attempts.
pub struct LoginRateLimiter {
    ip_limiter: KeyedLimiter<IpAddr>,
    username_limiter: KeyedLimiter<String>,
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self::with_quota(Quota::per_minute(LOGIN_ATTEMPTS_PER_MINUTE))
    }

    pub fn with_quota(quota: Quota) -> Self {
        Self {
            ip_limiter: RateLimiter::keyed(quota),
            username_limiter: RateLimiter::keyed(quota),
        }
    }

    pub fn check_ip(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        check_key(&self.ip_limiter, &ip).map_err(RateLimitError::Ip)
    }

    pub fn check_username(&self, username: &str) -> Result<(), RateLimitError> {
        check_key(&self.username_limiter, &username.to_owned()).map_err(RateLimitError::Username)
    }
}

fn check_key<K>(limiter: &KeyedLimiter<K>, key: &K) -> Result<(), Duration>
where
    K: Clone + Eq + std::hash::Hash,
{
    match limiter.check_key(key) {
        Ok(_) => {
            limiter.retain_recent();
            Ok(())
        }
        Err(not_until) => Err(not_until.wait_time_from(DefaultClock::default().now())),
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Too many attempts from this IP. Try again in {0:?}.")]
    Ip(Duration),
    #[error("Too many attempts for this username. Try again in {0:?}.")]
    Username(Duration),
}

impl RateLimitError {
    pub fn retry_after(&self) -> Duration {
        match self {
            RateLimitError::Ip(duration) | RateLimitError::Username(duration) => *duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn sixth_attempt_from_same_ip_is_limited() {
        let limiter = LoginRateLimiter::new();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        for _ in 0..5 {
            limiter.check_ip(ip).unwrap();
        }
        let err = limiter.check_ip(ip).unwrap_err();
        assert!(matches!(err, RateLimitError::Ip(_)));
        assert!(err.retry_after() > Duration::ZERO);

        limiter
            .check_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)))
            .unwrap();
    }

    #[test]
    fn usernames_are_limited_independently() {
        let limiter = LoginRateLimiter::new();
        for _ in 0..5 {
            limiter.check_username("admin").unwrap();
        }
        assert!(matches!(
            limiter.check_username("admin"),
            Err(RateLimitError::Username(_))
        ));
        limiter.check_username("karyawan").unwrap();
    }
}
