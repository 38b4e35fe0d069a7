//! Resolution windows
//!
//! Maps wall-clock timestamps onto fixed-width windows. The feeder serves the
//! window containing "now" (floor) and never promises a price for a future one.

use std::fmt;

use crate::error::ConfigError;
use crate::types::UnixSeconds;

/// Window width in seconds, always positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution(i64);

impl Resolution {
    pub fn new(secs: i64) -> Result<Self, ConfigError> {
        if secs <= 0 {
            return Err(ConfigError::InvalidResolution(secs));
        }
        Ok(Self(secs))
    }

    pub fn secs(&self) -> i64 {
        self.0
    }

    /// Start of the window containing `t`
    pub fn floor(&self, t: UnixSeconds) -> UnixSeconds {
        bucket_floor(t, *self)
    }

    /// Smallest window boundary at or after `t`
    pub fn ceiling(&self, t: UnixSeconds) -> UnixSeconds {
        bucket_ceiling(t, *self)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// `floor(t / resolution) * resolution`, using floor division for negative `t`.
pub fn bucket_floor(t: UnixSeconds, resolution: Resolution) -> UnixSeconds {
    let r = resolution.secs();
    t.div_euclid(r) * r
}

/// `ceil(t / resolution) * resolution`
pub fn bucket_ceiling(t: UnixSeconds, resolution: Resolution) -> UnixSeconds {
    let floor = bucket_floor(t, resolution);
    if floor == t {
        t
    } else {
        floor.saturating_add(resolution.secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(secs: i64) -> Resolution {
        Resolution::new(secs).unwrap()
    }

    #[test]
    fn floor_boundaries() {
        assert_eq!(bucket_floor(1000, r(600)), 600);
        assert_eq!(bucket_floor(600, r(600)), 600);
        assert_eq!(bucket_floor(599, r(600)), 0);
        assert_eq!(bucket_floor(0, r(600)), 0);
    }

    #[test]
    fn ceiling_boundaries() {
        assert_eq!(bucket_ceiling(1000, r(600)), 1200);
        assert_eq!(bucket_ceiling(600, r(600)), 600);
        assert_eq!(bucket_ceiling(1, r(600)), 600);
        assert_eq!(bucket_ceiling(0, r(600)), 0);
    }

    #[test]
    fn negative_timestamps_use_floor_division() {
        assert_eq!(bucket_floor(-1, r(600)), -600);
        assert_eq!(bucket_ceiling(-1, r(600)), 0);
    }

    #[test]
    fn rejects_non_positive_resolution() {
        assert_eq!(Resolution::new(0), Err(ConfigError::InvalidResolution(0)));
        assert_eq!(
            Resolution::new(-600),
            Err(ConfigError::InvalidResolution(-600))
        );
    }

    #[test]
    fn larger_resolution() {
        let res = r(10_800);
        assert_eq!(res.floor(1_700_000_000), 1_699_995_600);
        assert_eq!(res.ceiling(1_700_000_000), 1_700_006_400);
    }
}
