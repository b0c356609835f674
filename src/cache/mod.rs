//! Multi-layer caching
//!
//! `kv` is the failure-opaque adapter over the key-value engine; `manager`
//! coordinates the five cache layers on top of it.

pub mod kv;
pub mod manager;

pub use kv::KvCache;
pub use manager::{CacheAnalytics, CacheManager};

use std::fmt;
use std::str::FromStr;

/// Recency cache buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TimeBucket {
    OneHour,
    SixHours,
    TwentyFourHours,
}

impl TimeBucket {
    pub const ALL: [TimeBucket; 3] = [
        TimeBucket::OneHour,
        TimeBucket::SixHours,
        TimeBucket::TwentyFourHours,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeBucket::OneHour => "1h",
            TimeBucket::SixHours => "6h",
            TimeBucket::TwentyFourHours => "24h",
        }
    }

    pub fn hours(&self) -> i64 {
        match self {
            TimeBucket::OneHour => 1,
            TimeBucket::SixHours => 6,
            TimeBucket::TwentyFourHours => 24,
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeBucket {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(TimeBucket::OneHour),
            "6h" => Ok(TimeBucket::SixHours),
            "24h" => Ok(TimeBucket::TwentyFourHours),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_round_trip() {
        for bucket in TimeBucket::ALL {
            assert_eq!(bucket.as_str().parse::<TimeBucket>(), Ok(bucket));
        }
        assert!("2d".parse::<TimeBucket>().is_err());
    }
}
