use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use reqwest::Url;

use crate::fetcher::RetryPolicy;

/// Pause taken between two page requests to stay under the site's rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    pub enabled: bool,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl PacingPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Uniformly random delay within the configured bounds, whole seconds.
    pub fn next_delay(&self) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        let bounds: RangeInclusive<u64> = if self.min_delay <= self.max_delay {
            self.min_delay.as_secs()..=self.max_delay.as_secs()
        } else {
            self.max_delay.as_secs()..=self.min_delay.as_secs()
        };
        Duration::from_secs(rand::rng().random_range(bounds))
    }
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Settings of one run, assembled from the command line.
#[derive(Debug, Clone)]
pub struct Config {
    pub output_dir: PathBuf,
    /// Only urls on this site are accepted.
    pub site: Url,
    pub pacing: PacingPolicy,
    pub retry: RetryPolicy,
    /// Continue after the last page recorded in the watermark instead of the `p` parameter.
    pub resume: bool,
    /// Build the epub from the document already on disk.
    pub skip_fetch: bool,
}

#[test]
fn test_pacing_stays_within_bounds() {
    let pacing = PacingPolicy {
        enabled: true,
        min_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(4),
    };
    for _ in 0..50 {
        let delay = pacing.next_delay();
        assert!(delay >= Duration::from_secs(2) && delay <= Duration::from_secs(4));
    }

    let fixed = PacingPolicy {
        enabled: true,
        min_delay: Duration::from_secs(4),
        max_delay: Duration::from_secs(4),
    };
    assert_eq!(fixed.next_delay(), Duration::from_secs(4));
    assert_eq!(PacingPolicy::disabled().next_delay(), Duration::ZERO);
}
