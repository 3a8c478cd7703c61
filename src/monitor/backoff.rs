// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use rand::Rng;

/// Configuration for exponential backoff between failed feed fetches.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_interval: Duration,
    /// Growth factor applied after every retry
    pub multiplier: f64,
    /// Jitter as a fraction of the current interval (0.5 = ±50%)
    pub randomization_factor: f64,
    /// Cap for the grown interval; retries continue forever at this pace
    pub max_interval: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            multiplier: 1.5,
            randomization_factor: 0.5,
            max_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Exponential backoff state for one retry run. There is no retry limit;
/// a monitor keeps retrying until cancelled. Dropped (and recreated) on
/// the first success, which resets the interval.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.initial_interval,
            config,
        }
    }

    /// The next delay to wait, jittered around the current interval,
    /// advancing the interval for the following call.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.jitter(self.current);
        let grown = self.current.as_secs_f64() * self.config.multiplier;
        self.current = Duration::from_secs_f64(grown.min(self.config.max_interval.as_secs_f64()));
        delay
    }

    fn jitter(&self, interval: Duration) -> Duration {
        if self.config.randomization_factor <= 0.0 {
            return interval;
        }
        let secs = interval.as_secs_f64();
        let delta = self.config.randomization_factor * secs;
        let jittered = rand::rng().random_range((secs - delta)..=(secs + delta));
        Duration::from_secs_f64(jittered.max(0.0))
    }
}
