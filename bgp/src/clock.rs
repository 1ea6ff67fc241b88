// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use rib::lock;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Monotonic time source for hold and keepalive timers. The epoch is
/// arbitrary; only differences are meaningful. Hosts embedding the engine
/// in a simulator inject their own implementation.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall clock backed by [`Instant`].
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Manually advanced test double.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, d: Duration) {
        *lock!(self.now) += d;
    }

    pub fn set(&self, d: Duration) {
        *lock!(self.now) = d;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *lock!(self.now)
    }
}
