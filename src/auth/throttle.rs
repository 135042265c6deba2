// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Anti-enumeration failure throttling and the lockout threshold.
//!
//! Every counted authentication failure is delayed so that the response is
//! observable no earlier than a randomized window measured from
//! *connection start* - not from the request. A client cannot reset the
//! clock by sending more requests, and a username that fails instantly in
//! the validator takes exactly as long to refuse as a wrong password that
//! went through a slow verifier.
//!
//! The sleep suspends only the connection's own task; other connections
//! keep processing.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::trace;

/// Per-connection failure throttle.
#[derive(Debug)]
pub struct FailureThrottle {
    /// When the authentication phase of this connection started. Never
    /// reset.
    start: Instant,

    /// Base of the delay window.
    base: Duration,

    /// Width of the uniform random jitter added to the base.
    jitter: Duration,

    /// Failure count that triggers lockout.
    max_tries: u32,
}

impl FailureThrottle {
    /// Create a throttle; captures the connection start time now.
    pub fn new(base: Duration, jitter: Duration, max_tries: u32) -> Self {
        Self {
            start: Instant::now(),
            base,
            jitter,
            max_tries,
        }
    }

    /// The instant the authentication phase started.
    pub fn started(&self) -> Instant {
        self.start
    }

    /// The minimum observable failure-response latency from connection
    /// start.
    pub fn minimum_window(&self) -> Duration {
        self.base
    }

    /// Whether the given failure count has reached the lockout threshold.
    pub fn is_locked_out(&self, failcount: u32) -> bool {
        failcount >= self.max_tries
    }

    /// Draw this failure's target latency: `base + uniform[0, jitter)`.
    fn draw_target(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.base;
        }
        self.base + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }

    /// How long to sleep so the response is not observable before
    /// `target`, given time already spent since connection start.
    ///
    /// Zero when the window has already elapsed.
    pub fn required_delay(elapsed: Duration, target: Duration) -> Duration {
        target.saturating_sub(elapsed)
    }

    /// Sleep out the remainder of this failure's delay window.
    pub async fn delay(&self) {
        let target = self.draw_target();
        let elapsed = self.start.elapsed();
        let wait = Self::required_delay(elapsed, target);

        trace!(
            elapsed_ms = elapsed.as_millis() as u64,
            target_ms = target.as_millis() as u64,
            wait_ms = wait.as_millis() as u64,
            "failure delay"
        );

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
