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

//! The bounded pre-authentication connection slot pool.
//!
//! Connections that have not authenticated yet hold a slot from the pool;
//! a full pool means new connections are refused before any protocol work
//! happens. A slot is released exactly once: explicitly on authentication
//! success, or by dropping the reservation on teardown. Leaking a slot on
//! a success path would let long-lived sessions starve new logins, so
//! [`SlotReservation::release`] is idempotent and `Drop` covers every
//! other exit.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, warn};

/// Bounded pool of pre-authentication slots, shared by all listeners.
#[derive(Debug, Clone)]
pub struct PreAuthSlots {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl PreAuthSlots {
    /// Create a pool with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Total capacity of the pool.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently available.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Try to reserve a slot for a new connection.
    ///
    /// Returns `None` when the pool is exhausted; the caller should close
    /// the connection without further processing.
    pub fn try_reserve(&self) -> Option<SlotReservation> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Some(SlotReservation {
                permit: Some(permit),
            }),
            Err(TryAcquireError::NoPermits) => {
                warn!(
                    capacity = self.capacity,
                    "pre-auth connection slots exhausted, refusing connection"
                );
                None
            }
            Err(TryAcquireError::Closed) => {
                // The pool never closes its semaphore.
                warn!("pre-auth slot pool unexpectedly closed");
                None
            }
        }
    }
}

/// A held pre-authentication slot.
///
/// Dropping the reservation returns the slot; [`release`] does the same
/// eagerly and is safe to call more than once.
///
/// [`release`]: SlotReservation::release
#[derive(Debug)]
pub struct SlotReservation {
    permit: Option<OwnedSemaphorePermit>,
}

impl SlotReservation {
    /// A reservation that holds nothing, for callers that manage
    /// admission elsewhere (tests, embedded use).
    pub fn unbounded() -> Self {
        Self { permit: None }
    }

    /// Whether the slot is still held.
    pub fn is_held(&self) -> bool {
        self.permit.is_some()
    }

    /// Return the slot to the pool. Idempotent.
    pub fn release(&mut self) {
        if self.permit.take().is_some() {
            debug!("pre-auth slot released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_and_release() {
        let pool = PreAuthSlots::new(2);
        assert_eq!(pool.available(), 2);

        let mut first = pool.try_reserve().unwrap();
        let _second = pool.try_reserve().unwrap();
        assert_eq!(pool.available(), 0);

        // Pool exhausted.
        assert!(pool.try_reserve().is_none());

        first.release();
        assert_eq!(pool.available(), 1);
        assert!(pool.try_reserve().is_some());
    }

    #[test]
    fn test_release_is_idempotent() {
        let pool = PreAuthSlots::new(1);
        let mut slot = pool.try_reserve().unwrap();

        slot.release();
        assert_eq!(pool.available(), 1);

        // A second release must not double-credit the pool.
        slot.release();
        assert_eq!(pool.available(), 1);
        assert!(!slot.is_held());
    }

    #[test]
    fn test_drop_releases() {
        let pool = PreAuthSlots::new(1);
        {
            let _slot = pool.try_reserve().unwrap();
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_unbounded_reservation() {
        let mut slot = SlotReservation::unbounded();
        assert!(!slot.is_held());
        slot.release();
        assert!(!slot.is_held());
    }
}
