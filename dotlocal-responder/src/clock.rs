// Copyright 2025 Google LLC
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

//! Time source abstraction
//!
//! The responder never reads the OS clock; all scheduling (probe
//! spacing, announce backoff, query resends, answer expiry) runs off
//! milliseconds supplied through this trait. Backends feed a monotonic
//! wall clock; tests feed a manually advanced one.

/// Monotonic millisecond clock.
///
/// The zero point is arbitrary; only differences matter. Implementations
/// must never go backwards.
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin.
    fn now_ms(&self) -> u64;
}

/// A deadline against a [`Clock`].
///
/// The `never` form compares as unexpired forever, which is how parked
/// state machines (nothing scheduled) are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    deadline_ms: u64,
}

impl Timeout {
    /// A deadline `delay_ms` from now.
    pub fn after(clock: &dyn Clock, delay_ms: u64) -> Self {
        Self {
            deadline_ms: clock.now_ms().saturating_add(delay_ms),
        }
    }

    /// A deadline that never arrives.
    pub const fn never() -> Self {
        Self {
            deadline_ms: u64::MAX,
        }
    }

    /// Move the deadline to `delay_ms` from now.
    pub fn reset(&mut self, clock: &dyn Clock, delay_ms: u64) {
        self.deadline_ms = clock.now_ms().saturating_add(delay_ms);
    }

    /// Force the deadline into the past so the next check fires.
    pub fn expire_now(&mut self, clock: &dyn Clock) {
        self.deadline_ms = clock.now_ms();
    }

    /// Whether the deadline has been reached.
    pub fn expired(&self, clock: &dyn Clock) -> bool {
        self.deadline_ms != u64::MAX && clock.now_ms() >= self.deadline_ms
    }

    /// Milliseconds until the deadline; zero once reached.
    pub fn remaining_ms(&self, clock: &dyn Clock) -> u64 {
        self.deadline_ms.saturating_sub(clock.now_ms())
    }
}
