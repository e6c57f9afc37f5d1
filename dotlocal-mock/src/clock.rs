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

//! Manually driven clock

use std::cell::Cell;
use std::rc::Rc;

use dotlocal_responder::Clock;

/// A clock that only moves when told to.
///
/// Clones share the same time source, so the copy held by the host and
/// the copy held by the test always agree.
#[derive(Clone, Default)]
pub struct MockClock {
    now: Rc<Cell<u64>>,
}

impl MockClock {
    /// Creates a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }

    /// Jumps to an absolute time. Only forward jumps make sense; the
    /// responder treats time as monotonic.
    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }

    /// Current time in milliseconds.
    pub fn now(&self) -> u64 {
        self.now.get()
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_zero_and_advances() {
        let clock = MockClock::new();
        assert_eq!(clock.now_ms(), 0);
        clock.advance(250);
        clock.advance(750);
        assert_eq!(clock.now_ms(), 1_000);
    }

    #[test]
    fn test_clones_share_time() {
        let clock = MockClock::new();
        let other = clock.clone();
        clock.advance(5_000);
        assert_eq!(other.now_ms(), 5_000);
    }
}
