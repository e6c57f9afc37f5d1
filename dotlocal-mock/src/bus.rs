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

//! In-memory multicast segment

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use dotlocal_responder::{MulticastTransport, TransportError};

use crate::clock::MockClock;

struct Endpoint {
    id: u32,
    open: bool,
    queue: VecDeque<Vec<u8>>,
}

#[derive(Default)]
struct BusInner {
    endpoints: Vec<Endpoint>,
    next_id: u32,
    fail_opens: bool,
    fail_sends: bool,
}

/// A shared in-memory network segment.
///
/// Each [`MockBus::endpoint`] is one multicast socket on the segment. A
/// datagram sent from an endpoint is copied to every *other* open
/// endpoint, mirroring a real transport with multicast loopback off;
/// two hosts that should hear each other need two endpoints.
#[derive(Clone, Default)]
pub struct MockBus {
    inner: Rc<RefCell<BusInner>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new, initially closed endpoint on this segment.
    ///
    /// The clock is what [`MockTransport::recv_timeout`] advances to
    /// simulate blocking; hand in the same clock the host runs on.
    pub fn endpoint(&self, clock: &MockClock) -> MockTransport {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.endpoints.push(Endpoint {
            id,
            open: false,
            queue: VecDeque::new(),
        });
        MockTransport {
            bus: Rc::clone(&self.inner),
            id,
            clock: clock.clone(),
        }
    }

    /// Makes every subsequent `open` fail, for exercising startup
    /// error paths.
    pub fn set_fail_opens(&self, fail: bool) {
        self.inner.borrow_mut().fail_opens = fail;
    }

    /// Makes every subsequent `send` fail, for exercising send-failure
    /// retry paths.
    pub fn set_fail_sends(&self, fail: bool) {
        self.inner.borrow_mut().fail_sends = fail;
    }

    /// Number of currently open endpoints.
    pub fn open_endpoints(&self) -> usize {
        self.inner
            .borrow()
            .endpoints
            .iter()
            .filter(|e| e.open)
            .count()
    }
}

/// One endpoint on a [`MockBus`].
pub struct MockTransport {
    bus: Rc<RefCell<BusInner>>,
    id: u32,
    clock: MockClock,
}

impl BusInner {
    fn endpoint_mut(&mut self, id: u32) -> Option<&mut Endpoint> {
        self.endpoints.iter_mut().find(|e| e.id == id)
    }
}

impl MulticastTransport for MockTransport {
    fn open(&self) -> Result<(), TransportError> {
        let mut inner = self.bus.borrow_mut();
        if inner.fail_opens {
            return Err(TransportError::SendFailed(
                "bus refuses to open endpoints".to_owned(),
            ));
        }
        if let Some(endpoint) = inner.endpoint_mut(self.id) {
            endpoint.open = true;
        }
        Ok(())
    }

    fn close(&self) {
        let mut inner = self.bus.borrow_mut();
        if let Some(endpoint) = inner.endpoint_mut(self.id) {
            endpoint.open = false;
            endpoint.queue.clear();
        }
    }

    fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.bus.borrow_mut();
        let open = inner
            .endpoints
            .iter()
            .any(|e| e.id == self.id && e.open);
        if !open {
            return Err(TransportError::Closed);
        }
        if inner.fail_sends {
            return Err(TransportError::SendFailed("bus drops all sends".to_owned()));
        }
        for endpoint in inner.endpoints.iter_mut() {
            if endpoint.id != self.id && endpoint.open {
                endpoint.queue.push_back(payload.to_vec());
            }
        }
        Ok(())
    }

    fn try_recv(&self) -> Option<Vec<u8>> {
        let mut inner = self.bus.borrow_mut();
        let endpoint = inner.endpoint_mut(self.id)?;
        if !endpoint.open {
            return None;
        }
        endpoint.queue.pop_front()
    }

    /// Simulated blocking: when the queue is empty, the full timeout
    /// elapses on the mock clock and nothing arrives. Single-threaded
    /// tests cannot be interrupted mid-wait, so traffic that should be
    /// seen during a wait must be queued before it starts.
    fn recv_timeout(&self, timeout_ms: u64) -> Option<Vec<u8>> {
        if let Some(payload) = self.try_recv() {
            return Some(payload);
        }
        self.clock.advance(timeout_ms);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_endpoint(bus: &MockBus, clock: &MockClock) -> MockTransport {
        let endpoint = bus.endpoint(clock);
        endpoint.open().unwrap();
        endpoint
    }

    #[test]
    fn test_send_reaches_other_endpoints_not_sender() {
        let bus = MockBus::new();
        let clock = MockClock::new();
        let a = open_endpoint(&bus, &clock);
        let b = open_endpoint(&bus, &clock);
        let c = open_endpoint(&bus, &clock);

        a.send(b"hello").unwrap();
        assert_eq!(a.try_recv(), None);
        assert_eq!(b.try_recv().as_deref(), Some(&b"hello"[..]));
        assert_eq!(c.try_recv().as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_closed_endpoint_gets_nothing() {
        let bus = MockBus::new();
        let clock = MockClock::new();
        let a = open_endpoint(&bus, &clock);
        let b = bus.endpoint(&clock);

        a.send(b"x").unwrap();
        b.open().unwrap();
        assert_eq!(b.try_recv(), None);
    }

    #[test]
    fn test_send_requires_open() {
        let bus = MockBus::new();
        let clock = MockClock::new();
        let a = bus.endpoint(&clock);
        assert!(matches!(a.send(b"x"), Err(TransportError::Closed)));
    }

    #[test]
    fn test_fail_sends_toggle() {
        let bus = MockBus::new();
        let clock = MockClock::new();
        let a = open_endpoint(&bus, &clock);
        bus.set_fail_sends(true);
        assert!(matches!(a.send(b"x"), Err(TransportError::SendFailed(_))));
        bus.set_fail_sends(false);
        a.send(b"x").unwrap();
    }

    #[test]
    fn test_fail_opens_toggle() {
        let bus = MockBus::new();
        let clock = MockClock::new();
        let a = bus.endpoint(&clock);
        bus.set_fail_opens(true);
        assert!(a.open().is_err());
        assert_eq!(bus.open_endpoints(), 0);
    }

    #[test]
    fn test_recv_timeout_advances_clock_when_idle() {
        let bus = MockBus::new();
        let clock = MockClock::new();
        let a = open_endpoint(&bus, &clock);
        let b = open_endpoint(&bus, &clock);

        b.send(b"queued").unwrap();
        // Data present: returns it without touching the clock.
        assert!(a.recv_timeout(500).is_some());
        assert_eq!(clock.now(), 0);
        // Idle: the whole timeout passes.
        assert!(a.recv_timeout(500).is_none());
        assert_eq!(clock.now(), 500);
    }

    #[test]
    fn test_close_drops_queued_data() {
        let bus = MockBus::new();
        let clock = MockClock::new();
        let a = open_endpoint(&bus, &clock);
        let b = open_endpoint(&bus, &clock);

        b.send(b"stale").unwrap();
        a.close();
        a.open().unwrap();
        assert_eq!(a.try_recv(), None);
    }
}
