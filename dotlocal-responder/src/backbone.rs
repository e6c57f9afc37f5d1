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

//! Shared transport ownership
//!
//! One process gets one mDNS socket no matter how many hosts it runs.
//! The backbone owns that transport, opens it when the first host
//! registers, closes it when the last one leaves, and copies every
//! inbound datagram into a per-host queue. Hosts pull from their queue
//! during `update()` and during static-query waits; nothing is ever
//! pushed into a host from here, so there are no reentrant callbacks.
//!
//! Create it once and hand the same `Rc<Backbone>` to every host.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::consts::MAX_PACKET_SIZE;
use crate::net::{MulticastTransport, TransportError};

/// Identity of one registered host's inbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HostId(u32);

struct Slot {
    id: HostId,
    queue: VecDeque<Vec<u8>>,
}

#[derive(Default)]
struct Registry {
    next_id: u32,
    slots: Vec<Slot>,
}

/// Process-wide owner of the multicast transport.
pub struct Backbone {
    transport: Box<dyn MulticastTransport>,
    registry: RefCell<Registry>,
}

impl Backbone {
    pub fn new(transport: Box<dyn MulticastTransport>) -> Self {
        Self {
            transport,
            registry: RefCell::new(Registry::default()),
        }
    }

    /// Number of hosts currently registered.
    pub fn host_count(&self) -> usize {
        self.registry.borrow().slots.len()
    }

    /// Register a host; the first registration opens the transport.
    ///
    /// # Errors
    ///
    /// Propagates the transport's open failure; no slot is created then.
    pub(crate) fn register(&self) -> Result<HostId, TransportError> {
        if self.registry.borrow().slots.is_empty() {
            self.transport.open()?;
            log::info!("backbone: transport opened");
        }
        let mut registry = self.registry.borrow_mut();
        registry.next_id += 1;
        let id = HostId(registry.next_id);
        registry.slots.push(Slot {
            id,
            queue: VecDeque::new(),
        });
        Ok(id)
    }

    /// Drop a host's registration; the last one closes the transport.
    pub(crate) fn unregister(&self, id: HostId) {
        let emptied = {
            let mut registry = self.registry.borrow_mut();
            registry.slots.retain(|slot| slot.id != id);
            registry.slots.is_empty()
        };
        if emptied {
            self.transport.close();
            log::info!("backbone: transport closed");
        }
    }

    /// Multicast one encoded message.
    ///
    /// # Errors
    ///
    /// Rejects oversized datagrams and propagates transport failures.
    pub(crate) fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > MAX_PACKET_SIZE {
            return Err(TransportError::SendFailed(format!(
                "datagram of {} bytes exceeds {}",
                payload.len(),
                MAX_PACKET_SIZE
            )));
        }
        self.transport.send(payload)
    }

    /// Move inbound datagrams from the transport into every host queue.
    ///
    /// Always drains whatever the socket already has; when that yields
    /// nothing and `timeout_ms` is nonzero, blocks up to the timeout for
    /// one more. This is the single point the static-query wait parks on.
    pub(crate) fn pump(&self, timeout_ms: u64) {
        let mut received = Vec::new();
        while let Some(datagram) = self.transport.try_recv() {
            received.push(datagram);
        }
        if received.is_empty() && timeout_ms > 0 {
            if let Some(datagram) = self.transport.recv_timeout(timeout_ms) {
                received.push(datagram);
                while let Some(more) = self.transport.try_recv() {
                    received.push(more);
                }
            }
        }
        if received.is_empty() {
            return;
        }

        let mut registry = self.registry.borrow_mut();
        for datagram in received {
            for slot in registry.slots.iter_mut() {
                slot.queue.push_back(datagram.clone());
            }
        }
    }

    /// Take everything queued for one host.
    pub(crate) fn drain(&self, id: HostId) -> Vec<Vec<u8>> {
        let mut registry = self.registry.borrow_mut();
        match registry.slots.iter_mut().find(|slot| slot.id == id) {
            Some(slot) => slot.queue.drain(..).collect(),
            None => Vec::new(),
        }
    }
}
