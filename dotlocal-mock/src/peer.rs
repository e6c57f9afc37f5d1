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

//! A scripted responder sharing the segment with the host under test

use dotlocal_responder::{
    DnsMessage, DnsQuestion, DnsRecord, MulticastTransport, TransportError, WireCodec,
};

use crate::bus::{MockBus, MockTransport};
use crate::clock::MockClock;
use crate::wire::MockWire;

/// Plays the part of another mDNS responder on the segment.
///
/// A peer owns its own bus endpoint, so it sees everything the host
/// under test multicasts and can inject queries, answers and conflict
/// traffic.
pub struct TestPeer {
    transport: MockTransport,
    codec: MockWire,
}

impl TestPeer {
    /// Joins the segment with a fresh, open endpoint.
    pub fn new(bus: &MockBus, clock: &MockClock) -> Self {
        let transport = bus.endpoint(clock);
        if let Err(err) = transport.open() {
            log::warn!("test peer endpoint failed to open: {}", err);
        }
        Self {
            transport,
            codec: MockWire,
        }
    }

    /// Multicasts one message.
    ///
    /// # Errors
    ///
    /// Returns the transport error when the bus rejects the send.
    pub fn send_message(&self, message: &DnsMessage) -> Result<(), TransportError> {
        let payload = self
            .codec
            .encode(message)
            .map_err(|err| TransportError::SendFailed(err.to_string()))?;
        self.transport.send(&payload)
    }

    /// Multicasts a response carrying these answers.
    ///
    /// # Errors
    ///
    /// As for [`TestPeer::send_message`].
    pub fn send_response(&self, answers: Vec<DnsRecord>) -> Result<(), TransportError> {
        let mut message = DnsMessage::response();
        message.answers = answers;
        self.send_message(&message)
    }

    /// Multicasts a query carrying these questions.
    ///
    /// # Errors
    ///
    /// As for [`TestPeer::send_message`].
    pub fn send_query(&self, questions: Vec<DnsQuestion>) -> Result<(), TransportError> {
        let mut message = DnsMessage::query();
        message.questions = questions;
        self.send_message(&message)
    }

    /// Drains and decodes everything the peer has received so far.
    /// Undecodable datagrams are dropped, like a real responder would.
    pub fn take_messages(&self) -> Vec<DnsMessage> {
        let mut messages = Vec::new();
        while let Some(payload) = self.transport.try_recv() {
            match self.codec.decode(&payload) {
                Ok(message) => messages.push(message),
                Err(err) => log::debug!("peer dropping undecodable datagram: {}", err),
            }
        }
        messages
    }
}
