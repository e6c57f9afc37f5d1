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

//! Network collaborator traits
//!
//! The responder core stays sans-io behind three seams: a multicast
//! transport (the 5353 socket, including group membership which lives
//! with the socket on BSD-style stacks), a network-interface monitor,
//! and a wire codec. `dotlocal-net` provides the production
//! implementations, `dotlocal-mock` the in-memory ones.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::record::DnsMessage;

/// The shared mDNS multicast socket.
///
/// `open` joins the multicast groups and `close` leaves them; membership
/// follows the socket lifetime. All methods take `&self` so a single
/// transport can sit behind a shared [`Backbone`](crate::Backbone);
/// implementations use interior mutability.
pub trait MulticastTransport {
    /// Open the socket and join the mDNS groups.
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` when the socket cannot be created,
    /// bound, or joined to the groups.
    fn open(&self) -> Result<(), TransportError>;

    /// Leave the groups and close the socket. Best-effort.
    fn close(&self);

    /// Multicast one datagram to the mDNS groups.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` before `open`, or the underlying
    /// socket error.
    fn send(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Pop one pending inbound datagram, if any, without blocking.
    fn try_recv(&self) -> Option<Vec<u8>>;

    /// Wait up to `timeout_ms` for one inbound datagram.
    ///
    /// This is the only blocking call in the system; the static-query
    /// wait loops on it.
    fn recv_timeout(&self, timeout_ms: u64) -> Option<Vec<u8>>;
}

/// View of the one network interface the responder runs on.
pub trait NetInterface {
    /// Interface is administratively up.
    fn is_up(&self) -> bool;

    /// Carrier present.
    fn link_up(&self) -> bool;

    /// Current IPv4 address, if any.
    fn ipv4_addr(&self) -> Option<Ipv4Addr>;

    /// Current IPv6 address, if any.
    fn ipv6_addr(&self) -> Option<Ipv6Addr>;
}

/// DNS wire-format codec.
///
/// Contract: `decode` skips records and questions of unsupported types
/// rather than failing, and only errors on packets it cannot parse at
/// all. `encode` never emits name compression the decoder side could
/// not handle; plain uncompressed output is fine.
pub trait WireCodec {
    /// Encode a message to packet bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` when the message cannot be represented
    /// (for example, a name the wire format rejects).
    fn encode(&self, message: &DnsMessage) -> Result<Vec<u8>, CodecError>;

    /// Decode packet bytes to a message.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Malformed` for unparseable packets.
    fn decode(&self, payload: &[u8]) -> Result<DnsMessage, CodecError>;
}

/// Interface status snapshot as a bitmask.
///
/// Bit layout: up (1), link (2), has-IPv4 (4), has-IPv6 (8). The link
/// half and the address half are classified separately because they
/// trigger the same reaction (a full re-probe) for different reasons:
/// a link flap means we may be on a different network; an address
/// change invalidates the records we have been advertising.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IfaceState(u8);

impl IfaceState {
    pub const UP: u8 = 0b0001;
    pub const LINK: u8 = 0b0010;
    pub const V4: u8 = 0b0100;
    pub const V6: u8 = 0b1000;
    pub const LINK_MASK: u8 = 0b0011;
    pub const IP_MASK: u8 = 0b1100;

    /// Snapshot the current state of `iface`.
    pub fn sample(iface: &dyn NetInterface) -> Self {
        let mut bits = 0;
        if iface.is_up() {
            bits |= Self::UP;
        }
        if iface.link_up() {
            bits |= Self::LINK;
        }
        if iface.ipv4_addr().is_some() {
            bits |= Self::V4;
        }
        if iface.ipv6_addr().is_some() {
            bits |= Self::V6;
        }
        Self(bits)
    }

    /// Raw bits, for logging.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Link is up and at least one address is configured; the gate for
    /// all probing, announcing, and query processing.
    pub fn operational(self) -> bool {
        self.0 & Self::LINK != 0 && self.0 & Self::IP_MASK != 0
    }

    /// Up/link bits differ between the two snapshots.
    pub fn link_changed(self, other: IfaceState) -> bool {
        (self.0 ^ other.0) & Self::LINK_MASK != 0
    }

    /// Address-presence bits differ between the two snapshots.
    pub fn ip_changed(self, other: IfaceState) -> bool {
        (self.0 ^ other.0) & Self::IP_MASK != 0
    }
}

/// Errors from the multicast transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Operation on a transport that is not open
    #[error("transport is not open")]
    Closed,

    /// The datagram could not be sent
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Underlying socket error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from the wire codec
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Packet bytes could not be parsed
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// Message contains something the wire format cannot express
    #[error("unencodable message: {0}")]
    Unencodable(String),
}
