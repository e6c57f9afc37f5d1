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

//! The real 5353 socket
//!
//! One UDP socket bound with address reuse, so this process can coexist
//! with a system responder (Avahi, Bonjour) listening on the same port.
//! The transport is IPv4-only; AAAA records still travel inside
//! datagrams on the v4 group. Multicast loopback stays enabled because
//! responders on the same machine must hear our announcements; our own
//! echo comes back too and reads as an agreeing peer upstream.

use std::cell::RefCell;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use dotlocal_responder::consts::{MAX_PACKET_SIZE, MDNS_GROUP_V4, MDNS_PORT};
use dotlocal_responder::{MulticastTransport, TransportError};

/// Sleep granularity of the bounded receive wait.
const POLL_SLEEP_MS: u64 = 10;

/// [`MulticastTransport`] over a real multicast UDP socket.
pub struct UdpTransport {
    port: u16,
    socket: RefCell<Option<UdpSocket>>,
}

impl UdpTransport {
    /// Transport on the standard mDNS port.
    pub fn new() -> Self {
        Self::with_port(MDNS_PORT)
    }

    /// Transport on a custom port, for running several responders side
    /// by side during development. Peers must use the same port.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            socket: RefCell::new(None),
        }
    }

    /// Join the mDNS group on every non-loopback IPv4 interface, falling
    /// back to the default interface when none could be joined.
    fn join_groups(socket: &UdpSocket) -> std::io::Result<()> {
        let mut joined = 0;
        let interfaces = match if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces,
            Err(err) => {
                log::warn!("cannot enumerate interfaces: {}", err);
                Vec::new()
            }
        };
        for iface in interfaces.iter().filter(|iface| !iface.is_loopback()) {
            if let if_addrs::IfAddr::V4(v4) = &iface.addr {
                match socket.join_multicast_v4(&MDNS_GROUP_V4, &v4.ip) {
                    Ok(()) => {
                        log::debug!("joined {} on {} ({})", MDNS_GROUP_V4, iface.name, v4.ip);
                        joined += 1;
                    }
                    Err(err) => {
                        log::warn!("cannot join {} on {}: {}", MDNS_GROUP_V4, iface.name, err);
                    }
                }
            }
        }
        if joined == 0 {
            socket.join_multicast_v4(&MDNS_GROUP_V4, &Ipv4Addr::UNSPECIFIED)?;
        }
        Ok(())
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MulticastTransport for UdpTransport {
    fn open(&self) -> Result<(), TransportError> {
        if self.socket.borrow().is_some() {
            return Ok(());
        }
        let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        raw.set_reuse_address(true)?;
        #[cfg(unix)]
        raw.set_reuse_port(true)?;
        raw.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port).into())?;
        let socket: UdpSocket = raw.into();
        Self::join_groups(&socket)?;
        // RFC 6762 section 11: multicast with TTL 255.
        socket.set_multicast_ttl_v4(255)?;
        socket.set_nonblocking(true)?;
        log::info!("mDNS socket open on port {}", self.port);
        *self.socket.borrow_mut() = Some(socket);
        Ok(())
    }

    fn close(&self) {
        if self.socket.borrow_mut().take().is_some() {
            log::info!("mDNS socket closed");
        }
    }

    fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let socket = self.socket.borrow();
        let socket = socket.as_ref().ok_or(TransportError::Closed)?;
        let sent = socket.send_to(payload, (MDNS_GROUP_V4, self.port))?;
        if sent != payload.len() {
            return Err(TransportError::SendFailed(format!(
                "short send: {} of {} bytes",
                sent,
                payload.len()
            )));
        }
        Ok(())
    }

    fn try_recv(&self) -> Option<Vec<u8>> {
        let socket = self.socket.borrow();
        let socket = socket.as_ref()?;
        let mut buffer = [0u8; MAX_PACKET_SIZE];
        match socket.recv_from(&mut buffer) {
            Ok((len, _peer)) => Some(buffer[..len].to_vec()),
            Err(err) if err.kind() == ErrorKind::WouldBlock => None,
            Err(err) => {
                log::debug!("recv error: {}", err);
                None
            }
        }
    }

    fn recv_timeout(&self, timeout_ms: u64) -> Option<Vec<u8>> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if let Some(payload) = self.try_recv() {
                return Some(payload);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(POLL_SLEEP_MS)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_transport_rejects_io() {
        let transport = UdpTransport::new();
        assert!(matches!(
            transport.send(b"hello"),
            Err(TransportError::Closed)
        ));
        assert!(transport.try_recv().is_none());
        transport.close();
    }

    #[test]
    fn test_recv_timeout_without_socket_waits_out_the_window() {
        let transport = UdpTransport::with_port(5354);
        let start = Instant::now();
        assert!(transport.recv_timeout(30).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
