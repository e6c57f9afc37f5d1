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

//! In-memory collaborators for testing the dotlocal responder
//!
//! This crate implements every seam of `dotlocal-responder` without
//! touching a socket: [`MockBus`] is a shared multicast segment handing
//! out [`MockTransport`] endpoints, [`MockClock`] is a manually driven
//! clock, [`MockInterface`] a scriptable network interface and
//! [`MockWire`] a JSON stand-in for the DNS wire format. [`TestPeer`]
//! plays the part of another responder on the segment.
//!
//! Blocking receives advance the clock instead of sleeping, so tests
//! run instantly and deterministically.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use dotlocal_responder::{Backbone, Host, Protocol};
//! use dotlocal_mock::{MockBus, MockClock, MockInterface, MockWire};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = MockBus::new();
//! let clock = MockClock::new();
//! let backbone = Rc::new(Backbone::new(Box::new(bus.endpoint(&clock))));
//! let mut host = Host::new(
//!     backbone,
//!     Rc::new(MockInterface::new()),
//!     Rc::new(MockWire),
//!     Rc::new(clock.clone()),
//! );
//!
//! host.begin("gadget")?;
//! host.add_service(None, "_http", Protocol::Tcp, 8080)?;
//! for _ in 0..20 {
//!     clock.advance(1_000);
//!     host.update();
//! }
//! assert!(host.probe_status());
//! # Ok(())
//! # }
//! ```

mod bus;
mod clock;
mod iface;
mod peer;
mod wire;

pub use bus::{MockBus, MockTransport};
pub use clock::MockClock;
pub use iface::MockInterface;
pub use peer::TestPeer;
pub use wire::MockWire;
