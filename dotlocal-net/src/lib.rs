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

//! Production backends for the dotlocal responder
//!
//! `dotlocal-responder` is sans-io; this crate supplies the pieces that
//! touch the machine:
//!
//! - [`UdpTransport`]: the shared multicast socket on port 5353
//! - [`SystemInterface`]: interface state from the OS address tables
//! - [`HickoryCodec`]: DNS wire format via `hickory-proto`
//! - [`SystemClock`]: monotonic milliseconds from [`std::time::Instant`]
//!
//! The `advertiser` binary wires all four into a running responder for
//! manual testing against real peers on the segment.

mod clock;
mod iface;
mod transport;
mod wire;

pub use clock::SystemClock;
pub use iface::SystemInterface;
pub use transport::UdpTransport;
pub use wire::HickoryCodec;
