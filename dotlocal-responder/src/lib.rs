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

//! Multicast DNS responder and resolver (RFC 6762 / RFC 6763)
//!
//! This crate implements the state machine of a single-device mDNS
//! responder: claiming a hostname on the `.local` domain, advertising
//! DNS-SD services under it, defending both against name conflicts, and
//! resolving names and services advertised by other devices.
//!
//! ## Architecture
//!
//! The crate is sans-io. It never opens a socket, never reads the OS
//! clock, and never touches the wire format. Those concerns sit behind
//! traits ([`MulticastTransport`], [`NetInterface`], [`WireCodec`],
//! [`Clock`]) implemented by backend crates (`dotlocal-net` for
//! production, `dotlocal-mock` for tests).
//!
//! - [`Host`] is the coordinator: hostname, services, queries, and the
//!   per-tick [`Host::update`] cycle.
//! - [`Backbone`] owns the shared transport and fans inbound datagrams
//!   out to every registered host.
//! - [`ProbeState`] runs the probe/announce machine for one claimed
//!   name; the host and each service carry their own instance.
//!
//! ## Driving it
//!
//! The application calls [`Host::update`] on a regular cadence (tens of
//! milliseconds is plenty). Everything is single-threaded and
//! cooperative; the only blocking points are the bounded waits of
//! [`Host::query_service`] and [`Host::query_host`].

pub mod backbone;
pub mod clock;
pub mod consts;
pub mod host;
pub mod name;
pub mod net;
pub mod probe;
pub mod query;
pub mod record;
pub mod service;

pub use backbone::Backbone;
pub use clock::{Clock, Timeout};
pub use host::{Host, HostError};
pub use name::{index_name, DomainName, NameError};
pub use net::{CodecError, IfaceState, MulticastTransport, NetInterface, TransportError, WireCodec};
pub use probe::{ProbeCallback, ProbeState, ProbeStatus};
pub use query::{Answer, AnswerCallback, QueryCallback, QueryHandle, QueryType};
pub use record::{DnsMessage, DnsQuestion, DnsRecord, RecordData, RecordError, RecordType};
pub use service::{
    Protocol, Service, ServiceError, ServiceHandle, ServiceTxt, TxtCallback, TxtCollector,
};
