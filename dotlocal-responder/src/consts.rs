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

//! Protocol constants
//!
//! Timing values follow RFC 6762 (probing in section 8.1, announcing in
//! section 8.3); record TTLs follow the conventional 120 s for address
//! records and 75 min for everything else.

use std::net::{Ipv4Addr, Ipv6Addr};

/// UDP port all mDNS traffic uses, both source and destination.
pub const MDNS_PORT: u16 = 5353;

/// IPv4 multicast group for mDNS.
pub const MDNS_GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// IPv6 link-local multicast group for mDNS.
pub const MDNS_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

/// Datagrams larger than this are never sent; inbound buffers use it too.
pub const MAX_PACKET_SIZE: usize = 1500;

/// Maximum length of a single DNS label, in bytes.
pub const LABEL_MAX_LEN: usize = 63;

/// Maximum encoded length of a full domain name, in bytes.
pub const NAME_MAX_LEN: usize = 255;

/// Top-level domain every name lives under.
pub const LOCAL_TLD: &str = "local";

/// DNS-SD meta-query name for enumerating service types.
pub const META_QUERY_NAME: &str = "_services._dns-sd._udp.local";

/// Divider inserted before the numeric suffix when renaming after a
/// conflict ("gadget" becomes "gadget-2").
pub const NAME_DIVIDER: &str = "-";

/// Hostname used when the caller supplies none at all.
pub const DEFAULT_HOST_NAME: &str = "dotlocal";

/// Number of probe queries sent before a name is considered claimed.
pub const PROBE_COUNT: u8 = 3;

/// Spacing between consecutive probe queries.
pub const PROBE_SPACING_MS: u64 = 250;

/// Upper bound of the random delay before the first probe.
pub const PROBE_JITTER_MS: u64 = 250;

/// Number of unsolicited announcements after a successful claim.
pub const ANNOUNCE_COUNT: u8 = 2;

/// Delay after the first announcement; doubles for each one after.
pub const ANNOUNCE_BASE_DELAY_MS: u64 = 1_000;

/// Delay before the first resend of a dynamic query; doubles per resend.
pub const QUERY_RESEND_BASE_MS: u64 = 1_000;

/// Dynamic-query resend interval never grows beyond this.
pub const QUERY_RESEND_CAP_MS: u64 = 3_600_000;

/// TTL for A/AAAA records we advertise.
pub const HOST_TTL_SECS: u32 = 120;

/// TTL for PTR/SRV/TXT records we advertise.
pub const SERVICE_TTL_SECS: u32 = 4_500;
