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

//! Decoded DNS message model
//!
//! The record set an mDNS responder deals in: A/AAAA for addresses, PTR
//! for service enumeration, SRV/TXT for instance details. The wire
//! codec collaborator maps these structures to packet bytes; everything
//! in this crate works on the decoded form.
//!
//! Also home to the RFC 6762 section 8.2.1 tie-break: when two hosts
//! probe for the same name at once, record data decides who keeps it.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::name::DomainName;

/// Resource-record types this responder understands.
///
/// Anything else is skipped by the codec contract, never surfaced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// IPv4 address record
    A,
    /// Service-enumeration pointer record
    Ptr,
    /// Key/value attribute record
    Txt,
    /// IPv6 address record
    Aaaa,
    /// Service locator record (port + target host)
    Srv,
    /// Wildcard query type, questions only
    Any,
}

impl RecordType {
    /// The on-the-wire TYPE value.
    pub const fn to_u16(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Ptr => 12,
            RecordType::Txt => 16,
            RecordType::Aaaa => 28,
            RecordType::Srv => 33,
            RecordType::Any => 255,
        }
    }

    /// Parse an on-the-wire TYPE value.
    ///
    /// # Errors
    ///
    /// Returns `RecordError::UnsupportedType` for types outside the mDNS
    /// set above; codecs treat that as "skip this record".
    pub fn from_u16(value: u16) -> Result<Self, RecordError> {
        match value {
            1 => Ok(RecordType::A),
            12 => Ok(RecordType::Ptr),
            16 => Ok(RecordType::Txt),
            28 => Ok(RecordType::Aaaa),
            33 => Ok(RecordType::Srv),
            255 => Ok(RecordType::Any),
            other => Err(RecordError::UnsupportedType(other)),
        }
    }

    /// True when a question of type `self` asks for records of `answer`.
    pub fn matches(self, answer: RecordType) -> bool {
        self == RecordType::Any || self == answer
    }
}

/// The data portion of a resource record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordData {
    /// IPv4 address
    A(Ipv4Addr),
    /// IPv6 address
    Aaaa(Ipv6Addr),
    /// Pointer to another name
    Ptr(DomainName),
    /// Service location
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: DomainName,
    },
    /// `key=value` attribute strings
    Txt(Vec<String>),
}

impl RecordData {
    /// The record type this data belongs to.
    pub fn record_type(&self) -> RecordType {
        match self {
            RecordData::A(_) => RecordType::A,
            RecordData::Aaaa(_) => RecordType::Aaaa,
            RecordData::Ptr(_) => RecordType::Ptr,
            RecordData::Srv { .. } => RecordType::Srv,
            RecordData::Txt(_) => RecordType::Txt,
        }
    }

    /// Uncompressed rdata bytes with names lowercased, the form the
    /// tie-break comparison is defined over.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            RecordData::A(addr) => out.extend_from_slice(&addr.octets()),
            RecordData::Aaaa(addr) => out.extend_from_slice(&addr.octets()),
            RecordData::Ptr(name) => encode_name_canonical(name, &mut out),
            RecordData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                out.extend_from_slice(&priority.to_be_bytes());
                out.extend_from_slice(&weight.to_be_bytes());
                out.extend_from_slice(&port.to_be_bytes());
                encode_name_canonical(target, &mut out);
            }
            RecordData::Txt(items) => {
                for item in items {
                    let bytes = item.as_bytes();
                    let len = bytes.len().min(255);
                    out.push(len as u8);
                    out.extend_from_slice(&bytes[..len]);
                }
            }
        }
        out
    }
}

fn encode_name_canonical(name: &DomainName, out: &mut Vec<u8>) {
    for label in name.labels() {
        // Labels are validated to 63 bytes at construction.
        out.push(label.len() as u8);
        out.extend_from_slice(&label.to_ascii_lowercase().into_bytes());
    }
    out.push(0);
}

/// Order two rdata values the way the tie-break does: numeric record
/// type first, then canonical rdata bytes.
///
/// Class never participates because everything here is class IN.
pub fn cmp_record_data(a: &RecordData, b: &RecordData) -> Ordering {
    a.record_type()
        .to_u16()
        .cmp(&b.record_type().to_u16())
        .then_with(|| a.canonical_bytes().cmp(&b.canonical_bytes()))
}

/// Outcome of the simultaneous-probe tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tiebreak {
    /// Our record set is lexicographically later; we keep the name.
    Win,
    /// Theirs is later; we must rename.
    Lose,
    /// Identical record sets, usually our own traffic echoed back.
    Tie,
}

/// RFC 6762 section 8.2.1: sort both record sets, compare pairwise;
/// the first differing pair decides, the lexicographically later data
/// winning. When one set is a prefix of the other, the longer set wins.
pub fn tiebreak(ours: &[RecordData], theirs: &[RecordData]) -> Tiebreak {
    let mut ours: Vec<&RecordData> = ours.iter().collect();
    let mut theirs: Vec<&RecordData> = theirs.iter().collect();
    ours.sort_by(|a, b| cmp_record_data(a, b));
    theirs.sort_by(|a, b| cmp_record_data(a, b));

    for (a, b) in ours.iter().zip(theirs.iter()) {
        match cmp_record_data(a, b) {
            Ordering::Greater => return Tiebreak::Win,
            Ordering::Less => return Tiebreak::Lose,
            Ordering::Equal => {}
        }
    }
    match ours.len().cmp(&theirs.len()) {
        Ordering::Greater => Tiebreak::Win,
        Ordering::Less => Tiebreak::Lose,
        Ordering::Equal => Tiebreak::Tie,
    }
}

/// One resource record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub name: DomainName,
    pub ttl: u32,
    /// mDNS cache-flush bit; set on records whose name we claim uniquely.
    pub cache_flush: bool,
    pub data: RecordData,
}

/// One question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsQuestion {
    pub name: DomainName,
    pub qtype: RecordType,
    /// mDNS QU bit; we set it on probes, and only ever answer multicast.
    pub unicast_response: bool,
}

/// A decoded mDNS message.
///
/// Authority records matter in two places: probes carry the proposed
/// record set there, and the answer records of inbound responses are
/// what conflict detection reads. Answer plus additional records feed
/// the query cache alike.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsMessage {
    pub id: u16,
    pub is_response: bool,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub additionals: Vec<DnsRecord>,
}

impl DnsMessage {
    /// An empty query message.
    pub fn query() -> Self {
        Self::default()
    }

    /// An empty response message.
    pub fn response() -> Self {
        Self {
            is_response: true,
            ..Self::default()
        }
    }
}

/// Errors from record-type mapping
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    /// TYPE value outside the supported mDNS set
    #[error("unsupported record type {0}")]
    UnsupportedType(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> DomainName {
        DomainName::parse(s).unwrap()
    }

    #[test]
    fn test_record_type_wire_values() {
        for ty in [
            RecordType::A,
            RecordType::Ptr,
            RecordType::Txt,
            RecordType::Aaaa,
            RecordType::Srv,
            RecordType::Any,
        ] {
            assert_eq!(RecordType::from_u16(ty.to_u16()).unwrap(), ty);
        }
    }

    #[test]
    fn test_record_type_unsupported() {
        assert!(matches!(
            RecordType::from_u16(6),
            Err(RecordError::UnsupportedType(6))
        ));
    }

    #[test]
    fn test_question_type_matching() {
        assert!(RecordType::Any.matches(RecordType::A));
        assert!(RecordType::A.matches(RecordType::A));
        assert!(!RecordType::A.matches(RecordType::Aaaa));
    }

    #[test]
    fn test_canonical_bytes_lowercases_names() {
        let upper = RecordData::Ptr(name("Gadget.Local"));
        let lower = RecordData::Ptr(name("gadget.local"));
        assert_eq!(upper.canonical_bytes(), lower.canonical_bytes());
        // Length-prefixed labels plus the root byte.
        assert_eq!(upper.canonical_bytes()[0], 6);
    }

    #[test]
    fn test_cmp_orders_by_type_then_data() {
        let a = RecordData::A(Ipv4Addr::new(10, 0, 0, 1));
        let aaaa = RecordData::Aaaa(Ipv6Addr::LOCALHOST);
        // Type A (1) sorts before AAAA (28) regardless of data.
        assert_eq!(cmp_record_data(&a, &aaaa), Ordering::Less);

        let lo = RecordData::A(Ipv4Addr::new(10, 0, 0, 1));
        let hi = RecordData::A(Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(cmp_record_data(&lo, &hi), Ordering::Less);
        assert_eq!(cmp_record_data(&hi, &lo), Ordering::Greater);
    }

    #[test]
    fn test_tiebreak_single_record() {
        let ours = [RecordData::A(Ipv4Addr::new(192, 168, 1, 9))];
        let theirs = [RecordData::A(Ipv4Addr::new(192, 168, 1, 10))];
        assert_eq!(tiebreak(&ours, &theirs), Tiebreak::Lose);
        assert_eq!(tiebreak(&theirs, &ours), Tiebreak::Win);
        assert_eq!(tiebreak(&ours, &ours), Tiebreak::Tie);
    }

    #[test]
    fn test_tiebreak_longer_set_wins_on_common_prefix() {
        let short = [RecordData::A(Ipv4Addr::new(10, 0, 0, 1))];
        let long = [
            RecordData::A(Ipv4Addr::new(10, 0, 0, 1)),
            RecordData::Aaaa(Ipv6Addr::LOCALHOST),
        ];
        assert_eq!(tiebreak(&short, &long), Tiebreak::Lose);
        assert_eq!(tiebreak(&long, &short), Tiebreak::Win);
    }

    #[test]
    fn test_tiebreak_is_order_independent() {
        let fwd = [
            RecordData::A(Ipv4Addr::new(10, 0, 0, 1)),
            RecordData::Aaaa(Ipv6Addr::LOCALHOST),
        ];
        let rev = [
            RecordData::Aaaa(Ipv6Addr::LOCALHOST),
            RecordData::A(Ipv4Addr::new(10, 0, 0, 1)),
        ];
        assert_eq!(tiebreak(&fwd, &rev), Tiebreak::Tie);
    }

    #[test]
    fn test_srv_canonical_bytes_layout() {
        let data = RecordData::Srv {
            priority: 0,
            weight: 0,
            port: 0x1F90,
            target: name("gadget.local"),
        };
        let bytes = data.canonical_bytes();
        assert_eq!(&bytes[..6], &[0, 0, 0, 0, 0x1F, 0x90]);
        assert_eq!(bytes[6], 6); // first label length
    }
}
