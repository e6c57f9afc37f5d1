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

//! Shared test rig: one host under test and one scripted peer on an
//! in-memory segment.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::rc::Rc;

use dotlocal_mock::{MockBus, MockClock, MockInterface, MockWire, TestPeer};
use dotlocal_responder::{
    Backbone, DnsMessage, DnsRecord, DomainName, Host, RecordData,
};

/// The IPv4 address a fresh [`MockInterface`] starts with.
pub const HOST_ADDR: [u8; 4] = [192, 168, 1, 50];

pub struct Rig {
    pub bus: MockBus,
    pub clock: MockClock,
    pub iface: MockInterface,
    pub host: Host,
    pub peer: TestPeer,
}

pub fn rig() -> Rig {
    let bus = MockBus::new();
    let clock = MockClock::new();
    let iface = MockInterface::new();
    let backbone = Rc::new(Backbone::new(Box::new(bus.endpoint(&clock))));
    let host = Host::new(
        backbone,
        Rc::new(iface.clone()),
        Rc::new(MockWire),
        Rc::new(clock.clone()),
    );
    let peer = TestPeer::new(&bus, &clock);
    Rig {
        bus,
        clock,
        iface,
        host,
        peer,
    }
}

/// Advance the clock and tick the host `ticks` times.
pub fn drive(rig: &mut Rig, ticks: u32, step_ms: u64) {
    for _ in 0..ticks {
        rig.clock.advance(step_ms);
        rig.host.update();
    }
}

/// Tick until the hostname claim completes.
pub fn drive_until_claimed(rig: &mut Rig) {
    for _ in 0..64 {
        rig.clock.advance(250);
        rig.host.update();
        if rig.host.probe_status() {
            return;
        }
    }
    panic!("host never claimed its name");
}

pub fn name(s: &str) -> DomainName {
    DomainName::parse(s).unwrap()
}

pub fn a_record(record_name: &str, ttl: u32, octets: [u8; 4]) -> DnsRecord {
    DnsRecord {
        name: name(record_name),
        ttl,
        cache_flush: true,
        data: RecordData::A(Ipv4Addr::from(octets)),
    }
}

pub fn ptr_record(record_name: &str, ttl: u32, target: &str) -> DnsRecord {
    DnsRecord {
        name: name(record_name),
        ttl,
        cache_flush: false,
        data: RecordData::Ptr(name(target)),
    }
}

pub fn srv_record(record_name: &str, ttl: u32, port: u16, target: &str) -> DnsRecord {
    DnsRecord {
        name: name(record_name),
        ttl,
        cache_flush: true,
        data: RecordData::Srv {
            priority: 0,
            weight: 0,
            port,
            target: name(target),
        },
    }
}

pub fn txt_record(record_name: &str, ttl: u32, items: &[&str]) -> DnsRecord {
    DnsRecord {
        name: name(record_name),
        ttl,
        cache_flush: true,
        data: RecordData::Txt(items.iter().map(|s| s.to_string()).collect()),
    }
}

/// Probe queries for `probed`: queries with an ANY question for the
/// name and proposed records in the authority section.
pub fn probes_for(messages: &[DnsMessage], probed: &str) -> usize {
    let domain = name(probed);
    messages
        .iter()
        .filter(|m| {
            !m.is_response
                && !m.authorities.is_empty()
                && m.questions.iter().any(|q| q.name == domain)
        })
        .count()
}

/// Responses announcing `announced` (positive TTL).
pub fn announces_for(messages: &[DnsMessage], announced: &str) -> usize {
    let domain = name(announced);
    messages
        .iter()
        .filter(|m| {
            m.is_response
                && m.answers.iter().any(|r| r.name == domain && r.ttl > 0)
        })
        .count()
}

/// Responses retracting `retracted` (zero TTL).
pub fn goodbyes_for(messages: &[DnsMessage], retracted: &str) -> usize {
    let domain = name(retracted);
    messages
        .iter()
        .filter(|m| {
            m.is_response
                && m.answers.iter().any(|r| r.name == domain && r.ttl == 0)
        })
        .count()
}

/// Plain (non-probe) questions asked for `asked`.
pub fn questions_for(messages: &[DnsMessage], asked: &str) -> usize {
    let domain = name(asked);
    messages
        .iter()
        .filter(|m| {
            !m.is_response
                && m.authorities.is_empty()
                && m.questions.iter().any(|q| q.name == domain)
        })
        .count()
}
