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

//! Wire codec over hickory-proto
//!
//! hickory-proto handles serialization only; all query and response
//! logic lives in the responder core. Decoding is forgiving by the
//! [`WireCodec`] contract: questions and records of types the responder
//! does not model are dropped, and only a packet that fails to parse
//! outright is an error.

use dotlocal_responder::{
    CodecError, DnsMessage, DnsQuestion, DnsRecord, DomainName, RecordData, RecordType, WireCodec,
};
use hickory_proto::op::{Message, MessageType, Query};
use hickory_proto::rr::rdata::{A, AAAA, PTR, SRV, TXT};
use hickory_proto::rr::{Name, RData, Record, RecordType as WireType};

/// [`WireCodec`] backed by hickory-proto with its mDNS extensions
/// (the QU question bit and the cache-flush record bit).
#[derive(Debug, Clone, Copy, Default)]
pub struct HickoryCodec;

impl WireCodec for HickoryCodec {
    fn encode(&self, message: &DnsMessage) -> Result<Vec<u8>, CodecError> {
        let mut out = Message::new();
        out.set_id(message.id);
        if message.is_response {
            // mDNS responses are always authoritative (RFC 6762
            // section 18.4).
            out.set_message_type(MessageType::Response);
            out.set_authoritative(true);
        }
        for question in &message.questions {
            let mut query = Query::query(encode_name(&question.name)?, encode_qtype(question.qtype));
            query.set_mdns_unicast_response(question.unicast_response);
            out.add_query(query);
        }
        for record in &message.answers {
            out.add_answer(encode_record(record)?);
        }
        for record in &message.authorities {
            out.add_name_server(encode_record(record)?);
        }
        for record in &message.additionals {
            out.add_additional(encode_record(record)?);
        }
        out.to_vec()
            .map_err(|err| CodecError::Unencodable(err.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<DnsMessage, CodecError> {
        let parsed =
            Message::from_vec(payload).map_err(|err| CodecError::Malformed(err.to_string()))?;
        let mut message = if parsed.message_type() == MessageType::Response {
            DnsMessage::response()
        } else {
            DnsMessage::query()
        };
        message.id = parsed.id();
        for query in parsed.queries() {
            let Some(qtype) = decode_qtype(query.query_type()) else {
                continue;
            };
            let Some(name) = decode_name(query.name()) else {
                continue;
            };
            message.questions.push(DnsQuestion {
                name,
                qtype,
                unicast_response: query.mdns_unicast_response(),
            });
        }
        message.answers = decode_records(parsed.answers());
        message.authorities = decode_records(parsed.name_servers());
        message.additionals = decode_records(parsed.additionals());
        Ok(message)
    }
}

/// Labels go over as raw bytes so instance names with spaces and other
/// non-hostname characters survive unescaped.
fn encode_name(name: &DomainName) -> Result<Name, CodecError> {
    let mut out = Name::from_labels(name.labels().iter().map(|label| label.as_bytes()))
        .map_err(|err| CodecError::Unencodable(err.to_string()))?;
    out.set_fqdn(true);
    Ok(out)
}

fn encode_qtype(qtype: RecordType) -> WireType {
    match qtype {
        RecordType::A => WireType::A,
        RecordType::Aaaa => WireType::AAAA,
        RecordType::Ptr => WireType::PTR,
        RecordType::Srv => WireType::SRV,
        RecordType::Txt => WireType::TXT,
        RecordType::Any => WireType::ANY,
    }
}

fn decode_qtype(qtype: WireType) -> Option<RecordType> {
    match qtype {
        WireType::A => Some(RecordType::A),
        WireType::AAAA => Some(RecordType::Aaaa),
        WireType::PTR => Some(RecordType::Ptr),
        WireType::SRV => Some(RecordType::Srv),
        WireType::TXT => Some(RecordType::Txt),
        WireType::ANY => Some(RecordType::Any),
        _ => None,
    }
}

fn encode_record(record: &DnsRecord) -> Result<Record, CodecError> {
    let name = encode_name(&record.name)?;
    let rdata = match &record.data {
        RecordData::A(addr) => RData::A(A(*addr)),
        RecordData::Aaaa(addr) => RData::AAAA(AAAA(*addr)),
        RecordData::Ptr(target) => RData::PTR(PTR(encode_name(target)?)),
        RecordData::Srv {
            priority,
            weight,
            port,
            target,
        } => RData::SRV(SRV::new(*priority, *weight, *port, encode_name(target)?)),
        RecordData::Txt(items) => RData::TXT(encode_txt(items)),
    };
    let mut out = Record::from_rdata(name, record.ttl, rdata);
    out.set_mdns_cache_flush(record.cache_flush);
    Ok(out)
}

fn encode_txt(items: &[String]) -> TXT {
    if items.is_empty() {
        // An empty TXT record still carries one zero-length string on
        // the wire (RFC 6763 section 6.1).
        return TXT::new(vec![String::new()]);
    }
    TXT::new(items.to_vec())
}

fn decode_records(records: &[Record]) -> Vec<DnsRecord> {
    records
        .iter()
        .filter_map(|record| {
            let name = decode_name(record.name())?;
            let data = record.data().and_then(decode_rdata)?;
            Some(DnsRecord {
                name,
                ttl: record.ttl(),
                cache_flush: record.mdns_cache_flush(),
                data,
            })
        })
        .collect()
}

fn decode_rdata(rdata: &RData) -> Option<RecordData> {
    match rdata {
        RData::A(a) => Some(RecordData::A(a.0)),
        RData::AAAA(aaaa) => Some(RecordData::Aaaa(aaaa.0)),
        RData::PTR(ptr) => Some(RecordData::Ptr(decode_name(&ptr.0)?)),
        RData::SRV(srv) => Some(RecordData::Srv {
            priority: srv.priority(),
            weight: srv.weight(),
            port: srv.port(),
            target: decode_name(srv.target())?,
        }),
        RData::TXT(txt) => Some(RecordData::Txt(decode_txt(txt))),
        _ => None,
    }
}

fn decode_txt(txt: &TXT) -> Vec<String> {
    let items: Vec<String> = txt
        .iter()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .collect();
    // Fold the lone zero-length string back to the empty attribute set.
    if items.len() == 1 && items[0].is_empty() {
        return Vec::new();
    }
    items
}

fn decode_name(name: &Name) -> Option<DomainName> {
    let mut labels = Vec::new();
    for label in name.iter() {
        labels.push(std::str::from_utf8(label).ok()?.to_owned());
    }
    DomainName::from_labels(labels).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn name(s: &str) -> DomainName {
        DomainName::parse(s).unwrap()
    }

    #[test]
    fn test_probe_query_roundtrip() {
        let mut message = DnsMessage::query();
        message.questions.push(DnsQuestion {
            name: name("gadget.local"),
            qtype: RecordType::Any,
            unicast_response: true,
        });
        message.authorities.push(DnsRecord {
            name: name("gadget.local"),
            ttl: 120,
            cache_flush: false,
            data: RecordData::A(Ipv4Addr::new(192, 168, 1, 9)),
        });

        let codec = HickoryCodec;
        let back = codec.decode(&codec.encode(&message).unwrap()).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_response_roundtrip_all_record_kinds() {
        let mut message = DnsMessage::response();
        message.answers.push(DnsRecord {
            name: name("_http._tcp.local"),
            ttl: 4_500,
            cache_flush: false,
            data: RecordData::Ptr(name("studio._http._tcp.local")),
        });
        message.additionals.push(DnsRecord {
            name: name("studio._http._tcp.local"),
            ttl: 4_500,
            cache_flush: true,
            data: RecordData::Srv {
                priority: 0,
                weight: 0,
                port: 8_080,
                target: name("gadget.local"),
            },
        });
        message.additionals.push(DnsRecord {
            name: name("studio._http._tcp.local"),
            ttl: 4_500,
            cache_flush: true,
            data: RecordData::Txt(vec!["path=/".to_owned(), "v=1".to_owned()]),
        });
        message.additionals.push(DnsRecord {
            name: name("gadget.local"),
            ttl: 120,
            cache_flush: true,
            data: RecordData::A(Ipv4Addr::new(192, 168, 1, 9)),
        });
        message.additionals.push(DnsRecord {
            name: name("gadget.local"),
            ttl: 120,
            cache_flush: true,
            data: RecordData::Aaaa(Ipv6Addr::LOCALHOST),
        });

        let codec = HickoryCodec;
        let back = codec.decode(&codec.encode(&message).unwrap()).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_empty_txt_roundtrip() {
        let mut message = DnsMessage::response();
        message.answers.push(DnsRecord {
            name: name("studio._http._tcp.local"),
            ttl: 4_500,
            cache_flush: true,
            data: RecordData::Txt(Vec::new()),
        });

        let codec = HickoryCodec;
        let back = codec.decode(&codec.encode(&message).unwrap()).unwrap();
        assert_eq!(back.answers[0].data, RecordData::Txt(Vec::new()));
    }

    #[test]
    fn test_decode_skips_unmodeled_record_types() {
        use hickory_proto::rr::rdata::CNAME;

        let alias = Name::from_utf8("alias.local.").unwrap();
        let canonical = Name::from_utf8("gadget.local.").unwrap();
        let mut wire = Message::new();
        wire.set_message_type(MessageType::Response);
        wire.add_answer(Record::from_rdata(
            alias,
            120,
            RData::CNAME(CNAME(canonical.clone())),
        ));
        wire.add_answer(Record::from_rdata(
            canonical,
            120,
            RData::A(A(Ipv4Addr::new(10, 0, 0, 7))),
        ));

        let decoded = HickoryCodec.decode(&wire.to_vec().unwrap()).unwrap();
        assert_eq!(decoded.answers.len(), 1);
        assert_eq!(
            decoded.answers[0].data,
            RecordData::A(Ipv4Addr::new(10, 0, 0, 7))
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            HickoryCodec.decode(&[0x01, 0x02]),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_display_name_with_spaces_survives() {
        let instance =
            DomainName::from_labels(["My Web Server", "_http", "_tcp", "local"]).unwrap();
        let mut message = DnsMessage::response();
        message.answers.push(DnsRecord {
            name: name("_http._tcp.local"),
            ttl: 4_500,
            cache_flush: false,
            data: RecordData::Ptr(instance),
        });

        let codec = HickoryCodec;
        let back = codec.decode(&codec.encode(&message).unwrap()).unwrap();
        assert_eq!(back, message);
    }
}
