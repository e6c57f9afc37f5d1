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

//! JSON stand-in for the DNS wire format

use dotlocal_responder::{CodecError, DnsMessage, WireCodec};

/// Encodes messages as JSON instead of DNS packets.
///
/// Tests never care about the byte layout, only that whole messages
/// cross the bus, and JSON keeps captured traffic readable when a test
/// fails.
#[derive(Clone, Copy, Default)]
pub struct MockWire;

impl WireCodec for MockWire {
    fn encode(&self, message: &DnsMessage) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(message).map_err(|err| CodecError::Unencodable(err.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<DnsMessage, CodecError> {
        serde_json::from_slice(payload).map_err(|err| CodecError::Malformed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dotlocal_responder::{DnsQuestion, DomainName, RecordType};

    #[test]
    fn test_roundtrip() {
        let mut message = DnsMessage::query();
        message.questions.push(DnsQuestion {
            name: DomainName::parse("_http._tcp.local").unwrap(),
            qtype: RecordType::Ptr,
            unicast_response: false,
        });
        let codec = MockWire;
        let bytes = codec.encode(&message).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = MockWire.decode(b"{not json").unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }
}
