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

//! Advertised DNS-SD services
//!
//! One [`Service`] is one advertised record set: the PTR under its
//! service type, the SRV/TXT under its instance name, and a probe state
//! machine defending that instance name. Services are owned by the host
//! and addressed through [`ServiceHandle`]s.
//!
//! TXT items can be fixed (`set_txt`) or produced on the fly by a
//! callback each time the record is built; the callback's items are
//! discarded again afterwards, so values like an uptime counter stay
//! fresh without bookkeeping.

use std::fmt;

use crate::consts::LOCAL_TLD;
use crate::name::{validate_label, DomainName, NameError};
use crate::probe::ProbeState;
use crate::record::{DnsRecord, RecordData};

/// Transport protocol half of a service type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// The DNS-SD label, underscore included.
    pub const fn label(self) -> &'static str {
        match self {
            Protocol::Tcp => "_tcp",
            Protocol::Udp => "_udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Opaque handle to a service registered with a host.
///
/// Stays valid until the service is removed; never reused afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle(pub(crate) u32);

/// One `key=value` TXT item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTxt {
    key: String,
    value: String,
}

impl ServiceTxt {
    /// # Errors
    ///
    /// Returns `ServiceError::InvalidTxt` for an empty key, a key
    /// containing `=`, or an item exceeding the 255-byte TXT bound.
    pub fn new(key: &str, value: &str) -> Result<Self, ServiceError> {
        if key.is_empty() {
            return Err(ServiceError::InvalidTxt("empty key"));
        }
        if key.contains('=') {
            return Err(ServiceError::InvalidTxt("key contains '='"));
        }
        if key.len() + 1 + value.len() > 255 {
            return Err(ServiceError::InvalidTxt("item exceeds 255 bytes"));
        }
        Ok(Self {
            key: key.to_owned(),
            value: value.to_owned(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// The wire string: `key=value`, or just `key` for an empty value.
    pub fn text(&self) -> String {
        if self.value.is_empty() {
            self.key.clone()
        } else {
            format!("{}={}", self.key, self.value)
        }
    }
}

/// Sink the dynamic-TXT callback writes into.
#[derive(Default)]
pub struct TxtCollector {
    items: Vec<ServiceTxt>,
}

impl TxtCollector {
    /// Add one temporary TXT item for the record being built.
    ///
    /// # Errors
    ///
    /// Same validation as [`ServiceTxt::new`].
    pub fn add(&mut self, key: &str, value: &str) -> Result<(), ServiceError> {
        self.items.push(ServiceTxt::new(key, value)?);
        Ok(())
    }
}

/// Callback collecting per-build TXT items, for values that change
/// between announcements.
pub type TxtCallback = Box<dyn FnMut(&mut TxtCollector)>;

/// One advertised service.
pub struct Service {
    instance_name: String,
    service_type: String,
    protocol: Protocol,
    port: u16,
    auto_name: bool,
    txts: Vec<ServiceTxt>,
    txt_callback: Option<TxtCallback>,
    pub(crate) probe: ProbeState,
}

impl Service {
    /// Create a service; the host resolves `instance_name` beforehand
    /// (explicit, default instance name, or hostname).
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::InvalidServiceType` for an empty type,
    /// `ServiceError::InvalidPort` for port zero, and a wrapped
    /// `NameError` when the instance label is out of bounds.
    pub(crate) fn new(
        instance_name: &str,
        service_type: &str,
        protocol: Protocol,
        port: u16,
        auto_name: bool,
    ) -> Result<Self, ServiceError> {
        let service_type = normalize_service_type(service_type)?;
        validate_label(instance_name)?;
        if port == 0 {
            return Err(ServiceError::InvalidPort);
        }
        Ok(Self {
            instance_name: instance_name.to_owned(),
            service_type,
            protocol,
            port,
            auto_name,
            txts: Vec::new(),
            txt_callback: None,
            probe: ProbeState::new(),
        })
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Normalized type label, underscore included (`_http`).
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// True when the instance name tracks the hostname (or the default
    /// instance name) instead of being caller-chosen.
    pub fn auto_named(&self) -> bool {
        self.auto_name
    }

    pub(crate) fn set_instance_name(&mut self, name: &str) -> Result<(), NameError> {
        validate_label(name)?;
        self.instance_name = name.to_owned();
        Ok(())
    }

    /// True when this service is the `(instance, type, protocol, port)`
    /// tuple, with `port` optionally wildcarded.
    pub fn matches(
        &self,
        instance_name: &str,
        service_type: &str,
        protocol: Protocol,
        port: Option<u16>,
    ) -> bool {
        self.instance_name.eq_ignore_ascii_case(instance_name)
            && normalize_service_type(service_type)
                .map(|ty| ty == self.service_type)
                .unwrap_or(false)
            && self.protocol == protocol
            && port.map(|p| p == self.port).unwrap_or(true)
    }

    /// Add or replace the TXT item with this key.
    ///
    /// # Errors
    ///
    /// Same validation as [`ServiceTxt::new`].
    pub fn set_txt(&mut self, key: &str, value: &str) -> Result<(), ServiceError> {
        let item = ServiceTxt::new(key, value)?;
        match self.txts.iter_mut().find(|t| t.key == item.key) {
            Some(existing) => *existing = item,
            None => self.txts.push(item),
        }
        Ok(())
    }

    /// Remove the TXT item with this key; reports whether it existed.
    pub fn remove_txt(&mut self, key: &str) -> bool {
        let before = self.txts.len();
        self.txts.retain(|t| t.key != key);
        self.txts.len() != before
    }

    pub fn clear_txts(&mut self) {
        self.txts.clear();
    }

    pub fn txts(&self) -> &[ServiceTxt] {
        &self.txts
    }

    /// Install or remove the dynamic-TXT callback.
    pub fn set_txt_callback(&mut self, callback: Option<TxtCallback>) {
        self.txt_callback = callback;
    }

    /// `_type._proto.local`
    pub fn service_domain(&self) -> DomainName {
        DomainName::from_validated_labels(vec![
            self.service_type.clone(),
            self.protocol.label().to_owned(),
            LOCAL_TLD.to_owned(),
        ])
    }

    /// `instance._type._proto.local`
    pub fn instance_domain(&self) -> DomainName {
        DomainName::from_validated_labels(vec![
            self.instance_name.clone(),
            self.service_type.clone(),
            self.protocol.label().to_owned(),
            LOCAL_TLD.to_owned(),
        ])
    }

    /// The shared PTR record pointing the service type at this instance.
    pub(crate) fn ptr_record(&self, ttl: u32) -> DnsRecord {
        DnsRecord {
            name: self.service_domain(),
            ttl,
            // PTR names are shared between instances, never unique.
            cache_flush: false,
            data: RecordData::Ptr(self.instance_domain()),
        }
    }

    /// The SRV record locating this instance on `host_domain`.
    pub(crate) fn srv_record(&self, host_domain: &DomainName, ttl: u32) -> DnsRecord {
        DnsRecord {
            name: self.instance_domain(),
            ttl,
            cache_flush: true,
            data: RecordData::Srv {
                priority: 0,
                weight: 0,
                port: self.port,
                target: host_domain.clone(),
            },
        }
    }

    /// The TXT record for this instance: fixed items plus whatever the
    /// dynamic callback contributes for this one build.
    pub(crate) fn txt_record(&mut self, ttl: u32) -> DnsRecord {
        let mut strings: Vec<String> = self.txts.iter().map(ServiceTxt::text).collect();
        if let Some(mut callback) = self.txt_callback.take() {
            let mut collector = TxtCollector::default();
            callback(&mut collector);
            strings.extend(collector.items.iter().map(ServiceTxt::text));
            self.txt_callback = Some(callback);
        }
        DnsRecord {
            name: self.instance_domain(),
            ttl,
            cache_flush: true,
            data: RecordData::Txt(strings),
        }
    }

    /// Rdata of every record probing claims for the instance name, the
    /// set the conflict tie-break compares.
    pub(crate) fn claimed_rdata(&mut self, host_domain: &DomainName) -> Vec<RecordData> {
        vec![
            self.srv_record(host_domain, 0).data,
            self.txt_record(0).data,
        ]
    }
}

/// Lowercase the type and ensure the leading underscore, so `HTTP` and
/// `_http` both come out as `_http`.
pub(crate) fn normalize_service_type(service_type: &str) -> Result<String, ServiceError> {
    let trimmed = service_type.trim();
    if trimmed.is_empty() || trimmed == "_" {
        return Err(ServiceError::InvalidServiceType);
    }
    let lowered = trimmed.to_ascii_lowercase();
    let labeled = if lowered.starts_with('_') {
        lowered
    } else {
        format!("_{lowered}")
    };
    validate_label(&labeled)?;
    Ok(labeled)
}

/// Errors from service registration and TXT management
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Service type is empty
    #[error("invalid service type")]
    InvalidServiceType,

    /// Port zero is not advertisable
    #[error("invalid port 0")]
    InvalidPort,

    /// TXT item failed validation
    #[error("invalid TXT item: {0}")]
    InvalidTxt(&'static str),

    /// Instance or type label out of DNS bounds
    #[error(transparent)]
    Name(#[from] NameError),
}
