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

//! The top-level responder for one host on one network interface.
//!
//! A [`Host`] owns a hostname, the services published under it and the
//! queries it is resolving, and wires them to a shared [`Backbone`] for
//! multicast I/O. Everything runs cooperatively from [`Host::update`]:
//! each call drains inbound packets, reacts to interface changes, steps
//! the probe machines and refreshes the query cache. Nothing happens
//! between calls, so a caller that stops ticking gets a responder that
//! is merely paused, not broken.
//!
//! # Lifecycle
//!
//! ```text
//! new -> begin -> { add_service / query / update ... } -> close
//! ```
//!
//! [`Host::begin`] registers with the backbone (opening the socket and
//! joining the multicast groups if this is the first host) and starts
//! probing for the hostname. [`Host::close`] sends goodbye records for
//! everything that was claimed and releases the backbone slot.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::rc::Rc;

use crate::backbone::{Backbone, HostId};
use crate::clock::{Clock, Timeout};
use crate::consts::{
    HOST_TTL_SECS, LOCAL_TLD, NAME_DIVIDER, SERVICE_TTL_SECS,
};
use crate::name::{index_name, validate_label, DomainName, NameError};
use crate::net::{CodecError, IfaceState, NetInterface, TransportError, WireCodec};
use crate::probe::{ProbeCallback, ProbeState, ProbeStatus, ProbeTask};
use crate::query::{
    Answer, AnswerCallback, AnswerEvent, Query, QueryCallback, QueryHandle, QueryType,
};
use crate::record::{
    tiebreak, DnsMessage, DnsQuestion, DnsRecord, RecordData, RecordType, Tiebreak,
};
use crate::service::{
    normalize_service_type, Protocol, Service, ServiceError, ServiceHandle, TxtCallback,
};

/// Errors surfaced by [`Host`] operations.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The operation needs a running host; call [`Host::begin`] first.
    #[error("host is not running")]
    NotRunning,
    /// [`Host::begin`] was called while the host is already running.
    #[error("host is already running")]
    AlreadyRunning,
    /// A caller-supplied argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The service handle does not name a registered service.
    #[error("unknown service handle")]
    UnknownService,
    /// The query handle does not name an installed query.
    #[error("unknown query handle")]
    UnknownQuery,
    /// An installed query could not put its first question on the wire.
    #[error("query could not be sent")]
    QuerySendFailed,
    /// A name was rejected by label or length validation.
    #[error(transparent)]
    Name(#[from] NameError),
    /// A service definition was rejected.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// The transport failed underneath us.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A message could not be encoded for the wire.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

struct ServiceEntry {
    handle: ServiceHandle,
    service: Service,
}

struct QueryEntry {
    handle: QueryHandle,
    query: Query,
}

/// One mDNS responder plus resolver bound to a single interface.
///
/// All collaborators are trait objects handed in at construction, so the
/// same `Host` runs against real sockets in production and scripted
/// doubles in tests.
pub struct Host {
    backbone: Rc<Backbone>,
    iface: Rc<dyn NetInterface>,
    codec: Rc<dyn WireCodec>,
    clock: Rc<dyn Clock>,
    backbone_id: Option<HostId>,
    hostname: String,
    default_instance: Option<String>,
    iface_state: IfaceState,
    last_v4: Option<Ipv4Addr>,
    last_v6: Option<Ipv6Addr>,
    probe: ProbeState,
    services: Vec<ServiceEntry>,
    next_service_id: u32,
    queries: Vec<QueryEntry>,
    next_query_id: u32,
}

impl Host {
    /// Creates an idle host. Nothing touches the network until
    /// [`Host::begin`].
    pub fn new(
        backbone: Rc<Backbone>,
        iface: Rc<dyn NetInterface>,
        codec: Rc<dyn WireCodec>,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Host {
            backbone,
            iface,
            codec,
            clock,
            backbone_id: None,
            hostname: String::new(),
            default_instance: None,
            iface_state: IfaceState::default(),
            last_v4: None,
            last_v6: None,
            probe: ProbeState::new(),
            services: Vec::new(),
            next_service_id: 0,
            queries: Vec::new(),
            next_query_id: 0,
        }
    }

    /// Starts the responder under `hostname` (a single label; `.local`
    /// is appended on the wire).
    ///
    /// Registers with the backbone, which opens the shared socket if
    /// this is the first running host, and schedules probing for the
    /// name. The claim is not usable until probing completes; watch
    /// [`Host::probe_status`] or install a probe callback.
    ///
    /// # Errors
    ///
    /// [`HostError::AlreadyRunning`] if `begin` was already called,
    /// [`HostError::Name`] if the label is invalid, or
    /// [`HostError::Transport`] if the shared socket could not be
    /// opened. On error the host is left idle and unchanged.
    pub fn begin(&mut self, hostname: &str) -> Result<(), HostError> {
        if self.running() {
            return Err(HostError::AlreadyRunning);
        }
        validate_label(hostname)?;
        let id = self.backbone.register()?;
        self.backbone_id = Some(id);
        self.hostname = hostname.to_owned();
        self.iface_state = IfaceState::default();
        self.last_v4 = None;
        self.last_v6 = None;
        self.probe.request_start();
        log::info!("host '{}.{}' starting", hostname, LOCAL_TLD);
        Ok(())
    }

    /// Stops the responder.
    ///
    /// Sends goodbye records (TTL zero) for the hostname and every
    /// service whose claim had completed, drops all services and
    /// queries, and releases the backbone slot (closing the shared
    /// socket if this was the last host). Best effort: send failures
    /// are logged, never surfaced. Idempotent.
    pub fn close(&mut self) {
        let Some(id) = self.backbone_id else {
            return;
        };
        let handles: Vec<ServiceHandle> = self.services.iter().map(|e| e.handle).collect();
        for handle in handles {
            self.send_service_goodbye(handle);
        }
        self.send_host_goodbye();
        self.backbone.unregister(id);
        self.backbone_id = None;
        self.probe.clear();
        self.services.clear();
        self.queries.clear();
        log::info!("host '{}.{}' closed", self.hostname, LOCAL_TLD);
    }

    /// The current hostname label. Reflects conflict renames.
    pub fn host_name(&self) -> &str {
        &self.hostname
    }

    /// Replaces the hostname and, if the host is running, restarts
    /// probing for the new name. Services that were named automatically
    /// follow along unless a default instance name is set.
    ///
    /// Setting the name the host already has is a no-op.
    ///
    /// # Errors
    ///
    /// [`HostError::Name`] if the label is invalid; the old name stays.
    pub fn set_host_name(&mut self, hostname: &str) -> Result<(), HostError> {
        validate_label(hostname)?;
        if self.hostname.eq_ignore_ascii_case(hostname) {
            return Ok(());
        }
        self.hostname = hostname.to_owned();
        if self.default_instance.is_none() {
            self.propagate_auto_names();
        }
        // Every SRV record targets the hostname, so all claims restart.
        if self.running() {
            self.restart_probes();
        }
        Ok(())
    }

    /// The instance name used for services added without an explicit
    /// one, or `None` when the hostname doubles as that default.
    pub fn default_instance_name(&self) -> Option<&str> {
        self.default_instance.as_deref()
    }

    /// Sets (or with `None` clears) the default instance name and
    /// renames automatically named services to match.
    ///
    /// # Errors
    ///
    /// [`HostError::Name`] if the label is invalid.
    pub fn set_default_instance_name(&mut self, name: Option<&str>) -> Result<(), HostError> {
        if let Some(name) = name {
            validate_label(name)?;
        }
        self.default_instance = name.map(str::to_owned);
        self.propagate_auto_names();
        Ok(())
    }

    /// True once the hostname claim has fully completed (probing and
    /// announcing both done).
    pub fn probe_status(&self) -> bool {
        self.probe.status() == ProbeStatus::DoneFinally
    }

    /// The raw phase of the hostname probe machine. Mostly useful in
    /// tests and diagnostics; [`Host::probe_status`] answers the common
    /// question.
    pub fn probe_phase(&self) -> ProbeStatus {
        self.probe.status()
    }

    /// Installs a callback fired when the hostname claim completes
    /// (`claimed == true`) or the name is lost to a conflict and
    /// replaced (`claimed == false`, with the new name).
    pub fn set_probe_callback(&mut self, callback: Option<ProbeCallback>) {
        self.probe.set_callback(callback);
    }

    /// Publishes a service under this host.
    ///
    /// With `instance_name == None` the service is named automatically
    /// after the default instance name, or the hostname when no default
    /// is set, and it follows future renames of that source. Adding a
    /// service that matches an existing one (same instance, type,
    /// protocol and port) returns the existing handle instead of
    /// probing twice.
    ///
    /// # Errors
    ///
    /// [`HostError::NotRunning`] before [`Host::begin`], or
    /// [`HostError::Service`] when the definition is invalid.
    pub fn add_service(
        &mut self,
        instance_name: Option<&str>,
        service_type: &str,
        protocol: Protocol,
        port: u16,
    ) -> Result<ServiceHandle, HostError> {
        if !self.running() {
            return Err(HostError::NotRunning);
        }
        let auto_name = instance_name.is_none();
        let instance = match instance_name {
            Some(name) => name.to_owned(),
            None => self
                .default_instance
                .clone()
                .unwrap_or_else(|| self.hostname.clone()),
        };
        if let Some(handle) = self.find_service(&instance, service_type, protocol, Some(port)) {
            log::debug!(
                "service '{}' {}.{} already registered, reusing handle",
                instance,
                service_type,
                protocol
            );
            return Ok(handle);
        }
        let mut service = Service::new(&instance, service_type, protocol, port, auto_name)?;
        service.probe.request_start();
        self.next_service_id += 1;
        let handle = ServiceHandle(self.next_service_id);
        log::info!("adding service '{}'", service.instance_domain());
        self.services.push(ServiceEntry { handle, service });
        Ok(handle)
    }

    /// Unpublishes a service, sending a goodbye for it first when its
    /// claim had completed.
    ///
    /// # Errors
    ///
    /// [`HostError::UnknownService`] for a stale handle.
    pub fn remove_service(&mut self, handle: ServiceHandle) -> Result<(), HostError> {
        let idx = self
            .service_index(handle)
            .ok_or(HostError::UnknownService)?;
        self.send_service_goodbye(handle);
        let entry = self.services.remove(idx);
        log::info!("removed service '{}'", entry.service.instance_domain());
        Ok(())
    }

    /// Looks up a registered service by its identifying tuple. A `None`
    /// port matches any port.
    pub fn find_service(
        &self,
        instance_name: &str,
        service_type: &str,
        protocol: Protocol,
        port: Option<u16>,
    ) -> Option<ServiceHandle> {
        self.services
            .iter()
            .find(|e| e.service.matches(instance_name, service_type, protocol, port))
            .map(|e| e.handle)
    }

    /// Handles of all registered services.
    pub fn services(&self) -> Vec<ServiceHandle> {
        self.services.iter().map(|e| e.handle).collect()
    }

    /// Borrows a service for inspection.
    pub fn service(&self, handle: ServiceHandle) -> Option<&Service> {
        let idx = self.service_index(handle)?;
        Some(&self.services[idx].service)
    }

    /// Borrows a service mutably, e.g. to edit its TXT items.
    pub fn service_mut(&mut self, handle: ServiceHandle) -> Option<&mut Service> {
        let idx = self.service_index(handle)?;
        Some(&mut self.services[idx].service)
    }

    /// True once the service's claim has fully completed.
    ///
    /// # Errors
    ///
    /// [`HostError::UnknownService`] for a stale handle.
    pub fn service_probe_status(&self, handle: ServiceHandle) -> Result<bool, HostError> {
        let idx = self
            .service_index(handle)
            .ok_or(HostError::UnknownService)?;
        Ok(self.services[idx].service.probe.status() == ProbeStatus::DoneFinally)
    }

    /// The raw phase of one service's probe machine.
    ///
    /// # Errors
    ///
    /// [`HostError::UnknownService`] for a stale handle.
    pub fn service_probe_phase(&self, handle: ServiceHandle) -> Result<ProbeStatus, HostError> {
        let idx = self
            .service_index(handle)
            .ok_or(HostError::UnknownService)?;
        Ok(self.services[idx].service.probe.status())
    }

    /// Installs a claim/rename callback on one service, mirroring
    /// [`Host::set_probe_callback`].
    ///
    /// # Errors
    ///
    /// [`HostError::UnknownService`] for a stale handle.
    pub fn set_service_probe_callback(
        &mut self,
        handle: ServiceHandle,
        callback: Option<ProbeCallback>,
    ) -> Result<(), HostError> {
        let idx = self
            .service_index(handle)
            .ok_or(HostError::UnknownService)?;
        self.services[idx].service.probe.set_callback(callback);
        Ok(())
    }

    /// Replaces a service's dynamic TXT callback.
    ///
    /// # Errors
    ///
    /// [`HostError::UnknownService`] for a stale handle.
    pub fn set_service_txt_callback(
        &mut self,
        handle: ServiceHandle,
        callback: Option<TxtCallback>,
    ) -> Result<(), HostError> {
        let idx = self
            .service_index(handle)
            .ok_or(HostError::UnknownService)?;
        self.services[idx].service.set_txt_callback(callback);
        Ok(())
    }

    /// Resolves services of one type, blocking until `timeout_ms` has
    /// elapsed, and returns whatever answers arrived. An empty result
    /// after the full timeout means nobody answered; a send failure
    /// also yields an empty result rather than an error. No query state
    /// is left behind either way.
    ///
    /// Inbound traffic keeps being processed while waiting, so probes
    /// of this very host are not starved.
    ///
    /// # Errors
    ///
    /// [`HostError::NotRunning`] before [`Host::begin`],
    /// [`HostError::InvalidArgument`] for a zero timeout, or
    /// [`HostError::Service`] for an invalid service type.
    pub fn query_service(
        &mut self,
        service_type: &str,
        protocol: Protocol,
        timeout_ms: u64,
    ) -> Result<Vec<Answer>, HostError> {
        if !self.running() {
            return Err(HostError::NotRunning);
        }
        if timeout_ms == 0 {
            return Err(HostError::InvalidArgument("timeout must be nonzero"));
        }
        let domain = service_query_domain(service_type, protocol)?;
        log::debug!("static query for '{}' ({} ms)", domain, timeout_ms);
        let query = Query::new(QueryType::Service, domain, true);
        Ok(self.run_static_query(query, timeout_ms))
    }

    /// Resolves one `<label>.local` hostname, blocking like
    /// [`Host::query_service`].
    ///
    /// # Errors
    ///
    /// [`HostError::NotRunning`] before [`Host::begin`],
    /// [`HostError::InvalidArgument`] for an empty name or zero
    /// timeout, or [`HostError::Name`] for an invalid label.
    pub fn query_host(
        &mut self,
        hostname: &str,
        timeout_ms: u64,
    ) -> Result<Vec<Answer>, HostError> {
        if !self.running() {
            return Err(HostError::NotRunning);
        }
        if hostname.is_empty() {
            return Err(HostError::InvalidArgument("hostname must be nonempty"));
        }
        if timeout_ms == 0 {
            return Err(HostError::InvalidArgument("timeout must be nonzero"));
        }
        validate_label(hostname)?;
        let domain = host_query_domain(hostname);
        log::debug!("static query for '{}' ({} ms)", domain, timeout_ms);
        let query = Query::new(QueryType::Host, domain, true);
        Ok(self.run_static_query(query, timeout_ms))
    }

    /// Installs a long-lived service query. The first question goes out
    /// immediately and is re-asked with doubling intervals; answers
    /// accumulate in a cache readable via [`Host::query_answers`].
    ///
    /// `on_answer` fires once per newly added answer, `on_update` fires
    /// with the whole cache at the same moment. Both are optional and
    /// independent.
    ///
    /// # Errors
    ///
    /// [`HostError::NotRunning`] before [`Host::begin`],
    /// [`HostError::Service`] for an invalid type, or
    /// [`HostError::QuerySendFailed`] when the first question could not
    /// be sent (nothing is installed then).
    pub fn install_service_query(
        &mut self,
        service_type: &str,
        protocol: Protocol,
        on_answer: Option<AnswerCallback>,
        on_update: Option<QueryCallback>,
    ) -> Result<QueryHandle, HostError> {
        if !self.running() {
            return Err(HostError::NotRunning);
        }
        let domain = service_query_domain(service_type, protocol)?;
        let mut query = Query::new(QueryType::Service, domain, false);
        query.set_callbacks(on_answer, on_update);
        self.install_query(query)
    }

    /// Installs a long-lived hostname query, mirroring
    /// [`Host::install_service_query`].
    ///
    /// # Errors
    ///
    /// As for [`Host::install_service_query`], with
    /// [`HostError::Name`] / [`HostError::InvalidArgument`] for bad
    /// names.
    pub fn install_host_query(
        &mut self,
        hostname: &str,
        on_answer: Option<AnswerCallback>,
        on_update: Option<QueryCallback>,
    ) -> Result<QueryHandle, HostError> {
        if !self.running() {
            return Err(HostError::NotRunning);
        }
        if hostname.is_empty() {
            return Err(HostError::InvalidArgument("hostname must be nonempty"));
        }
        validate_label(hostname)?;
        let mut query = Query::new(QueryType::Host, host_query_domain(hostname), false);
        query.set_callbacks(on_answer, on_update);
        self.install_query(query)
    }

    /// Uninstalls a long-lived query and drops its cached answers.
    ///
    /// # Errors
    ///
    /// [`HostError::UnknownQuery`] for a stale handle.
    pub fn remove_query(&mut self, handle: QueryHandle) -> Result<(), HostError> {
        let idx = self.query_index(handle).ok_or(HostError::UnknownQuery)?;
        let entry = self.queries.remove(idx);
        log::debug!("removed query for '{}'", entry.query.domain());
        Ok(())
    }

    /// Handles of all installed queries.
    pub fn queries(&self) -> Vec<QueryHandle> {
        self.queries.iter().map(|e| e.handle).collect()
    }

    /// The current answer cache of one installed query.
    ///
    /// # Errors
    ///
    /// [`HostError::UnknownQuery`] for a stale handle.
    pub fn query_answers(&self, handle: QueryHandle) -> Result<&[Answer], HostError> {
        let idx = self.query_index(handle).ok_or(HostError::UnknownQuery)?;
        Ok(self.queries[idx].query.answers())
    }

    /// Runs one cooperative tick: drain inbound packets, track the
    /// interface, step every probe machine, expire cached answers and
    /// re-ask due queries.
    ///
    /// Returns whether the interface is currently operational (link up
    /// with at least one address). While it is not, probe machines hold
    /// their pending start and nothing is sent.
    pub fn update(&mut self) -> bool {
        if !self.running() {
            return false;
        }
        self.pump_and_route(0);
        let operational = self.check_iface_state();
        if operational {
            self.advance_probes();
            self.check_query_cache();
            self.resend_due_queries();
        }
        operational
    }

    /// Re-announces the hostname (and with `include_services` every
    /// service) without re-probing. Useful after records changed, e.g.
    /// TXT edits.
    ///
    /// # Errors
    ///
    /// [`HostError::NotRunning`] before [`Host::begin`].
    pub fn announce(&mut self, include_services: bool) -> Result<(), HostError> {
        if !self.running() {
            return Err(HostError::NotRunning);
        }
        self.probe.reannounce(&*self.clock);
        if include_services {
            for entry in self.services.iter_mut() {
                entry.service.probe.reannounce(&*self.clock);
            }
        }
        Ok(())
    }

    /// Re-announces a single service without re-probing.
    ///
    /// # Errors
    ///
    /// [`HostError::NotRunning`] or [`HostError::UnknownService`].
    pub fn announce_service(&mut self, handle: ServiceHandle) -> Result<(), HostError> {
        if !self.running() {
            return Err(HostError::NotRunning);
        }
        let idx = self
            .service_index(handle)
            .ok_or(HostError::UnknownService)?;
        self.services[idx].service.probe.reannounce(&*self.clock);
        Ok(())
    }

    /// Restarts probing for the hostname and every service, as after an
    /// interface change.
    ///
    /// # Errors
    ///
    /// [`HostError::NotRunning`] before [`Host::begin`].
    pub fn restart(&mut self) -> Result<(), HostError> {
        if !self.running() {
            return Err(HostError::NotRunning);
        }
        self.restart_probes();
        Ok(())
    }

    fn running(&self) -> bool {
        self.backbone_id.is_some()
    }

    fn service_index(&self, handle: ServiceHandle) -> Option<usize> {
        self.services.iter().position(|e| e.handle == handle)
    }

    fn query_index(&self, handle: QueryHandle) -> Option<usize> {
        self.queries.iter().position(|e| e.handle == handle)
    }

    fn host_domain(&self) -> DomainName {
        DomainName::from_validated_labels(vec![self.hostname.clone(), LOCAL_TLD.to_owned()])
    }

    /// A/AAAA records for this host with the interface's current
    /// addresses. Empty when the interface has none.
    fn host_records(&self, ttl: u32) -> Vec<DnsRecord> {
        let domain = self.host_domain();
        let mut records = Vec::new();
        if let Some(addr) = self.iface.ipv4_addr() {
            records.push(DnsRecord {
                name: domain.clone(),
                ttl,
                cache_flush: true,
                data: RecordData::A(addr),
            });
        }
        if let Some(addr) = self.iface.ipv6_addr() {
            records.push(DnsRecord {
                name: domain,
                ttl,
                cache_flush: true,
                data: RecordData::Aaaa(addr),
            });
        }
        records
    }

    fn host_claimed_rdata(&self) -> Vec<RecordData> {
        self.host_records(HOST_TTL_SECS)
            .into_iter()
            .map(|r| r.data)
            .collect()
    }

    fn send_message(&self, message: &DnsMessage) -> Result<(), HostError> {
        let payload = self.codec.encode(message)?;
        self.backbone.send(&payload)?;
        Ok(())
    }

    /// Samples the interface and restarts all probes on a link change
    /// or, while the link is up, on any address change. One restart per
    /// tick at most.
    fn check_iface_state(&mut self) -> bool {
        let state = IfaceState::sample(&*self.iface);
        let v4 = self.iface.ipv4_addr();
        let v6 = self.iface.ipv6_addr();
        let link_changed = state.link_changed(self.iface_state);
        let addr_changed = state.ip_changed(self.iface_state)
            || v4 != self.last_v4
            || v6 != self.last_v6;
        if link_changed {
            log::info!(
                "interface link changed ({:#06b} -> {:#06b}), restarting probes",
                self.iface_state.bits(),
                state.bits()
            );
            self.restart_probes();
        } else if state.bits() & IfaceState::LINK != 0 && addr_changed {
            log::info!("interface addresses changed, restarting probes");
            self.restart_probes();
        }
        self.iface_state = state;
        self.last_v4 = v4;
        self.last_v6 = v6;
        state.operational()
    }

    fn restart_probes(&mut self) {
        self.probe.request_start();
        for entry in self.services.iter_mut() {
            entry.service.probe.request_start();
        }
    }

    /// Renames automatically named services after the hostname or the
    /// default instance name changed.
    fn propagate_auto_names(&mut self) {
        let effective = self
            .default_instance
            .clone()
            .unwrap_or_else(|| self.hostname.clone());
        if effective.is_empty() {
            return;
        }
        let running = self.running();
        for entry in self.services.iter_mut() {
            if !entry.service.auto_named()
                || entry.service.instance_name().eq_ignore_ascii_case(&effective)
            {
                continue;
            }
            if let Err(err) = entry.service.set_instance_name(&effective) {
                log::error!("cannot rename service to '{}': {}", effective, err);
                continue;
            }
            if running {
                entry.service.probe.request_start();
            }
        }
    }

    fn advance_probes(&mut self) {
        for task in self.probe.advance(&*self.clock) {
            match task {
                ProbeTask::SendProbe => self.send_host_probe(),
                ProbeTask::Claimed => {
                    let name = self.hostname.clone();
                    log::info!("claimed hostname '{}.{}'", name, LOCAL_TLD);
                    self.probe.fire_callback(&name, true);
                }
                ProbeTask::SendAnnounce => self.send_host_announce(),
            }
        }
        let host_done = self.probe.is_done();
        let handles: Vec<ServiceHandle> = self.services.iter().map(|e| e.handle).collect();
        for handle in handles {
            let Some(idx) = self.service_index(handle) else {
                continue;
            };
            // A service probe proposes an SRV record pointing at the
            // hostname, so it stays pending until that name is claimed.
            if self.services[idx].service.probe.status() == ProbeStatus::ReadyToStart && !host_done
            {
                continue;
            }
            for task in self.services[idx].service.probe.advance(&*self.clock) {
                match task {
                    ProbeTask::SendProbe => self.send_service_probe(handle),
                    ProbeTask::Claimed => self.fire_service_claimed(handle),
                    ProbeTask::SendAnnounce => self.send_service_announce(handle),
                }
            }
        }
    }

    fn fire_service_claimed(&mut self, handle: ServiceHandle) {
        let Some(idx) = self.service_index(handle) else {
            return;
        };
        let name = self.services[idx].service.instance_name().to_owned();
        log::info!(
            "claimed service '{}'",
            self.services[idx].service.instance_domain()
        );
        self.services[idx].service.probe.fire_callback(&name, true);
    }

    fn send_host_probe(&mut self) {
        let mut message = DnsMessage::query();
        message.questions.push(DnsQuestion {
            name: self.host_domain(),
            qtype: RecordType::Any,
            unicast_response: true,
        });
        message.authorities = self.host_records(HOST_TTL_SECS);
        // Proposed records in the authority section never carry the
        // cache-flush bit; the name is not ours yet.
        for record in message.authorities.iter_mut() {
            record.cache_flush = false;
        }
        log::debug!("probing for '{}'", self.host_domain());
        if let Err(err) = self.send_message(&message) {
            log::warn!("host probe send failed: {}", err);
            self.probe.retry_last_send(&*self.clock);
        }
    }

    fn send_host_announce(&mut self) {
        let mut message = DnsMessage::response();
        message.answers = self.host_records(HOST_TTL_SECS);
        if message.answers.is_empty() {
            return;
        }
        log::debug!("announcing '{}'", self.host_domain());
        if let Err(err) = self.send_message(&message) {
            log::warn!("host announce send failed: {}", err);
            self.probe.retry_last_send(&*self.clock);
        }
    }

    fn send_host_goodbye(&mut self) {
        if !self.probe.is_done() {
            return;
        }
        let mut message = DnsMessage::response();
        message.answers = self.host_records(0);
        if message.answers.is_empty() {
            return;
        }
        if let Err(err) = self.send_message(&message) {
            log::warn!("host goodbye send failed: {}", err);
        }
    }

    fn send_service_probe(&mut self, handle: ServiceHandle) {
        let Some(idx) = self.service_index(handle) else {
            return;
        };
        let host_domain = self.host_domain();
        let (name, srv, txt) = {
            let service = &mut self.services[idx].service;
            (
                service.instance_domain(),
                service.srv_record(&host_domain, SERVICE_TTL_SECS),
                service.txt_record(SERVICE_TTL_SECS),
            )
        };
        let mut message = DnsMessage::query();
        log::debug!("probing for '{}'", name);
        message.questions.push(DnsQuestion {
            name,
            qtype: RecordType::Any,
            unicast_response: true,
        });
        message.authorities.push(srv);
        message.authorities.push(txt);
        for record in message.authorities.iter_mut() {
            record.cache_flush = false;
        }
        if let Err(err) = self.send_message(&message) {
            log::warn!("service probe send failed: {}", err);
            self.services[idx].service.probe.retry_last_send(&*self.clock);
        }
    }

    fn send_service_announce(&mut self, handle: ServiceHandle) {
        let Some(idx) = self.service_index(handle) else {
            return;
        };
        let host_domain = self.host_domain();
        let mut message = DnsMessage::response();
        {
            let service = &mut self.services[idx].service;
            message.answers.push(service.ptr_record(SERVICE_TTL_SECS));
            message
                .answers
                .push(service.srv_record(&host_domain, SERVICE_TTL_SECS));
            message.answers.push(service.txt_record(SERVICE_TTL_SECS));
        }
        message.additionals = self.host_records(HOST_TTL_SECS);
        log::debug!(
            "announcing '{}'",
            self.services[idx].service.instance_domain()
        );
        if let Err(err) = self.send_message(&message) {
            log::warn!("service announce send failed: {}", err);
            self.services[idx].service.probe.retry_last_send(&*self.clock);
        }
    }

    fn send_service_goodbye(&mut self, handle: ServiceHandle) {
        let Some(idx) = self.service_index(handle) else {
            return;
        };
        if !self.services[idx].service.probe.is_done() {
            return;
        }
        let host_domain = self.host_domain();
        let mut message = DnsMessage::response();
        {
            let service = &mut self.services[idx].service;
            message.answers.push(service.ptr_record(0));
            message.answers.push(service.srv_record(&host_domain, 0));
            message.answers.push(service.txt_record(0));
        }
        if let Err(err) = self.send_message(&message) {
            log::warn!("service goodbye send failed: {}", err);
        }
    }

    /// Drains the backbone queue, decoding and routing every datagram.
    /// With a nonzero timeout the backbone may block once for inbound
    /// traffic.
    fn pump_and_route(&mut self, timeout_ms: u64) {
        let Some(id) = self.backbone_id else {
            return;
        };
        self.backbone.pump(timeout_ms);
        let datagrams = self.backbone.drain(id);
        for payload in datagrams {
            match self.codec.decode(&payload) {
                Ok(message) => self.route_message(message),
                Err(err) => log::debug!("dropping undecodable datagram: {}", err),
            }
        }
    }

    fn route_message(&mut self, message: DnsMessage) {
        if message.is_response {
            self.handle_response(message);
        } else {
            self.handle_query(message);
        }
    }

    /// Responses feed two consumers: the conflict detectors of our own
    /// names, and the answer caches of installed queries. Additionals
    /// count as answers for the caches (responders put SRV/TXT/address
    /// records there) but not for conflicts.
    fn handle_response(&mut self, message: DnsMessage) {
        self.detect_conflicts(&message);
        for record in message.answers.iter().chain(message.additionals.iter()) {
            for entry in self.queries.iter_mut() {
                if entry.query.note_record(record, &*self.clock) == AnswerEvent::Added {
                    entry.query.fire_callbacks_for_last();
                }
            }
        }
    }

    fn detect_conflicts(&mut self, message: &DnsMessage) {
        let host_domain = self.host_domain();
        let theirs: Vec<RecordData> = message
            .answers
            .iter()
            .filter(|r| r.name == host_domain)
            .map(|r| r.data.clone())
            .collect();
        if !theirs.is_empty() {
            self.handle_host_conflict(&theirs);
        }
        let handles: Vec<ServiceHandle> = self.services.iter().map(|e| e.handle).collect();
        for handle in handles {
            let Some(idx) = self.service_index(handle) else {
                continue;
            };
            let domain = self.services[idx].service.instance_domain();
            let theirs: Vec<RecordData> = message
                .answers
                .iter()
                .filter(|r| r.name == domain)
                .map(|r| r.data.clone())
                .collect();
            if !theirs.is_empty() {
                self.handle_service_conflict(handle, &theirs);
            }
        }
    }

    /// Another responder answered for our hostname. While probing, run
    /// the tie-break and rename on a loss. After the claim, identical
    /// data is our own echo; different data means the name must be
    /// re-verified, so probing restarts without a rename.
    fn handle_host_conflict(&mut self, theirs: &[RecordData]) {
        match self.probe.status() {
            ProbeStatus::ProbingStarted => {
                let ours = self.host_claimed_rdata();
                match tiebreak(&ours, theirs) {
                    Tiebreak::Win => {
                        log::debug!("won tie-break for '{}'", self.host_domain());
                    }
                    Tiebreak::Tie => {}
                    Tiebreak::Lose => self.rename_host(),
                }
            }
            ProbeStatus::ProbingCompleted
            | ProbeStatus::Announcing
            | ProbeStatus::DoneFinally => {
                let ours = self.host_claimed_rdata();
                if tiebreak(&ours, theirs) != Tiebreak::Tie {
                    log::warn!(
                        "conflicting records for claimed name '{}', probing again",
                        self.host_domain()
                    );
                    self.probe.request_start();
                }
            }
            ProbeStatus::Idle | ProbeStatus::ReadyToStart => {}
        }
    }

    fn handle_service_conflict(&mut self, handle: ServiceHandle, theirs: &[RecordData]) {
        let Some(idx) = self.service_index(handle) else {
            return;
        };
        let host_domain = self.host_domain();
        let status = self.services[idx].service.probe.status();
        match status {
            ProbeStatus::ProbingStarted => {
                let ours = self.services[idx].service.claimed_rdata(&host_domain);
                match tiebreak(&ours, theirs) {
                    Tiebreak::Win => {
                        log::debug!(
                            "won tie-break for '{}'",
                            self.services[idx].service.instance_domain()
                        );
                    }
                    Tiebreak::Tie => {}
                    Tiebreak::Lose => self.rename_service(handle),
                }
            }
            ProbeStatus::ProbingCompleted
            | ProbeStatus::Announcing
            | ProbeStatus::DoneFinally => {
                let ours = self.services[idx].service.claimed_rdata(&host_domain);
                if tiebreak(&ours, theirs) != Tiebreak::Tie {
                    log::warn!(
                        "conflicting records for claimed service '{}', probing again",
                        self.services[idx].service.instance_domain()
                    );
                    self.services[idx].service.probe.request_start();
                }
            }
            ProbeStatus::Idle | ProbeStatus::ReadyToStart => {}
        }
    }

    fn rename_host(&mut self) {
        let old = self.hostname.clone();
        match index_name(Some(&old), NAME_DIVIDER, None) {
            Ok(new_name) => {
                log::warn!(
                    "lost tie-break for hostname '{}', renaming to '{}'",
                    old,
                    new_name
                );
                self.hostname = new_name.clone();
                if self.default_instance.is_none() {
                    self.propagate_auto_names();
                }
                // SRV targets moved with the hostname.
                self.restart_probes();
                self.probe.fire_callback(&new_name, false);
            }
            Err(err) => {
                log::error!("cannot rename hostname '{}': {}", old, err);
                self.probe.request_start();
            }
        }
    }

    fn rename_service(&mut self, handle: ServiceHandle) {
        let Some(idx) = self.service_index(handle) else {
            return;
        };
        let old = self.services[idx].service.instance_name().to_owned();
        let fallback = self.hostname.clone();
        match index_name(Some(&old), NAME_DIVIDER, Some(&fallback)) {
            Ok(new_name) => {
                log::warn!(
                    "lost tie-break for service '{}', renaming to '{}'",
                    old,
                    new_name
                );
                if let Err(err) = self.services[idx].service.set_instance_name(&new_name) {
                    log::error!("cannot rename service '{}': {}", old, err);
                }
                self.services[idx].service.probe.request_start();
                self.services[idx].service.probe.fire_callback(&new_name, false);
            }
            Err(err) => {
                log::error!("cannot rename service '{}': {}", old, err);
                self.services[idx].service.probe.request_start();
            }
        }
    }

    /// Answers inbound questions for names we have fully claimed.
    /// Responses always go multicast; the unicast-response bit on the
    /// question is ignored. Known answers in the query with at least
    /// half the TTL left suppress ours.
    fn handle_query(&mut self, message: DnsMessage) {
        let mut answers: Vec<DnsRecord> = Vec::new();
        let mut additionals: Vec<DnsRecord> = Vec::new();
        let host_domain = self.host_domain();
        let host_done = self.probe.is_done();
        let meta = meta_domain();
        for question in &message.questions {
            if host_done && question.name == host_domain {
                for record in self.host_records(HOST_TTL_SECS) {
                    if question.qtype.matches(record.data.record_type()) {
                        answers.push(record);
                    }
                }
            }
            if question.name == meta && question.qtype.matches(RecordType::Ptr) {
                for entry in self.services.iter() {
                    if entry.service.probe.is_done() {
                        answers.push(DnsRecord {
                            name: meta.clone(),
                            ttl: SERVICE_TTL_SECS,
                            cache_flush: false,
                            data: RecordData::Ptr(entry.service.service_domain()),
                        });
                    }
                }
            }
            for idx in 0..self.services.len() {
                if !self.services[idx].service.probe.is_done() {
                    continue;
                }
                let service_domain = self.services[idx].service.service_domain();
                let instance_domain = self.services[idx].service.instance_domain();
                if question.name == service_domain && question.qtype.matches(RecordType::Ptr) {
                    let service = &mut self.services[idx].service;
                    answers.push(service.ptr_record(SERVICE_TTL_SECS));
                    additionals.push(service.srv_record(&host_domain, SERVICE_TTL_SECS));
                    additionals.push(service.txt_record(SERVICE_TTL_SECS));
                    additionals.extend(self.host_records(HOST_TTL_SECS));
                } else if question.name == instance_domain {
                    let service = &mut self.services[idx].service;
                    let mut wants_addresses = false;
                    if question.qtype.matches(RecordType::Srv) {
                        answers.push(service.srv_record(&host_domain, SERVICE_TTL_SECS));
                        wants_addresses = true;
                    }
                    if question.qtype.matches(RecordType::Txt) {
                        answers.push(service.txt_record(SERVICE_TTL_SECS));
                    }
                    if wants_addresses {
                        additionals.extend(self.host_records(HOST_TTL_SECS));
                    }
                }
            }
        }
        answers.retain(|record| !known_answer(&message.answers, record));
        let answers = dedupe_records(answers);
        if answers.is_empty() {
            return;
        }
        let mut additionals = dedupe_records(additionals);
        additionals.retain(|record| {
            !answers
                .iter()
                .any(|a| a.name == record.name && a.data == record.data)
        });
        let mut response = DnsMessage::response();
        response.answers = answers;
        response.additionals = additionals;
        log::debug!(
            "answering query with {} records",
            response.answers.len() + response.additionals.len()
        );
        if let Err(err) = self.send_message(&response) {
            log::warn!("query response send failed: {}", err);
        }
    }

    fn check_query_cache(&mut self) {
        for entry in self.queries.iter_mut() {
            let removed = entry.query.check_cache(&*self.clock);
            if removed > 0 {
                log::debug!(
                    "query '{}': {} cached answers expired",
                    entry.query.domain(),
                    removed
                );
            }
        }
    }

    fn resend_due_queries(&mut self) {
        let due: Vec<QueryHandle> = self
            .queries
            .iter()
            .filter(|e| e.query.due_for_resend(&*self.clock))
            .map(|e| e.handle)
            .collect();
        for handle in due {
            let Some(idx) = self.query_index(handle) else {
                continue;
            };
            let mut message = DnsMessage::query();
            message.questions.push(self.queries[idx].query.question());
            match self.send_message(&message) {
                Ok(()) => {
                    log::debug!("re-asked query '{}'", self.queries[idx].query.domain());
                    self.queries[idx].query.note_sent(&*self.clock);
                }
                // Timer stays expired, so the next tick tries again.
                Err(err) => log::warn!("query resend failed: {}", err),
            }
        }
    }

    fn install_query(&mut self, mut query: Query) -> Result<QueryHandle, HostError> {
        if !self.send_query_message(&query) {
            return Err(HostError::QuerySendFailed);
        }
        query.note_sent(&*self.clock);
        log::debug!("installed query for '{}'", query.domain());
        Ok(self.push_query(query))
    }

    /// Sends one static query, waits out the timeout while still
    /// pumping the backbone, then collects whatever arrived. A failed
    /// send simply yields no answers.
    fn run_static_query(&mut self, query: Query, timeout_ms: u64) -> Vec<Answer> {
        self.remove_static_queries();
        let mut query = query;
        if !self.send_query_message(&query) {
            return Vec::new();
        }
        query.note_sent(&*self.clock);
        let handle = self.push_query(query);
        self.wait_static(timeout_ms);
        match self.take_query(handle) {
            Some(mut query) => {
                query.set_awaiting(false);
                query.into_answers()
            }
            None => Vec::new(),
        }
    }

    fn wait_static(&mut self, timeout_ms: u64) {
        let deadline = Timeout::after(&*self.clock, timeout_ms);
        loop {
            let remaining = deadline.remaining_ms(&*self.clock);
            if remaining == 0 {
                break;
            }
            self.pump_and_route(remaining);
        }
    }

    fn send_query_message(&mut self, query: &Query) -> bool {
        let mut message = DnsMessage::query();
        message.questions.push(query.question());
        match self.send_message(&message) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("query send failed: {}", err);
                false
            }
        }
    }

    fn push_query(&mut self, query: Query) -> QueryHandle {
        self.next_query_id += 1;
        let handle = QueryHandle(self.next_query_id);
        self.queries.push(QueryEntry { handle, query });
        handle
    }

    fn take_query(&mut self, handle: QueryHandle) -> Option<Query> {
        let idx = self.query_index(handle)?;
        Some(self.queries.remove(idx).query)
    }

    /// A static query must never leave state behind, so any earlier one
    /// is dropped before a new one starts.
    fn remove_static_queries(&mut self) {
        self.queries.retain(|e| !e.query.is_static());
    }
}

fn host_query_domain(hostname: &str) -> DomainName {
    DomainName::from_validated_labels(vec![hostname.to_owned(), LOCAL_TLD.to_owned()])
}

fn service_query_domain(
    service_type: &str,
    protocol: Protocol,
) -> Result<DomainName, HostError> {
    let ty = normalize_service_type(service_type)?;
    Ok(DomainName::from_validated_labels(vec![
        ty,
        protocol.label().to_owned(),
        LOCAL_TLD.to_owned(),
    ]))
}

fn meta_domain() -> DomainName {
    DomainName::from_validated_labels(vec![
        "_services".to_owned(),
        "_dns-sd".to_owned(),
        "_udp".to_owned(),
        LOCAL_TLD.to_owned(),
    ])
}

/// A record in the query's known-answer section suppresses ours when it
/// carries the same data and at least half the TTL we would send.
fn known_answer(known: &[DnsRecord], candidate: &DnsRecord) -> bool {
    known.iter().any(|k| {
        k.name == candidate.name && k.data == candidate.data && k.ttl >= candidate.ttl / 2
    })
}

fn dedupe_records(records: Vec<DnsRecord>) -> Vec<DnsRecord> {
    let mut unique: Vec<DnsRecord> = Vec::new();
    for record in records {
        if !unique
            .iter()
            .any(|u| u.name == record.name && u.data == record.data)
        {
            unique.push(record);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::DomainName;

    fn record(name: &str, ttl: u32, data: RecordData) -> DnsRecord {
        DnsRecord {
            name: DomainName::parse(name).unwrap(),
            ttl,
            cache_flush: false,
            data,
        }
    }

    #[test]
    fn test_known_answer_needs_half_ttl() {
        let ours = record(
            "box._http._tcp.local",
            4500,
            RecordData::Ptr(DomainName::parse("a.local").unwrap()),
        );
        let fresh = vec![record(
            "box._http._tcp.local",
            2250,
            RecordData::Ptr(DomainName::parse("a.local").unwrap()),
        )];
        let stale = vec![record(
            "box._http._tcp.local",
            2249,
            RecordData::Ptr(DomainName::parse("a.local").unwrap()),
        )];
        assert!(known_answer(&fresh, &ours));
        assert!(!known_answer(&stale, &ours));
    }

    #[test]
    fn test_known_answer_requires_same_data() {
        let ours = record(
            "box._http._tcp.local",
            4500,
            RecordData::Ptr(DomainName::parse("a.local").unwrap()),
        );
        let other = vec![record(
            "box._http._tcp.local",
            4500,
            RecordData::Ptr(DomainName::parse("b.local").unwrap()),
        )];
        assert!(!known_answer(&other, &ours));
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let a = record("x.local", 120, RecordData::A("10.0.0.1".parse().unwrap()));
        let b = record("x.local", 60, RecordData::A("10.0.0.1".parse().unwrap()));
        let c = record("x.local", 120, RecordData::A("10.0.0.2".parse().unwrap()));
        let out = dedupe_records(vec![a.clone(), b, c.clone()]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].ttl, 120);
        assert_eq!(out[1], c);
    }

    #[test]
    fn test_service_query_domain_normalizes() {
        let domain = service_query_domain("HTTP", Protocol::Tcp).unwrap();
        assert_eq!(domain.to_string(), "_http._tcp.local");
        assert!(service_query_domain("", Protocol::Tcp).is_err());
    }

    #[test]
    fn test_meta_domain_spelling() {
        assert_eq!(meta_domain().to_string(), crate::consts::META_QUERY_NAME);
    }
}
