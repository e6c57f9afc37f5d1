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

//! Outbound queries and their cached answers
//!
//! Two kinds share one structure. A *static* query is sent once and the
//! caller blocks for a bounded window collecting whatever comes back; it
//! is gone again when the call returns. A *dynamic* query stays
//! registered, is resent on a doubling interval, and reports through
//! callbacks until explicitly removed.
//!
//! Cached answers live exactly as long as their record's TTL says.
//! Expiry is garbage collection, nothing else: no callback fires and no
//! resend is triggered by an answer aging out.

use crate::clock::{Clock, Timeout};
use crate::consts::{QUERY_RESEND_BASE_MS, QUERY_RESEND_CAP_MS};
use crate::name::DomainName;
use crate::record::{DnsQuestion, DnsRecord, RecordType};

/// What a query is resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// A hostname's address records
    Host,
    /// A service type's instances
    Service,
}

/// Opaque handle to a dynamic query registered with a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle(pub(crate) u32);

/// One discovered record plus its expiry deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub record: DnsRecord,
    pub expires_at_ms: u64,
}

impl Answer {
    fn from_record(record: DnsRecord, clock: &dyn Clock) -> Self {
        let expires_at_ms = clock
            .now_ms()
            .saturating_add(u64::from(record.ttl).saturating_mul(1_000));
        Self {
            record,
            expires_at_ms,
        }
    }

    /// Whether the answer has outlived its TTL.
    pub fn expired(&self, clock: &dyn Clock) -> bool {
        clock.now_ms() >= self.expires_at_ms
    }
}

/// Per-answer callback, fired once for each newly cached answer.
pub type AnswerCallback = Box<dyn FnMut(&Answer)>;

/// Whole-query callback, fired with the full answer list whenever it
/// gains a new answer.
pub type QueryCallback = Box<dyn FnMut(&[Answer])>;

/// How [`Query::note_record`] classified an inbound record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AnswerEvent {
    /// New answer cached; callbacks should fire.
    Added,
    /// Known answer, expiry refreshed; silent.
    Refreshed,
    /// TTL-zero goodbye removed a cached answer; silent.
    Removed,
    /// Not relevant to this query.
    Ignored,
}

/// One pending or persistent resolution request.
pub struct Query {
    query_type: QueryType,
    domain: DomainName,
    is_static: bool,
    awaiting_answers: bool,
    answers: Vec<Answer>,
    sent_count: u32,
    resend: Timeout,
    answer_callback: Option<AnswerCallback>,
    query_callback: Option<QueryCallback>,
}

impl Query {
    pub(crate) fn new(query_type: QueryType, domain: DomainName, is_static: bool) -> Self {
        Self {
            query_type,
            domain,
            is_static,
            awaiting_answers: is_static,
            answers: Vec::new(),
            sent_count: 0,
            resend: Timeout::never(),
            answer_callback: None,
            query_callback: None,
        }
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    pub fn domain(&self) -> &DomainName {
        &self.domain
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn awaiting_answers(&self) -> bool {
        self.awaiting_answers
    }

    pub(crate) fn set_awaiting(&mut self, awaiting: bool) {
        self.awaiting_answers = awaiting;
    }

    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    pub(crate) fn into_answers(self) -> Vec<Answer> {
        self.answers
    }

    pub(crate) fn set_callbacks(
        &mut self,
        answer_callback: Option<AnswerCallback>,
        query_callback: Option<QueryCallback>,
    ) {
        self.answer_callback = answer_callback;
        self.query_callback = query_callback;
    }

    /// The question this query puts on the wire. Service queries ask
    /// for PTR; host queries ask ANY so both address families arrive in
    /// one exchange.
    pub(crate) fn question(&self) -> DnsQuestion {
        DnsQuestion {
            name: self.domain.clone(),
            qtype: match self.query_type {
                QueryType::Service => RecordType::Ptr,
                QueryType::Host => RecordType::Any,
            },
            unicast_response: false,
        }
    }

    /// Whether `record` belongs to this query's answer set.
    ///
    /// A service query takes the PTR of its service type plus SRV/TXT of
    /// the instances directly under it; a host query takes the address
    /// records of its exact name.
    pub(crate) fn accepts(&self, record: &DnsRecord) -> bool {
        let rtype = record.data.record_type();
        match self.query_type {
            QueryType::Service => match rtype {
                RecordType::Ptr => record.name == self.domain,
                RecordType::Srv | RecordType::Txt => record.name.is_child_of(&self.domain),
                _ => false,
            },
            QueryType::Host => {
                matches!(rtype, RecordType::A | RecordType::Aaaa) && record.name == self.domain
            }
        }
    }

    /// Feed one inbound record through the cache rules.
    pub(crate) fn note_record(&mut self, record: &DnsRecord, clock: &dyn Clock) -> AnswerEvent {
        if !self.accepts(record) {
            return AnswerEvent::Ignored;
        }

        let matches_cached = |answer: &Answer| {
            answer.record.name == record.name && answer.record.data == record.data
        };

        if record.ttl == 0 {
            let before = self.answers.len();
            self.answers.retain(|a| !matches_cached(a));
            return if self.answers.len() != before {
                log::debug!("query {}: goodbye removed cached answer", self.domain);
                AnswerEvent::Removed
            } else {
                AnswerEvent::Ignored
            };
        }

        if let Some(existing) = self.answers.iter_mut().find(|a| matches_cached(a)) {
            *existing = Answer::from_record(record.clone(), clock);
            return AnswerEvent::Refreshed;
        }

        self.answers.push(Answer::from_record(record.clone(), clock));
        AnswerEvent::Added
    }

    /// Fire both callbacks for the most recently added answer.
    pub(crate) fn fire_callbacks_for_last(&mut self) {
        if let Some(mut callback) = self.answer_callback.take() {
            if let Some(answer) = self.answers.last() {
                callback(answer);
            }
            self.answer_callback = Some(callback);
        }
        if let Some(mut callback) = self.query_callback.take() {
            callback(&self.answers);
            self.query_callback = Some(callback);
        }
    }

    /// Drop expired answers; returns how many went.
    pub(crate) fn check_cache(&mut self, clock: &dyn Clock) -> usize {
        let before = self.answers.len();
        self.answers.retain(|a| !a.expired(clock));
        before - self.answers.len()
    }

    /// Whether a dynamic query's resend interval has elapsed.
    pub(crate) fn due_for_resend(&self, clock: &dyn Clock) -> bool {
        !self.is_static && self.resend.expired(clock)
    }

    /// Record one send and schedule the next resend: one second after
    /// the first send, doubling per resend, capped at an hour.
    pub(crate) fn note_sent(&mut self, clock: &dyn Clock) {
        self.sent_count += 1;
        if self.is_static {
            self.resend = Timeout::never();
        } else {
            let delay = QUERY_RESEND_BASE_MS
                .checked_shl(self.sent_count - 1)
                .unwrap_or(u64::MAX)
                .min(QUERY_RESEND_CAP_MS);
            self.resend.reset(clock, delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::TestClock;
    use crate::record::RecordData;
    use std::net::Ipv4Addr;

    fn service_query() -> Query {
        Query::new(
            QueryType::Service,
            DomainName::parse("_http._tcp.local").unwrap(),
            false,
        )
    }

    fn ptr(instance: &str, ttl: u32) -> DnsRecord {
        DnsRecord {
            name: DomainName::parse("_http._tcp.local").unwrap(),
            ttl,
            cache_flush: false,
            data: RecordData::Ptr(
                DomainName::from_labels([instance, "_http", "_tcp", "local"]).unwrap(),
            ),
        }
    }

    #[test]
    fn test_question_shapes() {
        let q = service_query();
        assert_eq!(q.question().qtype, RecordType::Ptr);

        let h = Query::new(
            QueryType::Host,
            DomainName::parse("gadget.local").unwrap(),
            true,
        );
        assert_eq!(h.question().qtype, RecordType::Any);
        assert!(h.awaiting_answers());
    }

    #[test]
    fn test_accepts_service_records() {
        let q = service_query();
        assert!(q.accepts(&ptr("gadget", 120)));

        let srv = DnsRecord {
            name: DomainName::from_labels(["gadget", "_http", "_tcp", "local"]).unwrap(),
            ttl: 120,
            cache_flush: true,
            data: RecordData::Srv {
                priority: 0,
                weight: 0,
                port: 80,
                target: DomainName::parse("gadget.local").unwrap(),
            },
        };
        assert!(q.accepts(&srv));

        // Unrelated type and unrelated name both fall through.
        let other = DnsRecord {
            name: DomainName::parse("_ipp._tcp.local").unwrap(),
            ttl: 120,
            cache_flush: false,
            data: RecordData::Ptr(DomainName::parse("x._ipp._tcp.local").unwrap()),
        };
        assert!(!q.accepts(&other));
        let a = DnsRecord {
            name: DomainName::parse("gadget.local").unwrap(),
            ttl: 120,
            cache_flush: true,
            data: RecordData::A(Ipv4Addr::new(10, 0, 0, 1)),
        };
        assert!(!q.accepts(&a));
    }

    #[test]
    fn test_note_record_dedupes_and_refreshes() {
        let clock = TestClock::new();
        let mut q = service_query();

        assert_eq!(q.note_record(&ptr("gadget", 10), &clock), AnswerEvent::Added);
        clock.advance(5_000);
        assert_eq!(
            q.note_record(&ptr("gadget", 10), &clock),
            AnswerEvent::Refreshed
        );
        assert_eq!(q.answers().len(), 1);
        // Refresh pushed the expiry out.
        assert_eq!(q.answers()[0].expires_at_ms, 15_000);
    }

    #[test]
    fn test_goodbye_removes_silently() {
        let clock = TestClock::new();
        let mut q = service_query();
        q.note_record(&ptr("gadget", 120), &clock);

        assert_eq!(
            q.note_record(&ptr("gadget", 0), &clock),
            AnswerEvent::Removed
        );
        assert!(q.answers().is_empty());

        // Goodbye for something we never cached is ignored.
        assert_eq!(
            q.note_record(&ptr("gadget", 0), &clock),
            AnswerEvent::Ignored
        );
    }

    #[test]
    fn test_cache_expiry_is_exact() {
        let clock = TestClock::new();
        let mut q = service_query();
        q.note_record(&ptr("gadget", 2), &clock);

        clock.advance(1_999);
        assert_eq!(q.check_cache(&clock), 0);
        clock.advance(1);
        assert_eq!(q.check_cache(&clock), 1);
        assert!(q.answers().is_empty());
    }

    #[test]
    fn test_resend_backoff_doubles_to_cap() {
        let clock = TestClock::new();
        let mut q = service_query();

        let mut gaps = Vec::new();
        for _ in 0..15 {
            q.note_sent(&clock);
            let gap = q.resend.remaining_ms(&clock);
            gaps.push(gap);
            clock.advance(gap);
            assert!(q.due_for_resend(&clock));
        }
        assert_eq!(gaps[0], 1_000);
        assert_eq!(gaps[1], 2_000);
        assert_eq!(gaps[2], 4_000);
        assert_eq!(*gaps.last().unwrap(), QUERY_RESEND_CAP_MS);
    }

    #[test]
    fn test_static_query_never_resends() {
        let clock = TestClock::new();
        let mut q = Query::new(
            QueryType::Host,
            DomainName::parse("gadget.local").unwrap(),
            true,
        );
        q.note_sent(&clock);
        clock.advance(QUERY_RESEND_CAP_MS * 2);
        assert!(!q.due_for_resend(&clock));
    }

    #[test]
    fn test_callbacks_fire_for_added_answer() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let clock = TestClock::new();
        let mut q = service_query();

        let per_answer: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let totals: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
        let pa = Rc::clone(&per_answer);
        let to = Rc::clone(&totals);
        q.set_callbacks(
            Some(Box::new(move |answer| {
                pa.borrow_mut().push(answer.record.name.to_string());
            })),
            Some(Box::new(move |answers| {
                to.borrow_mut().push(answers.len());
            })),
        );

        q.note_record(&ptr("gadget", 120), &clock);
        q.fire_callbacks_for_last();
        q.note_record(&ptr("widget", 120), &clock);
        q.fire_callbacks_for_last();

        assert_eq!(per_answer.borrow().len(), 2);
        assert_eq!(totals.borrow().as_slice(), &[1, 2]);
    }

    #[test]
    fn test_into_answers() {
        let clock = TestClock::new();
        let mut q = service_query();
        q.note_record(&ptr("gadget", 120), &clock);
        let answers = q.into_answers();
        assert_eq!(answers.len(), 1);
    }
}
