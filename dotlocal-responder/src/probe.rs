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

//! Per-name probe and announce state machine
//!
//! Per RFC 6762 section 8: before using a name, send three probe
//! queries 250 ms apart (the first after a random 0-250 ms delay); if
//! nobody objects, the name is claimed and announced with unsolicited
//! responses on an increasing delay. The host runs one instance for its
//! hostname and one per service instance name; all of them advance from
//! the same update tick.
//!
//! The machine is pure bookkeeping. It decides *when* to send and hands
//! back [`ProbeTask`]s; the owner builds and sends the actual messages,
//! which is also where send failures are reported back via
//! [`ProbeState::retry_last_send`].

use rand::Rng;

use crate::clock::{Clock, Timeout};
use crate::consts::{
    ANNOUNCE_BASE_DELAY_MS, ANNOUNCE_COUNT, PROBE_COUNT, PROBE_JITTER_MS, PROBE_SPACING_MS,
};

/// Lifecycle of one claimed name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// Not participating (host not started, or shut down)
    Idle,
    /// Waiting for the interface to become operational
    ReadyToStart,
    /// Probe queries in flight
    ProbingStarted,
    /// All probes out, nobody objected
    ProbingCompleted,
    /// Unsolicited announcements in flight
    Announcing,
    /// Claimed and announced; the steady state (terminal)
    DoneFinally,
}

impl ProbeStatus {
    fn name(self) -> &'static str {
        match self {
            ProbeStatus::Idle => "Idle",
            ProbeStatus::ReadyToStart => "ReadyToStart",
            ProbeStatus::ProbingStarted => "ProbingStarted",
            ProbeStatus::ProbingCompleted => "ProbingCompleted",
            ProbeStatus::Announcing => "Announcing",
            ProbeStatus::DoneFinally => "DoneFinally",
        }
    }
}

/// What the owner must do after an [`ProbeState::advance`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeTask {
    /// Send a probe query for the name.
    SendProbe,
    /// Probing finished without conflict; fire the result callback.
    Claimed,
    /// Send an unsolicited announcement for the name.
    SendAnnounce,
}

/// Callback reporting a probe outcome: the name it concerns and whether
/// it was claimed (`true`) or lost to a conflict and renamed (`false`).
pub type ProbeCallback = Box<dyn FnMut(&str, bool)>;

/// Probe/announce bookkeeping for one name.
pub struct ProbeState {
    status: ProbeStatus,
    sent_count: u8,
    timeout: Timeout,
    callback: Option<ProbeCallback>,
}

impl ProbeState {
    pub fn new() -> Self {
        Self {
            status: ProbeStatus::Idle,
            sent_count: 0,
            timeout: Timeout::never(),
            callback: None,
        }
    }

    pub fn status(&self) -> ProbeStatus {
        self.status
    }

    /// True only in the terminal `DoneFinally` state.
    pub fn is_done(&self) -> bool {
        self.status == ProbeStatus::DoneFinally
    }

    pub fn set_callback(&mut self, callback: Option<ProbeCallback>) {
        self.callback = callback;
    }

    /// Queue the machine for (re)probing from any state.
    pub fn request_start(&mut self) {
        self.set_status(ProbeStatus::ReadyToStart);
        self.sent_count = 0;
        self.timeout = Timeout::never();
    }

    /// Stop participating entirely.
    pub fn clear(&mut self) {
        self.set_status(ProbeStatus::Idle);
        self.sent_count = 0;
        self.timeout = Timeout::never();
    }

    /// Re-run the announce phase for an already claimed name.
    pub fn reannounce(&mut self, clock: &dyn Clock) {
        if matches!(
            self.status,
            ProbeStatus::DoneFinally | ProbeStatus::Announcing
        ) {
            self.set_status(ProbeStatus::Announcing);
            self.sent_count = 0;
            self.timeout.expire_now(clock);
        }
    }

    /// Advance the machine one step.
    ///
    /// The caller only invokes this while the interface is operational;
    /// a machine in `ReadyToStart` therefore starts probing here, with
    /// the first probe scheduled behind the random RFC 6762 jitter.
    pub fn advance(&mut self, clock: &dyn Clock) -> Vec<ProbeTask> {
        let mut tasks = Vec::new();
        match self.status {
            ProbeStatus::Idle | ProbeStatus::DoneFinally => {}
            ProbeStatus::ReadyToStart => {
                let jitter = rand::thread_rng().gen_range(0..PROBE_JITTER_MS);
                self.set_status(ProbeStatus::ProbingStarted);
                self.sent_count = 0;
                self.timeout.reset(clock, jitter);
            }
            ProbeStatus::ProbingStarted => {
                if self.timeout.expired(clock) {
                    if self.sent_count < PROBE_COUNT {
                        self.sent_count += 1;
                        self.timeout.reset(clock, PROBE_SPACING_MS);
                        tasks.push(ProbeTask::SendProbe);
                    } else {
                        // Final spacing elapsed with no objection.
                        self.set_status(ProbeStatus::ProbingCompleted);
                        tasks.push(ProbeTask::Claimed);
                        tasks.extend(self.start_announcing(clock));
                    }
                }
            }
            ProbeStatus::ProbingCompleted => {
                tasks.extend(self.start_announcing(clock));
            }
            ProbeStatus::Announcing => {
                if self.timeout.expired(clock) {
                    tasks.push(self.next_announce(clock));
                }
            }
        }
        tasks
    }

    /// Roll back the last `SendProbe`/`SendAnnounce` after a transport
    /// failure so the next tick retries it.
    pub fn retry_last_send(&mut self, clock: &dyn Clock) {
        self.sent_count = self.sent_count.saturating_sub(1);
        if self.status == ProbeStatus::DoneFinally {
            self.set_status(ProbeStatus::Announcing);
        }
        self.timeout.expire_now(clock);
    }

    /// Invoke the result callback, if one is registered.
    pub(crate) fn fire_callback(&mut self, name: &str, claimed: bool) {
        if let Some(mut callback) = self.callback.take() {
            callback(name, claimed);
            self.callback = Some(callback);
        }
    }

    fn start_announcing(&mut self, clock: &dyn Clock) -> Vec<ProbeTask> {
        self.set_status(ProbeStatus::Announcing);
        self.sent_count = 0;
        vec![self.next_announce(clock)]
    }

    fn next_announce(&mut self, clock: &dyn Clock) -> ProbeTask {
        self.sent_count += 1;
        if self.sent_count >= ANNOUNCE_COUNT {
            self.set_status(ProbeStatus::DoneFinally);
        } else {
            let delay = ANNOUNCE_BASE_DELAY_MS << (self.sent_count - 1);
            self.timeout.reset(clock, delay);
        }
        ProbeTask::SendAnnounce
    }

    fn set_status(&mut self, status: ProbeStatus) {
        if self.status != status {
            log::trace!("probe: {} -> {}", self.status.name(), status.name());
            self.status = status;
        }
    }
}

impl Default for ProbeState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::TestClock;

    /// Advance past any possible first-probe jitter.
    fn past_jitter(clock: &TestClock) {
        clock.advance(PROBE_JITTER_MS);
    }

    #[test]
    fn test_idle_does_nothing() {
        let clock = TestClock::new();
        let mut probe = ProbeState::new();
        assert!(probe.advance(&clock).is_empty());
        assert_eq!(probe.status(), ProbeStatus::Idle);
    }

    #[test]
    fn test_full_lifecycle() {
        let clock = TestClock::new();
        let mut probe = ProbeState::new();
        probe.request_start();

        // ReadyToStart -> ProbingStarted, first probe behind jitter.
        assert!(probe.advance(&clock).is_empty());
        assert_eq!(probe.status(), ProbeStatus::ProbingStarted);

        past_jitter(&clock);
        assert_eq!(probe.advance(&clock), vec![ProbeTask::SendProbe]);
        clock.advance(PROBE_SPACING_MS);
        assert_eq!(probe.advance(&clock), vec![ProbeTask::SendProbe]);
        clock.advance(PROBE_SPACING_MS);
        assert_eq!(probe.advance(&clock), vec![ProbeTask::SendProbe]);

        // Final spacing elapses: claimed, first announcement goes out.
        clock.advance(PROBE_SPACING_MS);
        assert_eq!(
            probe.advance(&clock),
            vec![ProbeTask::Claimed, ProbeTask::SendAnnounce]
        );
        assert_eq!(probe.status(), ProbeStatus::Announcing);

        // Second announcement one second later, then terminal.
        clock.advance(ANNOUNCE_BASE_DELAY_MS);
        assert_eq!(probe.advance(&clock), vec![ProbeTask::SendAnnounce]);
        assert_eq!(probe.status(), ProbeStatus::DoneFinally);
        assert!(probe.is_done());

        // Terminal state stays put.
        clock.advance(10_000);
        assert!(probe.advance(&clock).is_empty());
    }

    #[test]
    fn test_probe_spacing_not_early() {
        let clock = TestClock::new();
        let mut probe = ProbeState::new();
        probe.request_start();
        probe.advance(&clock);
        past_jitter(&clock);
        assert_eq!(probe.advance(&clock), vec![ProbeTask::SendProbe]);

        clock.advance(PROBE_SPACING_MS - 1);
        assert!(probe.advance(&clock).is_empty());
        clock.advance(1);
        assert_eq!(probe.advance(&clock), vec![ProbeTask::SendProbe]);
    }

    #[test]
    fn test_restart_mid_probe() {
        let clock = TestClock::new();
        let mut probe = ProbeState::new();
        probe.request_start();
        probe.advance(&clock);
        past_jitter(&clock);
        probe.advance(&clock);

        probe.request_start();
        assert_eq!(probe.status(), ProbeStatus::ReadyToStart);

        // Probing starts over from the first probe.
        probe.advance(&clock);
        past_jitter(&clock);
        assert_eq!(probe.advance(&clock), vec![ProbeTask::SendProbe]);
    }

    #[test]
    fn test_reannounce_from_done() {
        let clock = TestClock::new();
        let mut probe = ProbeState::new();
        probe.request_start();
        drive_to_done(&clock, &mut probe);

        probe.reannounce(&clock);
        assert_eq!(probe.status(), ProbeStatus::Announcing);
        assert_eq!(probe.advance(&clock), vec![ProbeTask::SendAnnounce]);
        clock.advance(ANNOUNCE_BASE_DELAY_MS);
        assert_eq!(probe.advance(&clock), vec![ProbeTask::SendAnnounce]);
        assert!(probe.is_done());
    }

    #[test]
    fn test_reannounce_ignored_while_probing() {
        let clock = TestClock::new();
        let mut probe = ProbeState::new();
        probe.request_start();
        probe.advance(&clock);
        probe.reannounce(&clock);
        assert_eq!(probe.status(), ProbeStatus::ProbingStarted);
    }

    #[test]
    fn test_retry_after_send_failure() {
        let clock = TestClock::new();
        let mut probe = ProbeState::new();
        probe.request_start();
        probe.advance(&clock);
        past_jitter(&clock);
        assert_eq!(probe.advance(&clock), vec![ProbeTask::SendProbe]);

        // Owner reports the send failed; same probe goes out next tick
        // instead of burning one of the three.
        probe.retry_last_send(&clock);
        assert_eq!(probe.advance(&clock), vec![ProbeTask::SendProbe]);
        clock.advance(PROBE_SPACING_MS);
        assert_eq!(probe.advance(&clock), vec![ProbeTask::SendProbe]);
        clock.advance(PROBE_SPACING_MS);
        assert_eq!(probe.advance(&clock), vec![ProbeTask::SendProbe]);
        clock.advance(PROBE_SPACING_MS);
        assert_eq!(probe.advance(&clock)[0], ProbeTask::Claimed);
    }

    #[test]
    fn test_callback_fires_and_survives() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let calls: Rc<RefCell<Vec<(String, bool)>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&calls);

        let mut probe = ProbeState::new();
        probe.set_callback(Some(Box::new(move |name, ok| {
            sink.borrow_mut().push((name.to_owned(), ok));
        })));

        probe.fire_callback("gadget", true);
        probe.fire_callback("gadget-2", false);
        assert_eq!(
            calls.borrow().as_slice(),
            &[("gadget".to_owned(), true), ("gadget-2".to_owned(), false)]
        );
    }

    #[test]
    fn test_clear_returns_to_idle() {
        let clock = TestClock::new();
        let mut probe = ProbeState::new();
        probe.request_start();
        drive_to_done(&clock, &mut probe);
        probe.clear();
        assert_eq!(probe.status(), ProbeStatus::Idle);
        assert!(probe.advance(&clock).is_empty());
    }

    fn drive_to_done(clock: &TestClock, probe: &mut ProbeState) {
        for _ in 0..32 {
            probe.advance(clock);
            clock.advance(PROBE_SPACING_MS.max(ANNOUNCE_BASE_DELAY_MS));
            if probe.is_done() {
                return;
            }
        }
        panic!("probe never completed");
    }
}
