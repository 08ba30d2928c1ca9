// Runtime watchers
//
// Three passive observers that accumulate events for the whole run:
//
// - diagnostics: browser console errors and uncaught page errors
// - network:     per-response anomaly flags (error status, slow, headers, sensitive keys)
// - timing:      navigation metrics and the slowest API call
//
// Attribution:
//   StepClock hands out step ids and a global event sequence. Every event records the
//   sequence number at capture and the step that produced it. A StepWindow covers
//   [start, end) of the sequence for one step; an event belongs to the window only when
//   both its sequence number and its step id match, so a late response from step N is
//   never counted against step N+1.

pub mod diagnostics;
pub mod network;
pub mod timing;

pub use diagnostics::*;
pub use network::*;
pub use timing::*;

use crate::models::ProbeContext;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Identifier of one orchestrated step. `StepId(0)` is the idle period before the first step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StepId(pub u64);

/// An event plus the attribution captured with it.
#[derive(Debug, Clone, Serialize)]
pub struct Stamped<E> {
    pub seq: u64,
    pub step: StepId,
    pub context: ProbeContext,
    pub at: DateTime<Utc>,
    pub event: E,
}

/// A step that has begun but not finished.
#[derive(Debug, Clone)]
pub struct ActiveStep {
    pub id: StepId,
    pub context: ProbeContext,
    start: u64,
}

/// The closed sequence range of a finished step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepWindow {
    pub step: StepId,
    pub context: ProbeContext,
    pub start: u64,
    pub end: u64,
}

impl StepWindow {
    pub fn contains<E>(&self, event: &Stamped<E>) -> bool {
        event.step == self.step && event.seq >= self.start && event.seq < self.end
    }
}

struct ClockState {
    step: StepId,
    context: ProbeContext,
}

struct ClockInner {
    next_seq: AtomicU64,
    next_step: AtomicU64,
    current: Mutex<ClockState>,
}

/// Shared by all watchers of a run.
#[derive(Clone)]
pub struct StepClock {
    inner: Arc<ClockInner>,
}

impl Default for StepClock {
    fn default() -> Self {
        Self::new()
    }
}

impl StepClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClockInner {
                next_seq: AtomicU64::new(0),
                next_step: AtomicU64::new(1),
                current: Mutex::new(ClockState {
                    step: StepId(0),
                    context: ProbeContext::idle(),
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ClockState> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_seq(&self) -> u64 {
        self.inner.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Sequence number the next event will receive.
    pub fn watermark(&self) -> u64 {
        self.inner.next_seq.load(Ordering::SeqCst)
    }

    pub fn begin(&self, context: ProbeContext) -> ActiveStep {
        let id = StepId(self.inner.next_step.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state();
        state.step = id;
        state.context = context.clone();
        ActiveStep {
            id,
            context,
            start: self.watermark(),
        }
    }

    pub fn finish(&self, step: ActiveStep) -> StepWindow {
        let end = self.watermark();
        let mut state = self.state();
        if state.step == step.id {
            state.step = StepId(0);
            state.context = ProbeContext::idle();
        }
        StepWindow {
            step: step.id,
            context: step.context,
            start: step.start,
            end,
        }
    }

    /// Step and context current right now; used for events with no causal link to a request.
    pub fn current(&self) -> (StepId, ProbeContext) {
        let state = self.state();
        (state.step, state.context.clone())
    }
}

/// Append-only event list shared between the recording side and the query side.
pub struct EventLog<E> {
    clock: StepClock,
    events: Arc<Mutex<Vec<Stamped<E>>>>,
}

impl<E> Clone for EventLog<E> {
    fn clone(&self) -> Self {
        Self {
            clock: self.clock.clone(),
            events: Arc::clone(&self.events),
        }
    }
}

impl<E: Clone> EventLog<E> {
    pub fn new(clock: StepClock) -> Self {
        Self {
            clock,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn guard(&self) -> MutexGuard<'_, Vec<Stamped<E>>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn clock(&self) -> &StepClock {
        &self.clock
    }

    /// Record against whatever step is current at capture time.
    pub fn record(&self, event: E) -> u64 {
        let (step, context) = self.clock.current();
        self.record_for(step, context, event)
    }

    /// Record against an explicit step, e.g. the step that issued the request.
    pub fn record_for(&self, step: StepId, context: ProbeContext, event: E) -> u64 {
        let mut events = self.guard();
        let seq = self.clock.next_seq();
        events.push(Stamped {
            seq,
            step,
            context,
            at: Utc::now(),
            event,
        });
        seq
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Stamped<E>> {
        self.guard().clone()
    }

    /// Events appended after list index `index`.
    pub fn since(&self, index: usize) -> Vec<Stamped<E>> {
        self.guard().iter().skip(index).cloned().collect()
    }

    pub fn in_window(&self, window: &StepWindow) -> Vec<Stamped<E>> {
        self.guard()
            .iter()
            .filter(|e| window.contains(e))
            .cloned()
            .collect()
    }

    pub fn count_in_window(&self, window: &StepWindow) -> usize {
        self.guard().iter().filter(|e| window.contains(e)).count()
    }
}

/// What the browser logged since the last fetch: console entries and the page's own
/// XHR/fetch responses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrowserLogs {
    pub console: Vec<DiagnosticMessage>,
    pub responses: Vec<PageResponse>,
}

impl BrowserLogs {
    pub fn is_empty(&self) -> bool {
        self.console.is_empty() && self.responses.is_empty()
    }
}

/// The three watchers of one run, sharing a clock.
#[derive(Clone)]
pub struct Watchers {
    pub clock: StepClock,
    pub diagnostics: DiagnosticWatcher,
    pub network: NetworkWatcher,
    pub timing: TimingWatcher,
}

impl Watchers {
    pub fn new(network: NetworkPolicy, timing: TimingThresholds) -> Self {
        let clock = StepClock::new();
        Self {
            diagnostics: DiagnosticWatcher::new(clock.clone()),
            network: NetworkWatcher::new(clock.clone(), network),
            timing: TimingWatcher::new(clock.clone(), timing),
            clock,
        }
    }

    pub fn begin(&self, context: ProbeContext) -> ActiveStep {
        self.clock.begin(context)
    }

    pub fn finish(&self, step: ActiveStep) -> StepWindow {
        self.clock.finish(step)
    }

    /// Record browser logs against `step`. Returns the anomalies raised: console errors plus
    /// network flags.
    pub fn absorb(&self, step: StepId, context: &ProbeContext, logs: BrowserLogs) -> usize {
        let mut anomalies = 0;
        for message in logs.console {
            if message.level == DiagnosticLevel::Error {
                anomalies += 1;
            }
            self.diagnostics.record_for(step, context.clone(), message);
        }
        for response in &logs.responses {
            anomalies += self.network.observe(step, context, response.observed());
        }
        anomalies
    }

    /// Record browser logs against whatever step is current on arrival.
    pub fn absorb_current(&self, logs: BrowserLogs) -> usize {
        let (step, context) = self.clock.current();
        self.absorb(step, &context, logs)
    }

    /// Console errors plus network flags attributed to the window.
    pub fn anomalies_in(&self, window: &StepWindow) -> usize {
        self.diagnostics.errors_in(window) + self.network.log().count_in_window(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Method;

    #[test]
    fn test_window_only_counts_own_step() {
        let clock = StepClock::new();
        let log: EventLog<&'static str> = EventLog::new(clock.clone());

        let first = clock.begin(ProbeContext::new("candidate", "step-1"));
        let first_id = first.id;
        let first_ctx = first.context.clone();
        log.record("during first");
        let first_window = clock.finish(first);

        let second = clock.begin(ProbeContext::new("candidate", "step-2"));
        // late response issued by the first step arrives now
        log.record_for(first_id, first_ctx, "late from first");
        log.record("during second");
        let second_window = clock.finish(second);

        let in_second: Vec<_> = log.in_window(&second_window).into_iter().map(|e| e.event).collect();
        assert_eq!(in_second, vec!["during second"]);
        assert_eq!(log.count_in_window(&first_window), 1);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_since_index_diff() {
        let clock = StepClock::new();
        let log: EventLog<u32> = EventLog::new(clock);
        log.record(1);
        let before = log.len();
        log.record(2);
        log.record(3);
        let after: Vec<u32> = log.since(before).into_iter().map(|e| e.event).collect();
        assert_eq!(after, vec![2, 3]);
    }

    #[test]
    fn test_idle_events_tagged_step_zero() {
        let clock = StepClock::new();
        let log: EventLog<u32> = EventLog::new(clock.clone());
        log.record(1);
        let snap = log.snapshot();
        assert_eq!(snap[0].step, StepId(0));
        assert_eq!(snap[0].context, ProbeContext::idle());

        let step = clock.begin(ProbeContext::new("admin", "x"));
        clock.finish(step);
        assert_eq!(clock.current().0, StepId(0));
    }

    #[test]
    fn test_absorb_attributes_to_given_step() {
        let watchers = Watchers::new(NetworkPolicy::default(), TimingThresholds::default());
        let first = watchers.begin(ProbeContext::new("candidate", "input-fuzz"));
        let window = watchers.finish(first);

        let step = watchers.begin(ProbeContext::new("candidate", "input-fuzz"));
        let (id, context) = (step.id, step.context.clone());
        let logs = BrowserLogs {
            console: vec![DiagnosticMessage::error("Uncaught TypeError")],
            responses: vec![PageResponse {
                method: Method::POST,
                url: "http://app/api/profile".to_string(),
                status: 500,
                headers: Vec::new(),
                duration_ms: 12,
            }],
        };
        // console error, error status, missing headers
        assert_eq!(watchers.absorb(id, &context, logs), 3);
        let second = watchers.finish(step);

        assert_eq!(watchers.anomalies_in(&second), 3);
        assert_eq!(watchers.anomalies_in(&window), 0);
    }

    #[test]
    fn test_absorb_current_when_idle() {
        let watchers = Watchers::new(NetworkPolicy::default(), TimingThresholds::default());
        assert!(BrowserLogs::default().is_empty());
        watchers.absorb_current(BrowserLogs {
            console: vec![DiagnosticMessage::error("boot noise")],
            responses: Vec::new(),
        });
        assert_eq!(watchers.diagnostics.events()[0].step, StepId(0));
    }

    #[test]
    fn test_sequence_is_monotonic_across_logs() {
        let clock = StepClock::new();
        let a: EventLog<u8> = EventLog::new(clock.clone());
        let b: EventLog<u8> = EventLog::new(clock.clone());
        let s1 = a.record(0);
        let s2 = b.record(0);
        let s3 = a.record(0);
        assert!(s1 < s2 && s2 < s3);
    }
}
