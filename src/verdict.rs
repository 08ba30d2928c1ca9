// Severity classifier for Gauntlet
// One decision table shared by every probe family
//
// Adversarial probes: a 2xx means the defence let a forged or forbidden request through.
// Functional steps: success or failure only, never CRITICAL.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ordered by gating impact: PASS < INFO < WARN < FAIL < CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Pass,
    Info,
    Warn,
    Fail,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Pass,
        Severity::Info,
        Severity::Warn,
        Severity::Fail,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Pass => "PASS",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Fail => "FAIL",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Whether media (screenshots, page snapshots) is retained for this severity.
    pub fn retains_media(&self) -> bool {
        matches!(self, Severity::Warn | Severity::Fail | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repeated attempts without any rejection at or above this count escalate WARN to FAIL.
pub const BURST_FAIL_THRESHOLD: usize = 20;

/// Which statuses count as the target rejecting an adversarial request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionPolicy {
    /// Only 401/403. Used by credential, cross-resource and privilege probes.
    AuthOnly,
    /// Any 4xx. Used by the upload probe where validation errors are the expected answer.
    AnyClientError,
}

impl RejectionPolicy {
    fn rejects(&self, status: u16) -> bool {
        match self {
            RejectionPolicy::AuthOnly => status == 401 || status == 403,
            RejectionPolicy::AnyClientError => (400..500).contains(&status),
        }
    }
}

/// Classify the response to a request the target was expected to refuse.
///
/// | status        | severity                                   |
/// |---------------|--------------------------------------------|
/// | 200..=299     | CRITICAL                                   |
/// | rejected      | PASS (401/403, or any 4xx for uploads)     |
/// | anything else | WARN, FAIL once `attempts` reaches 20      |
pub fn classify_adversarial(status: u16, policy: RejectionPolicy, attempts: usize) -> Severity {
    if (200..300).contains(&status) {
        return Severity::Critical;
    }
    if policy.rejects(status) {
        return Severity::Pass;
    }
    escalate(attempts)
}

fn escalate(attempts: usize) -> Severity {
    if attempts >= BURST_FAIL_THRESHOLD {
        Severity::Fail
    } else {
        Severity::Warn
    }
}

/// How a probe request that never produced a status ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFailure {
    Transport,
    Timeout,
}

/// A probe that could not complete is recorded for that case only: transport errors are
/// WARN, timeouts FAIL.
pub fn classify_probe_failure(failure: ProbeFailure) -> Severity {
    match failure {
        ProbeFailure::Transport => Severity::Warn,
        ProbeFailure::Timeout => Severity::Fail,
    }
}

/// Functional flow step: success PASS, error or timeout FAIL.
pub fn classify_functional<T, E>(outcome: &Result<T, E>) -> Severity {
    match outcome {
        Ok(_) => Severity::Pass,
        Err(_) => Severity::Fail,
    }
}

/// Flood probe: any 429 is the throttle we were looking for.
pub fn classify_flood(histogram: &BTreeMap<u16, usize>, burst: usize) -> Severity {
    if histogram.get(&429).copied().unwrap_or(0) > 0 {
        Severity::Pass
    } else {
        escalate(burst)
    }
}

/// Edge-case UI input. An anomaly (console error, failed response) in the step window means
/// the target leaked an error instead of validating; a visible rejection message is the
/// correct answer; silence is a gap worth flagging.
pub fn classify_edge_input(anomalies: usize, visible_rejection: bool) -> Severity {
    if anomalies > 0 {
        Severity::Fail
    } else if visible_rejection {
        Severity::Pass
    } else {
        Severity::Warn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adversarial_boundary_table() {
        let cases = [
            (199, Severity::Warn),
            (200, Severity::Critical),
            (299, Severity::Critical),
            (300, Severity::Warn),
            (400, Severity::Warn),
            (401, Severity::Pass),
            (403, Severity::Pass),
            (404, Severity::Warn),
            (429, Severity::Warn),
        ];
        for (status, expected) in cases {
            assert_eq!(
                classify_adversarial(status, RejectionPolicy::AuthOnly, 1),
                expected,
                "status {}",
                status
            );
        }
    }

    #[test]
    fn test_adversarial_burst_escalates() {
        assert_eq!(classify_adversarial(404, RejectionPolicy::AuthOnly, 19), Severity::Warn);
        assert_eq!(classify_adversarial(404, RejectionPolicy::AuthOnly, 20), Severity::Fail);
        assert_eq!(classify_adversarial(403, RejectionPolicy::AuthOnly, 50), Severity::Pass);
        assert_eq!(classify_adversarial(200, RejectionPolicy::AuthOnly, 50), Severity::Critical);
    }

    #[test]
    fn test_upload_policy_accepts_any_4xx() {
        for status in [400, 413, 415, 422] {
            assert_eq!(
                classify_adversarial(status, RejectionPolicy::AnyClientError, 1),
                Severity::Pass
            );
        }
        assert_eq!(classify_adversarial(201, RejectionPolicy::AnyClientError, 1), Severity::Critical);
        assert_eq!(classify_adversarial(500, RejectionPolicy::AnyClientError, 1), Severity::Warn);
    }

    #[test]
    fn test_functional_has_no_critical_tier() {
        let ok: Result<(), ()> = Ok(());
        let err: Result<(), ()> = Err(());
        assert_eq!(classify_functional(&ok), Severity::Pass);
        assert_eq!(classify_functional(&err), Severity::Fail);
    }

    #[test]
    fn test_flood_classification() {
        let mut throttled = BTreeMap::new();
        throttled.insert(200, 10);
        throttled.insert(429, 1);
        assert_eq!(classify_flood(&throttled, 11), Severity::Pass);

        let mut open = BTreeMap::new();
        open.insert(200, 25);
        assert_eq!(classify_flood(&open, 25), Severity::Fail);
        assert_eq!(classify_flood(&open, 5), Severity::Warn);
    }

    #[test]
    fn test_edge_input_three_way() {
        assert_eq!(classify_edge_input(1, true), Severity::Fail);
        assert_eq!(classify_edge_input(0, true), Severity::Pass);
        assert_eq!(classify_edge_input(0, false), Severity::Warn);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Pass < Severity::Info);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Fail);
        assert!(Severity::Fail < Severity::Critical);
        assert!(!Severity::Pass.retains_media());
        assert!(!Severity::Info.retains_media());
        assert!(Severity::Warn.retains_media());
    }

    #[test]
    fn test_probe_failures() {
        assert_eq!(classify_probe_failure(ProbeFailure::Transport), Severity::Warn);
        assert_eq!(classify_probe_failure(ProbeFailure::Timeout), Severity::Fail);
    }
}
