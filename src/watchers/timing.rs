// Timing watcher
// Page navigation metrics plus the slowest API call, checked against thresholds

use super::{EventLog, NetworkWatcher, StepClock, StepWindow, Stamped};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Navigation metrics read from the page, in milliseconds since navigation start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationTiming {
    pub time_to_first_byte_ms: Option<u64>,
    pub dom_content_loaded_ms: Option<u64>,
    pub load_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TimingThresholds {
    pub time_to_first_byte_ms: u64,
    pub dom_content_loaded_ms: u64,
    pub load_ms: u64,
    pub api_ms: u64,
}

impl Default for TimingThresholds {
    fn default() -> Self {
        Self {
            time_to_first_byte_ms: 800,
            dom_content_loaded_ms: 2500,
            load_ms: 4000,
            api_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimingEvent {
    Sample {
        page: String,
        navigation: NavigationTiming,
        max_api_ms: Option<u64>,
    },
    Violation {
        page: String,
        metric: String,
        value_ms: u64,
        threshold_ms: u64,
    },
}

#[derive(Clone)]
pub struct TimingWatcher {
    thresholds: TimingThresholds,
    log: EventLog<TimingEvent>,
}

impl TimingWatcher {
    pub fn new(clock: StepClock, thresholds: TimingThresholds) -> Self {
        Self {
            thresholds,
            log: EventLog::new(clock),
        }
    }

    pub fn log(&self) -> &EventLog<TimingEvent> {
        &self.log
    }

    pub fn events(&self) -> Vec<Stamped<TimingEvent>> {
        self.log.snapshot()
    }

    /// Record one sample for `page` and a violation event per metric over its threshold.
    /// Returns the number of violations.
    pub fn sample(&self, page: &str, navigation: NavigationTiming, network: &NetworkWatcher) -> usize {
        let max_api_ms = network.max_duration_ms();
        let checks = [
            ("time_to_first_byte", navigation.time_to_first_byte_ms, self.thresholds.time_to_first_byte_ms),
            ("dom_content_loaded", navigation.dom_content_loaded_ms, self.thresholds.dom_content_loaded_ms),
            ("load", navigation.load_ms, self.thresholds.load_ms),
            ("max_api_duration", max_api_ms, self.thresholds.api_ms),
        ];

        self.log.record(TimingEvent::Sample {
            page: page.to_string(),
            navigation,
            max_api_ms,
        });

        let mut violations = 0;
        for (metric, value, threshold) in checks {
            if let Some(value) = value.filter(|v| *v > threshold) {
                warn!("{} {} took {} ms (threshold {} ms)", page, metric, value, threshold);
                self.log.record(TimingEvent::Violation {
                    page: page.to_string(),
                    metric: metric.to_string(),
                    value_ms: value,
                    threshold_ms: threshold,
                });
                violations += 1;
            }
        }
        violations
    }

    pub fn violations_in(&self, window: &StepWindow) -> usize {
        self.log
            .in_window(window)
            .iter()
            .filter(|e| matches!(e.event, TimingEvent::Violation { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Method, ProbeContext};
    use crate::watchers::{NetworkPolicy, ObservedResponse, StepId};

    #[test]
    fn test_violations_flagged_per_metric() {
        let clock = StepClock::new();
        let network = NetworkWatcher::new(clock.clone(), NetworkPolicy::default());
        network.observe(
            StepId(0),
            &ProbeContext::idle(),
            ObservedResponse {
                method: Method::GET,
                url: "http://a/api/jobs",
                status: 200,
                headers: &[],
                body: "",
                duration_ms: 3000,
            },
        );
        let timing = TimingWatcher::new(clock.clone(), TimingThresholds::default());

        let step = clock.begin(ProbeContext::new("candidate", "login"));
        let violations = timing.sample(
            "/login",
            NavigationTiming {
                time_to_first_byte_ms: Some(100),
                dom_content_loaded_ms: Some(3000),
                load_ms: Some(1000),
            },
            &network,
        );
        let window = clock.finish(step);

        assert_eq!(violations, 2);
        assert_eq!(timing.violations_in(&window), 2);
        assert_eq!(timing.events().len(), 3);
    }

    #[test]
    fn test_missing_metrics_never_violate() {
        let clock = StepClock::new();
        let network = NetworkWatcher::new(clock.clone(), NetworkPolicy::default());
        let timing = TimingWatcher::new(clock, TimingThresholds::default());
        assert_eq!(timing.sample("/", NavigationTiming::default(), &network), 0);
    }
}
