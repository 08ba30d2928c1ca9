// Flood/concurrency probe
// Bursts of identical requests looking for a 429; not a load test
//
// Every request is counted: transport failures land under status 0, so the histogram of a
// scenario always sums to its request count.

use super::{blocked_finding, ProbeKit, Routes};
use crate::auth::{login_request, Account};
use crate::browser::BrowserDriver;
use crate::engine::{HttpTarget, ProbeRequest, ProbeResponse, StepTag};
use crate::error::EngineError;
use crate::evidence::ExchangeRecord;
use crate::models::{Finding, Method, ProbeContext};
use crate::seed::SeedState;
use crate::verdict::{classify_flood, Severity};
use serde_json::json;
use std::collections::BTreeMap;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub const SCOPE: &str = "flood";

/// Histogram key for requests that never produced a status.
pub const NO_STATUS: u16 = 0;

const THROTTLED: u16 = 429;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodMode {
    Sequential,
    /// All requests in flight at once.
    Concurrent,
}

impl FloodMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FloodMode::Sequential => "sequential",
            FloodMode::Concurrent => "concurrent",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FloodScenario {
    pub name: String,
    pub role: String,
    pub request: ProbeRequest,
    pub count: usize,
    pub mode: FloodMode,
    pub blocked: Option<String>,
}

impl FloodScenario {
    pub fn new(name: impl Into<String>, role: impl Into<String>, request: ProbeRequest, count: usize, mode: FloodMode) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            request,
            count,
            mode,
            blocked: None,
        }
    }
}

/// What one burst produced.
#[derive(Debug, Clone, Default)]
pub struct FloodOutcome {
    pub histogram: BTreeMap<u16, usize>,
    /// 1-based position of the first 429, by send order.
    pub first_throttled: Option<usize>,
    /// First 429 if any, otherwise the last response seen.
    pub sample: Option<ProbeResponse>,
    pub last_error: Option<String>,
}

impl FloodOutcome {
    pub fn total(&self) -> usize {
        self.histogram.values().sum()
    }

    fn record(&mut self, index: usize, result: Result<ProbeResponse, String>) {
        match result {
            Ok(resp) => {
                *self.histogram.entry(resp.status).or_insert(0) += 1;
                if resp.status == THROTTLED {
                    if self.first_throttled.map_or(true, |first| index + 1 < first) {
                        self.first_throttled = Some(index + 1);
                        self.sample = Some(resp);
                    }
                } else if self.first_throttled.is_none() {
                    self.sample = Some(resp);
                }
            }
            Err(e) => {
                *self.histogram.entry(NO_STATUS).or_insert(0) += 1;
                self.last_error = Some(e);
            }
        }
    }

    /// `200×6, 429×19`
    pub fn describe(&self) -> String {
        self.histogram
            .iter()
            .map(|(status, n)| format!("{}×{}", status, n))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Three bursts: failed logins one after another and all at once, then concurrent reads.
pub fn default_scenarios(routes: &Routes, seed: &SeedState, burst: usize) -> Vec<FloodScenario> {
    let wrong = Account::new("candidate", "gauntlet+flood@example.test", "definitely-not-the-password");
    let login = login_request(routes.prefix(), &wrong);
    let mut read = FloodScenario::new(
        "api-read-burst-concurrent",
        "candidate",
        ProbeRequest::new(Method::GET, routes.jobs()).bearer(seed.token("candidate").map(String::from)),
        burst,
        FloodMode::Concurrent,
    );
    if seed.token("candidate").is_none() {
        read.blocked = Some("no credential for role `candidate`".to_string());
    }
    vec![
        FloodScenario::new("login-burst-sequential", "candidate", login.clone(), burst, FloodMode::Sequential),
        FloodScenario::new("login-burst-concurrent", "candidate", login, burst, FloodMode::Concurrent),
        read,
    ]
}

/// Send the scenario's requests, all charged to `tag`'s step.
pub async fn fire<T: HttpTarget>(target: &T, scenario: &FloodScenario, tag: &StepTag) -> FloodOutcome {
    let mut outcome = FloodOutcome::default();
    match scenario.mode {
        FloodMode::Sequential => {
            for index in 0..scenario.count {
                let result = target
                    .send(scenario.request.clone(), tag.clone())
                    .await
                    .map_err(|e| e.to_string());
                outcome.record(index, result);
            }
        }
        FloodMode::Concurrent => {
            let mut set = JoinSet::new();
            for index in 0..scenario.count {
                let target = target.clone();
                let request = scenario.request.clone();
                let tag = tag.clone();
                set.spawn(async move {
                    let result = target.send(request, tag).await.map_err(|e| e.to_string());
                    (index, result)
                });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((index, result)) => outcome.record(index, result),
                    Err(e) => outcome.record(scenario.count, Err(format!("task failed: {}", e))),
                }
            }
        }
    }
    outcome
}

pub async fn run<T: HttpTarget, B: BrowserDriver>(kit: &ProbeKit<'_, T, B>, scenarios: Vec<FloodScenario>) -> Vec<Finding> {
    let mut findings = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        findings.push(run_scenario(kit, &scenario).await);
    }
    findings
}

pub async fn run_scenario<T: HttpTarget, B: BrowserDriver>(kit: &ProbeKit<'_, T, B>, scenario: &FloodScenario) -> Finding {
    let context = ProbeContext::new(&scenario.role, SCOPE);
    if let Some(reason) = &scenario.blocked {
        return blocked_finding(&context, &scenario.name, reason);
    }

    let step = kit.watchers.begin(context.clone());
    let outcome = fire(kit.target, scenario, &StepTag::of(&step)).await;
    kit.watchers.finish(step);

    if outcome.total() != scenario.count {
        warn!("{}: histogram holds {} of {} requests", scenario.name, outcome.total(), scenario.count);
    }

    let severity = classify_flood(&outcome.histogram, scenario.count);
    let mut details = format!(
        "{} {} {} {}: {}",
        scenario.count,
        scenario.mode.as_str(),
        scenario.request.method,
        scenario.request.path,
        outcome.describe()
    );
    match (severity, outcome.first_throttled) {
        (Severity::Pass, Some(first)) => details.push_str(&format!("; throttled from request #{}", first)),
        (_, None) => details.push_str("; no 429 observed, rate limiting missing"),
        _ => {}
    }

    let url = kit.target.url_for(&scenario.request.path);
    let fallback_error = EngineError::Transport(outcome.last_error.clone().unwrap_or_else(|| "no response".to_string()));
    let sample = outcome.sample.as_ref().ok_or(&fallback_error);
    let histogram: BTreeMap<String, usize> = outcome
        .histogram
        .iter()
        .map(|(status, n)| (status.to_string(), *n))
        .collect();
    let record = ExchangeRecord::capture(&context, &scenario.name, &url, &scenario.request, sample).with_notes(json!({
        "mode": scenario.mode.as_str(),
        "count": scenario.count,
        "histogram": histogram,
        "firstThrottledAt": outcome.first_throttled,
        "lastError": outcome.last_error,
    }));

    let finding = kit.finish(&context, &scenario.name, severity, details, &record).await;
    info!("[{}] {}×{} {}: {}", severity, scenario.count, scenario.request.method, url, scenario.name);
    finding
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_counts_errors_under_zero() {
        let mut outcome = FloodOutcome::default();
        outcome.record(0, Ok(ProbeResponse::new(200, json!({}))));
        outcome.record(1, Err("connection reset".to_string()));
        outcome.record(2, Ok(ProbeResponse::new(429, json!({}))));
        assert_eq!(outcome.total(), 3);
        assert_eq!(outcome.histogram.get(&NO_STATUS), Some(&1));
        assert_eq!(outcome.first_throttled, Some(3));
        assert_eq!(outcome.sample.as_ref().map(|r| r.status), Some(429));
        assert_eq!(outcome.describe(), "0×1, 200×1, 429×1");
    }

    #[test]
    fn test_first_throttled_is_lowest_index() {
        let mut outcome = FloodOutcome::default();
        // concurrent completions arrive out of order
        outcome.record(7, Ok(ProbeResponse::new(429, json!({}))));
        outcome.record(3, Ok(ProbeResponse::new(429, json!({}))));
        outcome.record(1, Ok(ProbeResponse::new(200, json!({}))));
        assert_eq!(outcome.first_throttled, Some(4));
        assert_eq!(outcome.sample.as_ref().map(|r| r.status), Some(429));
    }

    #[test]
    fn test_default_scenarios_block_reads_without_token() {
        let routes = Routes::new("/api");
        let scenarios = default_scenarios(&routes, &SeedState::new(), 25);
        assert_eq!(scenarios.len(), 3);
        assert!(scenarios[0].blocked.is_none());
        assert_eq!(scenarios[1].mode, FloodMode::Concurrent);
        assert!(scenarios[2].blocked.is_some());
        assert!(scenarios.iter().all(|s| s.count == 25));
    }
}
