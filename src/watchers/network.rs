// Network-response watcher
// Flags every observed API response against four independent conditions

use super::{EventLog, StepClock, StepId, Stamped};
use crate::models::{Method, ProbeContext};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

lazy_static! {
    // Matches JSON keys only ("key":), so `"password_policy"` or a value that happens to
    // contain the word is not flagged. Heuristic lint, not a guarantee.
    static ref SENSITIVE_KEY: Regex = Regex::new(
        r#"(?i)"(password|passwd|pwd|secret|client_?secret|api_?key|access_?token|refresh_?token|id_?token|token|ssn|social_?security_?number|national_?id|card_?number|credit_?card)"\s*:"#
    ).unwrap();
}

pub const DEFAULT_SECURITY_HEADERS: [&str; 4] = [
    "content-security-policy",
    "x-content-type-options",
    "x-frame-options",
    "strict-transport-security",
];

#[derive(Debug, Clone)]
pub struct NetworkPolicy {
    pub slow_threshold_ms: u64,
    /// Lower-case header names every response should carry.
    pub required_headers: Vec<String>,
    /// Path suffixes whose bodies legitimately carry credentials (login, register).
    pub sensitive_exempt_paths: Vec<String>,
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        Self {
            slow_threshold_ms: 2000,
            required_headers: DEFAULT_SECURITY_HEADERS.iter().map(|h| h.to_string()).collect(),
            sensitive_exempt_paths: vec!["/auth/login".to_string(), "/auth/register".to_string()],
        }
    }
}

/// A response as seen by the HTTP layer.
#[derive(Debug, Clone)]
pub struct ObservedResponse<'a> {
    pub method: Method,
    pub url: &'a str,
    pub status: u16,
    pub headers: &'a [(String, String)],
    pub body: &'a str,
    pub duration_ms: u64,
}

/// An XHR/fetch response the page itself received, read from the browser's network log.
/// The browser does not hand over bodies, so only status, timing and headers are judged.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResponse {
    pub method: Method,
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub duration_ms: u64,
}

impl PageResponse {
    pub fn observed(&self) -> ObservedResponse<'_> {
        ObservedResponse {
            method: self.method,
            url: &self.url,
            status: self.status,
            headers: &self.headers,
            body: "",
            duration_ms: self.duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetworkIssue {
    ErrorStatus {
        method: Method,
        url: String,
        status: u16,
    },
    Slow {
        method: Method,
        url: String,
        duration_ms: u64,
        threshold_ms: u64,
    },
    MissingSecurityHeaders {
        url: String,
        missing: Vec<String>,
    },
    SensitiveData {
        url: String,
        keys: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSample {
    pub method: Method,
    pub url: String,
    pub status: u16,
    pub duration_ms: u64,
}

#[derive(Clone)]
pub struct NetworkWatcher {
    policy: NetworkPolicy,
    issues: EventLog<NetworkIssue>,
    samples: EventLog<ResponseSample>,
}

impl NetworkWatcher {
    pub fn new(clock: StepClock, policy: NetworkPolicy) -> Self {
        Self {
            policy,
            issues: EventLog::new(clock.clone()),
            samples: EventLog::new(clock),
        }
    }

    /// The anomaly log; one entry per flagged condition.
    pub fn log(&self) -> &EventLog<NetworkIssue> {
        &self.issues
    }

    pub fn issues(&self) -> Vec<Stamped<NetworkIssue>> {
        self.issues.snapshot()
    }

    pub fn samples(&self) -> Vec<Stamped<ResponseSample>> {
        self.samples.snapshot()
    }

    /// Record a response issued by `step`. Returns the number of issues raised.
    pub fn observe(&self, step: StepId, context: &ProbeContext, response: ObservedResponse<'_>) -> usize {
        self.samples.record_for(
            step,
            context.clone(),
            ResponseSample {
                method: response.method,
                url: response.url.to_string(),
                status: response.status,
                duration_ms: response.duration_ms,
            },
        );

        let issues = inspect(&self.policy, &response);
        let raised = issues.len();
        for issue in issues {
            debug!(step = step.0, "network issue: {:?}", issue);
            self.issues.record_for(step, context.clone(), issue);
        }
        raised
    }

    /// Largest response duration seen so far.
    pub fn max_duration_ms(&self) -> Option<u64> {
        self.samples
            .snapshot()
            .iter()
            .map(|s| s.event.duration_ms)
            .max()
    }
}

/// Evaluate each condition separately; every hit becomes its own issue.
pub fn inspect(policy: &NetworkPolicy, response: &ObservedResponse<'_>) -> Vec<NetworkIssue> {
    let mut issues = Vec::new();

    if response.status >= 400 {
        issues.push(NetworkIssue::ErrorStatus {
            method: response.method,
            url: response.url.to_string(),
            status: response.status,
        });
    }

    if response.duration_ms > policy.slow_threshold_ms {
        issues.push(NetworkIssue::Slow {
            method: response.method,
            url: response.url.to_string(),
            duration_ms: response.duration_ms,
            threshold_ms: policy.slow_threshold_ms,
        });
    }

    let missing: Vec<String> = policy
        .required_headers
        .iter()
        .filter(|required| {
            !response
                .headers
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case(required))
        })
        .cloned()
        .collect();
    if !missing.is_empty() {
        issues.push(NetworkIssue::MissingSecurityHeaders {
            url: response.url.to_string(),
            missing,
        });
    }

    let path = url_path(response.url);
    let exempt = policy
        .sensitive_exempt_paths
        .iter()
        .any(|p| path.ends_with(p.as_str()));
    if !exempt {
        let keys = sensitive_keys(response.body);
        if !keys.is_empty() {
            issues.push(NetworkIssue::SensitiveData {
                url: response.url.to_string(),
                keys,
            });
        }
    }

    issues
}

/// Distinct sensitive-looking JSON keys in `body`, lower-cased, in order of appearance.
pub fn sensitive_keys(body: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for cap in SENSITIVE_KEY.captures_iter(body) {
        let key = cap[1].to_ascii_lowercase();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn url_path(url: &str) -> &str {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let path = without_scheme
        .find('/')
        .map(|i| &without_scheme[i..])
        .unwrap_or("/");
    path.split(['?', '#']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_headers() -> Vec<(String, String)> {
        DEFAULT_SECURITY_HEADERS
            .iter()
            .map(|h| (h.to_uppercase(), "x".to_string()))
            .collect()
    }

    fn response<'a>(url: &'a str, status: u16, headers: &'a [(String, String)], body: &'a str, ms: u64) -> ObservedResponse<'a> {
        ObservedResponse {
            method: Method::GET,
            url,
            status,
            headers,
            body,
            duration_ms: ms,
        }
    }

    #[test]
    fn test_clean_response_raises_nothing() {
        let headers = all_headers();
        let r = response("http://app/api/jobs", 200, &headers, r#"{"jobs":[]}"#, 10);
        assert!(inspect(&NetworkPolicy::default(), &r).is_empty());
    }

    #[test]
    fn test_each_condition_is_separate_issue() {
        let r = response(
            "http://app/api/users/me",
            500,
            &[],
            r#"{"email":"a@b.c","password":"hunter2"}"#,
            5000,
        );
        let issues = inspect(&NetworkPolicy::default(), &r);
        assert_eq!(issues.len(), 4);
        assert!(matches!(issues[0], NetworkIssue::ErrorStatus { status: 500, .. }));
        assert!(matches!(issues[1], NetworkIssue::Slow { duration_ms: 5000, .. }));
        match &issues[2] {
            NetworkIssue::MissingSecurityHeaders { missing, .. } => assert_eq!(missing.len(), 4),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            issues[3],
            NetworkIssue::SensitiveData {
                url: "http://app/api/users/me".to_string(),
                keys: vec!["password".to_string()],
            }
        );
    }

    #[test]
    fn test_sensitive_keys_heuristic() {
        assert!(sensitive_keys(r#"{"password_policy":"strong"}"#).is_empty());
        assert!(sensitive_keys(r#"{"note":"reset your password"}"#).is_empty());
        assert_eq!(sensitive_keys(r#"{"accessToken":"x"}"#), vec!["accesstoken"]);
        assert_eq!(
            sensitive_keys(r#"{"user":{"API_KEY" : "x","token":"y","apiKey":"z"}}"#),
            vec!["api_key", "token", "apikey"]
        );
    }

    #[test]
    fn test_login_path_exempt_from_sensitive_scan() {
        let headers = all_headers();
        let r = response("http://app/api/auth/login?next=/", 200, &headers, r#"{"token":"abc"}"#, 10);
        assert!(inspect(&NetworkPolicy::default(), &r).is_empty());
    }

    #[test]
    fn test_max_duration() {
        let clock = StepClock::new();
        let watcher = NetworkWatcher::new(clock, NetworkPolicy::default());
        let headers = all_headers();
        let ctx = ProbeContext::new("admin", "x");
        watcher.observe(StepId(1), &ctx, response("http://a/x", 200, &headers, "", 40));
        watcher.observe(StepId(1), &ctx, response("http://a/y", 200, &headers, "", 120));
        assert_eq!(watcher.max_duration_ms(), Some(120));
        assert!(watcher.issues().is_empty());
        assert_eq!(watcher.samples().len(), 2);
    }
}
