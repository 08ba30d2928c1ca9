// Functional UI flows for Gauntlet
// Ordinary user journeys driven through the browser. Outcomes are PASS or FAIL only.

use crate::auth::Account;
use crate::browser::{finish_step, BrowserDriver};
use crate::config::LoginForm;
use crate::error::BrowserError;
use crate::evidence::EvidenceStore;
use crate::models::{EvidenceRefs, Finding, ProbeContext};
use crate::verdict::classify_functional;
use crate::watchers::{DiagnosticMessage, Stamped, TimingEvent, Watchers};
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

pub const SCOPE_PREFIX: &str = "flow";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowStep {
    Navigate(String),
    WaitFor(String),
    /// `secret` values are masked in every trace and log line.
    Fill { selector: String, value: String, secret: bool },
    Click(String),
}

impl FlowStep {
    pub fn describe(&self) -> String {
        match self {
            FlowStep::Navigate(url) => format!("navigate {}", url),
            FlowStep::WaitFor(selector) => format!("wait for {}", selector),
            FlowStep::Fill { selector, secret: true, .. } => format!("fill {} with ******", selector),
            FlowStep::Fill { selector, value, .. } => format!("fill {} with {:?}", selector, value),
            FlowStep::Click(selector) => format!("click {}", selector),
        }
    }

    async fn execute<B: BrowserDriver>(&self, browser: &B, wait: Duration) -> Result<(), BrowserError> {
        match self {
            FlowStep::Navigate(url) => browser.navigate(url).await,
            FlowStep::WaitFor(selector) => browser.wait_for(selector, wait).await,
            FlowStep::Fill { selector, value, .. } => browser.fill(selector, value).await,
            FlowStep::Click(selector) => browser.click(selector).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Flow {
    pub name: String,
    pub role: String,
    pub steps: Vec<FlowStep>,
}

/// Sign in through the login page and wait for the signed-in marker.
pub fn login_flow(account: &Account, form: &LoginForm) -> Flow {
    Flow {
        name: "login".to_string(),
        role: account.role.clone(),
        steps: vec![
            FlowStep::Navigate(form.page.clone()),
            FlowStep::WaitFor(form.email.clone()),
            FlowStep::Fill {
                selector: form.email.clone(),
                value: account.email.clone(),
                secret: false,
            },
            FlowStep::Fill {
                selector: form.password.clone(),
                value: account.password.clone(),
                secret: true,
            },
            FlowStep::Click(form.submit.clone()),
            FlowStep::WaitFor(form.logged_in_marker.clone()),
        ],
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct StepTrace {
    action: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FlowTrace {
    role: String,
    flow: String,
    steps: Vec<StepTrace>,
    diagnostics: Vec<Stamped<DiagnosticMessage>>,
    timing: Vec<Stamped<TimingEvent>>,
}

/// Run a flow as one step. Each action is bounded by `action_timeout`; the first failure
/// ends the flow.
pub async fn run_flow<B: BrowserDriver>(
    browser: &B,
    watchers: &Watchers,
    evidence: &EvidenceStore,
    flow: &Flow,
    action_timeout: Duration,
) -> Finding {
    let context = ProbeContext::new(&flow.role, format!("{}-{}", SCOPE_PREFIX, flow.name));
    let step = watchers.begin(context.clone());

    let mut trace = Vec::with_capacity(flow.steps.len());
    let mut outcome: Result<(), String> = Ok(());
    for (i, flow_step) in flow.steps.iter().enumerate() {
        let result = match timeout(action_timeout, flow_step.execute(browser, action_timeout)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("timed out after {} ms", action_timeout.as_millis())),
        };
        trace.push(StepTrace {
            action: flow_step.describe(),
            ok: result.is_ok(),
            error: result.as_ref().err().cloned(),
        });
        if let Err(e) = result {
            outcome = Err(format!("step {} ({}) failed: {}", i + 1, flow_step.describe(), e));
            break;
        }
    }

    let mut violations = 0;
    if outcome.is_ok() {
        match browser.navigation_timing().await {
            Ok(nav) => violations = watchers.timing.sample(&flow.name, nav, &watchers.network),
            Err(e) => warn!("navigation timing unavailable for {}: {}", context, e),
        }
    }
    let window = finish_step(browser, watchers, step).await;

    let severity = classify_functional(&outcome);
    let details = match &outcome {
        Ok(()) if violations > 0 => format!(
            "{} steps completed; {} timing threshold(s) exceeded",
            flow.steps.len(),
            violations
        ),
        Ok(()) => format!("{} steps completed", flow.steps.len()),
        Err(e) => e.clone(),
    };

    let log = evidence.try_write_log(
        &context,
        &flow.name,
        &FlowTrace {
            role: flow.role.clone(),
            flow: flow.name.clone(),
            steps: trace,
            diagnostics: watchers.diagnostics.log().in_window(&window),
            timing: watchers.timing.log().in_window(&window),
        },
    );
    let media = evidence.capture_media(browser, &context, &flow.name, severity).await;
    info!("[{}] {} {}", severity, context, details);

    Finding::builder(&context.role, &context.flow, &flow.name, severity)
        .details(details)
        .evidence(EvidenceRefs { log, ..media })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::Severity;
    use crate::watchers::{BrowserLogs, NavigationTiming, NetworkPolicy, TimingThresholds};
    use std::sync::{Arc, Mutex};

    /// Records every action; fails clicks on one selector. `pending` is handed over on drain.
    #[derive(Default)]
    struct Scripted {
        actions: Arc<Mutex<Vec<String>>>,
        fail_click: Option<String>,
        pending: Mutex<BrowserLogs>,
    }

    impl BrowserDriver for Scripted {
        async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
            self.actions.lock().unwrap().push(format!("navigate {}", url));
            Ok(())
        }

        async fn fill(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
            self.actions.lock().unwrap().push(format!("fill {}={}", selector, value));
            Ok(())
        }

        async fn click(&self, selector: &str) -> Result<(), BrowserError> {
            if self.fail_click.as_deref() == Some(selector) {
                return Err(BrowserError::NoSuchElement(selector.to_string()));
            }
            self.actions.lock().unwrap().push(format!("click {}", selector));
            Ok(())
        }

        async fn wait_for(&self, _selector: &str, _timeout: Duration) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn read_text(&self, _selector: &str) -> Result<Option<String>, BrowserError> {
            Ok(None)
        }

        async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
            Ok(vec![0x89, b'P', b'N', b'G'])
        }

        async fn page_content(&self) -> Result<String, BrowserError> {
            Ok("<html></html>".to_string())
        }

        async fn navigation_timing(&self) -> Result<NavigationTiming, BrowserError> {
            Ok(NavigationTiming::default())
        }

        async fn drain_logs(&self) -> Result<BrowserLogs, BrowserError> {
            Ok(std::mem::take(&mut *self.pending.lock().unwrap()))
        }
    }

    fn account() -> Account {
        Account::new("candidate", "c@example.test", "s3cret-pass")
    }

    #[test]
    fn test_password_never_described() {
        let flow = login_flow(&account(), &LoginForm::default());
        let described: Vec<String> = flow.steps.iter().map(FlowStep::describe).collect();
        assert!(described.iter().all(|d| !d.contains("s3cret-pass")));
        assert!(described.iter().any(|d| d.contains("c@example.test")));
    }

    #[tokio::test]
    async fn test_login_flow_passes() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = EvidenceStore::with_date(dir.path(), "2024-01-01");
        let watchers = Watchers::new(NetworkPolicy::default(), TimingThresholds::default());
        let browser = Scripted::default();

        let flow = login_flow(&account(), &LoginForm::default());
        let finding = run_flow(&browser, &watchers, &evidence, &flow, Duration::from_secs(1)).await;

        assert_eq!(finding.severity(), Severity::Pass);
        assert!(finding.evidence().screenshot.is_none());
        let log = finding.evidence().log.clone().unwrap();
        let written = std::fs::read_to_string(log).unwrap();
        assert!(!written.contains("s3cret-pass"));
        assert_eq!(browser.actions.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_step_fails_flow_with_media() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = EvidenceStore::with_date(dir.path(), "2024-01-01");
        let watchers = Watchers::new(NetworkPolicy::default(), TimingThresholds::default());
        let form = LoginForm::default();
        let browser = Scripted {
            fail_click: Some(form.submit.clone()),
            ..Default::default()
        };

        let finding = run_flow(&browser, &watchers, &evidence, &login_flow(&account(), &form), Duration::from_secs(1)).await;

        assert_eq!(finding.severity(), Severity::Fail);
        assert!(finding.details().starts_with("step 5"));
        assert!(finding.evidence().screenshot.is_some());
        assert!(finding.evidence().snapshot.is_some());
    }

    #[tokio::test]
    async fn test_buffered_console_output_lands_in_flow_trace() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = EvidenceStore::with_date(dir.path(), "2024-01-01");
        let watchers = Watchers::new(NetworkPolicy::default(), TimingThresholds::default());
        let browser = Scripted::default();
        browser
            .pending
            .lock()
            .unwrap()
            .console
            .push(DiagnosticMessage::error("Uncaught ReferenceError: analytics is not defined"));

        let flow = login_flow(&account(), &LoginForm::default());
        let finding = run_flow(&browser, &watchers, &evidence, &flow, Duration::from_secs(1)).await;

        let written = std::fs::read_to_string(finding.evidence().log.clone().unwrap()).unwrap();
        assert!(written.contains("analytics is not defined"));
        let recorded = watchers.diagnostics.events();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].context.flow, "flow-login");
    }
}
