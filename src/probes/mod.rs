// Attack and edge-case probes
//
// Every API probe family is a fixed, declarative matrix of ProbeCase values run through
// ProbeKit::run_case:
//
//   send → classify (verdict.rs) → redacted exchange log → media if non-passing → Finding
//
// - forgery:  forged/absent/revoked credentials against a protected endpoint
// - idor:     one actor addressing another actor's or tenant's resources
// - privilege: actions the actor's role must not be able to perform
// - upload:   adversarial multipart submissions
// - flood:    bursts looking for a 429
// - fuzz:     hostile strings and files through the UI (three-way rule)

pub mod flood;
pub mod forgery;
pub mod fuzz;
pub mod idor;
pub mod privilege;
pub mod upload;

use crate::browser::BrowserDriver;
use crate::engine::{HttpTarget, ProbeRequest, StepTag};
use crate::error::EngineError;
use crate::evidence::{redact_json, scrub_text, scrub_value, EvidenceStore, ExchangeRecord};
use crate::models::{EvidenceRefs, Finding, ProbeContext};
use crate::response_analysis::{is_error_body, summarize_body};
use crate::seed::SeedState;
use crate::verdict::{classify_adversarial, classify_probe_failure, ProbeFailure, RejectionPolicy, Severity};
use crate::watchers::Watchers;
use tracing::{info, warn};

const DETAIL_BODY_CHARS: usize = 160;

/// Paths of the target API under its prefix.
#[derive(Debug, Clone)]
pub struct Routes {
    prefix: String,
}

impl Routes {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn path(&self, p: &str) -> String {
        format!("{}{}", self.prefix, p)
    }

    pub fn users_me(&self) -> String {
        self.path("/users/me")
    }

    pub fn applications(&self) -> String {
        self.path("/applications")
    }

    pub fn application(&self, id: &str) -> String {
        self.path(&format!("/applications/{}", id))
    }

    pub fn application_status(&self, id: &str) -> String {
        self.path(&format!("/applications/{}/status", id))
    }

    pub fn cv_upload(&self) -> String {
        self.path("/cv/upload")
    }

    pub fn jobs(&self) -> String {
        self.path("/jobs")
    }

    pub fn job(&self, id: &str) -> String {
        self.path(&format!("/jobs/{}", id))
    }

    pub fn company_candidates(&self, company_id: &str) -> String {
        self.path(&format!("/companies/{}/candidates", company_id))
    }

    pub fn platform_companies(&self) -> String {
        self.path("/platform/companies")
    }

    pub fn candidate_cv(&self, candidate_id: &str) -> String {
        self.path(&format!("/candidates/{}/cv", candidate_id))
    }

    pub fn login(&self) -> String {
        self.path("/auth/login")
    }
}

/// One row of a probe matrix.
#[derive(Debug, Clone)]
pub struct ProbeCase {
    pub name: String,
    /// Actor whose credential (or forgery of it) is used.
    pub role: String,
    pub request: ProbeRequest,
    pub policy: RejectionPolicy,
    /// Why the case cannot be sent, e.g. no token for the role.
    pub blocked: Option<String>,
}

impl ProbeCase {
    pub fn new(name: impl Into<String>, role: impl Into<String>, request: ProbeRequest, policy: RejectionPolicy) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            request,
            policy,
            blocked: None,
        }
    }

    /// Case sent with `role`'s seeded token; blocked when the role has none.
    pub fn as_role(
        name: impl Into<String>,
        role: &str,
        request: ProbeRequest,
        policy: RejectionPolicy,
        seed: &SeedState,
    ) -> Self {
        let token = seed.token(role).map(|t| t.to_string());
        let blocked = token
            .is_none()
            .then(|| format!("no credential for role `{}`", role));
        Self {
            blocked,
            ..Self::new(name, role, request.bearer(token), policy)
        }
    }
}

/// What every probe needs: the target, the browser for media, evidence and watchers.
pub struct ProbeKit<'a, T, B> {
    pub target: &'a T,
    pub browser: &'a B,
    pub evidence: &'a EvidenceStore,
    pub watchers: &'a Watchers,
}

impl<'a, T: HttpTarget, B: BrowserDriver> ProbeKit<'a, T, B> {
    pub fn new(target: &'a T, browser: &'a B, evidence: &'a EvidenceStore, watchers: &'a Watchers) -> Self {
        Self {
            target,
            browser,
            evidence,
            watchers,
        }
    }

    /// Run each case exactly once, in order.
    pub async fn run_matrix(&self, scope: &str, cases: Vec<ProbeCase>) -> Vec<Finding> {
        let mut findings = Vec::with_capacity(cases.len());
        for case in cases {
            findings.push(self.run_case(scope, case).await);
        }
        findings
    }

    pub async fn run_case(&self, scope: &str, case: ProbeCase) -> Finding {
        let context = ProbeContext::new(&case.role, scope);
        if let Some(reason) = &case.blocked {
            return blocked_finding(&context, &case.name, reason);
        }

        let step = self.watchers.begin(context.clone());
        let outcome = self.target.send(case.request.clone(), StepTag::of(&step)).await;
        self.watchers.finish(step);

        let url = self.target.url_for(&case.request.path);
        let (severity, details) = match &outcome {
            Ok(resp) => {
                let severity = classify_adversarial(resp.status, case.policy, 1);
                let mut details = format!("{} {} -> {}", case.request.method, case.request.path, resp.status);
                if severity == Severity::Critical {
                    details.push_str(": request was accepted");
                    if resp.body.as_json().map(is_error_body).unwrap_or(false) {
                        details.push_str(" (body is error-shaped, treated as accepted)");
                    }
                } else if severity != Severity::Pass {
                    details.push_str(&format!(
                        ": expected rejection, got {}",
                        summarize_body(
                            &scrub_value(&redact_json(&resp.body.to_value()), case.request.token.as_deref()),
                            DETAIL_BODY_CHARS
                        )
                    ));
                }
                (severity, details)
            }
            Err(e) => (
                classify_probe_failure(failure_kind(e)),
                format!("{} {} failed: {}", case.request.method, case.request.path, e),
            ),
        };

        let details = scrub_text(&details, case.request.token.as_deref());
        let record = ExchangeRecord::capture(&context, &case.name, &url, &case.request, outcome.as_ref());
        let finding = self.finish(&context, &case.name, severity, details, &record).await;
        info!("[{}] {} {}: {}", severity, case.request.method, url, case.name);
        finding
    }

    /// Write the exchange log and, for non-passing severities, media; build the finding.
    pub(crate) async fn finish(
        &self,
        context: &ProbeContext,
        case: &str,
        severity: Severity,
        details: String,
        record: &ExchangeRecord,
    ) -> Finding {
        let log = self.evidence.try_write_exchange(context, case, record);
        let media = self
            .evidence
            .capture_media(self.browser, context, case, severity)
            .await;
        Finding::builder(&context.role, &context.flow, case, severity)
            .details(details)
            .evidence(EvidenceRefs { log, ..media })
            .build()
    }
}

pub(crate) fn failure_kind(err: &EngineError) -> ProbeFailure {
    match err {
        EngineError::Timeout(_) => ProbeFailure::Timeout,
        _ => ProbeFailure::Transport,
    }
}

pub(crate) fn blocked_finding(context: &ProbeContext, case: &str, reason: &str) -> Finding {
    warn!("[{}] {} {}: not executed, {}", Severity::Warn, context, case, reason);
    Finding::builder(&context.role, &context.flow, case, Severity::Warn)
        .details(format!("not executed: {}", reason))
        .build()
}
