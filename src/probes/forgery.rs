// Credential-forgery probe
// Six forged or absent credentials against one protected endpoint, then a token replayed
// after its session was logged out

use super::{blocked_finding, failure_kind, ProbeCase, ProbeKit, Routes};
use crate::auth::logout_request;
use crate::browser::BrowserDriver;
use crate::engine::{HttpTarget, ProbeRequest, StepTag};
use crate::evidence::{scrub_text, ExchangeRecord};
use crate::models::{Finding, Method, ProbeContext};
use crate::token::{ForgeKit, TokenVariant};
use crate::verdict::{classify_adversarial, classify_probe_failure, RejectionPolicy, Severity};
use serde_json::json;
use tracing::{info, warn};

pub const SCOPE: &str = "credential-forgery";
pub const REUSED_AFTER_LOGOUT: &str = "reused-after-logout";

/// One case per [`TokenVariant`], all against `GET /users/me`. A variant that cannot be
/// forged from `source` (e.g. it does not decode) is blocked rather than skipped.
pub fn matrix(routes: &Routes, role: &str, source: &str, kit: &ForgeKit) -> Vec<ProbeCase> {
    TokenVariant::ALL
        .iter()
        .map(|variant| {
            let request = ProbeRequest::new(Method::GET, routes.users_me());
            match kit.forge(*variant, source) {
                Ok(token) => ProbeCase::new(
                    variant.label(),
                    role,
                    request.bearer(token),
                    RejectionPolicy::AuthOnly,
                ),
                Err(e) => ProbeCase {
                    blocked: Some(format!("could not forge from source token: {}", e)),
                    ..ProbeCase::new(variant.label(), role, request, RejectionPolicy::AuthOnly)
                },
            }
        })
        .collect()
}

/// Run the six variants, then the logout replay with `disposable` (a session that is safe
/// to end). Without one, the replay case is reported as not executed.
pub async fn run<T: HttpTarget, B: BrowserDriver>(
    kit: &ProbeKit<'_, T, B>,
    routes: &Routes,
    role: &str,
    source: &str,
    forge: &ForgeKit,
    disposable: Option<String>,
) -> Vec<Finding> {
    let mut findings = kit.run_matrix(SCOPE, matrix(routes, role, source, forge)).await;
    findings.push(reused_after_logout(kit, routes, role, disposable).await);
    findings
}

async fn reused_after_logout<T: HttpTarget, B: BrowserDriver>(
    kit: &ProbeKit<'_, T, B>,
    routes: &Routes,
    role: &str,
    disposable: Option<String>,
) -> Finding {
    let context = ProbeContext::new(role, SCOPE);
    let Some(token) = disposable else {
        return blocked_finding(&context, REUSED_AFTER_LOGOUT, "no disposable session to log out");
    };

    let step = kit.watchers.begin(context.clone());
    let logout = kit
        .target
        .send(logout_request(routes.prefix(), &token), StepTag::of(&step))
        .await;
    let replay_request = ProbeRequest::new(Method::GET, routes.users_me()).bearer(Some(token));
    let replay = kit.target.send(replay_request.clone(), StepTag::of(&step)).await;
    kit.watchers.finish(step);

    let logout_note = match &logout {
        Ok(resp) => format!("logout -> {}", resp.status),
        Err(e) => format!("logout failed: {}", e),
    };
    if logout.as_ref().map(|r| !(200..300).contains(&r.status)).unwrap_or(true) {
        warn!("{}: {}; replay result may not reflect revocation", REUSED_AFTER_LOGOUT, logout_note);
    }

    let (severity, details) = match &replay {
        Ok(resp) => {
            let severity = classify_adversarial(resp.status, RejectionPolicy::AuthOnly, 1);
            let verdict = if severity == Severity::Critical {
                "session was not invalidated"
            } else if severity == Severity::Pass {
                "revoked token rejected"
            } else {
                "unexpected status"
            };
            (
                severity,
                format!("{}; replay GET {} -> {}: {}", logout_note, replay_request.path, resp.status, verdict),
            )
        }
        Err(e) => (
            classify_probe_failure(failure_kind(e)),
            format!("{}; replay failed: {}", logout_note, e),
        ),
    };

    let details = scrub_text(&details, replay_request.token.as_deref());
    let url = kit.target.url_for(&replay_request.path);
    let record = ExchangeRecord::capture(&context, REUSED_AFTER_LOGOUT, &url, &replay_request, replay.as_ref())
        .with_notes(json!({ "logout": logout_note }));
    let finding = kit
        .finish(&context, REUSED_AFTER_LOGOUT, severity, details, &record)
        .await;
    info!("[{}] GET {}: {}", severity, url, REUSED_AFTER_LOGOUT);
    finding
}
