// Privilege-boundary probe
// Actions the acting role must not be allowed to perform

use super::{ProbeCase, ProbeKit, Routes};
use crate::browser::BrowserDriver;
use crate::engine::{HttpTarget, ProbeRequest};
use crate::models::{Finding, Method};
use crate::seed::{ids, SeedState};
use crate::verdict::RejectionPolicy;
use serde_json::json;

pub const SCOPE: &str = "privilege-boundary";

pub fn matrix(routes: &Routes, seed: &SeedState, escalated_role: &str) -> Vec<ProbeCase> {
    let application = seed.id(ids::APPLICATION);
    vec![
        // the candidate owns the application but not the job it was filed against
        ProbeCase::as_role(
            "candidate-sets-own-application-status",
            "candidate",
            ProbeRequest::new(Method::PATCH, routes.application_status(application))
                .json(json!({"status": "accepted"})),
            RejectionPolicy::AuthOnly,
            seed,
        ),
        ProbeCase::as_role(
            "foreign-company-sets-application-status",
            "company_b",
            ProbeRequest::new(Method::PATCH, routes.application_status(application))
                .json(json!({"status": "rejected"})),
            RejectionPolicy::AuthOnly,
            seed,
        ),
        ProbeCase::as_role(
            "candidate-creates-job",
            "candidate",
            ProbeRequest::new(Method::POST, routes.jobs()).json(json!({
                "title": "gauntlet privilege probe",
                "description": "created by a candidate token",
                "location": "remote",
            })),
            RejectionPolicy::AuthOnly,
            seed,
        ),
        ProbeCase::as_role(
            "company-creates-platform-company",
            "company",
            ProbeRequest::new(Method::POST, routes.platform_companies()).json(json!({
                "name": "gauntlet privilege probe",
            })),
            RejectionPolicy::AuthOnly,
            seed,
        ),
        ProbeCase::as_role(
            "candidate-self-escalates-role",
            "candidate",
            ProbeRequest::new(Method::PATCH, routes.users_me()).json(json!({"role": escalated_role})),
            RejectionPolicy::AuthOnly,
            seed,
        ),
    ]
}

pub async fn run<T: HttpTarget, B: BrowserDriver>(
    kit: &ProbeKit<'_, T, B>,
    routes: &Routes,
    seed: &SeedState,
    escalated_role: &str,
) -> Vec<Finding> {
    kit.run_matrix(SCOPE, matrix(routes, seed, escalated_role)).await
}
