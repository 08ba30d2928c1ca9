// Cross-resource access probe (IDOR)
// Each actor's own token aimed at a resource owned by another actor or tenant

use super::{ProbeCase, ProbeKit, Routes};
use crate::browser::BrowserDriver;
use crate::engine::{HttpTarget, ProbeRequest};
use crate::models::{Finding, Method};
use crate::seed::{ids, SeedState};
use crate::verdict::RejectionPolicy;
use serde_json::json;

pub const SCOPE: &str = "cross-resource";

pub fn matrix(routes: &Routes, seed: &SeedState) -> Vec<ProbeCase> {
    vec![
        ProbeCase::as_role(
            "candidate-reads-other-candidate-cv",
            "candidate",
            ProbeRequest::new(Method::GET, routes.candidate_cv(seed.id(ids::CANDIDATE_B))),
            RejectionPolicy::AuthOnly,
            seed,
        ),
        ProbeCase::as_role(
            "company-lists-other-tenant-candidates",
            "company",
            ProbeRequest::new(Method::GET, routes.company_candidates(seed.id(ids::COMPANY_B))),
            RejectionPolicy::AuthOnly,
            seed,
        ),
        ProbeCase::as_role(
            "candidate-reads-other-application",
            "candidate",
            ProbeRequest::new(Method::GET, routes.application(seed.id(ids::APPLICATION_B))),
            RejectionPolicy::AuthOnly,
            seed,
        ),
        ProbeCase::as_role(
            "company-edits-other-tenant-job",
            "company",
            ProbeRequest::new(Method::PUT, routes.job(seed.id(ids::JOB_B)))
                .json(json!({"title": "gauntlet cross-tenant edit"})),
            RejectionPolicy::AuthOnly,
            seed,
        ),
    ]
}

pub async fn run<T: HttpTarget, B: BrowserDriver>(
    kit: &ProbeKit<'_, T, B>,
    routes: &Routes,
    seed: &SeedState,
) -> Vec<Finding> {
    kit.run_matrix(SCOPE, matrix(routes, seed)).await
}
