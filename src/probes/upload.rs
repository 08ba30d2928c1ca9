// Malicious-upload probe
// Adversarial CV files sent as multipart; acceptance is CRITICAL, any 4xx is a pass

use super::{ProbeCase, ProbeKit, Routes};
use crate::browser::BrowserDriver;
use crate::engine::{FilePart, HttpTarget, ProbeRequest};
use crate::models::{Finding, Method};
use crate::mutator::malicious_uploads;
use crate::seed::SeedState;
use crate::verdict::RejectionPolicy;

pub const SCOPE: &str = "malicious-upload";
pub const FILE_FIELD: &str = "file";

pub fn matrix(routes: &Routes, seed: &SeedState, role: &str, max_bytes: usize) -> Vec<ProbeCase> {
    malicious_uploads(max_bytes)
        .into_iter()
        .map(|file| {
            let part = FilePart::new(FILE_FIELD, file.filename, file.content_type, file.bytes);
            ProbeCase::as_role(
                file.name,
                role,
                ProbeRequest::new(Method::POST, routes.cv_upload()).multipart(vec![part]),
                RejectionPolicy::AnyClientError,
                seed,
            )
        })
        .collect()
}

pub async fn run<T: HttpTarget, B: BrowserDriver>(
    kit: &ProbeKit<'_, T, B>,
    routes: &Routes,
    seed: &SeedState,
    role: &str,
    max_bytes: usize,
) -> Vec<Finding> {
    kit.run_matrix(SCOPE, matrix(routes, seed, role, max_bytes)).await
}
