// Runtime-state preparation for Gauntlet
// Obtains a token per role and the resource ids the probes aim at
//
// Tokens:  environment override → login → register, then login
// Ids:     seeded (created or read from the target) → environment override → configured default
//
// Setup is best-effort: every failure is logged and the next tier is tried. Only a missing
// token for a required role stops the run.

use crate::auth::{extract_token, login_request, register_request, Account};
use crate::config::{FallbackChain, Resolved, RunConfig, DEFAULT_SEED_ID, ROLES};
use crate::engine::{HttpTarget, ProbeRequest, ProbeResponse, StepTag};
use crate::error::SeedError;
use crate::models::Method;
use crate::probes::Routes;
use crate::token::{redact, subject_of};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Seed identifier names, also the lower-cased suffix of `GAUNTLET_ID_<NAME>`.
pub mod ids {
    pub const CANDIDATE: &str = "candidate_id";
    pub const CANDIDATE_B: &str = "candidate_b_id";
    pub const COMPANY: &str = "company_id";
    pub const COMPANY_B: &str = "company_b_id";
    pub const JOB: &str = "job_id";
    pub const JOB_B: &str = "job_b_id";
    pub const APPLICATION: &str = "application_id";
    pub const APPLICATION_B: &str = "application_b_id";

    pub const ALL: [&str; 8] = [
        CANDIDATE,
        CANDIDATE_B,
        COMPANY,
        COMPANY_B,
        JOB,
        JOB_B,
        APPLICATION,
        APPLICATION_B,
    ];
}

/// Tokens and ids available to the probes.
#[derive(Debug, Clone, Default)]
pub struct SeedState {
    tokens: BTreeMap<String, String>,
    token_sources: BTreeMap<String, &'static str>,
    ids: BTreeMap<String, Resolved>,
}

impl SeedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, role: &str, token: impl Into<String>) -> Self {
        self.insert_token(role, token.into(), "given");
        self
    }

    pub fn with_id(mut self, name: &str, value: impl Into<String>) -> Self {
        self.ids.insert(
            name.to_string(),
            Resolved {
                value: value.into(),
                source: "given",
            },
        );
        self
    }

    fn insert_token(&mut self, role: &str, token: String, source: &'static str) {
        self.tokens.insert(role.to_string(), token);
        self.token_sources.insert(role.to_string(), source);
    }

    pub fn token(&self, role: &str) -> Option<&str> {
        self.tokens.get(role).map(String::as_str)
    }

    pub fn token_source(&self, role: &str) -> Option<&'static str> {
        self.token_sources.get(role).copied()
    }

    /// Resolved id, or [`DEFAULT_SEED_ID`] when the name was never resolved.
    pub fn id(&self, name: &str) -> &str {
        self.ids
            .get(name)
            .map(|r| r.value.as_str())
            .unwrap_or(DEFAULT_SEED_ID)
    }

    pub fn resolved_id(&self, name: &str) -> Option<&Resolved> {
        self.ids.get(name)
    }

    /// Redacted view for the run report.
    pub fn summary(&self) -> SeedSummary {
        SeedSummary {
            tokens: self
                .tokens
                .iter()
                .map(|(role, token)| {
                    let source = self.token_sources.get(role).copied().unwrap_or("unknown");
                    (role.clone(), format!("{} ({})", redact(token), source))
                })
                .collect(),
            ids: self
                .ids
                .iter()
                .map(|(name, r)| (name.clone(), format!("{} ({})", r.value, r.source)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SeedSummary {
    pub tokens: BTreeMap<String, String>,
    pub ids: BTreeMap<String, String>,
}

/// Prepares [`SeedState`] against a target. Requests are tagged as setup, outside any step.
pub struct Seeder<'a, T> {
    target: &'a T,
    config: &'a RunConfig,
    routes: Routes,
}

impl<'a, T: HttpTarget> Seeder<'a, T> {
    pub fn new(target: &'a T, config: &'a RunConfig) -> Self {
        Self {
            target,
            config,
            routes: Routes::new(&config.api_prefix),
        }
    }

    /// Seed every role and id. Fails only when a role in `required` ends without a token.
    pub async fn prepare(&self, required: &[&str]) -> Result<SeedState, SeedError> {
        let mut state = SeedState::new();

        for role in ROLES {
            match self.acquire_token(role).await {
                Ok((token, source)) => {
                    info!("token for {} via {}: {}", role, source, redact(&token));
                    state.insert_token(role, token, source);
                }
                Err(reason) if required.contains(&role) => {
                    return Err(SeedError::MissingToken {
                        role: role.to_string(),
                        reason,
                    });
                }
                Err(reason) => warn!("no token for {}: {}; its probe cases will be skipped", role, reason),
            }
        }

        let seeded = self.seed_ids(&state).await;
        for name in ids::ALL {
            let resolved = FallbackChain::new(name)
                .then("seeded", seeded.get(name).cloned())
                .then("override", self.config.overrides.ids.get(name).cloned())
                .then("default", Some(self.config.default_id(name)))
                .resolve()
                .ok_or_else(|| SeedError::MissingId(name.to_string()))?;
            if resolved.source != "seeded" {
                warn!("{} not seeded, using {} value {}", name, resolved.source, resolved.value);
            } else {
                debug!("{} = {}", name, resolved.value);
            }
            state.ids.insert(name.to_string(), resolved);
        }

        Ok(state)
    }

    /// A new session for `role`, independent of the one in [`SeedState`]. Used where a
    /// probe needs a token it may invalidate.
    pub async fn fresh_session(&self, role: &str) -> Option<String> {
        let account = self.config.account(role)?;
        match self.login(account).await {
            Ok(token) => Some(token),
            Err(reason) => {
                warn!("could not open a fresh session for {}: {}", role, reason);
                None
            }
        }
    }

    async fn acquire_token(&self, role: &str) -> Result<(String, &'static str), String> {
        if let Some(token) = self.config.overrides.tokens.get(role) {
            return Ok((token.clone(), "override"));
        }
        let account = self
            .config
            .account(role)
            .ok_or_else(|| format!("no account configured for role `{}`", role))?;

        let login_error = match self.login(account).await {
            Ok(token) => return Ok((token, "login")),
            Err(e) => e,
        };
        debug!("login for {} failed ({}), registering", role, login_error);

        let registered = self
            .send(register_request(self.routes.prefix(), account))
            .await
            .map_err(|e| format!("login: {}; register: {}", login_error, e))?;
        if let Ok(extracted) = extract_token(&registered) {
            return Ok((extracted.token, "register"));
        }
        if !(200..300).contains(&registered.status) && registered.status != 409 {
            return Err(format!(
                "login: {}; register returned {}",
                login_error, registered.status
            ));
        }
        self.login(account)
            .await
            .map(|token| (token, "register+login"))
            .map_err(|e| format!("login after register: {}", e))
    }

    async fn login(&self, account: &Account) -> Result<String, String> {
        let resp = self.send(login_request(self.routes.prefix(), account)).await?;
        extract_token(&resp)
            .map(|extracted| extracted.token)
            .map_err(|e| e.to_string())
    }

    async fn send(&self, request: ProbeRequest) -> Result<ProbeResponse, String> {
        self.target
            .send(request, StepTag::setup("seed"))
            .await
            .map_err(|e| e.to_string())
    }

    /// Ids learnt or created on the target. Missing entries fall through to later tiers.
    async fn seed_ids(&self, state: &SeedState) -> BTreeMap<&'static str, String> {
        let mut seeded = BTreeMap::new();

        for (role, user_id, tenant_id) in [
            ("candidate", ids::CANDIDATE, None),
            ("candidate_b", ids::CANDIDATE_B, None),
            ("company", ids::COMPANY, Some(ids::COMPANY)),
            ("company_b", ids::COMPANY_B, Some(ids::COMPANY_B)),
        ] {
            let Some(token) = state.token(role) else { continue };
            let me = self.read_me(token).await;
            let id = match tenant_id {
                Some(_) => me.as_ref().and_then(company_id_in).or_else(|| me.as_ref().and_then(id_in)),
                None => me.as_ref().and_then(id_in),
            }
            .or_else(|| subject_of(token));
            if let Some(id) = id {
                seeded.insert(user_id, id);
            }
        }

        for (role, name) in [("company", ids::JOB), ("company_b", ids::JOB_B)] {
            let Some(token) = state.token(role) else { continue };
            let body = json!({
                "title": format!("Gauntlet seed job ({})", role),
                "description": "created for authorization probes",
                "location": "remote",
            });
            if let Some(id) = self.create(token, self.routes.jobs(), body).await {
                seeded.insert(name, id);
            }
        }

        for (role, job, name) in [
            ("candidate", ids::JOB, ids::APPLICATION),
            ("candidate_b", ids::JOB_B, ids::APPLICATION_B),
        ] {
            let (Some(token), Some(job_id)) = (state.token(role), seeded.get(job).cloned()) else {
                continue;
            };
            let body = json!({ "jobId": job_id });
            if let Some(id) = self.create(token, self.routes.applications(), body).await {
                seeded.insert(name, id);
            }
        }

        seeded
    }

    async fn read_me(&self, token: &str) -> Option<Value> {
        let request = ProbeRequest::new(Method::GET, self.routes.users_me()).bearer(Some(token.to_string()));
        match self.send(request).await {
            Ok(resp) if (200..300).contains(&resp.status) => resp.body.as_json().cloned(),
            Ok(resp) => {
                debug!("GET {} -> {}", self.routes.users_me(), resp.status);
                None
            }
            Err(e) => {
                warn!("GET {} failed: {}", self.routes.users_me(), e);
                None
            }
        }
    }

    async fn create(&self, token: &str, path: String, body: Value) -> Option<String> {
        let request = ProbeRequest::new(Method::POST, path.clone())
            .bearer(Some(token.to_string()))
            .json(body);
        match self.send(request).await {
            Ok(resp) if (200..300).contains(&resp.status) => resp.body.as_json().and_then(id_in),
            Ok(resp) => {
                warn!("seeding POST {} returned {}", path, resp.status);
                None
            }
            Err(e) => {
                warn!("seeding POST {} failed: {}", path, e);
                None
            }
        }
    }
}

const ID_PATHS: [&[&str]; 6] = [
    &["data", "id"],
    &["data", "_id"],
    &["data", "user", "id"],
    &["user", "id"],
    &["id"],
    &["_id"],
];

const COMPANY_ID_PATHS: [&[&str]; 5] = [
    &["data", "companyId"],
    &["data", "company", "id"],
    &["companyId"],
    &["company_id"],
    &["company", "id"],
];

/// Resource id in a create or `/users/me` response; numbers and strings both accepted.
pub fn id_in(body: &Value) -> Option<String> {
    first_scalar(body, &ID_PATHS)
}

fn company_id_in(body: &Value) -> Option<String> {
    first_scalar(body, &COMPANY_ID_PATHS)
}

fn first_scalar(body: &Value, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| {
        let mut cur = body;
        for key in path.iter() {
            cur = cur.get(*key)?;
        }
        match cur {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    })
}
