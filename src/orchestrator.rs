// Run orchestration for Gauntlet
// Fixed module order:
//
//   seed → UI flows → credential forgery → cross-resource → privilege → upload → flood
//        → input fuzz → file fuzz
//
// API probes run with or without a browser. Flows and fuzz need one and are skipped (with a
// log line, not a finding) when no session is attached.

use crate::auth::Account;
use crate::browser::BrowserDriver;
use crate::config::RunConfig;
use crate::engine::HttpTarget;
use crate::error::SeedError;
use crate::evidence::EvidenceStore;
use crate::flows::{login_flow, run_flow};
use crate::models::Finding;
use crate::mutator::{hostile_files, hostile_strings};
use crate::probes::fuzz::FuzzKit;
use crate::probes::{flood, forgery, idor, privilege, upload, ProbeKit, Routes};
use crate::reporting::RunReport;
use crate::seed::Seeder;
use crate::token::ForgeKit;
use crate::verdict::Severity;
use crate::watchers::Watchers;
use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

/// Roles without which nothing meaningful can run.
pub const REQUIRED_ROLES: [&str; 1] = ["candidate"];

const FUZZ_ROLE: &str = "candidate";

pub struct Orchestrator<'a, T, B> {
    pub config: &'a RunConfig,
    pub target: &'a T,
    pub browser: &'a B,
    pub evidence: &'a EvidenceStore,
    pub watchers: &'a Watchers,
}

impl<'a, T: HttpTarget, B: BrowserDriver> Orchestrator<'a, T, B> {
    pub fn new(
        config: &'a RunConfig,
        target: &'a T,
        browser: &'a B,
        evidence: &'a EvidenceStore,
        watchers: &'a Watchers,
    ) -> Self {
        Self {
            config,
            target,
            browser,
            evidence,
            watchers,
        }
    }

    /// Run every module and aggregate. Only seeding can abort the run.
    pub async fn run(&self) -> Result<RunReport, SeedError> {
        let started_at = Utc::now();
        let routes = Routes::new(&self.config.api_prefix);
        let action_timeout = Duration::from_millis(self.config.action_timeout_ms);

        let seeder = Seeder::new(self.target, self.config);
        let seed = seeder.prepare(&REQUIRED_ROLES).await?;
        let kit = ProbeKit::new(self.target, self.browser, self.evidence, self.watchers);
        let mut findings: Vec<Finding> = Vec::new();

        if self.browser.is_attached() {
            info!("== functional flows ==");
            for account in &self.config.accounts {
                findings.push(self.login(account, action_timeout).await);
            }
        } else {
            warn!("no browser attached, skipping UI flows and fuzz probes");
        }

        info!("== {} ==", forgery::SCOPE);
        match seed.token("candidate") {
            Some(source) => {
                let forge = ForgeKit::new(&self.config.signing_secret, &self.config.escalated_role);
                let disposable = seeder.fresh_session("candidate").await;
                findings.extend(forgery::run(&kit, &routes, "candidate", source, &forge, disposable).await);
            }
            None => warn!("no candidate token to forge from"),
        }

        info!("== {} ==", idor::SCOPE);
        findings.extend(idor::run(&kit, &routes, &seed).await);

        info!("== {} ==", privilege::SCOPE);
        findings.extend(privilege::run(&kit, &routes, &seed, &self.config.escalated_role).await);

        info!("== {} ==", upload::SCOPE);
        findings.extend(upload::run(&kit, &routes, &seed, "candidate", self.config.upload_max_bytes).await);

        info!("== {} ==", flood::SCOPE);
        let scenarios = flood::default_scenarios(&routes, &seed, self.config.flood_burst);
        findings.extend(flood::run(&kit, scenarios).await);

        if self.browser.is_attached() {
            findings.extend(self.fuzz(action_timeout).await);
        }

        let report = RunReport::new(self.config.clone(), seed.summary(), findings, started_at);
        info!("{}", report.totals.summary_line());
        Ok(report)
    }

    /// UI login from a signed-out browser. The session is shared by every role, so cookies and
    /// storage left by the previous login are cleared first.
    async fn login(&self, account: &Account, action_timeout: Duration) -> Finding {
        if let Err(e) = self.browser.reset().await {
            warn!("could not clear browser state before {} login: {}", account.role, e);
        }
        let flow = login_flow(account, &self.config.ui.login);
        run_flow(self.browser, self.watchers, self.evidence, &flow, action_timeout).await
    }

    /// Input and file fuzz as the candidate, after a fresh UI login. A failed login leaves
    /// the login finding in place and skips the fuzz cases.
    async fn fuzz(&self, action_timeout: Duration) -> Vec<Finding> {
        let mut findings = Vec::new();
        let Some(account) = self.config.account(FUZZ_ROLE) else {
            warn!("no {} account, skipping fuzz probes", FUZZ_ROLE);
            return findings;
        };

        info!("== fuzz ==");
        let login = self.login(account, action_timeout).await;
        let logged_in = login.severity() == Severity::Pass;
        findings.push(login);
        if !logged_in {
            warn!("{} UI login failed, skipping fuzz probes", FUZZ_ROLE);
            return findings;
        }

        let kit = FuzzKit {
            browser: self.browser,
            evidence: self.evidence,
            watchers: self.watchers,
            action_timeout,
            settle: Duration::from_millis(self.config.ui.settle_ms),
        };
        findings.extend(
            kit.run_inputs(FUZZ_ROLE, &self.config.ui.input_fuzz, &hostile_strings())
                .await,
        );
        findings.extend(
            kit.run_files(
                FUZZ_ROLE,
                &self.config.ui.file_fuzz,
                &hostile_files(self.config.upload_max_bytes),
            )
            .await,
        );
        findings
    }
}
