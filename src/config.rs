// Run configuration for Gauntlet
// Built by main.rs from CLI flags (each with a GAUNTLET_* environment fallback)

use crate::auth::Account;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const TOKEN_ENV_PREFIX: &str = "GAUNTLET_TOKEN_";
pub const ID_ENV_PREFIX: &str = "GAUNTLET_ID_";

/// Value used for any seed identifier nothing else could supply.
pub const DEFAULT_SEED_ID: &str = "2";

/// Roles the run seeds. The `_b` roles belong to a second tenant for cross-resource probes.
pub const ROLES: [&str; 5] = ["candidate", "candidate_b", "company", "company_b", "admin"];

#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub api_base_url: String,
    /// Path prefix of the REST API, e.g. `/api`.
    pub api_prefix: String,
    pub ui_base_url: String,
    pub webdriver_url: Option<String>,
    pub reports_dir: PathBuf,
    /// Guessed signing secret for forged tokens. Empty by default.
    #[serde(skip)]
    pub signing_secret: String,
    pub escalated_role: String,
    pub request_timeout_ms: u64,
    pub action_timeout_ms: u64,
    pub slow_threshold_ms: u64,
    pub flood_burst: usize,
    pub upload_max_bytes: usize,
    pub accounts: Vec<Account>,
    pub ui: UiConfig,
    #[serde(skip)]
    pub overrides: Overrides,
    pub default_ids: BTreeMap<String, String>,
}

impl RunConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        let api_base_url = api_base_url.into();
        Self {
            ui_base_url: api_base_url.clone(),
            api_base_url,
            api_prefix: "/api".to_string(),
            webdriver_url: None,
            reports_dir: PathBuf::from("reports"),
            signing_secret: String::new(),
            escalated_role: "admin".to_string(),
            request_timeout_ms: 10_000,
            action_timeout_ms: 15_000,
            slow_threshold_ms: 2_000,
            flood_burst: 25,
            upload_max_bytes: 5 * 1024 * 1024,
            accounts: default_accounts("Gauntlet!2345"),
            ui: UiConfig::default(),
            overrides: Overrides::default(),
            default_ids: BTreeMap::new(),
        }
    }

    pub fn account(&self, role: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.role == role)
    }

    /// Configured default for a seed id, falling back to [`DEFAULT_SEED_ID`].
    pub fn default_id(&self, name: &str) -> String {
        self.default_ids
            .get(name)
            .cloned()
            .unwrap_or_else(|| DEFAULT_SEED_ID.to_string())
    }
}

/// Selectors of the login page.
#[derive(Debug, Clone, Serialize)]
pub struct LoginForm {
    pub page: String,
    pub email: String,
    pub password: String,
    pub submit: String,
    /// Present only once a session is established.
    pub logged_in_marker: String,
}

impl Default for LoginForm {
    fn default() -> Self {
        Self {
            page: "/login".to_string(),
            email: "input[name=\"email\"]".to_string(),
            password: "input[name=\"password\"]".to_string(),
            submit: "button[type=\"submit\"]".to_string(),
            logged_in_marker: "[data-testid=\"user-menu\"]".to_string(),
        }
    }
}

/// A form control the fuzz probes drive: a text field or a file input.
#[derive(Debug, Clone, Serialize)]
pub struct FormTarget {
    pub name: String,
    pub page: String,
    pub field: String,
    pub submit: String,
    /// Where validation feedback appears.
    pub feedback: String,
}

impl FormTarget {
    pub fn new(name: &str, page: &str, field: &str, submit: &str, feedback: &str) -> Self {
        Self {
            name: name.to_string(),
            page: page.to_string(),
            field: field.to_string(),
            submit: submit.to_string(),
            feedback: feedback.to_string(),
        }
    }
}

const DEFAULT_FEEDBACK: &str = "[role=\"alert\"], .error, .invalid-feedback";

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub login: LoginForm,
    pub input_fuzz: Vec<FormTarget>,
    pub file_fuzz: Vec<FormTarget>,
    /// Pause after submitting before feedback is read.
    pub settle_ms: u64,
    pub headless: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            login: LoginForm::default(),
            input_fuzz: vec![FormTarget::new(
                "profile-name",
                "/profile",
                "input[name=\"name\"]",
                "button[type=\"submit\"]",
                DEFAULT_FEEDBACK,
            )],
            file_fuzz: vec![FormTarget::new(
                "cv-upload",
                "/profile/cv",
                "input[type=\"file\"]",
                "button[type=\"submit\"]",
                DEFAULT_FEEDBACK,
            )],
            settle_ms: 500,
            headless: true,
        }
    }
}

/// One account per role under a shared throwaway password.
pub fn default_accounts(password: &str) -> Vec<Account> {
    ROLES
        .iter()
        .map(|role| {
            Account::new(
                *role,
                format!("gauntlet+{}@example.test", role.replace('_', "-")),
                password,
            )
        })
        .collect()
}

/// Externally supplied tokens and seed identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub tokens: BTreeMap<String, String>,
    pub ids: BTreeMap<String, String>,
}

impl Overrides {
    /// `GAUNTLET_TOKEN_<ROLE>` and `GAUNTLET_ID_<NAME>`; keys are lower-cased, empty values ignored.
    pub fn from_env_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut overrides = Overrides::default();
        for (key, value) in vars {
            if value.trim().is_empty() {
                continue;
            }
            if let Some(role) = key.strip_prefix(TOKEN_ENV_PREFIX) {
                overrides.tokens.insert(role.to_ascii_lowercase(), value);
            } else if let Some(name) = key.strip_prefix(ID_ENV_PREFIX) {
                overrides.ids.insert(name.to_ascii_lowercase(), value);
            }
        }
        overrides
    }
}

/// One named tier of a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub name: &'static str,
    pub value: Option<String>,
}

/// A resolved value and the tier that supplied it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub value: String,
    pub source: &'static str,
}

/// Ordered list of named sources; the first tier with a non-empty value wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChain {
    pub key: String,
    pub sources: Vec<Source>,
}

impl FallbackChain {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            sources: Vec::new(),
        }
    }

    pub fn then(mut self, name: &'static str, value: Option<String>) -> Self {
        self.sources.push(Source { name, value });
        self
    }

    pub fn resolve(&self) -> Option<Resolved> {
        self.sources.iter().find_map(|s| {
            s.value
                .as_ref()
                .filter(|v| !v.is_empty())
                .map(|v| Resolved {
                    value: v.clone(),
                    source: s.name,
                })
        })
    }
}
