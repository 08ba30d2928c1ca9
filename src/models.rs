// Core data models for Gauntlet

use crate::verdict::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::GET => write!(f, "GET"),
            Method::POST => write!(f, "POST"),
            Method::PUT => write!(f, "PUT"),
            Method::DELETE => write!(f, "DELETE"),
            Method::PATCH => write!(f, "PATCH"),
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::GET => reqwest::Method::GET,
            Method::POST => reqwest::Method::POST,
            Method::PUT => reqwest::Method::PUT,
            Method::DELETE => reqwest::Method::DELETE,
            Method::PATCH => reqwest::Method::PATCH,
        }
    }
}

/// Paths to the artifacts backing a finding. All optional; passing findings carry none
/// except the request/response log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRefs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

impl EvidenceRefs {
    pub fn is_empty(&self) -> bool {
        self.screenshot.is_none() && self.snapshot.is_none() && self.log.is_none()
    }
}

/// The normalized output of one test case.
///
/// Fields are private so a finding cannot be changed once emitted; use [`FindingBuilder`]
/// to attach evidence before calling [`FindingBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    role: String,
    flow: String,
    case: String,
    severity: Severity,
    details: String,
    #[serde(default, skip_serializing_if = "EvidenceRefs::is_empty")]
    evidence: EvidenceRefs,
}

impl Finding {
    pub fn builder(
        role: impl Into<String>,
        flow: impl Into<String>,
        case: impl Into<String>,
        severity: Severity,
    ) -> FindingBuilder {
        FindingBuilder {
            role: role.into(),
            flow: flow.into(),
            case: case.into(),
            severity,
            details: String::new(),
            evidence: EvidenceRefs::default(),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn flow(&self) -> &str {
        &self.flow
    }

    pub fn case(&self) -> &str {
        &self.case
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn details(&self) -> &str {
        &self.details
    }

    pub fn evidence(&self) -> &EvidenceRefs {
        &self.evidence
    }
}

pub struct FindingBuilder {
    role: String,
    flow: String,
    case: String,
    severity: Severity,
    details: String,
    evidence: EvidenceRefs,
}

impl FindingBuilder {
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn evidence(mut self, evidence: EvidenceRefs) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn build(self) -> Finding {
        Finding {
            role: self.role,
            flow: self.flow,
            case: self.case,
            severity: self.severity,
            details: self.details,
            evidence: self.evidence,
        }
    }
}

/// Role and flow label active for a step. Threaded explicitly into every probe and flow call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeContext {
    pub role: String,
    pub flow: String,
}

impl ProbeContext {
    pub fn new(role: impl Into<String>, flow: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            flow: flow.into(),
        }
    }

    /// Context used before any step has started.
    pub fn idle() -> Self {
        Self::new("-", "idle")
    }
}

impl fmt::Display for ProbeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.role, self.flow)
    }
}
