// Evidence storage for Gauntlet
//
// Layout: <root>/<date>/<role>/<scope>/{screenshots,snapshots,logs}/<label>-<timestamp>.<ext>
//
// Paths are derived from (role, scope, label, timestamp). Files are created exclusively; if
// the derived name already exists (same label in the same millisecond) a numeric suffix is
// added, so no artifact is ever overwritten. Tokens are redacted before anything is written.

use crate::browser::BrowserDriver;
use crate::engine::{FilePart, ProbeRequest, ProbeResponse, RequestBody};
use crate::error::{EngineError, EvidenceError};
use crate::models::{EvidenceRefs, Method, ProbeContext};
use crate::token::redact;
use crate::verdict::Severity;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const MAX_LABEL_LEN: usize = 80;
const MAX_SUFFIX: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Screenshot,
    Snapshot,
    Log,
}

impl ArtifactKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "screenshots",
            ArtifactKind::Snapshot => "snapshots",
            ArtifactKind::Log => "logs",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "png",
            ArtifactKind::Snapshot => "html",
            ArtifactKind::Log => "json",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvidenceStore {
    root: PathBuf,
    date: String,
}

impl EvidenceStore {
    /// Store under `root/<today>`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_date(root, Local::now().format("%Y-%m-%d").to_string())
    }

    pub fn with_date(root: impl Into<PathBuf>, date: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            date: date.into(),
        }
    }

    /// `root/date`, where run-level reports go.
    pub fn run_dir(&self) -> PathBuf {
        self.root.join(&self.date)
    }

    pub fn dir(&self, role: &str, scope: &str, kind: ArtifactKind) -> PathBuf {
        self.run_dir()
            .join(slug(role))
            .join(slug(scope))
            .join(kind.dir_name())
    }

    /// Deterministic path for an artifact; no filesystem access.
    pub fn artifact_path(
        &self,
        role: &str,
        scope: &str,
        kind: ArtifactKind,
        label: &str,
        at: DateTime<Utc>,
    ) -> PathBuf {
        self.dir(role, scope, kind).join(format!(
            "{}-{}.{}",
            slug(label),
            at.format("%Y%m%dT%H%M%S%3fZ"),
            kind.extension()
        ))
    }

    /// Write bytes to a fresh file; never replaces an existing one.
    pub fn write(
        &self,
        role: &str,
        scope: &str,
        kind: ArtifactKind,
        label: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, EvidenceError> {
        let path = self.artifact_path(role, scope, kind, label, Utc::now());
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        write_exclusive(&path, bytes)
    }

    pub fn write_exchange(
        &self,
        context: &ProbeContext,
        label: &str,
        record: &ExchangeRecord,
    ) -> Result<PathBuf, EvidenceError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        self.write(&context.role, &context.flow, ArtifactKind::Log, label, &bytes)
    }

    /// Best-effort exchange log; failures are logged and yield `None`.
    pub fn try_write_exchange(&self, context: &ProbeContext, label: &str, record: &ExchangeRecord) -> Option<String> {
        self.try_write_log(context, label, record)
    }

    /// Best-effort JSON log of any record (fuzz windows, flow traces).
    pub fn try_write_log<S: Serialize>(&self, context: &ProbeContext, label: &str, record: &S) -> Option<String> {
        let written = serde_json::to_vec_pretty(record)
            .map_err(EvidenceError::from)
            .and_then(|bytes| self.write(&context.role, &context.flow, ArtifactKind::Log, label, &bytes));
        match written {
            Ok(path) => Some(path.display().to_string()),
            Err(e) => {
                warn!("could not write evidence log for {} {}: {}", context, label, e);
                None
            }
        }
    }

    /// Directory for generated upload fixtures, created on demand.
    pub fn fixtures_dir(&self) -> Result<PathBuf, EvidenceError> {
        let dir = self.run_dir().join("fixtures");
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        Ok(dir)
    }

    /// Screenshot and page snapshot for a non-passing finding. PASS and INFO capture
    /// nothing; a detached browser or failed capture leaves the refs empty.
    pub async fn capture_media<B: BrowserDriver>(
        &self,
        browser: &B,
        context: &ProbeContext,
        label: &str,
        severity: Severity,
    ) -> EvidenceRefs {
        let mut refs = EvidenceRefs::default();
        if !severity.retains_media() || !browser.is_attached() {
            return refs;
        }

        match browser.screenshot().await {
            Ok(png) => {
                refs.screenshot = self.best_effort(context, ArtifactKind::Screenshot, label, &png);
            }
            Err(e) => warn!("screenshot failed for {} {}: {}", context, label, e),
        }
        match browser.page_content().await {
            Ok(html) => {
                refs.snapshot = self.best_effort(context, ArtifactKind::Snapshot, label, html.as_bytes());
            }
            Err(e) => warn!("page snapshot failed for {} {}: {}", context, label, e),
        }
        refs
    }

    fn best_effort(&self, context: &ProbeContext, kind: ArtifactKind, label: &str, bytes: &[u8]) -> Option<String> {
        match self.write(&context.role, &context.flow, kind, label, bytes) {
            Ok(path) => Some(path.display().to_string()),
            Err(e) => {
                warn!("could not write {} for {} {}: {}", kind.dir_name(), context, label, e);
                None
            }
        }
    }
}

fn write_exclusive(path: &Path, bytes: &[u8]) -> Result<PathBuf, EvidenceError> {
    let mut candidate = path.to_path_buf();
    let mut suffix = 0u32;
    loop {
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut file) => {
                file.write_all(bytes).map_err(|e| io_err(&candidate, e))?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists && suffix < MAX_SUFFIX => {
                suffix += 1;
                candidate = with_suffix(path, suffix);
            }
            Err(e) => return Err(io_err(&candidate, e)),
        }
    }
}

fn with_suffix(path: &Path, suffix: u32) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("artifact");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}-{}.{}", stem, suffix, ext),
        None => format!("{}-{}", stem, suffix),
    };
    path.with_file_name(name)
}

fn io_err(path: &Path, source: std::io::Error) -> EvidenceError {
    EvidenceError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Path-safe component: ASCII alphanumerics, `-` and `_`; everything else becomes `-`.
pub fn slug(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .take(MAX_LABEL_LEN)
        .collect();
    if out.is_empty() || out.chars().all(|c| c == '-') {
        out = "unnamed".to_string();
    }
    out
}

// ============================================
// Request/response records
// ============================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRecord {
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub scope: String,
    pub case: String,
    /// Redacted form of the bearer token sent, `null` when none was.
    pub token_used: Option<String>,
    pub request: RequestRecord,
    pub response: Option<ResponseRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub method: Method,
    pub url: String,
    pub headers: Map<String, Value>,
    pub body: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseRecord {
    pub status: u16,
    pub headers: Map<String, Value>,
    pub body: Value,
    pub duration_ms: u64,
}

impl ExchangeRecord {
    /// Build a record with every secret redacted.
    pub fn capture(
        context: &ProbeContext,
        case: &str,
        url: &str,
        request: &ProbeRequest,
        outcome: Result<&ProbeResponse, &EngineError>,
    ) -> Self {
        let mut headers = Map::new();
        if let Some(token) = &request.token {
            headers.insert(
                "authorization".to_string(),
                Value::String(format!("Bearer {}", redact(token))),
            );
        }
        for (k, v) in &request.headers {
            headers.insert(k.to_ascii_lowercase(), Value::String(redact_header(k, v)));
        }

        let (response, error) = match outcome {
            Ok(resp) => (
                Some(ResponseRecord {
                    status: resp.status,
                    headers: resp
                        .headers
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::String(scrub_text(&redact_header(k, v), request.token.as_deref()))))
                        .collect(),
                    body: scrub_value(&redact_json(&resp.body.to_value()), request.token.as_deref()),
                    duration_ms: resp.duration_ms,
                }),
                None,
            ),
            Err(e) => (None, Some(scrub_text(&e.to_string(), request.token.as_deref()))),
        };

        Self {
            timestamp: Utc::now(),
            role: context.role.clone(),
            scope: context.flow.clone(),
            case: case.to_string(),
            token_used: request.token.as_deref().map(redact),
            request: RequestRecord {
                method: request.method,
                url: url.to_string(),
                headers,
                body: scrub_value(&request_body_value(&request.body), request.token.as_deref()),
            },
            response,
            error,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: Value) -> Self {
        self.notes = Some(notes);
        self
    }
}

fn request_body_value(body: &RequestBody) -> Value {
    match body {
        RequestBody::Empty => Value::Null,
        RequestBody::Json(v) => redact_json(v),
        RequestBody::Multipart(parts) => Value::Array(parts.iter().map(part_summary).collect()),
    }
}

fn part_summary(part: &FilePart) -> Value {
    serde_json::json!({
        "field": part.field,
        "filename": part.filename,
        "contentType": part.content_type,
        "size": part.bytes.len(),
    })
}

fn redact_header(name: &str, value: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if lower == "authorization" {
        match value.split_once(' ') {
            Some((scheme, credential)) => format!("{} {}", scheme, redact(credential)),
            None => redact(value),
        }
    } else if lower == "cookie" || lower == "set-cookie" {
        redact_cookie(value)
    } else {
        value.to_string()
    }
}

fn redact_cookie(value: &str) -> String {
    value
        .split(';')
        .map(|pair| match pair.split_once('=') {
            Some((name, v)) if is_secret_key(name.trim()) => format!("{}={}", name, redact(v)),
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Key names whose string values are always redacted in stored evidence.
pub fn is_secret_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(|c| c.to_lowercase())
        .collect();
    matches!(
        normalized.as_str(),
        "password"
            | "passwd"
            | "pwd"
            | "token"
            | "accesstoken"
            | "refreshtoken"
            | "idtoken"
            | "jwt"
            | "secret"
            | "clientsecret"
            | "apikey"
            | "session"
            | "sessionid"
    )
}

/// Copy of `value` with every secret-keyed string redacted, at any depth.
pub fn redact_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) if is_secret_key(k) => Value::String(redact(s)),
                        other => redact_json(other),
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        other => other.clone(),
    }
}

/// `text` with every occurrence of the raw `token` replaced by its redacted form.
pub fn scrub_text(text: &str, token: Option<&str>) -> String {
    match token {
        Some(token) if !token.is_empty() && text.contains(token) => text.replace(token, &redact(token)),
        _ => text.to_string(),
    }
}

/// Copy of `value` with the raw `token` scrubbed from every string, whatever its key.
pub fn scrub_value(value: &Value, token: Option<&str>) -> Value {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return value.clone();
    };
    match value {
        Value::String(s) => Value::String(scrub_text(s, Some(token))),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (scrub_text(k, Some(token)), scrub_value(v, Some(token))))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| scrub_value(v, Some(token))).collect()),
        other => other.clone(),
    }
}
