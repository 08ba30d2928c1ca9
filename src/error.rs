// Error types for Gauntlet
// One enum per concern; the binary wraps these in anyhow

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token has {0} segment(s), expected at least 2")]
    Format(usize),
    #[error("token segment is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("token segment is not a JSON object: {0}")]
    Json(String),
    #[error("signing key rejected: {0}")]
    Key(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("no browser session attached")]
    Unavailable,
    #[error("browser operation `{0}` timed out")]
    Timeout(String),
    #[error("element not found: {0}")]
    NoSuchElement(String),
    #[error("webdriver error: {0}")]
    Driver(String),
}

impl From<reqwest::Error> for BrowserError {
    fn from(err: reqwest::Error) -> Self {
        BrowserError::Driver(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login response matched no supported shape (status {status}, body keys: {keys})")]
    UnrecognisedShape { status: u16, keys: String },
    #[error("login rejected with status {0}")]
    Rejected(u16),
}

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("no token could be obtained for required role `{role}`: {reason}")]
    MissingToken { role: String, reason: String },
    #[error("no value for seed identifier `{0}` in any source")]
    MissingId(String),
}

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("evidence io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("evidence serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
