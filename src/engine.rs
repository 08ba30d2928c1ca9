// Async HTTP engine for Gauntlet
// Uses reqwest and tokio; every response is fed to the network watcher tagged with the
// step that issued it

use crate::error::EngineError;
use crate::models::{Method, ProbeContext};
use crate::watchers::{ActiveStep, NetworkWatcher, ObservedResponse, StepId};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::{Duration, Instant};

/// Attribution carried with a request so the response can be charged to its step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTag {
    pub step: StepId,
    pub context: ProbeContext,
}

impl StepTag {
    pub fn of(step: &ActiveStep) -> Self {
        Self {
            step: step.id,
            context: step.context.clone(),
        }
    }

    /// For setup calls made outside any step.
    pub fn setup(label: &str) -> Self {
        Self {
            step: StepId(0),
            context: ProbeContext::new("setup", label),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilePart {
    pub field: String,
    pub filename: String,
    pub content_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl FilePart {
    pub fn new(
        field: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            field: field.into(),
            filename: filename.into(),
            content_type: content_type.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(Vec<FilePart>),
}

/// One outgoing request. The token is sent as `Authorization: Bearer <token>` when present.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub method: Method,
    pub path: String,
    pub token: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ProbeRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            token: None,
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn bearer(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn multipart(mut self, parts: Vec<FilePart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    /// JSON when it parses, text otherwise.
    pub fn parse(text: String) -> Self {
        match serde_json::from_str::<Value>(&text) {
            Ok(v) => ResponseBody::Json(v),
            Err(_) => ResponseBody::Text(text),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(v) => Some(v),
            ResponseBody::Text(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ResponseBody::Json(v) => v.clone(),
            ResponseBody::Text(t) => Value::String(t.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResponse {
    pub status: u16,
    /// Header names lower-cased.
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
    pub duration_ms: u64,
}

impl ProbeResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::Json(body),
            duration_ms: 0,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Request-issuing capability the probes run against.
pub trait HttpTarget: Clone + Send + Sync + 'static {
    fn send(
        &self,
        request: ProbeRequest,
        tag: StepTag,
    ) -> impl Future<Output = Result<ProbeResponse, EngineError>> + Send;

    /// Absolute URL for a path, as it appears in evidence.
    fn url_for(&self, path: &str) -> String {
        path.to_string()
    }
}

/// reqwest-backed client for the target API.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    network: Option<NetworkWatcher>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            network: None,
        })
    }

    pub fn with_watcher(mut self, network: NetworkWatcher) -> Self {
        self.network = Some(network);
        self
    }

    fn map_err(&self, err: reqwest::Error) -> EngineError {
        if err.is_timeout() {
            EngineError::Timeout(self.timeout.as_millis() as u64)
        } else {
            EngineError::Transport(err.to_string())
        }
    }

    fn build(&self, request: ProbeRequest) -> Result<reqwest::RequestBuilder, EngineError> {
        let mut req = self
            .client
            .request(request.method.into(), self.url_for(&request.path));
        if let Some(token) = &request.token {
            req = req.bearer_auth(token);
        }
        for (k, v) in &request.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req = match request.body {
            RequestBody::Empty => req,
            RequestBody::Json(body) => req.json(&body),
            RequestBody::Multipart(parts) => {
                let mut form = Form::new();
                for part in parts {
                    let file = Part::bytes(part.bytes)
                        .file_name(part.filename)
                        .mime_str(&part.content_type)
                        .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
                    form = form.part(part.field, file);
                }
                req.multipart(form)
            }
        };
        Ok(req)
    }
}

impl HttpTarget for ApiClient {
    async fn send(&self, request: ProbeRequest, tag: StepTag) -> Result<ProbeResponse, EngineError> {
        let method = request.method;
        let url = self.url_for(&request.path);
        let req = self.build(request)?;

        let started = Instant::now();
        let resp = req.send().await.map_err(|e| self.map_err(e))?;
        let status = resp.status().as_u16();
        let headers: Vec<(String, String)> = resp
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let text = resp.text().await.map_err(|e| self.map_err(e))?;
        let duration_ms = started.elapsed().as_millis() as u64;

        if let Some(network) = &self.network {
            network.observe(
                tag.step,
                &tag.context,
                ObservedResponse {
                    method,
                    url: &url,
                    status,
                    headers: &headers,
                    body: &text,
                    duration_ms,
                },
            );
        }

        Ok(ProbeResponse {
            status,
            headers,
            body: ResponseBody::parse(text),
            duration_ms,
        })
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }
}
