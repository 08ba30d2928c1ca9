// Browser automation for Gauntlet
// A narrow driver trait plus a W3C WebDriver client (chromedriver) over reqwest.
//
// Console and network notifications come from the driver's log endpoint: the `browser` log
// for console output and the `performance` log for the page's own XHR/fetch responses.
// A background task feeds them to the watchers; `finish_step` drains whatever is still
// buffered before a step's window closes.

use crate::error::BrowserError;
use crate::models::Method;
use crate::watchers::{
    ActiveStep, BrowserLogs, DiagnosticLevel, DiagnosticMessage, NavigationTiming, PageResponse, StepWindow,
    Watchers,
};
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// W3C element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Resource types of page-initiated API calls in the performance log.
const API_RESOURCE_TYPES: [&str; 2] = ["XHR", "Fetch"];

const CLEAR_STORAGE_SCRIPT: &str = "try { window.localStorage.clear(); window.sessionStorage.clear(); } catch (e) {}";

const NAVIGATION_TIMING_SCRIPT: &str = "const n = performance.getEntriesByType('navigation')[0]; \
     return n ? {ttfb: n.responseStart, dcl: n.domContentLoadedEventEnd, load: n.loadEventEnd} : null;";

/// The only browser operations the engine uses.
pub trait BrowserDriver {
    fn navigate(&self, url: &str) -> impl Future<Output = Result<(), BrowserError>>;
    fn fill(&self, selector: &str, value: &str) -> impl Future<Output = Result<(), BrowserError>>;
    fn click(&self, selector: &str) -> impl Future<Output = Result<(), BrowserError>>;
    fn wait_for(&self, selector: &str, timeout: Duration) -> impl Future<Output = Result<(), BrowserError>>;
    /// Text of the first matching element, `None` when nothing matches.
    fn read_text(&self, selector: &str) -> impl Future<Output = Result<Option<String>, BrowserError>>;
    /// PNG bytes of the current viewport.
    fn screenshot(&self) -> impl Future<Output = Result<Vec<u8>, BrowserError>>;
    fn page_content(&self) -> impl Future<Output = Result<String, BrowserError>>;
    fn navigation_timing(&self) -> impl Future<Output = Result<NavigationTiming, BrowserError>>;

    /// Console entries and page responses buffered since the last fetch.
    fn drain_logs(&self) -> impl Future<Output = Result<BrowserLogs, BrowserError>> {
        async { Ok(BrowserLogs::default()) }
    }

    /// Drop cookies and web storage so the next login starts signed out.
    fn reset(&self) -> impl Future<Output = Result<(), BrowserError>> {
        async { Ok(()) }
    }

    /// End the session. Errors are logged; the caller is usually on an exit path.
    fn close(&self) -> impl Future<Output = ()> {
        async {}
    }

    fn is_attached(&self) -> bool {
        true
    }
}

/// Stand-in for API-only runs. Every operation reports [`BrowserError::Unavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBrowser;

impl BrowserDriver for NoBrowser {
    async fn navigate(&self, _url: &str) -> Result<(), BrowserError> {
        Err(BrowserError::Unavailable)
    }

    async fn fill(&self, _selector: &str, _value: &str) -> Result<(), BrowserError> {
        Err(BrowserError::Unavailable)
    }

    async fn click(&self, _selector: &str) -> Result<(), BrowserError> {
        Err(BrowserError::Unavailable)
    }

    async fn wait_for(&self, _selector: &str, _timeout: Duration) -> Result<(), BrowserError> {
        Err(BrowserError::Unavailable)
    }

    async fn read_text(&self, _selector: &str) -> Result<Option<String>, BrowserError> {
        Err(BrowserError::Unavailable)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        Err(BrowserError::Unavailable)
    }

    async fn page_content(&self) -> Result<String, BrowserError> {
        Err(BrowserError::Unavailable)
    }

    async fn navigation_timing(&self) -> Result<NavigationTiming, BrowserError> {
        Err(BrowserError::Unavailable)
    }

    fn is_attached(&self) -> bool {
        false
    }
}

/// One WebDriver session, exclusively owned by the run.
pub struct WebDriverSession {
    client: Client,
    session_url: String,
    base_url: String,
    /// Held across each log fetch, so a drain never races the background feed.
    log_gate: Arc<Mutex<()>>,
}

impl WebDriverSession {
    /// Open a session on a running driver (e.g. `http://localhost:9515`).
    pub async fn start(webdriver_url: &str, base_url: &str, headless: bool) -> Result<Self, BrowserError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let mut args = vec!["--window-size=1366,900", "--disable-gpu"];
        if headless {
            args.push("--headless=new");
        }
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": args,
                        "perfLoggingPrefs": { "enableNetwork": true, "enablePage": false }
                    },
                    "goog:loggingPrefs": { "browser": "ALL", "performance": "ALL" }
                }
            }
        });

        let root = webdriver_url.trim_end_matches('/');
        let resp: Value = client
            .post(format!("{}/session", root))
            .json(&capabilities)
            .send()
            .await?
            .json()
            .await?;
        let value = unwrap_value(resp)?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Driver("new session response carried no sessionId".to_string()))?;
        debug!("webdriver session {} opened", session_id);

        Ok(Self {
            client,
            session_url: format!("{}/session/{}", root, session_id),
            base_url: base_url.trim_end_matches('/').to_string(),
            log_gate: Arc::new(Mutex::new(())),
        })
    }

    async fn command(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> Result<Value, BrowserError> {
        let mut req = self.client.request(method, format!("{}{}", self.session_url, path));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp: Value = req.send().await?.json().await?;
        unwrap_value(resp)
    }

    async fn find(&self, selector: &str) -> Result<String, BrowserError> {
        let value = self
            .command(
                reqwest::Method::POST,
                "/element",
                Some(json!({"using": "css selector", "value": selector})),
            )
            .await
            .map_err(|e| match e {
                BrowserError::NoSuchElement(_) => BrowserError::NoSuchElement(selector.to_string()),
                other => other,
            })?;
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .ok_or_else(|| BrowserError::NoSuchElement(selector.to_string()))
    }

    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", self.base_url, url)
        }
    }

    /// Poll the driver logs in the background and record them against the step current on
    /// arrival. Stops when the session goes away.
    pub fn watch(&self, watchers: Watchers, interval: Duration) -> JoinHandle<()> {
        let client = self.client.clone();
        let session_url = self.session_url.clone();
        let gate = Arc::clone(&self.log_gate);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let _held = gate.lock().await;
                match fetch_logs(&client, &session_url).await {
                    Ok(logs) if logs.is_empty() => {}
                    Ok(logs) => {
                        watchers.absorb_current(logs);
                    }
                    Err(e) => {
                        debug!("log feed stopped: {}", e);
                        break;
                    }
                }
            }
        })
    }
}

/// Drain what the browser still holds for `step`, record it against that step, then close
/// the step's window.
pub async fn finish_step<B: BrowserDriver>(browser: &B, watchers: &Watchers, step: ActiveStep) -> StepWindow {
    match tokio::time::timeout(DRAIN_TIMEOUT, browser.drain_logs()).await {
        Ok(Ok(logs)) => {
            watchers.absorb(step.id, &step.context, logs);
        }
        Ok(Err(e)) => debug!("log drain for {} failed: {}", step.context, e),
        Err(_) => debug!("log drain for {} timed out", step.context),
    }
    watchers.finish(step)
}

async fn fetch_logs(client: &Client, session_url: &str) -> Result<BrowserLogs, BrowserError> {
    let console = fetch_log(client, session_url, "browser").await?;
    let performance = fetch_log(client, session_url, "performance").await?;
    Ok(BrowserLogs {
        console: parse_log_entries(&console),
        responses: parse_performance_entries(&performance),
    })
}

async fn fetch_log(client: &Client, session_url: &str, kind: &str) -> Result<Value, BrowserError> {
    let resp: Value = client
        .post(format!("{}/se/log", session_url))
        .json(&json!({ "type": kind }))
        .send()
        .await?
        .json()
        .await?;
    unwrap_value(resp)
}

/// Convert a driver log array (`[{"level": "SEVERE", "message": ".."}]`) into messages.
pub fn parse_log_entries(value: &Value) -> Vec<DiagnosticMessage> {
    value
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| {
                    let text = e.get("message")?.as_str()?.to_string();
                    let level = e.get("level").and_then(Value::as_str).unwrap_or("INFO");
                    Some(DiagnosticMessage {
                        level: DiagnosticLevel::from_driver(level),
                        text,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Pick the page's XHR/fetch responses out of a performance log array. Each entry's
/// `message` is itself JSON carrying one DevTools network event. The request method comes
/// from the matching `Network.requestWillBeSent` in the same batch, GET when it was not seen.
pub fn parse_performance_entries(value: &Value) -> Vec<PageResponse> {
    let events: Vec<Value> = value
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get("message")?.as_str())
                .filter_map(|raw| serde_json::from_str::<Value>(raw).ok())
                .filter_map(|parsed| parsed.get("message").cloned())
                .collect()
        })
        .unwrap_or_default();

    let mut methods: HashMap<String, String> = HashMap::new();
    for event in &events {
        if event.get("method").and_then(Value::as_str) != Some("Network.requestWillBeSent") {
            continue;
        }
        let params = &event["params"];
        if let (Some(id), Some(method)) = (params["requestId"].as_str(), params["request"]["method"].as_str()) {
            methods.insert(id.to_string(), method.to_string());
        }
    }

    events
        .iter()
        .filter(|event| event.get("method").and_then(Value::as_str) == Some("Network.responseReceived"))
        .filter_map(|event| {
            let params = &event["params"];
            let kind = params["type"].as_str()?;
            if !API_RESOURCE_TYPES.contains(&kind) {
                return None;
            }
            let response = &params["response"];
            let method = match params["requestId"].as_str().and_then(|id| methods.get(id)) {
                Some(name) => method_from_name(name)?,
                None => Method::GET,
            };
            let headers = response["headers"]
                .as_object()
                .map(|map| {
                    map.iter()
                        .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str().unwrap_or_default().to_string()))
                        .collect()
                })
                .unwrap_or_default();
            Some(PageResponse {
                method,
                url: response["url"].as_str()?.to_string(),
                status: response["status"].as_f64()? as u16,
                headers,
                duration_ms: response["timing"]["receiveHeadersEnd"]
                    .as_f64()
                    .filter(|ms| *ms > 0.0)
                    .map(|ms| ms.round() as u64)
                    .unwrap_or(0),
            })
        })
        .collect()
}

/// Methods the watchers judge; preflights and HEAD requests are skipped.
fn method_from_name(name: &str) -> Option<Method> {
    match name.to_ascii_uppercase().as_str() {
        "GET" => Some(Method::GET),
        "POST" => Some(Method::POST),
        "PUT" => Some(Method::PUT),
        "DELETE" => Some(Method::DELETE),
        "PATCH" => Some(Method::PATCH),
        _ => None,
    }
}

/// Strip the `{"value": ..}` envelope, turning driver errors into [`BrowserError`].
fn unwrap_value(resp: Value) -> Result<Value, BrowserError> {
    let value = resp.get("value").cloned().unwrap_or(Value::Null);
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(match error {
            "no such element" => BrowserError::NoSuchElement(message),
            "timeout" | "script timeout" => BrowserError::Timeout(message),
            _ => BrowserError::Driver(format!("{}: {}", error, message)),
        });
    }
    Ok(value)
}

fn timing_from_value(value: &Value) -> NavigationTiming {
    let ms = |key: &str| value.get(key).and_then(Value::as_f64).filter(|v| *v > 0.0).map(|v| v.round() as u64);
    NavigationTiming {
        time_to_first_byte_ms: ms("ttfb"),
        dom_content_loaded_ms: ms("dcl"),
        load_ms: ms("load"),
    }
}

impl BrowserDriver for WebDriverSession {
    async fn drain_logs(&self) -> Result<BrowserLogs, BrowserError> {
        let _held = self.log_gate.lock().await;
        fetch_logs(&self.client, &self.session_url).await
    }

    async fn reset(&self) -> Result<(), BrowserError> {
        self.command(reqwest::Method::DELETE, "/cookie", None).await?;
        self.command(
            reqwest::Method::POST,
            "/execute/sync",
            Some(json!({"script": CLEAR_STORAGE_SCRIPT, "args": []})),
        )
        .await
        .map(|_| ())
    }

    async fn close(&self) {
        if let Err(e) = self.client.delete(&self.session_url).send().await {
            warn!("failed to close webdriver session: {}", e);
        }
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.command(reqwest::Method::POST, "/url", Some(json!({"url": self.absolute(url)})))
            .await
            .map(|_| ())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        let element = self.find(selector).await?;
        self.command(reqwest::Method::POST, &format!("/element/{}/clear", element), Some(json!({})))
            .await?;
        self.command(
            reqwest::Method::POST,
            &format!("/element/{}/value", element),
            Some(json!({"text": value})),
        )
        .await
        .map(|_| ())
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let element = self.find(selector).await?;
        self.command(reqwest::Method::POST, &format!("/element/{}/click", element), Some(json!({})))
            .await
            .map(|_| ())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.find(selector).await {
                Ok(_) => return Ok(()),
                Err(BrowserError::NoSuchElement(_)) if Instant::now() < deadline => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(BrowserError::NoSuchElement(_)) => {
                    return Err(BrowserError::Timeout(format!("wait_for {}", selector)))
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn read_text(&self, selector: &str) -> Result<Option<String>, BrowserError> {
        let element = match self.find(selector).await {
            Ok(element) => element,
            Err(BrowserError::NoSuchElement(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let value = self
            .command(reqwest::Method::GET, &format!("/element/{}/text", element), None)
            .await?;
        Ok(value.as_str().map(|s| s.to_string()))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        let value = self.command(reqwest::Method::GET, "/screenshot", None).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| BrowserError::Driver("screenshot was not a string".to_string()))?;
        general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| BrowserError::Driver(format!("screenshot decode: {}", e)))
    }

    async fn page_content(&self) -> Result<String, BrowserError> {
        let value = self.command(reqwest::Method::GET, "/source", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn navigation_timing(&self) -> Result<NavigationTiming, BrowserError> {
        let value = self
            .command(
                reqwest::Method::POST,
                "/execute/sync",
                Some(json!({"script": NAVIGATION_TIMING_SCRIPT, "args": []})),
            )
            .await?;
        Ok(timing_from_value(&value))
    }
}
