// Input-fuzz and file-fuzz probes
// Hostile values submitted through real forms, judged by the three-way rule:
//
//   anomaly in the step window (console error, flagged response)  → FAIL
//   visible rejection message                                      → PASS
//   neither                                                        → WARN

use crate::browser::{finish_step, BrowserDriver};
use crate::config::FormTarget;
use crate::evidence::{slug, EvidenceStore};
use crate::models::{EvidenceRefs, Finding, ProbeContext};
use crate::mutator::{HostileFile, HostileInput};
use crate::response_analysis::is_visible_rejection;
use crate::verdict::{classify_edge_input, Severity};
use crate::watchers::{DiagnosticMessage, NetworkIssue, Stamped, Watchers};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

pub const INPUT_SCOPE: &str = "input-fuzz";
pub const FILE_SCOPE: &str = "file-fuzz";

const PREVIEW_CHARS: usize = 120;

/// Browser-side collaborators of the fuzz probes.
pub struct FuzzKit<'a, B> {
    pub browser: &'a B,
    pub evidence: &'a EvidenceStore,
    pub watchers: &'a Watchers,
    pub action_timeout: Duration,
    pub settle: Duration,
}

/// What goes into the field: text, or a file path for an upload control.
#[derive(Debug, Clone)]
enum Payload {
    Text(String),
    File(PathBuf),
}

impl Payload {
    fn fill_value(&self) -> String {
        match self {
            Payload::Text(s) => s.clone(),
            Payload::File(path) => path.display().to_string(),
        }
    }

    fn preview(&self) -> String {
        let raw = self.fill_value();
        let mut preview: String = raw.chars().take(PREVIEW_CHARS).collect();
        if raw.chars().count() > PREVIEW_CHARS {
            preview.push_str(&format!("... ({} chars)", raw.chars().count()));
        }
        preview
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FuzzRecord {
    timestamp: DateTime<Utc>,
    role: String,
    scope: String,
    case: String,
    page: String,
    field: String,
    input_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    diagnostics: Vec<Stamped<DiagnosticMessage>>,
    network_issues: Vec<Stamped<NetworkIssue>>,
}

impl<'a, B: BrowserDriver> FuzzKit<'a, B> {
    /// Every hostile string into every input target.
    pub async fn run_inputs(&self, role: &str, targets: &[FormTarget], inputs: &[HostileInput]) -> Vec<Finding> {
        let mut findings = Vec::with_capacity(targets.len() * inputs.len());
        for target in targets {
            for input in inputs {
                let case = format!("{}-{}", target.name, input.name);
                let payload = Payload::Text(input.value.clone());
                findings.push(self.run_case(role, INPUT_SCOPE, &case, target, payload).await);
            }
        }
        findings
    }

    /// Every hostile file into every upload control. Files are materialised under
    /// `fixtures/` in the run directory first; a file that cannot be written is reported
    /// as not executed.
    pub async fn run_files(&self, role: &str, targets: &[FormTarget], files: &[HostileFile]) -> Vec<Finding> {
        let mut findings = Vec::with_capacity(targets.len() * files.len());
        for target in targets {
            for file in files {
                let case = format!("{}-{}", target.name, file.name);
                let finding = match write_fixture(self.evidence, file) {
                    Ok(path) => self.run_case(role, FILE_SCOPE, &case, target, Payload::File(path)).await,
                    Err(e) => super::blocked_finding(
                        &ProbeContext::new(role, FILE_SCOPE),
                        &case,
                        &format!("fixture not written: {}", e),
                    ),
                };
                findings.push(finding);
            }
        }
        findings
    }

    async fn run_case(&self, role: &str, scope: &str, case: &str, target: &FormTarget, payload: Payload) -> Finding {
        let context = ProbeContext::new(role, scope);
        let step = self.watchers.begin(context.clone());
        let outcome = match timeout(self.action_timeout, self.submit(target, &payload)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("timed out after {} ms", self.action_timeout.as_millis())),
        };
        let window = finish_step(self.browser, self.watchers, step).await;

        let (severity, details, feedback, error) = match outcome {
            Ok(feedback) => {
                let anomalies = self.watchers.anomalies_in(&window);
                let visible = feedback.as_deref().map(is_visible_rejection).unwrap_or(false);
                let severity = classify_edge_input(anomalies, visible);
                let details = match severity {
                    Severity::Fail => format!("{} anomaly(ies) on {} after submitting", anomalies, target.page),
                    Severity::Pass => format!("rejected with: {}", feedback.as_deref().unwrap_or_default().trim()),
                    _ => format!("accepted silently on {}: no validation message shown", target.page),
                };
                (severity, details, feedback, None)
            }
            Err(e) => (Severity::Fail, format!("could not submit on {}: {}", target.page, e), None, Some(e)),
        };

        let record = FuzzRecord {
            timestamp: Utc::now(),
            role: role.to_string(),
            scope: scope.to_string(),
            case: case.to_string(),
            page: target.page.clone(),
            field: target.field.clone(),
            input_preview: payload.preview(),
            feedback,
            error,
            diagnostics: self.watchers.diagnostics.log().in_window(&window),
            network_issues: self.watchers.network.log().in_window(&window),
        };
        let log = self.evidence.try_write_log(&context, case, &record);
        let media = self.evidence.capture_media(self.browser, &context, case, severity).await;
        info!("[{}] {} {}: {}", severity, context, case, details);

        Finding::builder(role, scope, case, severity)
            .details(details)
            .evidence(EvidenceRefs { log, ..media })
            .build()
    }

    async fn submit(&self, target: &FormTarget, payload: &Payload) -> Result<Option<String>, crate::error::BrowserError> {
        self.browser.navigate(&target.page).await?;
        self.browser.wait_for(&target.field, self.action_timeout).await?;
        self.browser.fill(&target.field, &payload.fill_value()).await?;
        self.browser.click(&target.submit).await?;
        tokio::time::sleep(self.settle).await;
        self.browser.read_text(&target.feedback).await
    }
}

fn write_fixture(evidence: &EvidenceStore, file: &HostileFile) -> Result<PathBuf, String> {
    let dir = evidence.fixtures_dir().map_err(|e| e.to_string())?;
    let extension = Path::new(&file.filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(slug)
        .unwrap_or_else(|| "bin".to_string());
    let path = dir.join(format!("{}.{}", slug(file.name), extension));
    if !path.exists() {
        std::fs::write(&path, &file.bytes).map_err(|e| {
            warn!("fixture {} not written: {}", path.display(), e);
            e.to_string()
        })?;
    }
    // the browser resolves upload paths on its own side, so hand it an absolute one
    Ok(std::fs::canonicalize(&path).unwrap_or(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrowserError;
    use crate::mutator::{hostile_files, hostile_strings};
    use crate::models::Method;
    use crate::watchers::{BrowserLogs, NavigationTiming, NetworkPolicy, PageResponse, TimingThresholds};
    use std::sync::{Arc, Mutex};

    /// Shows `feedback` after every submit and can push a console error while submitting.
    /// `late` is what the page logs on submit but the driver only hands over when drained.
    struct Form {
        feedback: Option<String>,
        console_error: bool,
        watchers: Watchers,
        filled: Arc<Mutex<Vec<String>>>,
        late: BrowserLogs,
        buffered: Arc<Mutex<BrowserLogs>>,
    }

    impl BrowserDriver for Form {
        async fn navigate(&self, _url: &str) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn fill(&self, _selector: &str, value: &str) -> Result<(), BrowserError> {
            self.filled.lock().unwrap().push(value.to_string());
            Ok(())
        }

        async fn click(&self, _selector: &str) -> Result<(), BrowserError> {
            if self.console_error {
                self.watchers
                    .diagnostics
                    .record(DiagnosticMessage::error("Uncaught TypeError: cannot read properties of null"));
            }
            *self.buffered.lock().unwrap() = self.late.clone();
            Ok(())
        }

        async fn drain_logs(&self) -> Result<BrowserLogs, BrowserError> {
            Ok(std::mem::take(&mut *self.buffered.lock().unwrap()))
        }

        async fn wait_for(&self, _selector: &str, _timeout: Duration) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn read_text(&self, _selector: &str) -> Result<Option<String>, BrowserError> {
            Ok(self.feedback.clone())
        }

        async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
            Ok(vec![1, 2, 3])
        }

        async fn page_content(&self) -> Result<String, BrowserError> {
            Ok("<form></form>".to_string())
        }

        async fn navigation_timing(&self) -> Result<NavigationTiming, BrowserError> {
            Ok(NavigationTiming::default())
        }
    }

    fn form(feedback: Option<&str>, console_error: bool, watchers: &Watchers) -> Form {
        Form {
            feedback: feedback.map(String::from),
            console_error,
            watchers: watchers.clone(),
            filled: Arc::default(),
            late: BrowserLogs::default(),
            buffered: Arc::default(),
        }
    }

    fn target() -> FormTarget {
        FormTarget::new("profile-name", "/profile", "#name", "#save", ".error")
    }

    async fn one_case(browser: &Form, watchers: &Watchers, evidence: &EvidenceStore) -> Finding {
        let kit = FuzzKit {
            browser,
            evidence,
            watchers,
            action_timeout: Duration::from_secs(2),
            settle: Duration::from_millis(1),
        };
        let inputs = hostile_strings();
        kit.run_inputs("candidate", &[target()], &inputs[..1]).await.remove(0)
    }

    fn setup() -> (tempfile::TempDir, EvidenceStore, Watchers) {
        let dir = tempfile::tempdir().unwrap();
        let evidence = EvidenceStore::with_date(dir.path(), "2024-01-01");
        let watchers = Watchers::new(NetworkPolicy::default(), TimingThresholds::default());
        (dir, evidence, watchers)
    }

    #[tokio::test]
    async fn test_visible_rejection_passes() {
        let (_dir, evidence, watchers) = setup();
        let browser = form(Some("Name is required"), false, &watchers);
        let finding = one_case(&browser, &watchers, &evidence).await;
        assert_eq!(finding.severity(), Severity::Pass);
        assert!(finding.evidence().screenshot.is_none());
        assert!(finding.evidence().log.is_some());
    }

    #[tokio::test]
    async fn test_console_error_fails_even_with_message() {
        let (_dir, evidence, watchers) = setup();
        let browser = form(Some("Name is required"), true, &watchers);
        let finding = one_case(&browser, &watchers, &evidence).await;
        assert_eq!(finding.severity(), Severity::Fail);
        assert!(finding.evidence().screenshot.is_some());
    }

    #[tokio::test]
    async fn test_console_error_delivered_after_settle_still_fails() {
        let (_dir, evidence, watchers) = setup();
        let mut browser = form(Some("Name is required"), false, &watchers);
        browser.late.console.push(DiagnosticMessage::error("Uncaught RangeError: invalid length"));
        let finding = one_case(&browser, &watchers, &evidence).await;
        assert_eq!(finding.severity(), Severity::Fail);

        let log = std::fs::read_to_string(finding.evidence().log.clone().unwrap()).unwrap();
        assert!(log.contains("invalid length"));
        // nothing left over to land on the next step
        assert!(browser.buffered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_page_api_error_fails_submission() {
        let (_dir, evidence, watchers) = setup();
        let mut browser = form(Some("Saved"), false, &watchers);
        browser.late.responses.push(PageResponse {
            method: Method::POST,
            url: "http://app/api/profile".to_string(),
            status: 500,
            headers: Vec::new(),
            duration_ms: 30,
        });
        let finding = one_case(&browser, &watchers, &evidence).await;
        assert_eq!(finding.severity(), Severity::Fail);
        assert!(finding.details().contains("anomaly"));
    }

    #[tokio::test]
    async fn test_silent_acceptance_warns() {
        let (_dir, evidence, watchers) = setup();
        let browser = form(None, false, &watchers);
        let finding = one_case(&browser, &watchers, &evidence).await;
        assert_eq!(finding.severity(), Severity::Warn);
    }

    #[tokio::test]
    async fn test_earlier_error_not_counted() {
        let (_dir, evidence, watchers) = setup();
        // noise before any step is idle and belongs to no window
        watchers.diagnostics.record(DiagnosticMessage::error("boot noise"));
        let browser = form(Some("Invalid value"), false, &watchers);
        let finding = one_case(&browser, &watchers, &evidence).await;
        assert_eq!(finding.severity(), Severity::Pass);
    }

    #[tokio::test]
    async fn test_files_filled_by_path() {
        let (_dir, evidence, watchers) = setup();
        let browser = form(Some("Unsupported file"), false, &watchers);
        let kit = FuzzKit {
            browser: &browser,
            evidence: &evidence,
            watchers: &watchers,
            action_timeout: Duration::from_secs(2),
            settle: Duration::from_millis(1),
        };
        let files = hostile_files(1024);
        let upload = FormTarget::new("cv", "/cv", "input[type=file]", "#upload", ".error");
        let findings = kit.run_files("candidate", &[upload], &files).await;

        assert_eq!(findings.len(), files.len());
        assert!(findings.iter().all(|f| f.severity() == Severity::Pass));
        let filled = browser.filled.lock().unwrap().clone();
        assert!(filled.iter().all(|p| Path::new(p).exists()));
        assert!(filled[0].contains("fixtures"));
    }
}
