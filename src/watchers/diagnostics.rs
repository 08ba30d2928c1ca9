// Diagnostic-channel watcher
// Collects browser console output and uncaught page errors

use super::{EventLog, StepClock, StepId, StepWindow, Stamped};
use crate::models::ProbeContext;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl DiagnosticLevel {
    /// Map WebDriver/Chrome log level names.
    pub fn from_driver(level: &str) -> Self {
        match level.to_ascii_uppercase().as_str() {
            "SEVERE" | "ERROR" => DiagnosticLevel::Error,
            "WARNING" | "WARN" => DiagnosticLevel::Warning,
            "INFO" => DiagnosticLevel::Info,
            _ => DiagnosticLevel::Debug,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticMessage {
    pub level: DiagnosticLevel,
    pub text: String,
}

impl DiagnosticMessage {
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            text: text.into(),
        }
    }
}

#[derive(Clone)]
pub struct DiagnosticWatcher {
    log: EventLog<DiagnosticMessage>,
}

impl DiagnosticWatcher {
    pub fn new(clock: StepClock) -> Self {
        Self {
            log: EventLog::new(clock),
        }
    }

    pub fn log(&self) -> &EventLog<DiagnosticMessage> {
        &self.log
    }

    pub fn record(&self, message: DiagnosticMessage) {
        debug!(level = ?message.level, "console: {}", message.text);
        self.log.record(message);
    }

    pub fn record_for(&self, step: StepId, context: ProbeContext, message: DiagnosticMessage) {
        debug!(level = ?message.level, step = step.0, "console: {}", message.text);
        self.log.record_for(step, context, message);
    }

    pub fn events(&self) -> Vec<Stamped<DiagnosticMessage>> {
        self.log.snapshot()
    }

    pub fn errors_in(&self, window: &StepWindow) -> usize {
        self.log
            .in_window(window)
            .iter()
            .filter(|e| e.event.level == DiagnosticLevel::Error)
            .count()
    }
}
