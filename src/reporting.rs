// Reporting and output for Gauntlet
// Run totals, the gating exit code, and JSON, CSV and Markdown exports

use crate::config::RunConfig;
use crate::models::Finding;
use crate::seed::SeedSummary;
use crate::verdict::Severity;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Process exit status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Nothing at FAIL or above.
    Clean = 0,
    Failures = 1,
    Critical = 2,
    /// The run itself could not complete (setup abort, browser launch failure).
    Fatal = 3,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Count of findings per severity. Computed once, when the run is finalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub pass: usize,
    pub info: usize,
    pub warn: usize,
    pub fail: usize,
    pub critical: usize,
}

impl RunTotals {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut totals = RunTotals::default();
        for finding in findings {
            match finding.severity() {
                Severity::Pass => totals.pass += 1,
                Severity::Info => totals.info += 1,
                Severity::Warn => totals.warn += 1,
                Severity::Fail => totals.fail += 1,
                Severity::Critical => totals.critical += 1,
            }
        }
        totals
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Pass => self.pass,
            Severity::Info => self.info,
            Severity::Warn => self.warn,
            Severity::Fail => self.fail,
            Severity::Critical => self.critical,
        }
    }

    pub fn total(&self) -> usize {
        self.pass + self.info + self.warn + self.fail + self.critical
    }

    /// CRITICAL → 2, else FAIL → 1, else 0.
    pub fn exit_code(&self) -> ExitCode {
        if self.critical > 0 {
            ExitCode::Critical
        } else if self.fail > 0 {
            ExitCode::Failures
        } else {
            ExitCode::Clean
        }
    }

    /// `12 findings: 1 CRITICAL, 2 FAIL, 3 WARN, 0 INFO, 6 PASS`
    pub fn summary_line(&self) -> String {
        let parts: Vec<String> = Severity::ALL
            .iter()
            .rev()
            .map(|s| format!("{} {}", self.get(*s), s))
            .collect();
        format!("{} findings: {}", self.total(), parts.join(", "))
    }
}

/// Everything a run produced, in module order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config: RunConfig,
    pub seed: SeedSummary,
    pub totals: RunTotals,
    pub exit_code: i32,
    pub findings: Vec<Finding>,
}

impl RunReport {
    pub fn new(config: RunConfig, seed: SeedSummary, findings: Vec<Finding>, started_at: DateTime<Utc>) -> Self {
        let totals = RunTotals::from_findings(&findings);
        Self {
            started_at,
            finished_at: Utc::now(),
            config,
            seed,
            exit_code: totals.exit_code().code(),
            totals,
            findings,
        }
    }

    pub fn exit(&self) -> ExitCode {
        self.totals.exit_code()
    }

    /// Findings ordered CRITICAL first; module order is kept within a severity.
    pub fn by_severity(&self) -> Vec<&Finding> {
        let mut sorted: Vec<&Finding> = self.findings.iter().collect();
        sorted.sort_by(|a, b| b.severity().cmp(&a.severity()));
        sorted
    }
}

/// Escape CSV field to prevent formula injection attacks
/// Cells starting with =, +, -, @, or tab are prefixed with single quote
pub fn escape_csv_field(field: &str) -> String {
    let Some(first_char) = field.chars().next() else {
        return String::new();
    };
    let needs_escaping = matches!(first_char, '=' | '+' | '-' | '@' | '\t');

    if needs_escaping {
        format!("\"'{}\"", field.replace('"', "\"\""))
    } else if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn report_path(dir: &Path, extension: &str) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    Ok(dir.join(format!("gauntlet_report_{}.{}", timestamp, extension)))
}

pub fn export_csv(dir: &Path, findings: &[Finding]) -> Result<PathBuf, std::io::Error> {
    let path = report_path(dir, "csv")?;
    let mut file = File::create(&path)?;

    writeln!(file, "Severity,Role,Flow,Case,Details,Evidence")?;
    for finding in findings {
        let evidence = [
            &finding.evidence().log,
            &finding.evidence().screenshot,
            &finding.evidence().snapshot,
        ]
        .iter()
        .filter_map(|p| p.as_deref())
        .collect::<Vec<_>>()
        .join(" ");
        writeln!(
            file,
            "{},{},{},{},{},{}",
            finding.severity(),
            escape_csv_field(finding.role()),
            escape_csv_field(finding.flow()),
            escape_csv_field(finding.case()),
            escape_csv_field(finding.details()),
            escape_csv_field(&evidence)
        )?;
    }

    Ok(path)
}

pub fn export_markdown(dir: &Path, report: &RunReport) -> Result<PathBuf, std::io::Error> {
    let path = report_path(dir, "md")?;
    let mut file = File::create(&path)?;

    writeln!(file, "# Gauntlet Report\n")?;
    writeln!(file, "Target: {}  ", report.config.api_base_url)?;
    writeln!(
        file,
        "Run: {} → {}  ",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.finished_at.format("%H:%M:%S UTC")
    )?;
    writeln!(file, "Exit code: {}\n", report.exit_code)?;

    writeln!(file, "| Severity | Count |")?;
    writeln!(file, "|---|---|")?;
    for severity in Severity::ALL.iter().rev() {
        writeln!(file, "| {} | {} |", severity, report.totals.get(*severity))?;
    }

    writeln!(file, "\n## Findings\n")?;
    for finding in report.by_severity() {
        writeln!(
            file,
            "- **{}** {}/{} `{}`: {}",
            finding.severity(),
            finding.role(),
            finding.flow(),
            finding.case(),
            finding.details().replace('\n', " ")
        )?;
        for evidence in [
            &finding.evidence().screenshot,
            &finding.evidence().snapshot,
            &finding.evidence().log,
        ]
        .into_iter()
        .flatten()
        {
            writeln!(file, "  - {}", evidence)?;
        }
    }

    Ok(path)
}

pub fn export_json(dir: &Path, report: &RunReport) -> Result<PathBuf, std::io::Error> {
    let path = report_path(dir, "json")?;
    let bytes = serde_json::to_vec_pretty(report).map_err(std::io::Error::other)?;
    fs::write(&path, bytes)?;
    Ok(path)
}

/// All three exports into `dir`.
pub fn write_reports(dir: &Path, report: &RunReport) -> Result<Vec<PathBuf>, std::io::Error> {
    Ok(vec![
        export_json(dir, report)?,
        export_markdown(dir, report)?,
        export_csv(dir, &report.findings)?,
    ])
}
