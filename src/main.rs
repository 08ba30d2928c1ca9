// Main CLI entry point for Gauntlet
// Uses clap for argument parsing; every flag also reads a GAUNTLET_* variable

use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use gauntlet::browser::{BrowserDriver, NoBrowser, WebDriverSession};
use gauntlet::config::{default_accounts, Overrides, RunConfig};
use gauntlet::engine::ApiClient;
use gauntlet::error::SeedError;
use gauntlet::evidence::EvidenceStore;
use gauntlet::orchestrator::Orchestrator;
use gauntlet::reporting::{write_reports, ExitCode, RunReport};
use gauntlet::watchers::{NetworkPolicy, TimingThresholds, Watchers};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const LOG_POLL: Duration = Duration::from_millis(200);

fn cli() -> Command {
    Command::new("gauntlet")
        .version(clap::crate_version!())
        .author("Jake Abendroth")
        .about("Security-probe orchestration and runtime observability for web application quality gates")
        .after_help("EXAMPLES:\n  gauntlet --api-url http://localhost:3000\n  gauntlet -a http://localhost:3000 -u http://localhost:5173 --webdriver http://localhost:9515\n\nEXIT CODES:\n  0 clean, 1 FAIL present, 2 CRITICAL present, 3 run aborted\n\nOVERRIDES:\n  GAUNTLET_TOKEN_<ROLE>   use this token instead of logging in (e.g. GAUNTLET_TOKEN_CANDIDATE)\n  GAUNTLET_ID_<NAME>      fallback for a seed id (e.g. GAUNTLET_ID_JOB_B_ID)")
        .arg(Arg::new("api_url")
            .short('a')
            .long("api-url")
            .env("GAUNTLET_API_URL")
            .required(true)
            .num_args(1)
            .help("Base URL of the target API host"))
        .arg(Arg::new("api_prefix")
            .long("api-prefix")
            .env("GAUNTLET_API_PREFIX")
            .num_args(1)
            .default_value("/api")
            .help("Path prefix of the REST API"))
        .arg(Arg::new("ui_url")
            .short('u')
            .long("ui-url")
            .env("GAUNTLET_UI_URL")
            .num_args(1)
            .help("Base URL of the web UI (defaults to the API URL)"))
        .arg(Arg::new("webdriver")
            .short('w')
            .long("webdriver")
            .env("GAUNTLET_WEBDRIVER_URL")
            .num_args(1)
            .help("WebDriver endpoint; without it only API probes run"))
        .arg(Arg::new("headed")
            .long("headed")
            .action(ArgAction::SetTrue)
            .help("Show the browser window"))
        .arg(Arg::new("reports_dir")
            .short('o')
            .long("reports-dir")
            .env("GAUNTLET_REPORTS_DIR")
            .num_args(1)
            .default_value("reports")
            .help("Root directory for evidence and reports"))
        .arg(Arg::new("password")
            .long("password")
            .env("GAUNTLET_PASSWORD")
            .num_args(1)
            .hide_env_values(true)
            .help("Password of the seeded test accounts"))
        .arg(Arg::new("signing_secret")
            .long("signing-secret")
            .env("GAUNTLET_SIGNING_SECRET")
            .num_args(1)
            .hide_env_values(true)
            .help("Guessed token signing secret (empty by default)"))
        .arg(Arg::new("escalated_role")
            .long("escalated-role")
            .env("GAUNTLET_ESCALATED_ROLE")
            .num_args(1)
            .default_value("admin")
            .help("Role written into escalated tokens and payloads"))
        .arg(Arg::new("request_timeout_ms")
            .long("request-timeout-ms")
            .env("GAUNTLET_REQUEST_TIMEOUT_MS")
            .num_args(1)
            .value_parser(clap::value_parser!(u64))
            .default_value("10000"))
        .arg(Arg::new("action_timeout_ms")
            .long("action-timeout-ms")
            .env("GAUNTLET_ACTION_TIMEOUT_MS")
            .num_args(1)
            .value_parser(clap::value_parser!(u64))
            .default_value("15000"))
        .arg(Arg::new("slow_threshold_ms")
            .long("slow-threshold-ms")
            .env("GAUNTLET_SLOW_THRESHOLD_MS")
            .num_args(1)
            .value_parser(clap::value_parser!(u64))
            .default_value("2000"))
        .arg(Arg::new("flood_burst")
            .long("flood-burst")
            .env("GAUNTLET_FLOOD_BURST")
            .num_args(1)
            .value_parser(clap::value_parser!(usize))
            .default_value("25")
            .help("Requests per flood scenario"))
        .arg(Arg::new("upload_max_bytes")
            .long("upload-max-bytes")
            .env("GAUNTLET_UPLOAD_MAX_BYTES")
            .num_args(1)
            .value_parser(clap::value_parser!(usize))
            .default_value("5242880")
            .help("Upload limit the target advertises; oversized cases exceed it by one byte"))
        .arg(Arg::new("default_id")
            .long("default-id")
            .num_args(1)
            .action(ArgAction::Append)
            .value_name("NAME=VALUE")
            .help("Configured default for a seed id, e.g. job_b_id=7"))
}

fn build_config(matches: &ArgMatches) -> Result<RunConfig> {
    let api_url = matches
        .get_one::<String>("api_url")
        .context("--api-url is required")?;
    let mut config = RunConfig::new(api_url.as_str());

    if let Some(ui) = matches.get_one::<String>("ui_url") {
        config.ui_base_url = ui.clone();
    }
    if let Some(prefix) = matches.get_one::<String>("api_prefix") {
        config.api_prefix = prefix.clone();
    }
    config.webdriver_url = matches.get_one::<String>("webdriver").cloned();
    config.ui.headless = !matches.get_flag("headed");
    if let Some(dir) = matches.get_one::<String>("reports_dir") {
        config.reports_dir = PathBuf::from(dir);
    }
    if let Some(password) = matches.get_one::<String>("password") {
        config.accounts = default_accounts(password);
    }
    if let Some(secret) = matches.get_one::<String>("signing_secret") {
        config.signing_secret = secret.clone();
    }
    if let Some(role) = matches.get_one::<String>("escalated_role") {
        config.escalated_role = role.clone();
    }
    if let Some(v) = matches.get_one::<u64>("request_timeout_ms") {
        config.request_timeout_ms = *v;
    }
    if let Some(v) = matches.get_one::<u64>("action_timeout_ms") {
        config.action_timeout_ms = *v;
    }
    if let Some(v) = matches.get_one::<u64>("slow_threshold_ms") {
        config.slow_threshold_ms = *v;
    }
    if let Some(v) = matches.get_one::<usize>("flood_burst") {
        config.flood_burst = *v;
    }
    if let Some(v) = matches.get_one::<usize>("upload_max_bytes") {
        config.upload_max_bytes = *v;
    }
    for pair in matches.get_many::<String>("default_id").into_iter().flatten() {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("--default-id expects NAME=VALUE, got `{}`", pair);
        };
        config
            .default_ids
            .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    config.overrides = Overrides::from_env_vars(std::env::vars());
    Ok(config)
}

fn finish(result: std::result::Result<RunReport, SeedError>, evidence: &EvidenceStore) -> Result<ExitCode> {
    let report = result.context("preparing runtime state")?;
    match write_reports(&evidence.run_dir(), &report) {
        Ok(paths) => {
            for path in paths {
                info!("report written: {}", path.display());
            }
        }
        Err(e) => warn!("could not write reports: {}", e),
    }
    Ok(report.exit())
}

async fn run(matches: &ArgMatches) -> Result<ExitCode> {
    let config = build_config(matches)?;
    info!("target {} (ui {})", config.api_base_url, config.ui_base_url);

    let watchers = Watchers::new(
        NetworkPolicy {
            slow_threshold_ms: config.slow_threshold_ms,
            ..NetworkPolicy::default()
        },
        TimingThresholds {
            api_ms: config.slow_threshold_ms,
            ..TimingThresholds::default()
        },
    );
    let client = ApiClient::new(&config.api_base_url, Duration::from_millis(config.request_timeout_ms))
        .context("building HTTP client")?
        .with_watcher(watchers.network.clone());
    let evidence = EvidenceStore::new(&config.reports_dir);

    let Some(webdriver_url) = config.webdriver_url.clone() else {
        let result = Orchestrator::new(&config, &client, &NoBrowser, &evidence, &watchers)
            .run()
            .await;
        return finish(result, &evidence);
    };

    let session = WebDriverSession::start(&webdriver_url, &config.ui_base_url, config.ui.headless)
        .await
        .with_context(|| format!("starting browser session at {}", webdriver_url))?;
    let feed = session.watch(watchers.clone(), LOG_POLL);

    let result = Orchestrator::new(&config, &client, &session, &evidence, &watchers)
        .run()
        .await;

    feed.abort();
    session.close().await;
    finish(result, &evidence)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gauntlet=info")),
        )
        .init();

    let matches = cli().get_matches();
    let code = match run(&matches).await {
        Ok(code) => code,
        Err(e) => {
            error!("run aborted: {:#}", e);
            ExitCode::Fatal
        }
    };
    std::process::exit(code.code());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let matches = cli()
            .try_get_matches_from(["gauntlet", "--api-url", "http://localhost:3000"])
            .unwrap();
        let config = build_config(&matches).unwrap();
        assert_eq!(config.api_prefix, "/api");
        assert_eq!(config.ui_base_url, "http://localhost:3000");
        assert_eq!(config.flood_burst, 25);
        assert!(config.ui.headless);
        assert!(config.webdriver_url.is_none());
    }

    #[test]
    fn test_default_id_pairs() {
        let matches = cli()
            .try_get_matches_from([
                "gauntlet",
                "-a",
                "http://x",
                "--default-id",
                "JOB_B_ID=7",
                "--default-id",
                "application_id=9",
            ])
            .unwrap();
        let config = build_config(&matches).unwrap();
        assert_eq!(config.default_id("job_b_id"), "7");
        assert_eq!(config.default_id("application_id"), "9");

        let bad = cli()
            .try_get_matches_from(["gauntlet", "-a", "http://x", "--default-id", "oops"])
            .unwrap();
        assert!(build_config(&bad).is_err());
    }
}
